//! Router identity: ids, key material, signing capabilities and the signed
//! router contacts every other subsystem trusts.

pub mod keypair;
pub mod router_contact;
pub mod router_id;
pub mod signing;

pub use keypair::{EncryptionKey, IdentityKey};
pub use router_contact::{ContactError, ContactPolicy, RouterContact, MAX_CONTACT_ADDRESSES};
pub use router_id::RouterId;
pub use signing::{Ed25519Verifier, Identity, IdentityError, SignatureVerifier, SigningCapability};
