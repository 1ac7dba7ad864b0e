//! Keypair module
//!
//! Router key material: an Ed25519 identity key (signs contacts and build
//! requests) and an X25519 encryption key (session and hop key agreement).
//!
//! Secret keys are zeroized on drop.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use std::fmt;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use super::RouterId;

/// Long-term Ed25519 signing key. The public half is the [`RouterId`].
pub struct IdentityKey {
    signing: SigningKey,
}

impl IdentityKey {
    pub fn generate() -> Self {
        Self::from_seed(rand::random::<[u8; 32]>())
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&seed),
        }
    }

    /// Secret seed, for writing the keyfile
    pub fn seed(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    pub fn router_id(&self) -> RouterId {
        RouterId::from_bytes(self.signing.verifying_key().to_bytes())
    }

    /// 64-byte Ed25519 signature
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        self.signing.sign(msg).to_bytes().to_vec()
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKey")
            .field("router_id", &self.router_id())
            .finish_non_exhaustive()
    }
}

/// Long-term X25519 key advertised in the router contact.
pub struct EncryptionKey {
    secret: StaticSecret,
}

impl EncryptionKey {
    pub fn generate() -> Self {
        Self::from_bytes(rand::random::<[u8; 32]>())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            secret: StaticSecret::from(bytes),
        }
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    pub fn public(&self) -> [u8; 32] {
        X25519PublicKey::from(&self.secret).to_bytes()
    }

    /// X25519 agreement with a peer public key.
    ///
    /// Returns `None` for low-order peer keys that would yield a
    /// non-contributory secret.
    pub fn agree(&self, peer_public: &[u8; 32]) -> Option<[u8; 32]> {
        let shared = self
            .secret
            .diffie_hellman(&X25519PublicKey::from(*peer_public));
        if !shared.was_contributory() {
            return None;
        }
        Some(shared.to_bytes())
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("public", &hex::encode(&self.public()[..8]))
            .finish_non_exhaustive()
    }
}

/// Verify an Ed25519 signature by `signer` over `msg`.
/// Returns false on any malformed input.
pub fn verify(signer: &RouterId, msg: &[u8], sig: &[u8]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(signer.as_bytes()) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(sig) else {
        return false;
    };
    verifying_key.verify(msg, &signature).is_ok()
}
