/*
    RouterContact - signed, versioned advertisement of a router

    Carries the router id, reachable addresses, the x25519 key used for session
    and hop key agreement, a monotonic version and the signing time.

    Contacts are immutable once signed. Stores hold them as Arc<RouterContact>
    and swap the whole Arc when a valid contact with a higher version arrives.

    Acceptance (verify):
    1. addresses: 1..=MAX_CONTACT_ADDRESSES, non-empty, no duplicates
    2. signature: ed25519 by router_id over the canonical payload
    3. freshness: not older than the contact lifetime, not further in the
       future than the allowed skew
*/

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

use super::signing::{SignatureVerifier, SigningCapability};
use super::RouterId;
use crate::config::RouterSection;
use crate::util::LinkBuffer;

pub const MAX_CONTACT_ADDRESSES: usize = 8;
pub const MAX_ADDRESS_LEN: usize = 255;

const SIGNING_TAG: &[u8; 8] = b"VEILRC01";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContactError {
    #[error("invalid contact signature")]
    InvalidSignature,

    #[error("contact expired")]
    Expired,

    #[error("contact timestamp too far in the future")]
    FromFuture,

    #[error("invalid contact addresses: {0}")]
    BadAddresses(&'static str),

    #[error("contact version {offered} not newer than {current}")]
    Stale { offered: u64, current: u64 },

    #[error("address {0} is advertised by another router")]
    AddressInUse(String),

    #[error("contact names the local router")]
    SelfContact,
}

/// Freshness rules applied to every contact we accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContactPolicy {
    pub lifetime_ms: u64,
    pub max_skew_ms: u64,
}

impl ContactPolicy {
    pub fn new(lifetime: Duration, max_skew: Duration) -> Self {
        Self {
            lifetime_ms: lifetime.as_millis() as u64,
            max_skew_ms: max_skew.as_millis() as u64,
        }
    }

    pub fn from_config(config: &RouterSection) -> Self {
        Self::new(config.contact_lifetime, config.max_clock_skew)
    }
}

impl Default for ContactPolicy {
    fn default() -> Self {
        Self::from_config(&RouterSection::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterContact {
    pub router_id: RouterId,
    pub addresses: Vec<String>,
    pub encryption_key: [u8; 32],
    pub version: u64,
    pub timestamp_ms: u64,
    pub signature: Vec<u8>,
}

impl RouterContact {
    /// Build and sign a contact for the local router.
    pub fn new_signed(
        signer: &dyn SigningCapability,
        addresses: Vec<String>,
        version: u64,
        timestamp_ms: u64,
    ) -> Result<Self, ContactError> {
        let mut contact = RouterContact {
            router_id: signer.router_id(),
            addresses,
            encryption_key: signer.encryption_public(),
            version,
            timestamp_ms,
            signature: Vec::new(),
        };
        contact.check_addresses()?;
        let payload = contact.signing_payload();
        contact.signature = signer.sign(&payload);
        Ok(contact)
    }

    /// Canonical bytes covered by the signature.
    pub fn signing_payload(&self) -> Vec<u8> {
        let addr_bytes: usize = self.addresses.iter().map(|a| 2 + a.len()).sum();
        let mut buf = LinkBuffer::with_capacity(8 + 32 + 32 + 8 + 8 + 1 + addr_bytes);
        let mut ok = buf.write(SIGNING_TAG)
            && buf.write(self.router_id.as_bytes())
            && buf.write(&self.encryption_key)
            && buf.put_u64(self.version)
            && buf.put_u64(self.timestamp_ms)
            && buf.put_u8(self.addresses.len().min(u8::MAX as usize) as u8);
        for addr in &self.addresses {
            ok = ok && buf.put_u16(addr.len().min(u16::MAX as usize) as u16) && buf.write(addr.as_bytes());
        }
        debug_assert!(ok, "payload sized exactly");
        buf.into_used()
    }

    pub fn check_addresses(&self) -> Result<(), ContactError> {
        if self.addresses.is_empty() {
            return Err(ContactError::BadAddresses("no addresses"));
        }
        if self.addresses.len() > MAX_CONTACT_ADDRESSES {
            return Err(ContactError::BadAddresses("too many addresses"));
        }
        let mut seen = HashSet::with_capacity(self.addresses.len());
        for addr in &self.addresses {
            if addr.is_empty() || addr.len() > MAX_ADDRESS_LEN {
                return Err(ContactError::BadAddresses("address length"));
            }
            if !seen.insert(addr.as_str()) {
                return Err(ContactError::BadAddresses("duplicate address"));
            }
        }
        Ok(())
    }

    pub fn verify_signature(&self, verifier: &dyn SignatureVerifier) -> bool {
        verifier.verify(&self.router_id, &self.signing_payload(), &self.signature)
    }

    pub fn check_freshness(&self, now_ms: u64, policy: &ContactPolicy) -> Result<(), ContactError> {
        if self.timestamp_ms > now_ms.saturating_add(policy.max_skew_ms) {
            return Err(ContactError::FromFuture);
        }
        if self.expires_at(policy) <= now_ms {
            return Err(ContactError::Expired);
        }
        Ok(())
    }

    /// Full acceptance check for a contact received from anyone.
    pub fn verify(
        &self,
        verifier: &dyn SignatureVerifier,
        now_ms: u64,
        policy: &ContactPolicy,
    ) -> Result<(), ContactError> {
        self.check_addresses()?;
        if !self.verify_signature(verifier) {
            return Err(ContactError::InvalidSignature);
        }
        self.check_freshness(now_ms, policy)
    }

    pub fn expires_at(&self, policy: &ContactPolicy) -> u64 {
        self.timestamp_ms.saturating_add(policy.lifetime_ms)
    }

    pub fn is_newer_than(&self, other: &RouterContact) -> bool {
        self.version > other.version
    }
}
