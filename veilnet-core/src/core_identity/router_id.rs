//! RouterId - stable identity of a router
//!
//! The id is the router's ed25519 verifying key, so a signature can always be
//! checked against the id itself without any lookup.

use serde::{Deserialize, Serialize};
use std::fmt;

/// 32-byte ed25519 public key naming a router.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouterId([u8; 32]);

impl RouterId {
    pub const LEN: usize = 32;

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        RouterId(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(bytes).ok().map(RouterId)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form for logs
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RouterId({})", self)
    }
}

impl From<[u8; 32]> for RouterId {
    fn from(bytes: [u8; 32]) -> Self {
        RouterId(bytes)
    }
}
