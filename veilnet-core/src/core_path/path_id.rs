use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one edge of a path at one router.
///
/// The originator draws a fresh id per edge, so the same path is known by a
/// different id on every link it crosses.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathId([u8; 16]);

impl PathId {
    pub const LEN: usize = 16;

    pub fn random() -> Self {
        PathId(rand::random::<[u8; 16]>())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        PathId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..6]))
    }
}

impl fmt::Debug for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathId({})", hex::encode(self.0))
    }
}
