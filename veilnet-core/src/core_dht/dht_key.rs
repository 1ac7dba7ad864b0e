/*
    DhtKey - position of a router in the lookup keyspace

    Router ids are hashed with Blake3 into a 256-bit XOR space so that lookup
    targets are spread evenly regardless of how the ed25519 keys look.
    Discovery sorts contacts by XOR distance to a target key and asks the
    closest connected router.
*/

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_identity::RouterId;

/// 256-bit key in the XOR keyspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DhtKey([u8; 32]);

impl DhtKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        DhtKey(bytes)
    }

    /// Hash arbitrary data into the keyspace
    pub fn hash(data: &[u8]) -> Self {
        DhtKey(*blake3::hash(data).as_bytes())
    }

    /// Uniformly random key, used as an explore target
    pub fn random() -> Self {
        DhtKey(rand::random::<[u8; 32]>())
    }

    /// XOR distance between two keys
    pub fn distance(&self, other: &DhtKey) -> DhtKey {
        let mut result = [0u8; 32];
        for (out, (a, b)) in result.iter_mut().zip(self.0.iter().zip(other.0.iter())) {
            *out = a ^ b;
        }
        DhtKey(result)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Count leading zero bits
    pub fn leading_zeros(&self) -> u32 {
        let mut count = 0;
        for byte in &self.0 {
            if *byte == 0 {
                count += 8;
            } else {
                count += byte.leading_zeros();
                break;
            }
        }
        count
    }

    /// Length of the shared prefix with `other`, 0..=256
    pub fn common_prefix_len(&self, other: &DhtKey) -> u32 {
        self.distance(other).leading_zeros()
    }

    /// Check if this key is closer to a target than another key
    pub fn is_closer(&self, other: &DhtKey, target: &DhtKey) -> bool {
        self.distance(target) < other.distance(target)
    }
}

impl fmt::Display for DhtKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl PartialOrd for DhtKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DhtKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl From<&RouterId> for DhtKey {
    fn from(id: &RouterId) -> Self {
        DhtKey::hash(id.as_bytes())
    }
}

impl From<RouterId> for DhtKey {
    fn from(id: RouterId) -> Self {
        DhtKey::from(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_id_hashes_deterministically() {
        let id = RouterId::from_bytes([7u8; 32]);
        assert_eq!(DhtKey::from(id), DhtKey::from(&id));
        assert_ne!(DhtKey::from(id), DhtKey::from_bytes([7u8; 32]));
    }

    #[test]
    fn test_distance_properties() {
        let a = DhtKey::hash(b"alice");
        let b = DhtKey::hash(b"bob");
        assert_eq!(a.distance(&b), b.distance(&a));
        assert_eq!(a.distance(&a).as_bytes(), &[0u8; 32]);
        assert_eq!(
            DhtKey::from_bytes([0xFF; 32])
                .distance(&DhtKey::from_bytes([0; 32]))
                .as_bytes(),
            &[0xFF; 32]
        );
    }

    #[test]
    fn test_leading_zeros_and_prefix() {
        assert_eq!(DhtKey::from_bytes([0; 32]).leading_zeros(), 256);

        let mut bytes = [0u8; 32];
        bytes[0] = 0b0010_0000;
        assert_eq!(DhtKey::from_bytes(bytes).leading_zeros(), 2);

        let zero = DhtKey::from_bytes([0; 32]);
        let mut last = [0u8; 32];
        last[31] = 1;
        assert_eq!(zero.common_prefix_len(&DhtKey::from_bytes(last)), 255);
    }

    #[test]
    fn test_is_closer() {
        let target = DhtKey::from_bytes([0xFF; 32]);
        let mut near = [0xFF; 32];
        near[31] = 0xFE;
        let far = DhtKey::from_bytes([0x00; 32]);
        assert!(DhtKey::from_bytes(near).is_closer(&far, &target));
        assert!(!far.is_closer(&DhtKey::from_bytes(near), &target));
    }
}
