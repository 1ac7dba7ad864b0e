use super::{PathError, PathId};
use crate::util::LinkBuffer;

const RECORD_VERSION: u8 = 1;

/// Per-hop instructions sealed to that hop's encryption key.
///
/// The hop learns the two edge ids it must answer to and how long to keep
/// the hop installed. Nothing in it names the originator or other hops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendRecord {
    /// Edge id shared with the previous router
    pub rx_id: PathId,
    /// Edge id shared with the next router, once there is one
    pub tx_id: PathId,
    pub lifetime_ms: u64,
}

impl ExtendRecord {
    pub const ENCODED_LEN: usize = 1 + PathId::LEN * 2 + 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = LinkBuffer::with_capacity(Self::ENCODED_LEN);
        let ok = buf.put_u8(RECORD_VERSION)
            && buf.write(self.rx_id.as_bytes())
            && buf.write(self.tx_id.as_bytes())
            && buf.put_u64(self.lifetime_ms);
        debug_assert!(ok);
        buf.into_used()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PathError> {
        let mut buf = LinkBuffer::new(bytes);
        if buf.read_u8() != Some(RECORD_VERSION) {
            return Err(PathError::MalformedRecord);
        }
        let rx_id = buf.read_array::<16>().ok_or(PathError::MalformedRecord)?;
        let tx_id = buf.read_array::<16>().ok_or(PathError::MalformedRecord)?;
        let lifetime_ms = buf.read_u64().ok_or(PathError::MalformedRecord)?;
        if !buf.is_exhausted() {
            return Err(PathError::MalformedRecord);
        }
        Ok(ExtendRecord {
            rx_id: PathId::from_bytes(rx_id),
            tx_id: PathId::from_bytes(tx_id),
            lifetime_ms,
        })
    }
}
