/*
    RoutingMessage - typed payloads carried inside a path

    Frame: tag u8 | body length u32 | body, written with LinkBuffer.

    Tags 1-3 are control messages the router consumes itself (extending a
    path, the extend answer, latency probes). Everything else is handed to
    the dispatcher.
*/

use bincode::Options;

use super::link_message::{codec, CodecError};
use crate::core_identity::RouterContact;
use crate::util::LinkBuffer;

const HEADER_LEN: usize = 1 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum RoutingMessageType {
    PathExtend = 1,
    PathExtendReply = 2,
    PathLatency = 3,
    DataTransfer = 4,
    DataDiscard = 5,
}

impl RoutingMessageType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::PathExtend),
            2 => Some(Self::PathExtendReply),
            3 => Some(Self::PathLatency),
            4 => Some(Self::DataTransfer),
            5 => Some(Self::DataDiscard),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Consumed by the router rather than dispatched
    pub fn is_control(self) -> bool {
        matches!(
            self,
            Self::PathExtend | Self::PathExtendReply | Self::PathLatency
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingMessage {
    /// Ask the terminal hop to grow the path by one router
    PathExtend {
        next_hop: RouterContact,
        ephemeral_key: [u8; 32],
        sealed_record: Vec<u8>,
    },
    PathExtendReply { accepted: bool },
    /// Round trip probe; the terminal hop echoes it with `reply` set
    PathLatency { sent_ms: u64, reply: bool },
    DataTransfer { protocol: u16, payload: Vec<u8> },
    /// Tells the far end a data message was discarded
    DataDiscard { sequence: u64 },
}

fn malformed(what: &str) -> CodecError {
    CodecError::Malformed(what.to_string())
}

impl RoutingMessage {
    pub fn message_type(&self) -> RoutingMessageType {
        match self {
            RoutingMessage::PathExtend { .. } => RoutingMessageType::PathExtend,
            RoutingMessage::PathExtendReply { .. } => RoutingMessageType::PathExtendReply,
            RoutingMessage::PathLatency { .. } => RoutingMessageType::PathLatency,
            RoutingMessage::DataTransfer { .. } => RoutingMessageType::DataTransfer,
            RoutingMessage::DataDiscard { .. } => RoutingMessageType::DataDiscard,
        }
    }

    fn encode_body(&self) -> Result<Vec<u8>, CodecError> {
        let body = match self {
            RoutingMessage::PathExtend {
                next_hop,
                ephemeral_key,
                sealed_record,
            } => {
                let contact = codec()
                    .serialize(next_hop)
                    .map_err(|e| CodecError::Malformed(e.to_string()))?;
                let mut buf =
                    LinkBuffer::with_capacity(4 + contact.len() + 32 + 4 + sealed_record.len());
                let ok = buf.put_len_prefixed(&contact)
                    && buf.write(ephemeral_key)
                    && buf.put_len_prefixed(sealed_record);
                debug_assert!(ok);
                buf.into_used()
            }
            RoutingMessage::PathExtendReply { accepted } => vec![u8::from(*accepted)],
            RoutingMessage::PathLatency { sent_ms, reply } => {
                let mut buf = LinkBuffer::with_capacity(9);
                let ok = buf.put_u64(*sent_ms) && buf.put_u8(u8::from(*reply));
                debug_assert!(ok);
                buf.into_used()
            }
            RoutingMessage::DataTransfer { protocol, payload } => {
                let mut buf = LinkBuffer::with_capacity(2 + payload.len());
                let ok = buf.put_u16(*protocol) && buf.write(payload);
                debug_assert!(ok);
                buf.into_used()
            }
            RoutingMessage::DataDiscard { sequence } => sequence.to_be_bytes().to_vec(),
        };
        Ok(body)
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let body = self.encode_body()?;
        let len = u32::try_from(body.len()).map_err(|_| CodecError::TooLarge(body.len()))?;
        let mut buf = LinkBuffer::with_capacity(HEADER_LEN + body.len());
        let ok = buf.put_u8(self.message_type().tag()) && buf.put_u32(len) && buf.write(&body);
        debug_assert!(ok);
        Ok(buf.into_used())
    }

    /// Read just the tag, without decoding the body.
    pub fn peek_type(bytes: &[u8]) -> Option<RoutingMessageType> {
        bytes.first().copied().and_then(RoutingMessageType::from_tag)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut buf = LinkBuffer::new(bytes);
        let tag = buf.read_u8().ok_or_else(|| malformed("empty routing message"))?;
        let kind = RoutingMessageType::from_tag(tag)
            .ok_or_else(|| CodecError::Malformed(format!("unknown routing tag {}", tag)))?;
        let len = buf.read_u32().ok_or_else(|| malformed("truncated header"))? as usize;
        if len != buf.size_left() {
            return Err(malformed("body length mismatch"));
        }
        let body = buf.remaining();
        Self::decode_body(kind, body)
    }

    fn decode_body(kind: RoutingMessageType, body: &[u8]) -> Result<Self, CodecError> {
        let mut buf = LinkBuffer::new(body);
        let msg = match kind {
            RoutingMessageType::PathExtend => {
                let contact_len = buf.read_u32().ok_or_else(|| malformed("extend"))? as usize;
                let contact_bytes = buf
                    .read_bytes(contact_len)
                    .ok_or_else(|| malformed("extend contact"))?;
                let next_hop: RouterContact = codec()
                    .deserialize(contact_bytes)
                    .map_err(|e| CodecError::Malformed(e.to_string()))?;
                let ephemeral_key = buf
                    .read_array::<32>()
                    .ok_or_else(|| malformed("extend key"))?;
                let record_len = buf.read_u32().ok_or_else(|| malformed("extend"))? as usize;
                let sealed_record = buf
                    .read_bytes(record_len)
                    .ok_or_else(|| malformed("extend record"))?
                    .to_vec();
                RoutingMessage::PathExtend {
                    next_hop,
                    ephemeral_key,
                    sealed_record,
                }
            }
            RoutingMessageType::PathExtendReply => match buf.read_u8() {
                Some(0) => RoutingMessage::PathExtendReply { accepted: false },
                Some(1) => RoutingMessage::PathExtendReply { accepted: true },
                _ => return Err(malformed("extend reply")),
            },
            RoutingMessageType::PathLatency => {
                let sent_ms = buf.read_u64().ok_or_else(|| malformed("latency"))?;
                let reply = match buf.read_u8() {
                    Some(0) => false,
                    Some(1) => true,
                    _ => return Err(malformed("latency flag")),
                };
                RoutingMessage::PathLatency { sent_ms, reply }
            }
            RoutingMessageType::DataTransfer => {
                let protocol = buf.read_u16().ok_or_else(|| malformed("data"))?;
                let payload = buf.remaining().to_vec();
                let _ = buf.seek(buf.size());
                RoutingMessage::DataTransfer { protocol, payload }
            }
            RoutingMessageType::DataDiscard => RoutingMessage::DataDiscard {
                sequence: buf.read_u64().ok_or_else(|| malformed("discard"))?,
            },
        };
        if !buf.is_exhausted() {
            return Err(malformed("trailing bytes in routing message"));
        }
        Ok(msg)
    }
}
