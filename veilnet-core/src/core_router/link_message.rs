/*
    LinkMessage - frames exchanged between two routers over a link session

    Encoded with bincode under a size limit, then sealed with the session key
    by LinkSession before they reach the transport. Anything that fails to
    decode is dropped by the caller without a reply.

    Relay frames carry onion payloads for a PathId. Build frames carry a
    sealed extend record plus the requester's signature over the ephemeral
    key and timestamp. DHT frames carry the find/got router exchange.
*/

use bincode::Options;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core_identity::{RouterContact, RouterId, SignatureVerifier, SigningCapability};
use crate::core_path::PathId;
use crate::util::LinkBuffer;

/// Largest encoded link frame accepted or produced
pub const MAX_LINK_FRAME: usize = 64 * 1024;

const BUILD_SIGNING_TAG: &[u8; 8] = b"VEILPB01";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame of {0} bytes exceeds limit")]
    TooLarge(usize),

    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Request to become the next hop of a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathBuildRequest {
    /// Fresh X25519 public key the record was sealed with
    pub ephemeral_key: [u8; 32],
    /// ExtendRecord sealed to the receiving hop's encryption key
    pub sealed_record: Vec<u8>,
    pub timestamp_ms: u64,
    /// Router that sent the request over the link
    pub requester: RouterId,
    pub signature: Vec<u8>,
}

impl PathBuildRequest {
    pub fn new_signed(
        signer: &dyn SigningCapability,
        ephemeral_key: [u8; 32],
        sealed_record: Vec<u8>,
        timestamp_ms: u64,
    ) -> Self {
        let mut request = PathBuildRequest {
            ephemeral_key,
            sealed_record,
            timestamp_ms,
            requester: signer.router_id(),
            signature: Vec::new(),
        };
        request.signature = signer.sign(&request.signing_payload());
        request
    }

    pub fn signing_payload(&self) -> Vec<u8> {
        let mut buf = LinkBuffer::with_capacity(8 + 32 + 32 + 8 + 4 + self.sealed_record.len());
        let ok = buf.write(BUILD_SIGNING_TAG)
            && buf.write(self.requester.as_bytes())
            && buf.write(&self.ephemeral_key)
            && buf.put_u64(self.timestamp_ms)
            && buf.put_len_prefixed(&self.sealed_record);
        debug_assert!(ok, "payload sized exactly");
        buf.into_used()
    }

    pub fn verify(&self, verifier: &dyn SignatureVerifier) -> bool {
        verifier.verify(&self.requester, &self.signing_payload(), &self.signature)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkMessage {
    /// Onion payload travelling away from the originator
    RelayUpstream { path_id: PathId, payload: Vec<u8> },
    /// Onion payload travelling back toward the originator
    RelayDownstream { path_id: PathId, payload: Vec<u8> },
    PathBuild(PathBuildRequest),
    /// Answer to a build, naming the edge id the requester chose
    PathBuildReply { path_id: PathId, accepted: bool },
    PathTeardown { path_id: PathId },
    DhtFindRouter {
        txid: u64,
        target: RouterId,
        explore: bool,
    },
    DhtGotRouter {
        txid: u64,
        contacts: Vec<RouterContact>,
    },
}

pub(crate) fn codec() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_LINK_FRAME as u64)
}

impl LinkMessage {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        codec().serialize(self).map_err(|e| match *e {
            bincode::ErrorKind::SizeLimit => CodecError::TooLarge(MAX_LINK_FRAME),
            other => CodecError::Malformed(other.to_string()),
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() > MAX_LINK_FRAME {
            return Err(CodecError::TooLarge(bytes.len()));
        }
        let options = codec().reject_trailing_bytes();
        options
            .deserialize(bytes)
            .map_err(|e| CodecError::Malformed(e.to_string()))
    }

    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            LinkMessage::RelayUpstream { .. } => "relay_upstream",
            LinkMessage::RelayDownstream { .. } => "relay_downstream",
            LinkMessage::PathBuild(_) => "path_build",
            LinkMessage::PathBuildReply { .. } => "path_build_reply",
            LinkMessage::PathTeardown { .. } => "path_teardown",
            LinkMessage::DhtFindRouter { .. } => "dht_find_router",
            LinkMessage::DhtGotRouter { .. } => "dht_got_router",
        }
    }
}
