/*
    LinkSession - one authenticated connection to a peer router

    ┌────────────┐   ┌─────────────┐   ┌───────────────┐
    │ Connecting │──►│ Established │◄─►│ Renegotiating │
    └─────┬──────┘   └──────┬──────┘   └───────┬───────┘
          │                 ▼                  │
          │           ┌──────────┐             │
          ├──────────►│ Closing  │◄────────────┘
          │           └────┬─────┘
          │                ▼
          └──────────►  Closed   (terminal)

    Keys: HKDF-SHA256 over the X25519 secret shared by our encryption key and
    the peer contact's, salted with both router ids in sorted order so the
    two ends derive the same key. Frames are nonce || XChaCha20-Poly1305.
*/

use hkdf::Hkdf;
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::core_identity::{EncryptionKey, RouterContact, RouterId};
use crate::core_path::hop_crypto::{open_layer, seal_layer};

const LINK_KDF_INFO: &[u8] = b"veilnet link key v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Established,
    Renegotiating,
    Closing,
    Closed,
}

impl SessionState {
    /// Frames can be sealed and opened
    pub fn is_live(self) -> bool {
        matches!(self, SessionState::Established | SessionState::Renegotiating)
    }

    fn can_become(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Established)
                | (Connecting, Closing)
                | (Connecting, Closed)
                | (Established, Renegotiating)
                | (Established, Closing)
                | (Renegotiating, Established)
                | (Renegotiating, Closing)
                | (Closing, Closed)
        )
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid session transition {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("session is not live ({0:?})")]
    NotLive(SessionState),

    #[error("key agreement with peer failed")]
    KeyAgreement,

    #[error("frame encryption failed")]
    Encrypt,

    #[error("frame failed authentication")]
    Decrypt,
}

/// Symmetric key of one link session.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    key: [u8; 32],
}

impl SessionKeys {
    pub fn derive(
        local_key: &EncryptionKey,
        local_id: &RouterId,
        peer: &RouterContact,
    ) -> Result<Self, SessionError> {
        let shared = Zeroizing::new(
            local_key
                .agree(&peer.encryption_key)
                .ok_or(SessionError::KeyAgreement)?,
        );
        let (lo, hi) = if local_id <= &peer.router_id {
            (local_id, &peer.router_id)
        } else {
            (&peer.router_id, local_id)
        };
        let mut salt = [0u8; 64];
        salt[..32].copy_from_slice(lo.as_bytes());
        salt[32..].copy_from_slice(hi.as_bytes());

        let mut key = [0u8; 32];
        Hkdf::<Sha256>::new(Some(&salt), &shared[..])
            .expand(LINK_KDF_INFO, &mut key)
            .map_err(|_| SessionError::KeyAgreement)?;
        Ok(SessionKeys { key })
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
        seal_layer(&self.key, plaintext).map_err(|_| SessionError::Encrypt)
    }

    pub fn open(&self, frame: &[u8]) -> Result<Vec<u8>, SessionError> {
        open_layer(&self.key, frame).map_err(|_| SessionError::Decrypt)
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKeys(..)")
    }
}

#[derive(Debug)]
pub struct LinkSession {
    contact: Arc<RouterContact>,
    keys: SessionKeys,
    state: SessionState,
    pub created_ms: u64,
    pub connect_deadline_ms: Option<u64>,
    pub persist_until_ms: u64,
    pub last_activity_ms: u64,
}

impl LinkSession {
    /// Outbound attempt waiting for the transport to connect.
    pub fn connecting(
        contact: Arc<RouterContact>,
        keys: SessionKeys,
        now_ms: u64,
        connect_timeout_ms: u64,
    ) -> Self {
        LinkSession {
            contact,
            keys,
            state: SessionState::Connecting,
            created_ms: now_ms,
            connect_deadline_ms: Some(now_ms.saturating_add(connect_timeout_ms)),
            persist_until_ms: 0,
            last_activity_ms: now_ms,
        }
    }

    /// Session the transport reported as already up.
    pub fn established(contact: Arc<RouterContact>, keys: SessionKeys, now_ms: u64) -> Self {
        LinkSession {
            contact,
            keys,
            state: SessionState::Established,
            created_ms: now_ms,
            connect_deadline_ms: None,
            persist_until_ms: 0,
            last_activity_ms: now_ms,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn contact(&self) -> &Arc<RouterContact> {
        &self.contact
    }

    pub fn router_id(&self) -> RouterId {
        self.contact.router_id
    }

    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }

    pub fn transition(&mut self, to: SessionState) -> Result<(), SessionError> {
        if !self.state.can_become(to) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        trace!(peer = %self.contact.router_id, from = ?self.state, ?to, "session transition");
        self.state = to;
        if to != SessionState::Connecting {
            self.connect_deadline_ms = None;
        }
        Ok(())
    }

    /// Connecting -> Established with the contact and keys the handshake produced.
    pub fn complete(
        &mut self,
        contact: Arc<RouterContact>,
        keys: SessionKeys,
        now_ms: u64,
    ) -> Result<(), SessionError> {
        if self.state != SessionState::Connecting {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: SessionState::Established,
            });
        }
        self.transition(SessionState::Established)?;
        self.contact = contact;
        self.keys = keys;
        self.last_activity_ms = now_ms;
        Ok(())
    }

    /// Swap in a newer contact and fresh keys in one step.
    pub fn renegotiate(
        &mut self,
        contact: Arc<RouterContact>,
        keys: SessionKeys,
        now_ms: u64,
    ) -> Result<(), SessionError> {
        self.transition(SessionState::Renegotiating)?;
        self.contact = contact;
        self.keys = keys;
        self.last_activity_ms = now_ms;
        self.transition(SessionState::Established)?;
        debug!(peer = %self.contact.router_id, version = self.contact.version, "session renegotiated");
        Ok(())
    }

    /// Close for good. Safe from any non-terminal state.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if self.state != SessionState::Closing && self.state != SessionState::Connecting {
            self.state = SessionState::Closing;
        }
        self.state = SessionState::Closed;
        self.connect_deadline_ms = None;
    }

    pub fn persist_until(&mut self, until_ms: u64) {
        self.persist_until_ms = self.persist_until_ms.max(until_ms);
    }

    pub fn connect_expired(&self, now_ms: u64) -> bool {
        self.state == SessionState::Connecting
            && self.connect_deadline_ms.is_some_and(|d| now_ms >= d)
    }

    /// Live, unpinned and quiet for at least `idle_ms`.
    pub fn is_idle(&self, now_ms: u64, idle_ms: u64) -> bool {
        self.is_live()
            && now_ms >= self.persist_until_ms
            && now_ms.saturating_sub(self.last_activity_ms) >= idle_ms
    }

    pub fn seal(&mut self, plaintext: &[u8], now_ms: u64) -> Result<Vec<u8>, SessionError> {
        if !self.is_live() {
            return Err(SessionError::NotLive(self.state));
        }
        let frame = self.keys.seal(plaintext)?;
        self.last_activity_ms = now_ms;
        Ok(frame)
    }

    pub fn open(&mut self, frame: &[u8], now_ms: u64) -> Result<Vec<u8>, SessionError> {
        if !self.is_live() {
            return Err(SessionError::NotLive(self.state));
        }
        let plain = self.keys.open(frame)?;
        self.last_activity_ms = now_ms;
        Ok(plain)
    }
}
