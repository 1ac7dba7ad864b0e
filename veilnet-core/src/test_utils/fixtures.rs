//! Fixtures for routers, contacts and sessions.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core_identity::{
    EncryptionKey, Identity, IdentityKey, RouterContact, RouterId, SigningCapability,
};
use crate::core_router::SessionAccess;

/// Wall clock used by fixtures; contacts are signed at this instant.
pub const TEST_NOW_MS: u64 = 1_700_000_000_000;

/// A router whose keys are derived from a one-byte seed.
pub struct TestRouter {
    pub n: u8,
    pub identity: Identity,
}

impl TestRouter {
    pub fn new(n: u8) -> Self {
        let mut id_seed = [0u8; 32];
        id_seed[0] = n;
        id_seed[31] = 0x11;
        let mut enc_seed = [0u8; 32];
        enc_seed[0] = n;
        enc_seed[31] = 0x22;
        let identity = Identity::from_keys(
            IdentityKey::from_seed(id_seed),
            EncryptionKey::from_bytes(enc_seed),
        );
        TestRouter { n, identity }
    }

    pub fn id(&self) -> RouterId {
        self.identity.router_id()
    }

    pub fn address(&self) -> String {
        format!("10.0.0.{}:1090", self.n)
    }

    /// Contact signed at `TEST_NOW_MS` with this router's single address.
    pub fn contact(&self, version: u64) -> RouterContact {
        signed_contact(&self.identity, vec![self.address()], version)
    }
}

pub fn signed_contact(identity: &Identity, addresses: Vec<String>, version: u64) -> RouterContact {
    RouterContact::new_signed(identity, addresses, version, TEST_NOW_MS)
        .expect("fixture contact is well formed")
}

/// Session view backed by a plain list of connected contacts.
#[derive(Default)]
pub struct FakeSessions {
    pub contacts: Vec<Arc<RouterContact>>,
    pub persisted: HashMap<RouterId, u64>,
}

impl FakeSessions {
    pub fn with(contacts: Vec<RouterContact>) -> Self {
        FakeSessions {
            contacts: contacts.into_iter().map(Arc::new).collect(),
            persisted: HashMap::new(),
        }
    }
}

impl SessionAccess for FakeSessions {
    fn has_session(&self, router: &RouterId) -> bool {
        self.contacts.iter().any(|rc| rc.router_id == *router)
    }

    fn connected_contacts(&self) -> Vec<Arc<RouterContact>> {
        self.contacts.clone()
    }

    fn number_of_connected(&self) -> usize {
        self.contacts.len()
    }

    fn persist_session_until(&mut self, router: &RouterId, until_ms: u64) {
        if self.has_session(router) {
            let entry = self.persisted.entry(*router).or_insert(0);
            *entry = (*entry).max(until_ms);
        }
    }
}
