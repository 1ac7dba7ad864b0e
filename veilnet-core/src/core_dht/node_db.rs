/*
    NodeDb - the router's store of known router contacts

    Holds one Arc<RouterContact> per RouterId plus an index of which router
    advertises which address. Entries are never edited: a newer contact
    replaces the Arc wholesale, so readers holding the old Arc keep a
    consistent view.

    Insertion assumes the contact already passed RouterContact::verify; the
    store itself enforces version monotonicity and address ownership.

    Persistence writes a bincode snapshot to disk. Those calls are blocking and
    are run from tokio's blocking pool by the router handle.
*/

use bincode::Options;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::DhtKey;
use crate::core_identity::{ContactError, ContactPolicy, RouterContact, RouterId};

const SNAPSHOT_FILE: &str = "contacts.bin";
const MAX_SNAPSHOT_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum NodeDbError {
    #[error("contact snapshot io: {0}")]
    Io(#[from] std::io::Error),

    #[error("contact snapshot encoding: {0}")]
    Codec(#[from] bincode::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Replaced { previous_version: u64 },
}

/// Read access to stored contacts, used by session renegotiation checks.
pub trait ContactStore {
    fn contact(&self, id: &RouterId) -> Option<Arc<RouterContact>>;

    /// Router currently advertising `address`, if any
    fn owner_of_address(&self, address: &str) -> Option<RouterId>;
}

#[derive(Debug)]
pub struct NodeDb {
    contacts: HashMap<RouterId, Arc<RouterContact>>,
    address_owner: HashMap<String, RouterId>,
    max_contacts: usize,
}

impl NodeDb {
    pub fn new(max_contacts: usize) -> Self {
        Self {
            contacts: HashMap::new(),
            address_owner: HashMap::new(),
            max_contacts: max_contacts.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn get(&self, id: &RouterId) -> Option<Arc<RouterContact>> {
        self.contacts.get(id).cloned()
    }

    pub fn contains(&self, id: &RouterId) -> bool {
        self.contacts.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<RouterContact>> {
        self.contacts.values()
    }

    /// Store a verified contact.
    ///
    /// Fails with `Stale` unless the version is strictly greater than the
    /// stored one, and with `AddressInUse` when another router advertises one
    /// of the addresses.
    pub fn insert(&mut self, rc: RouterContact) -> Result<InsertOutcome, ContactError> {
        let id = rc.router_id;
        if let Some(existing) = self.contacts.get(&id) {
            if !rc.is_newer_than(existing) {
                return Err(ContactError::Stale {
                    offered: rc.version,
                    current: existing.version,
                });
            }
        }
        for addr in &rc.addresses {
            if let Some(owner) = self.address_owner.get(addr) {
                if *owner != id {
                    return Err(ContactError::AddressInUse(addr.clone()));
                }
            }
        }

        let outcome = match self.remove(&id) {
            Some(old) => InsertOutcome::Replaced {
                previous_version: old.version,
            },
            None => {
                if self.contacts.len() >= self.max_contacts {
                    self.evict_oldest();
                }
                InsertOutcome::Inserted
            }
        };
        for addr in &rc.addresses {
            self.address_owner.insert(addr.clone(), id);
        }
        self.contacts.insert(id, Arc::new(rc));
        Ok(outcome)
    }

    pub fn remove(&mut self, id: &RouterId) -> Option<Arc<RouterContact>> {
        let old = self.contacts.remove(id)?;
        for addr in &old.addresses {
            if self.address_owner.get(addr) == Some(id) {
                self.address_owner.remove(addr);
            }
        }
        Some(old)
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .contacts
            .values()
            .min_by_key(|rc| rc.timestamp_ms)
            .map(|rc| rc.router_id);
        if let Some(id) = oldest {
            self.remove(&id);
        }
    }

    /// Up to `k` contacts ordered by XOR distance to `target`.
    pub fn closest(&self, target: &DhtKey, k: usize) -> Vec<Arc<RouterContact>> {
        let mut all: Vec<(DhtKey, &Arc<RouterContact>)> = self
            .contacts
            .values()
            .map(|rc| (DhtKey::from(&rc.router_id).distance(target), rc))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all.into_iter().take(k).map(|(_, rc)| rc.clone()).collect()
    }

    /// Drop contacts past their lifetime. Returns the removed ids.
    pub fn expire(&mut self, now_ms: u64, policy: &ContactPolicy) -> Vec<RouterId> {
        let expired: Vec<RouterId> = self
            .contacts
            .values()
            .filter(|rc| rc.expires_at(policy) <= now_ms)
            .map(|rc| rc.router_id)
            .collect();
        for id in &expired {
            self.remove(id);
        }
        expired
    }

    /// Owned copies for persistence.
    pub fn snapshot(&self) -> Vec<RouterContact> {
        self.contacts.values().map(|rc| rc.as_ref().clone()).collect()
    }
}

impl ContactStore for NodeDb {
    fn contact(&self, id: &RouterId) -> Option<Arc<RouterContact>> {
        self.get(id)
    }

    fn owner_of_address(&self, address: &str) -> Option<RouterId> {
        self.address_owner.get(address).copied()
    }
}

fn snapshot_options() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_SNAPSHOT_BYTES)
}

/// Write `contacts` to `dir`, replacing the previous snapshot atomically.
pub fn persist_contacts(dir: &Path, contacts: &[RouterContact]) -> Result<usize, NodeDbError> {
    std::fs::create_dir_all(dir)?;
    let bytes = snapshot_options().serialize(contacts)?;
    let tmp = dir.join(format!("{SNAPSHOT_FILE}.tmp"));
    std::fs::write(&tmp, &bytes)?;
    std::fs::rename(&tmp, dir.join(SNAPSHOT_FILE))?;
    Ok(contacts.len())
}

/// Read the snapshot in `dir`. A missing snapshot is an empty list.
///
/// Loaded contacts are untrusted and must be verified before insertion.
pub fn load_contacts(dir: &Path) -> Result<Vec<RouterContact>, NodeDbError> {
    let path = dir.join(SNAPSHOT_FILE);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    Ok(snapshot_options().deserialize(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{signed_contact, TestRouter};

    #[test]
    fn test_insert_requires_strictly_newer_version() {
        let router = TestRouter::new(1);
        let mut db = NodeDb::new(16);

        assert_eq!(db.insert(router.contact(3)), Ok(InsertOutcome::Inserted));
        let before = db.get(&router.id()).unwrap();

        assert_eq!(
            db.insert(router.contact(3)),
            Err(ContactError::Stale {
                offered: 3,
                current: 3
            })
        );
        assert!(db.insert(router.contact(2)).is_err());
        assert_eq!(
            db.insert(router.contact(4)),
            Ok(InsertOutcome::Replaced {
                previous_version: 3
            })
        );

        // Old readers keep the record they had
        assert_eq!(before.version, 3);
        assert_eq!(db.get(&router.id()).unwrap().version, 4);
    }

    #[test]
    fn test_address_owned_by_other_router_rejected() {
        let a = TestRouter::new(1);
        let b = TestRouter::new(2);
        let mut db = NodeDb::new(16);
        db.insert(a.contact(1)).unwrap();

        let squatter = signed_contact(&b.identity, vec![a.address()], 1);
        assert_eq!(
            db.insert(squatter),
            Err(ContactError::AddressInUse(a.address()))
        );
        assert_eq!(db.owner_of_address(&a.address()), Some(a.id()));
    }

    #[test]
    fn test_replacement_releases_old_addresses() {
        let a = TestRouter::new(1);
        let mut db = NodeDb::new(16);
        db.insert(a.contact(1)).unwrap();
        db.insert(signed_contact(&a.identity, vec!["10.9.9.9:1".to_string()], 2))
            .unwrap();
        assert_eq!(db.owner_of_address(&a.address()), None);
        assert_eq!(db.owner_of_address("10.9.9.9:1"), Some(a.id()));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut db = NodeDb::new(2);
        let routers: Vec<TestRouter> = (1..=3).map(TestRouter::new).collect();
        for (i, r) in routers.iter().enumerate() {
            let mut rc = r.contact(1);
            rc.timestamp_ms += i as u64;
            db.insert(rc).unwrap();
        }
        assert_eq!(db.len(), 2);
        assert!(!db.contains(&routers[0].id()));
    }

    #[test]
    fn test_closest_orders_by_xor_distance() {
        let mut db = NodeDb::new(64);
        let routers: Vec<TestRouter> = (1..=10).map(TestRouter::new).collect();
        for r in &routers {
            db.insert(r.contact(1)).unwrap();
        }
        let target = DhtKey::from(routers[4].id());
        let closest = db.closest(&target, 3);
        assert_eq!(closest.len(), 3);
        assert_eq!(closest[0].router_id, routers[4].id());
        let d1 = DhtKey::from(closest[1].router_id).distance(&target);
        let d2 = DhtKey::from(closest[2].router_id).distance(&target);
        assert!(d1 <= d2);
    }

    #[test]
    fn test_expire_and_persist_round_trip() {
        let mut db = NodeDb::new(16);
        let a = TestRouter::new(1);
        let b = TestRouter::new(2);
        db.insert(a.contact(1)).unwrap();
        db.insert(b.contact(1)).unwrap();

        let dir = tempfile::tempdir().unwrap();
        assert_eq!(persist_contacts(dir.path(), &db.snapshot()).unwrap(), 2);
        let loaded = load_contacts(dir.path()).unwrap();
        assert_eq!(loaded.len(), 2);

        let policy = ContactPolicy::default();
        let far_future = a.contact(1).expires_at(&policy) + 1;
        let expired = db.expire(far_future, &policy);
        assert_eq!(expired.len(), 2);
        assert!(db.is_empty());
        assert_eq!(db.owner_of_address(&a.address()), None);
    }

    #[test]
    fn test_missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_contacts(dir.path()).unwrap().is_empty());
        std::fs::write(dir.path().join(SNAPSHOT_FILE), b"\xff\xff\xff").unwrap();
        assert!(matches!(
            load_contacts(dir.path()),
            Err(NodeDbError::Codec(_))
        ));
    }
}
