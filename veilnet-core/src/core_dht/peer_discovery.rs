/*
    PeerDiscovery - DHT client side of the router

    Responsibilities:
    - own the NodeDb of known router contacts and admit new ones only after
      each passes RouterContact::verify and the store's version rule
    - pick peers: a profiling-weighted "good" router to dial, or a router we
      already have a session with
    - resolve a RouterId to a contact by asking the XOR-closest connected
      router (DhtFindRouter), retrying other peers with backoff on timeout
    - explore periodically with random targets to learn new contacts
    - answer other routers' DhtFindRouter requests from the NodeDb

    Inputs:
    - DhtFindRouter / DhtGotRouter link messages (via the Router)
    - tick(now) from the event loop

    Outputs:
    - (peer, LinkMessage) pairs for the Router to send
    - LookupOutcome: found contact, retrying, or failed target
*/

use rand::Rng;
use std::sync::Arc;
use tracing::{debug, trace};

use super::lookup::{LookupState, LookupTable};
use super::node_db::{InsertOutcome, NodeDb};
use super::DhtKey;
use crate::config::DiscoveryConfig;
use crate::core_identity::{
    ContactError, ContactPolicy, RouterContact, RouterId, SignatureVerifier,
};
use crate::core_router::access::SessionAccess;
use crate::core_router::link_message::LinkMessage;
use crate::core_router::metrics;
use crate::core_router::profiling::RouterProfiling;

/// Result of a DhtGotRouter reply that matched a pending lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// Explore reply merged; `accepted` contacts were new or newer
    Explored { accepted: usize },
    /// The looked-up router's contact is now known
    Found(Arc<RouterContact>),
    /// Target not in the reply; another peer will be asked after backoff
    Retrying { target: RouterId },
    /// Attempt budget spent
    Failed { target: RouterId },
}

/// Work produced by a discovery tick.
#[derive(Debug, Default)]
pub struct DiscoveryTick {
    pub outbound: Vec<(RouterId, LinkMessage)>,
    pub failed: Vec<RouterId>,
}

pub struct PeerDiscovery {
    local: RouterId,
    config: DiscoveryConfig,
    policy: ContactPolicy,
    node_db: NodeDb,
    lookups: LookupTable,
    next_explore_ms: u64,
    verifier: Arc<dyn SignatureVerifier>,
}

impl PeerDiscovery {
    pub fn new(
        local: RouterId,
        config: DiscoveryConfig,
        policy: ContactPolicy,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Self {
        Self {
            local,
            node_db: NodeDb::new(config.max_contacts),
            config,
            policy,
            lookups: LookupTable::new(),
            next_explore_ms: 0,
            verifier,
        }
    }

    pub fn node_db(&self) -> &NodeDb {
        &self.node_db
    }

    pub fn pending_lookups(&self) -> usize {
        self.lookups.len()
    }

    pub fn is_looking_up(&self, target: &RouterId) -> bool {
        self.lookups.is_pending_for(target)
    }

    /// Verify and store a contact from any source.
    pub fn add_contact(
        &mut self,
        rc: RouterContact,
        now_ms: u64,
    ) -> Result<InsertOutcome, ContactError> {
        if rc.router_id == self.local {
            return Err(ContactError::SelfContact);
        }
        rc.verify(self.verifier.as_ref(), now_ms, &self.policy)?;
        self.node_db.insert(rc)
    }

    /// A fresh, trusted contact weighted away from recently failing peers.
    pub fn get_random_good_router(
        &self,
        profiling: &RouterProfiling,
        exclude: &[RouterId],
        now_ms: u64,
    ) -> Option<RouterId> {
        let candidates: Vec<(RouterId, f64)> = self
            .node_db
            .iter()
            .filter(|rc| rc.router_id != self.local)
            .filter(|rc| !exclude.contains(&rc.router_id))
            .filter(|rc| !profiling.is_bad_for_connect(&rc.router_id))
            .filter(|rc| rc.check_freshness(now_ms, &self.policy).is_ok())
            .map(|rc| (rc.router_id, profiling.selection_weight(&rc.router_id)))
            .collect();
        weighted_pick(&candidates)
    }

    pub fn get_random_connected_router(
        &self,
        sessions: &dyn SessionAccess,
    ) -> Option<Arc<RouterContact>> {
        let connected = sessions.connected_contacts();
        if connected.is_empty() {
            return None;
        }
        let idx = rand::rng().random_range(0..connected.len());
        connected.into_iter().nth(idx)
    }

    pub fn number_of_connected_routers(&self, sessions: &dyn SessionAccess) -> usize {
        sessions.number_of_connected()
    }

    /// Merge contacts returned by `remote`. Each is checked on its own; bad
    /// entries are skipped. Returns how many were accepted.
    pub fn handle_dht_lookup_for_explore(
        &mut self,
        remote: &RouterId,
        results: Vec<RouterContact>,
        now_ms: u64,
    ) -> usize {
        let mut accepted = 0;
        let mut rejected = 0;
        for rc in results {
            let peer = rc.router_id;
            if peer == self.local {
                continue;
            }
            match self.add_contact(rc, now_ms) {
                Ok(_) => accepted += 1,
                Err(ContactError::Stale { .. }) => {}
                Err(e) => {
                    rejected += 1;
                    debug!(remote = %remote, peer = %peer, error = %e, "discarding contact from lookup");
                }
            }
        }
        metrics::contacts_merged(accepted, rejected);
        accepted
    }

    fn closest_connected(
        &self,
        target: &RouterId,
        sessions: &dyn SessionAccess,
        exclude: &[RouterId],
    ) -> Option<RouterId> {
        let key = DhtKey::from(target);
        sessions
            .connected_contacts()
            .iter()
            .map(|rc| rc.router_id)
            .filter(|id| id != target && !exclude.contains(id))
            .min_by_key(|id| DhtKey::from(id).distance(&key))
    }

    /// Start resolving `target`. Returns the request to send, or `None` when
    /// a lookup is already in flight or no connected router can be asked.
    pub fn lookup_router(
        &mut self,
        target: &RouterId,
        sessions: &dyn SessionAccess,
        now_ms: u64,
    ) -> Option<(RouterId, LinkMessage)> {
        if self.lookups.is_pending_for(target) {
            return None;
        }
        let peer = self.closest_connected(target, sessions, &[])?;
        let deadline = now_ms + self.config.lookup_timeout.as_millis() as u64;
        let txid = self.lookups.start(*target, false, peer, deadline);
        debug!(target = %target, peer = %peer, txid, "router lookup started");
        Some((
            peer,
            LinkMessage::DhtFindRouter {
                txid,
                target: *target,
                explore: false,
            },
        ))
    }

    /// Answer a DhtFindRouter from `from`.
    pub fn handle_find_router(
        &self,
        from: &RouterId,
        txid: u64,
        target: &RouterId,
        explore: bool,
        local_rc: &RouterContact,
    ) -> LinkMessage {
        let contacts = if !explore && *target == self.local {
            vec![local_rc.clone()]
        } else if let Some(rc) = self.node_db.get(target).filter(|_| !explore) {
            vec![rc.as_ref().clone()]
        } else {
            self.node_db
                .closest(&DhtKey::from(target), self.config.dht_reply_count + 1)
                .into_iter()
                .filter(|rc| rc.router_id != *from)
                .take(self.config.dht_reply_count)
                .map(|rc| rc.as_ref().clone())
                .collect()
        };
        trace!(from = %from, txid, count = contacts.len(), "answering find router");
        LinkMessage::DhtGotRouter { txid, contacts }
    }

    /// Process a DhtGotRouter from `from`. Replies that match no pending
    /// lookup, or come from a peer we did not ask, are dropped.
    pub fn handle_got_router(
        &mut self,
        from: &RouterId,
        txid: u64,
        contacts: Vec<RouterContact>,
        now_ms: u64,
    ) -> Option<LookupOutcome> {
        match self.lookups.get(txid) {
            Some(l) if l.peer == *from && matches!(l.state, LookupState::Waiting { .. }) => {}
            _ => {
                trace!(from = %from, txid, "unsolicited lookup reply dropped");
                return None;
            }
        }
        let lookup = self.lookups.get(txid)?.clone();

        let accepted = self.handle_dht_lookup_for_explore(from, contacts, now_ms);
        if lookup.explore {
            self.lookups.take(txid);
            return Some(LookupOutcome::Explored { accepted });
        }

        if let Some(rc) = self.node_db.get(&lookup.target) {
            self.lookups.take(txid);
            debug!(target = %lookup.target, attempts = lookup.attempts, "router lookup resolved");
            return Some(LookupOutcome::Found(rc));
        }

        self.schedule_retry(txid, now_ms)
    }

    fn schedule_retry(&mut self, txid: u64, now_ms: u64) -> Option<LookupOutcome> {
        let base = self.config.lookup_backoff_base.as_millis() as u64;
        let max = self.config.lookup_backoff_max.as_millis() as u64;
        let max_attempts = self.config.lookup_max_attempts;
        let lookup = self.lookups.get_mut(txid)?;
        let target = lookup.target;
        let explore = lookup.explore;
        if explore || lookup.attempts >= max_attempts {
            self.lookups.take(txid);
            if !explore {
                metrics::dht_lookup_failed();
            }
            return Some(LookupOutcome::Failed { target });
        }
        let delay = lookup.backoff_ms(base, max);
        lookup.state = LookupState::Backoff {
            retry_after_ms: now_ms + delay,
        };
        debug!(target = %target, attempt = lookup.attempts, delay_ms = delay, "router lookup backing off");
        Some(LookupOutcome::Retrying { target })
    }

    /// Drive timeouts, retries and explore.
    pub fn tick(
        &mut self,
        now_ms: u64,
        sessions: &dyn SessionAccess,
        profiling: &mut RouterProfiling,
    ) -> DiscoveryTick {
        let mut out = DiscoveryTick::default();
        let timeout_ms = self.config.lookup_timeout.as_millis() as u64;

        for txid in self.lookups.due(now_ms) {
            let Some(lookup) = self.lookups.get(txid).cloned() else {
                continue;
            };
            match lookup.state {
                LookupState::Waiting { .. } => {
                    profiling.mark_lookup_timeout(&lookup.peer, now_ms);
                    metrics::dht_lookup_timeout();
                    if let Some(LookupOutcome::Failed { target }) = self.schedule_retry(txid, now_ms) {
                        if !lookup.explore {
                            out.failed.push(target);
                        }
                    }
                }
                LookupState::Backoff { .. } => {
                    match self.closest_connected(&lookup.target, sessions, &lookup.asked) {
                        Some(peer) => {
                            if let Some(l) = self.lookups.get_mut(txid) {
                                l.ask(peer, now_ms + timeout_ms);
                            }
                            out.outbound.push((
                                peer,
                                LinkMessage::DhtFindRouter {
                                    txid,
                                    target: lookup.target,
                                    explore: false,
                                },
                            ));
                        }
                        None => {
                            self.lookups.take(txid);
                            metrics::dht_lookup_failed();
                            out.failed.push(lookup.target);
                        }
                    }
                }
            }
        }

        if now_ms >= self.next_explore_ms {
            let connected = sessions.number_of_connected();
            let mut interval = self.config.explore_interval.as_millis() as u64;
            if connected < self.config.min_connected_routers {
                interval /= 2;
            }
            self.next_explore_ms = now_ms + interval.max(1);
            if let Some(peer) = self.get_random_connected_router(sessions) {
                let target = RouterId::from_bytes(*DhtKey::random().as_bytes());
                let txid = self.lookups.start(
                    target,
                    true,
                    peer.router_id,
                    now_ms + timeout_ms,
                );
                trace!(peer = %peer.router_id, txid, "explore");
                out.outbound.push((
                    peer.router_id,
                    LinkMessage::DhtFindRouter {
                        txid,
                        target,
                        explore: true,
                    },
                ));
            }
        }
        out
    }

    /// Drop contacts past their lifetime.
    pub fn expire(&mut self, now_ms: u64) -> usize {
        self.node_db.expire(now_ms, &self.policy).len()
    }

    /// Owned copies of every contact, for persistence.
    pub fn contacts_snapshot(&self) -> Vec<RouterContact> {
        self.node_db.snapshot()
    }
}

fn weighted_pick(candidates: &[(RouterId, f64)]) -> Option<RouterId> {
    let total: f64 = candidates.iter().map(|(_, w)| *w).sum();
    if candidates.is_empty() || total <= 0.0 {
        return None;
    }
    let mut roll = rand::rng().random::<f64>() * total;
    for (id, weight) in candidates {
        if roll < *weight {
            return Some(*id);
        }
        roll -= weight;
    }
    candidates.last().map(|(id, _)| *id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProfilingConfig;
    use crate::core_identity::Ed25519Verifier;
    use crate::test_utils::{FakeSessions, TestRouter, TEST_NOW_MS};
    use std::time::Duration;

    fn discovery(local: &TestRouter) -> PeerDiscovery {
        let config = DiscoveryConfig {
            lookup_timeout: Duration::from_millis(100),
            lookup_max_attempts: 2,
            lookup_backoff_base: Duration::from_millis(50),
            lookup_backoff_max: Duration::from_millis(200),
            explore_interval: Duration::from_secs(30),
            ..DiscoveryConfig::default()
        };
        PeerDiscovery::new(
            local.id(),
            config,
            ContactPolicy::default(),
            Arc::new(Ed25519Verifier),
        )
    }

    fn profiling() -> RouterProfiling {
        RouterProfiling::new(ProfilingConfig::default())
    }

    #[test]
    fn test_explore_merge_skips_bad_signatures() {
        let local = TestRouter::new(1);
        let mut disc = discovery(&local);
        let remote = TestRouter::new(2);

        let mut results: Vec<RouterContact> =
            (10..15).map(|n| TestRouter::new(n).contact(1)).collect();
        results[1].signature[0] ^= 0xFF;
        results[3].version += 1;

        let accepted = disc.handle_dht_lookup_for_explore(&remote.id(), results.clone(), TEST_NOW_MS);
        assert_eq!(accepted, 3);
        assert_eq!(disc.node_db().len(), 3);
        assert!(!disc.node_db().contains(&results[1].router_id));
        assert!(!disc.node_db().contains(&results[3].router_id));
        assert!(disc.node_db().contains(&results[4].router_id));
    }

    #[test]
    fn test_own_contact_is_never_stored() {
        let local = TestRouter::new(1);
        let mut disc = discovery(&local);
        let accepted =
            disc.handle_dht_lookup_for_explore(&TestRouter::new(2).id(), vec![local.contact(1)], TEST_NOW_MS);
        assert_eq!(accepted, 0);
        assert!(disc.node_db().is_empty());
    }

    #[test]
    fn test_good_router_excludes_bad_and_listed() {
        let local = TestRouter::new(1);
        let mut disc = discovery(&local);
        let a = TestRouter::new(2);
        let b = TestRouter::new(3);
        disc.add_contact(a.contact(1), TEST_NOW_MS).unwrap();
        disc.add_contact(b.contact(1), TEST_NOW_MS).unwrap();

        let mut prof = RouterProfiling::new(ProfilingConfig {
            connect_failure_threshold: 1,
            ..ProfilingConfig::default()
        });
        prof.mark_connect_timeout(&a.id(), TEST_NOW_MS);

        for _ in 0..20 {
            assert_eq!(
                disc.get_random_good_router(&prof, &[], TEST_NOW_MS),
                Some(b.id())
            );
        }
        assert_eq!(disc.get_random_good_router(&prof, &[b.id()], TEST_NOW_MS), None);
    }

    #[test]
    fn test_connected_router_and_count() {
        let local = TestRouter::new(1);
        let disc = discovery(&local);
        let sessions = FakeSessions::with(vec![TestRouter::new(4).contact(1)]);
        assert_eq!(disc.number_of_connected_routers(&sessions), 1);
        assert_eq!(
            disc.get_random_connected_router(&sessions).unwrap().router_id,
            TestRouter::new(4).id()
        );
        assert!(disc
            .get_random_connected_router(&FakeSessions::default())
            .is_none());
    }

    #[test]
    fn test_lookup_found() {
        let local = TestRouter::new(1);
        let mut disc = discovery(&local);
        let peer = TestRouter::new(2);
        let target = TestRouter::new(3);
        let sessions = FakeSessions::with(vec![peer.contact(1)]);

        let (to, msg) = disc.lookup_router(&target.id(), &sessions, TEST_NOW_MS).unwrap();
        assert_eq!(to, peer.id());
        let LinkMessage::DhtFindRouter { txid, explore, .. } = msg else {
            panic!("expected find router");
        };
        assert!(!explore);
        assert!(disc.lookup_router(&target.id(), &sessions, TEST_NOW_MS).is_none());

        // Reply from a peer we did not ask is ignored
        assert!(disc
            .handle_got_router(&target.id(), txid, vec![target.contact(1)], TEST_NOW_MS)
            .is_none());

        let outcome = disc
            .handle_got_router(&peer.id(), txid, vec![target.contact(1)], TEST_NOW_MS)
            .unwrap();
        assert!(matches!(outcome, LookupOutcome::Found(rc) if rc.router_id == target.id()));
        assert_eq!(disc.pending_lookups(), 0);
    }

    #[test]
    fn test_lookup_retries_then_fails() {
        let local = TestRouter::new(1);
        let mut disc = discovery(&local);
        let p1 = TestRouter::new(2);
        let p2 = TestRouter::new(3);
        let target = TestRouter::new(9);
        let sessions = FakeSessions::with(vec![p1.contact(1), p2.contact(1)]);
        let mut prof = profiling();

        let (first, _) = disc.lookup_router(&target.id(), &sessions, TEST_NOW_MS).unwrap();
        // Explore fires on the first tick; consume it
        let _ = disc.tick(TEST_NOW_MS, &sessions, &mut prof);

        // Timeout -> backoff, the unresponsive peer is profiled
        let t = disc.tick(TEST_NOW_MS + 150, &sessions, &mut prof);
        assert!(t.failed.is_empty());
        assert!(prof.get(&first).unwrap().lookup_timeouts >= 1);

        // Backoff elapsed -> the other peer is asked
        let t = disc.tick(TEST_NOW_MS + 250, &sessions, &mut prof);
        let asked: Vec<RouterId> = t
            .outbound
            .iter()
            .filter(|(_, m)| matches!(m, LinkMessage::DhtFindRouter { explore: false, .. }))
            .map(|(p, _)| *p)
            .collect();
        assert_eq!(asked.len(), 1);
        assert_ne!(asked[0], first);

        // Second timeout exhausts the budget
        let t = disc.tick(TEST_NOW_MS + 400, &sessions, &mut prof);
        assert_eq!(t.failed, vec![target.id()]);
    }

    #[test]
    fn test_find_router_answers_exact_or_closest() {
        let local = TestRouter::new(1);
        let mut disc = discovery(&local);
        for n in 10..20 {
            disc.add_contact(TestRouter::new(n).contact(1), TEST_NOW_MS).unwrap();
        }
        let asker = TestRouter::new(2);
        let known = TestRouter::new(12);

        let LinkMessage::DhtGotRouter { contacts, .. } =
            disc.handle_find_router(&asker.id(), 5, &known.id(), false, &local.contact(1))
        else {
            panic!("expected got router");
        };
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].router_id, known.id());

        let LinkMessage::DhtGotRouter { contacts, .. } =
            disc.handle_find_router(&asker.id(), 6, &TestRouter::new(99).id(), false, &local.contact(1))
        else {
            panic!("expected got router");
        };
        assert_eq!(contacts.len(), DiscoveryConfig::default().dht_reply_count);

        let LinkMessage::DhtGotRouter { contacts, .. } =
            disc.handle_find_router(&asker.id(), 7, &local.id(), false, &local.contact(1))
        else {
            panic!("expected got router");
        };
        assert_eq!(contacts[0].router_id, local.id());
    }

    #[test]
    fn test_explore_runs_faster_when_poorly_connected() {
        let local = TestRouter::new(1);
        let mut disc = discovery(&local);
        let sessions = FakeSessions::with(vec![TestRouter::new(2).contact(1)]);
        let mut prof = profiling();

        let t = disc.tick(TEST_NOW_MS, &sessions, &mut prof);
        assert_eq!(t.outbound.len(), 1);
        // one connected router is below the minimum, so half of 30s
        assert!(disc.tick(TEST_NOW_MS + 14_000, &sessions, &mut prof).outbound.is_empty());
        let t = disc.tick(TEST_NOW_MS + 15_000, &sessions, &mut prof);
        assert!(t
            .outbound
            .iter()
            .any(|(_, m)| matches!(m, LinkMessage::DhtFindRouter { explore: true, .. })));
    }
}
