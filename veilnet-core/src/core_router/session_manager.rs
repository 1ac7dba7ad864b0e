/*
  LinkSessionManager

  Owns every LinkSession, keyed by RouterId, plus a bounded queue of frames
  per peer that has no live session yet. At most one session exists per
  RouterId; a renegotiation either replaces the live session atomically or is
  refused and leaves it untouched.

  Workflow:
  1. establish_session(contact): verify the contact, start a Connecting
     session and ask the transport to dial (TransportAction::Dial).
  2. on_session_established(rc): the transport finished a handshake. A
     Connecting session becomes Established; a live one is renegotiated only
     if check_renegotiate_valid holds; otherwise an inbound session is added.
     Queued frames are flushed in order.
  3. send_to_or_queue: seal on a live session (TransportAction::Transmit) or
     buffer until one exists.
  4. handle_inbound: open a sealed frame from a live session.
  5. tick: connect timeouts (profiled), idle sessions, queue expiry.

  Outputs:
    TransportAction values, drained by the event loop in FIFO order so the
    per-peer send order is preserved.
*/

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::access::SessionAccess;
use super::metrics;
use super::profiling::RouterProfiling;
use super::session::{LinkSession, SessionKeys, SessionState};
use crate::config::LinkConfig;
use crate::core_dht::ContactStore;
use crate::core_identity::{
    ContactPolicy, Identity, RouterContact, RouterId, SignatureVerifier, SigningCapability,
};

/// Instruction for the physical transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportAction {
    Dial { contact: Arc<RouterContact> },
    Transmit { to: RouterId, frame: Vec<u8> },
    Close { router: RouterId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstablishOutcome {
    /// A live session already exists
    Established,
    /// A handshake is in flight (possibly just started)
    Pending,
    /// Contact failed verification
    Rejected,
    /// Too many handshakes in flight; try again later
    TryLater,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Buffered behind a handshake already in flight
    Queued,
    /// Buffered, but nothing is connecting to that router yet
    NeedsSession,
    /// Session refused to seal the frame
    Dropped,
}

#[derive(Debug)]
struct QueuedFrame {
    plaintext: Vec<u8>,
    deadline_ms: u64,
}

fn ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

pub struct LinkSessionManager {
    identity: Arc<Identity>,
    local: RouterId,
    config: LinkConfig,
    policy: ContactPolicy,
    verifier: Arc<dyn SignatureVerifier>,
    sessions: HashMap<RouterId, LinkSession>,
    queues: HashMap<RouterId, VecDeque<QueuedFrame>>,
    actions: VecDeque<TransportAction>,
}

impl LinkSessionManager {
    pub fn new(
        identity: Arc<Identity>,
        config: LinkConfig,
        policy: ContactPolicy,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Self {
        let local = identity.router_id();
        LinkSessionManager {
            identity,
            local,
            config,
            policy,
            verifier,
            sessions: HashMap::new(),
            queues: HashMap::new(),
            actions: VecDeque::new(),
        }
    }

    pub fn session(&self, router: &RouterId) -> Option<&LinkSession> {
        self.sessions.get(router)
    }

    pub fn connected_routers(&self) -> Vec<RouterId> {
        self.sessions
            .values()
            .filter(|s| s.is_live())
            .map(|s| s.router_id())
            .collect()
    }

    pub fn number_of_pending(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| s.state() == SessionState::Connecting)
            .count()
    }

    pub fn queued_for(&self, router: &RouterId) -> usize {
        self.queues.get(router).map_or(0, |q| q.len())
    }

    /// Everything the transport should do, oldest first.
    pub fn drain_transport_actions(&mut self) -> Vec<TransportAction> {
        self.actions.drain(..).collect()
    }

    fn derive_keys(&self, contact: &RouterContact) -> Option<SessionKeys> {
        match SessionKeys::derive(self.identity.encryption(), &self.local, contact) {
            Ok(keys) => Some(keys),
            Err(e) => {
                debug!(peer = %contact.router_id, error = %e, "session key derivation failed");
                None
            }
        }
    }

    /// True if `contact` advertises an address the store attributes to someone else.
    fn squats_address(contact: &RouterContact, contacts: &dyn ContactStore) -> bool {
        contact.addresses.iter().any(|addr| {
            contacts
                .owner_of_address(addr)
                .is_some_and(|owner| owner != contact.router_id)
        })
    }

    /// Ensure a session to `contact`'s router exists or is being made.
    pub fn establish_session(
        &mut self,
        contact: Arc<RouterContact>,
        now_ms: u64,
    ) -> EstablishOutcome {
        let router = contact.router_id;
        if router == self.local {
            return EstablishOutcome::Rejected;
        }
        if let Err(e) = contact.verify(self.verifier.as_ref(), now_ms, &self.policy) {
            debug!(peer = %router, error = %e, "refusing to dial unverifiable contact");
            metrics::session_rejected();
            return EstablishOutcome::Rejected;
        }

        match self.sessions.get(&router).map(|s| s.state()) {
            Some(state) if state.is_live() => return EstablishOutcome::Established,
            Some(SessionState::Connecting) => return EstablishOutcome::Pending,
            Some(_) => {
                self.sessions.remove(&router);
            }
            None => {}
        }

        if self.number_of_pending() >= self.config.max_pending_sessions {
            debug!(peer = %router, "pending session limit reached");
            return EstablishOutcome::TryLater;
        }
        let Some(keys) = self.derive_keys(&contact) else {
            return EstablishOutcome::Rejected;
        };

        debug!(peer = %router, "dialing router");
        let session =
            LinkSession::connecting(contact.clone(), keys, now_ms, ms(self.config.connect_timeout));
        self.sessions.insert(router, session);
        self.actions.push_back(TransportAction::Dial { contact });
        EstablishOutcome::Pending
    }

    /// Whether `new` may replace the live session's `old` contact.
    ///
    /// Requires the same router, a valid signature on `new`, a version not
    /// older than `old`, well formed addresses, and no address that the
    /// contact store attributes to another router.
    pub fn check_renegotiate_valid(
        &self,
        new: &RouterContact,
        old: &RouterContact,
        contacts: &dyn ContactStore,
    ) -> bool {
        new.router_id == old.router_id
            && new.verify_signature(self.verifier.as_ref())
            && new.version >= old.version
            && new.check_addresses().is_ok()
            && !Self::squats_address(new, contacts)
    }

    /// The transport finished a handshake with the router behind `rc`.
    ///
    /// Returns false if the session was refused; an existing live session is
    /// left as it was in that case.
    pub fn on_session_established(
        &mut self,
        rc: RouterContact,
        now_ms: u64,
        contacts: &dyn ContactStore,
    ) -> bool {
        let router = rc.router_id;
        if router == self.local {
            return false;
        }
        if let Err(e) = rc.verify(self.verifier.as_ref(), now_ms, &self.policy) {
            debug!(peer = %router, error = %e, "session contact rejected");
            metrics::session_rejected();
            return false;
        }
        let Some(keys) = self.derive_keys(&rc) else {
            metrics::session_rejected();
            return false;
        };
        let rc = Arc::new(rc);

        let existing = self.sessions.get(&router).map(|s| s.state());
        let accepted = match existing {
            Some(SessionState::Connecting) => {
                if Self::squats_address(&rc, contacts) {
                    false
                } else {
                    self.sessions
                        .get_mut(&router)
                        .is_some_and(|s| s.complete(rc.clone(), keys, now_ms).is_ok())
                }
            }
            Some(state) if state.is_live() => {
                let valid = self
                    .sessions
                    .get(&router)
                    .is_some_and(|s| self.check_renegotiate_valid(&rc, s.contact(), contacts));
                valid
                    && self
                        .sessions
                        .get_mut(&router)
                        .is_some_and(|s| s.renegotiate(rc.clone(), keys, now_ms).is_ok())
            }
            _ => {
                if Self::squats_address(&rc, contacts) {
                    false
                } else {
                    self.sessions
                        .insert(router, LinkSession::established(rc.clone(), keys, now_ms));
                    true
                }
            }
        };

        if !accepted {
            debug!(peer = %router, version = rc.version, "session refused");
            metrics::session_rejected();
            return false;
        }

        if existing.is_none() || existing == Some(SessionState::Connecting) {
            info!(peer = %router, "link session established");
        }
        metrics::session_established();
        metrics::set_active_sessions(self.number_of_connected());
        self.flush_queue(&router, now_ms);
        true
    }

    fn flush_queue(&mut self, router: &RouterId, now_ms: u64) {
        let Some(queue) = self.queues.remove(router) else {
            return;
        };
        let Some(session) = self.sessions.get_mut(router) else {
            return;
        };
        let mut expired = 0;
        for frame in queue {
            if now_ms >= frame.deadline_ms {
                expired += 1;
                continue;
            }
            match session.seal(&frame.plaintext, now_ms) {
                Ok(sealed) => self.actions.push_back(TransportAction::Transmit {
                    to: *router,
                    frame: sealed,
                }),
                Err(e) => warn!(peer = %router, error = %e, "could not seal queued frame"),
            }
        }
        if expired > 0 {
            metrics::queued_frames_dropped(expired);
        }
    }

    /// Send `plaintext` to `to` now if a session is live, otherwise buffer it.
    pub fn send_to_or_queue(&mut self, to: &RouterId, plaintext: Vec<u8>, now_ms: u64) -> SendOutcome {
        if let Some(session) = self.sessions.get_mut(to) {
            if session.is_live() {
                return match session.seal(&plaintext, now_ms) {
                    Ok(frame) => {
                        self.actions.push_back(TransportAction::Transmit { to: *to, frame });
                        SendOutcome::Sent
                    }
                    Err(e) => {
                        warn!(peer = %to, error = %e, "could not seal frame");
                        SendOutcome::Dropped
                    }
                };
            }
        }

        let limit = self.config.max_queued_per_peer.max(1);
        let queue = self.queues.entry(*to).or_default();
        while queue.len() >= limit {
            queue.pop_front();
            metrics::queued_frames_dropped(1);
            trace!(peer = %to, "pending queue full, oldest frame dropped");
        }
        queue.push_back(QueuedFrame {
            plaintext,
            deadline_ms: now_ms.saturating_add(ms(self.config.queue_timeout)),
        });

        match self.sessions.get(to).map(|s| s.state()) {
            Some(SessionState::Connecting) => SendOutcome::Queued,
            _ => SendOutcome::NeedsSession,
        }
    }

    /// Discard anything buffered for `router`.
    pub fn drop_queue(&mut self, router: &RouterId) -> usize {
        let dropped = self.queues.remove(router).map_or(0, |q| q.len());
        if dropped > 0 {
            metrics::queued_frames_dropped(dropped);
        }
        dropped
    }

    pub fn persist_session_until(&mut self, router: &RouterId, until_ms: u64) {
        if let Some(session) = self.sessions.get_mut(router) {
            session.persist_until(until_ms);
        }
    }

    /// A dial to `router` did not complete in time.
    ///
    /// Only acts on a Connecting session: closes it, drops its queue and
    /// records one connect timeout. Returns whether anything happened.
    pub fn on_connect_timeout(
        &mut self,
        router: &RouterId,
        profiling: &mut RouterProfiling,
        now_ms: u64,
    ) -> bool {
        match self.sessions.get(router).map(|s| s.state()) {
            Some(SessionState::Connecting) => {}
            _ => return false,
        }
        if let Some(mut session) = self.sessions.remove(router) {
            session.close();
        }
        self.drop_queue(router);
        profiling.mark_connect_timeout(router, now_ms);
        metrics::connect_timeout();
        debug!(peer = %router, "connect timed out");
        true
    }

    /// The transport reports the session to `router` is gone.
    pub fn session_closed(&mut self, router: &RouterId) -> bool {
        let Some(mut session) = self.sessions.remove(router) else {
            return false;
        };
        let was_live = session.is_live();
        session.close();
        self.drop_queue(router);
        if was_live {
            info!(peer = %router, "link session closed");
        }
        metrics::set_active_sessions(self.number_of_connected());
        true
    }

    /// Open a sealed frame from `from`. `None` for unknown sessions or frames
    /// that fail authentication.
    pub fn handle_inbound(&mut self, from: &RouterId, frame: &[u8], now_ms: u64) -> Option<Vec<u8>> {
        let session = self.sessions.get_mut(from)?;
        match session.open(frame, now_ms) {
            Ok(plain) => Some(plain),
            Err(e) => {
                trace!(peer = %from, error = %e, "inbound frame rejected");
                None
            }
        }
    }

    /// Enforce connect timeouts, close idle sessions and expire queued frames.
    ///
    /// Returns every router whose session ended during this tick.
    pub fn tick(&mut self, now_ms: u64, profiling: &mut RouterProfiling) -> Vec<RouterId> {
        let mut ended = Vec::new();

        let timed_out: Vec<RouterId> = self
            .sessions
            .values()
            .filter(|s| s.connect_expired(now_ms))
            .map(|s| s.router_id())
            .collect();
        for router in timed_out {
            if self.on_connect_timeout(&router, profiling, now_ms) {
                ended.push(router);
            }
        }

        let idle_ms = ms(self.config.idle_timeout);
        let idle: Vec<RouterId> = self
            .sessions
            .values()
            .filter(|s| s.is_idle(now_ms, idle_ms))
            .map(|s| s.router_id())
            .collect();
        for router in idle {
            if let Some(session) = self.sessions.get_mut(&router) {
                if session.transition(SessionState::Closing).is_ok() {
                    debug!(peer = %router, "closing idle session");
                    self.actions.push_back(TransportAction::Close { router });
                }
            }
            self.session_closed(&router);
            ended.push(router);
        }

        let mut expired = 0;
        self.queues.retain(|_, queue| {
            let before = queue.len();
            queue.retain(|f| now_ms < f.deadline_ms);
            expired += before - queue.len();
            !queue.is_empty()
        });
        if expired > 0 {
            metrics::queued_frames_dropped(expired);
        }

        metrics::set_active_sessions(self.number_of_connected());
        ended
    }

    /// Routers that currently have frames buffered but no session at all.
    pub fn routers_awaiting_session(&self) -> Vec<RouterId> {
        self.queues
            .keys()
            .filter(|router| !self.sessions.contains_key(router))
            .copied()
            .collect()
    }
}

impl SessionAccess for LinkSessionManager {
    fn has_session(&self, router: &RouterId) -> bool {
        self.sessions.get(router).is_some_and(|s| s.is_live())
    }

    fn connected_contacts(&self) -> Vec<Arc<RouterContact>> {
        self.sessions
            .values()
            .filter(|s| s.is_live())
            .map(|s| s.contact().clone())
            .collect()
    }

    fn number_of_connected(&self) -> usize {
        self.sessions.values().filter(|s| s.is_live()).count()
    }

    fn persist_session_until(&mut self, router: &RouterId, until_ms: u64) {
        LinkSessionManager::persist_session_until(self, router, until_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProfilingConfig;
    use crate::core_dht::NodeDb;
    use crate::core_identity::Ed25519Verifier;
    use crate::test_utils::{signed_contact, TestRouter, TEST_NOW_MS};
    use proptest::prelude::*;

    const NOW: u64 = TEST_NOW_MS;

    fn config() -> LinkConfig {
        LinkConfig {
            connect_timeout: Duration::from_millis(1_000),
            idle_timeout: Duration::from_secs(60),
            max_pending_sessions: 2,
            max_queued_per_peer: 3,
            queue_timeout: Duration::from_secs(5),
        }
    }

    fn manager(local: &TestRouter) -> LinkSessionManager {
        LinkSessionManager::new(
            Arc::new(TestRouter::new(local.n).identity),
            config(),
            ContactPolicy::default(),
            Arc::new(Ed25519Verifier),
        )
    }

    fn profiling() -> RouterProfiling {
        RouterProfiling::new(ProfilingConfig::default())
    }

    fn transmitted(actions: &[TransportAction]) -> Vec<Vec<u8>> {
        actions
            .iter()
            .filter_map(|a| match a {
                TransportAction::Transmit { frame, .. } => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_establish_dials_once_then_pending() {
        let me = TestRouter::new(1);
        let peer = TestRouter::new(2);
        let mut links = manager(&me);
        let rc = Arc::new(peer.contact(1));

        assert_eq!(links.establish_session(rc.clone(), NOW), EstablishOutcome::Pending);
        assert_eq!(links.establish_session(rc.clone(), NOW), EstablishOutcome::Pending);
        let actions = links.drain_transport_actions();
        assert_eq!(actions, vec![TransportAction::Dial { contact: rc }]);

        assert!(links.on_session_established(peer.contact(1), NOW, &NodeDb::new(8)));
        assert_eq!(
            links.establish_session(Arc::new(peer.contact(1)), NOW),
            EstablishOutcome::Established
        );
        assert_eq!(links.number_of_connected(), 1);
    }

    #[test]
    fn test_bad_contact_and_pending_limit() {
        let me = TestRouter::new(1);
        let mut links = manager(&me);

        let mut forged = TestRouter::new(2).contact(1);
        forged.version = 99;
        assert_eq!(links.establish_session(Arc::new(forged), NOW), EstablishOutcome::Rejected);
        assert_eq!(
            links.establish_session(Arc::new(me.contact(1)), NOW),
            EstablishOutcome::Rejected
        );

        for n in 3..5 {
            assert_eq!(
                links.establish_session(Arc::new(TestRouter::new(n).contact(1)), NOW),
                EstablishOutcome::Pending
            );
        }
        assert_eq!(
            links.establish_session(Arc::new(TestRouter::new(5).contact(1)), NOW),
            EstablishOutcome::TryLater
        );
    }

    #[test]
    fn test_queue_flushes_in_order_on_establish() {
        let me = TestRouter::new(1);
        let peer = TestRouter::new(2);
        let mut links = manager(&me);
        let mut remote = manager(&peer);

        assert_eq!(
            links.send_to_or_queue(&peer.id(), b"first".to_vec(), NOW),
            SendOutcome::NeedsSession
        );
        links.establish_session(Arc::new(peer.contact(1)), NOW);
        assert_eq!(
            links.send_to_or_queue(&peer.id(), b"second".to_vec(), NOW),
            SendOutcome::Queued
        );
        links.drain_transport_actions();

        assert!(links.on_session_established(peer.contact(1), NOW, &NodeDb::new(8)));
        assert!(remote.on_session_established(me.contact(1), NOW, &NodeDb::new(8)));
        let frames = transmitted(&links.drain_transport_actions());
        assert_eq!(frames.len(), 2);
        assert_eq!(remote.handle_inbound(&me.id(), &frames[0], NOW).unwrap(), b"first");
        assert_eq!(remote.handle_inbound(&me.id(), &frames[1], NOW).unwrap(), b"second");

        assert_eq!(
            links.send_to_or_queue(&peer.id(), b"third".to_vec(), NOW),
            SendOutcome::Sent
        );
    }

    #[test]
    fn test_queue_bounded_drops_oldest() {
        let me = TestRouter::new(1);
        let peer = TestRouter::new(2);
        let mut links = manager(&me);
        for i in 0..5u8 {
            links.send_to_or_queue(&peer.id(), vec![i], NOW);
        }
        assert_eq!(links.queued_for(&peer.id()), 3);

        let mut remote = manager(&peer);
        links.on_session_established(peer.contact(1), NOW, &NodeDb::new(8));
        remote.on_session_established(me.contact(1), NOW, &NodeDb::new(8));
        let frames = transmitted(&links.drain_transport_actions());
        let opened: Vec<Vec<u8>> = frames
            .iter()
            .map(|f| remote.handle_inbound(&me.id(), f, NOW).unwrap())
            .collect();
        assert_eq!(opened, vec![vec![2], vec![3], vec![4]]);
    }

    #[test]
    fn test_connect_timeout_profiles_once() {
        let me = TestRouter::new(1);
        let peer = TestRouter::new(2);
        let mut links = manager(&me);
        let mut prof = profiling();

        links.establish_session(Arc::new(peer.contact(1)), NOW);
        links.send_to_or_queue(&peer.id(), b"lost".to_vec(), NOW);

        assert!(links.tick(NOW + 999, &mut prof).is_empty());
        assert_eq!(links.tick(NOW + 1_000, &mut prof), vec![peer.id()]);
        assert!(links.session(&peer.id()).is_none());
        assert_eq!(links.queued_for(&peer.id()), 0);
        assert_eq!(prof.get(&peer.id()).unwrap().connect_timeouts, 1);

        // a second report for the same attempt is a no-op
        assert!(!links.on_connect_timeout(&peer.id(), &mut prof, NOW + 1_001));
        assert!(links.tick(NOW + 2_000, &mut prof).is_empty());
        assert_eq!(prof.get(&peer.id()).unwrap().connect_timeouts, 1);
    }

    #[test]
    fn test_renegotiation_rules() {
        let me = TestRouter::new(1);
        let peer = TestRouter::new(2);
        let other = TestRouter::new(3);
        let mut links = manager(&me);
        let mut db = NodeDb::new(8);
        db.insert(other.contact(1)).unwrap();

        assert!(links.on_session_established(peer.contact(2), NOW, &db));

        // older version refused, session untouched
        assert!(!links.on_session_established(peer.contact(1), NOW, &db));
        assert_eq!(links.session(&peer.id()).unwrap().contact().version, 2);

        // address owned by another router refused
        let squat = signed_contact(&peer.identity, vec![other.address()], 3);
        assert!(!links.on_session_established(squat, NOW, &db));
        assert_eq!(links.session(&peer.id()).unwrap().contact().version, 2);

        // same or newer version accepted
        assert!(links.on_session_established(peer.contact(2), NOW, &db));
        assert!(links.on_session_established(peer.contact(5), NOW, &db));
        assert_eq!(links.session(&peer.id()).unwrap().contact().version, 5);
        assert_eq!(links.number_of_connected(), 1);
    }

    #[test]
    fn test_valid_signature_over_other_router_refused() {
        let me = TestRouter::new(1);
        let links = manager(&me);
        let a = TestRouter::new(2).contact(1);
        let b = TestRouter::new(3).contact(4);
        assert!(b.verify_signature(&Ed25519Verifier));
        assert!(!links.check_renegotiate_valid(&b, &a, &NodeDb::new(8)));
    }

    #[test]
    fn test_idle_close_respects_persist() {
        let me = TestRouter::new(1);
        let a = TestRouter::new(2);
        let b = TestRouter::new(3);
        let mut links = manager(&me);
        let mut prof = profiling();
        let db = NodeDb::new(8);
        links.on_session_established(a.contact(1), NOW, &db);
        links.on_session_established(b.contact(1), NOW, &db);
        links.persist_session_until(&a.id(), NOW + 120_000);

        let ended = links.tick(NOW + 60_000, &mut prof);
        assert_eq!(ended, vec![b.id()]);
        assert!(links.has_session(&a.id()));
        assert!(links
            .drain_transport_actions()
            .contains(&TransportAction::Close { router: b.id() }));
    }

    #[test]
    fn test_inbound_from_unknown_or_tampered_dropped() {
        let me = TestRouter::new(1);
        let peer = TestRouter::new(2);
        let mut links = manager(&me);
        assert!(links.handle_inbound(&peer.id(), b"garbage", NOW).is_none());

        links.on_session_established(peer.contact(1), NOW, &NodeDb::new(8));
        assert!(links.handle_inbound(&peer.id(), &[0u8; 64], NOW).is_none());
        assert!(links.session_closed(&peer.id()));
        assert!(!links.session_closed(&peer.id()));
    }

    proptest! {
        #[test]
        fn prop_renegotiate_valid_iff_same_router_signed_and_not_older(
            old_version in 0u64..1_000,
            new_version in 0u64..1_000,
            same_router in any::<bool>(),
            tamper in any::<bool>(),
        ) {
            let me = TestRouter::new(1);
            let links = manager(&me);
            let peer = TestRouter::new(2);
            let stranger = TestRouter::new(3);

            let old = peer.contact(old_version);
            let signer = if same_router { &peer } else { &stranger };
            let mut new = signed_contact(&signer.identity, vec![signer.address()], new_version);
            if tamper {
                new.timestamp_ms += 1;
            }

            let expected = same_router && !tamper && new_version >= old_version;
            prop_assert_eq!(
                links.check_renegotiate_valid(&new, &old, &NodeDb::new(8)),
                expected
            );
        }
    }
}
