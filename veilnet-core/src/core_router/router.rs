/*
    Router - the coordinator

    Owns every routing component and is the only thing that talks to all of
    them. Other subsystems see it through narrow traits (SessionAccess,
    PathAccess, ProfilingAccess, SigningCapability).

    ┌──────────────────────────────────────────────────────────────┐
    │                           Router                             │
    │                                                              │
    │  transport events ──► LinkSessionManager ──► LinkMessage     │
    │                             ▲                    │           │
    │                             │        ┌───────────┼─────────┐ │
    │                             │        ▼           ▼         ▼ │
    │                        PathContext  PeerDiscovery  Dispatcher│
    │                             │        │                       │
    │                             └────────┴──► RouterProfiling    │
    │                                                              │
    │  drain_transport_actions() ◄── Dial / Transmit / Close       │
    └──────────────────────────────────────────────────────────────┘

    Inbound:  handle_recv_link_message_buffer(from, bytes)
              open -> decode -> relay / build / teardown / dht
    Outbound: every frame goes through send_to_or_queue, which seals it on a
              live session or queues it and asks for one (dial when the
              contact is known, DHT lookup otherwise).

    Rejected input of any kind is dropped with a trace log and one counter
    increment, and nothing is sent back.
*/

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use super::access::{PathAccess, ProfilingAccess, SessionAccess};
use super::dispatcher::{
    parse_routing_message_buffer, DispatchError, RoutingHandler, RoutingMessageDispatcher,
};
use super::link_message::{LinkMessage, PathBuildRequest};
use super::metrics;
use super::profiling::RouterProfiling;
use super::routing_message::{RoutingMessage, RoutingMessageType};
use super::session_manager::{EstablishOutcome, LinkSessionManager, SendOutcome, TransportAction};
use crate::clock::Clock;
use crate::config::RouterConfig;
use crate::core_dht::{InsertOutcome, LookupOutcome, PeerDiscovery};
use crate::core_identity::{
    ContactError, ContactPolicy, Ed25519Verifier, EncryptionKey, Identity, IdentityError,
    RouterContact, RouterId, SignatureVerifier, SigningCapability,
};
use crate::core_path::{
    BuildCompletion, PathBuildError, PathBuildHandle, PathContext, PathEffects, PathId,
    RelayOutcome,
};

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no public address configured")]
    NoUsableTransport,

    #[error("identity unusable: {0}")]
    Identity(#[from] IdentityError),

    #[error("cannot sign own contact: {0}")]
    Contact(#[from] ContactError),
}

fn dropped(reason: &'static str, from: &RouterId) -> bool {
    trace!(reason, peer = %from, "link frame dropped");
    metrics::frame_dropped(reason);
    false
}

pub struct Router {
    config: RouterConfig,
    identity: Arc<Identity>,
    clock: Arc<dyn Clock>,
    policy: ContactPolicy,
    verifier: Arc<dyn SignatureVerifier>,
    rc: Arc<RouterContact>,
    links: LinkSessionManager,
    paths: PathContext,
    discovery: PeerDiscovery,
    profiling: RouterProfiling,
    dispatcher: RoutingMessageDispatcher,
}

impl Router {
    /// Load or create the identity named by the config, then build the router.
    pub fn from_config(config: RouterConfig, clock: Arc<dyn Clock>) -> Result<Self, RouterError> {
        let identity = match &config.router.keyfile {
            Some(path) => Identity::load_or_generate(path)?,
            None => Identity::generate(),
        };
        Self::new(config, Arc::new(identity), clock)
    }

    pub fn new(
        config: RouterConfig,
        identity: Arc<Identity>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RouterError> {
        if config.router.public_addresses.is_empty() {
            return Err(RouterError::NoUsableTransport);
        }
        let now = clock.now_ms();
        let policy = ContactPolicy::from_config(&config.router);
        let verifier: Arc<dyn SignatureVerifier> = Arc::new(Ed25519Verifier);

        // wall clock as version keeps contacts monotonic across restarts
        let rc = RouterContact::new_signed(
            identity.as_ref(),
            config.router.public_addresses.clone(),
            now,
            now,
        )?;

        let links = LinkSessionManager::new(
            identity.clone(),
            config.link.clone(),
            policy,
            verifier.clone(),
        );
        let paths = PathContext::new(config.path.clone());
        let discovery = PeerDiscovery::new(
            identity.router_id(),
            config.discovery.clone(),
            policy,
            verifier.clone(),
        );
        let profiling = RouterProfiling::new(config.profiling.clone());

        info!(router = %identity.router_id(), addresses = ?rc.addresses, "router created");
        Ok(Router {
            config,
            identity,
            clock,
            policy,
            verifier,
            rc: Arc::new(rc),
            links,
            paths,
            discovery,
            profiling,
            dispatcher: RoutingMessageDispatcher::new(),
        })
    }

    pub fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Our own signed contact.
    pub fn rc(&self) -> &Arc<RouterContact> {
        &self.rc
    }

    pub fn identity(&self) -> &Arc<Identity> {
        &self.identity
    }

    pub fn encryption(&self) -> &EncryptionKey {
        self.identity.encryption()
    }

    pub fn links(&self) -> &LinkSessionManager {
        &self.links
    }

    pub fn discovery(&self) -> &PeerDiscovery {
        &self.discovery
    }

    pub fn drain_transport_actions(&mut self) -> Vec<TransportAction> {
        self.links.drain_transport_actions()
    }

    pub fn contacts_snapshot(&self) -> Vec<RouterContact> {
        self.discovery.contacts_snapshot()
    }

    /// Verify and remember a contact learned out of band (bootstrap, disk).
    pub fn add_contact(&mut self, rc: RouterContact) -> Result<InsertOutcome, ContactError> {
        let now = self.now();
        let outcome = self.discovery.add_contact(rc, now);
        metrics::set_known_contacts(self.discovery.node_db().len());
        outcome
    }

    /// Ensure a session to `contact`'s router.
    pub fn connect_to(&mut self, contact: Arc<RouterContact>) -> EstablishOutcome {
        let now = self.now();
        self.links.establish_session(contact, now)
    }

    // ---- transport boundary --------------------------------------------

    /// The transport finished a handshake with the router behind `rc`.
    pub fn on_session_established(&mut self, rc: RouterContact) -> bool {
        let now = self.now();
        let router = rc.router_id;
        let was_dialing = self.links.session(&router).is_some_and(|s| !s.is_live());
        if !self
            .links
            .on_session_established(rc.clone(), now, self.discovery.node_db())
        {
            return false;
        }
        if was_dialing {
            self.profiling.mark_connect_success(&router, now);
        }
        match self.discovery.add_contact(rc, now) {
            Ok(_) | Err(ContactError::Stale { .. }) => {}
            Err(e) => debug!(peer = %router, error = %e, "session contact not stored"),
        }
        metrics::set_known_contacts(self.discovery.node_db().len());
        true
    }

    pub fn session_closed(&mut self, router: &RouterId) -> bool {
        if !self.links.session_closed(router) {
            return false;
        }
        let now = self.now();
        let effects = self.paths.on_session_closed(router, now);
        self.apply_path_effects(effects);
        true
    }

    pub fn on_connect_timeout(&mut self, router: &RouterId) -> bool {
        let now = self.now();
        if !self.links.on_connect_timeout(router, &mut self.profiling, now) {
            return false;
        }
        let effects = self.paths.on_session_closed(router, now);
        self.apply_path_effects(effects);
        true
    }

    // ---- outbound ------------------------------------------------------

    /// Seal `frame` to `to`, or queue it and go find a session.
    ///
    /// Returns false when the frame was not accepted or no session to `to`
    /// can be dialed or looked up; the queue for `to` is dropped then.
    pub fn send_to_or_queue(&mut self, to: &RouterId, frame: Vec<u8>) -> bool {
        let now = self.now();
        match self.links.send_to_or_queue(to, frame, now) {
            SendOutcome::Sent | SendOutcome::Queued => true,
            SendOutcome::Dropped => false,
            SendOutcome::NeedsSession => self.request_session(to, now),
        }
    }

    /// Dial `router` if its contact is known, otherwise look it up.
    ///
    /// `TryLater` keeps the queue; `retry_waiting_sessions` dials again once
    /// a handshake slot frees up.
    fn request_session(&mut self, router: &RouterId, now: u64) -> bool {
        if let Some(contact) = self.discovery.node_db().get(router) {
            return match self.links.establish_session(contact, now) {
                EstablishOutcome::Rejected => {
                    self.links.drop_queue(router);
                    false
                }
                outcome => {
                    trace!(peer = %router, ?outcome, "session requested");
                    true
                }
            };
        }
        if self.discovery.is_looking_up(router) {
            return true;
        }
        match self.discovery.lookup_router(router, &self.links, now) {
            Some((peer, msg)) => self.send_link_message(&peer, &msg),
            None => {
                let lost = self.links.drop_queue(router);
                debug!(peer = %router, lost, "no contact and nobody to ask");
                false
            }
        }
    }

    /// Ask again for every router with frames queued but no session.
    fn retry_waiting_sessions(&mut self, now: u64) {
        for router in self.links.routers_awaiting_session() {
            self.request_session(&router, now);
        }
    }

    fn send_link_message(&mut self, to: &RouterId, msg: &LinkMessage) -> bool {
        match msg.encode() {
            Ok(bytes) => self.send_to_or_queue(to, bytes),
            Err(e) => {
                warn!(peer = %to, kind = msg.kind(), error = %e, "could not encode link message");
                false
            }
        }
    }

    /// Carry out what a PathContext call asked for.
    fn apply_path_effects(&mut self, effects: PathEffects) {
        let PathEffects {
            outbound,
            persist,
            completed,
            broken,
        } = effects;

        for (router, until) in persist {
            self.links.persist_session_until(&router, until);
        }
        for (to, msg) in outbound {
            // no point dialing a router only to tell it to forget a path
            if matches!(msg, LinkMessage::PathTeardown { .. }) && !self.links.has_session(&to) {
                trace!(peer = %to, "teardown skipped, no session");
                continue;
            }
            self.send_link_message(&to, &msg);
        }
        for completion in completed {
            self.record_build_completion(completion);
        }
        for path_id in broken {
            debug!(path = %path_id, "own path lost");
        }
    }

    fn record_build_completion(&mut self, done: BuildCompletion) {
        let now = self.now();
        metrics::path_build_duration(done.elapsed_ms as f64 / 1000.0);
        match done.outcome {
            Ok(()) => {
                metrics::path_build_result("success");
                for hop in &done.hops {
                    self.profiling.mark_path_success(hop, now);
                }
            }
            Err(PathBuildError::Cancelled) => metrics::path_build_result("cancelled"),
            Err(_) => {
                metrics::path_build_result("failed");
                if let Some(hop) = done.failed_hop {
                    self.profiling.mark_path_failure(&hop, now);
                }
            }
        }
    }

    // ---- inbound -------------------------------------------------------

    /// Sealed link frame from `from`. Returns false if it was dropped.
    pub fn handle_recv_link_message_buffer(&mut self, from: &RouterId, buf: &[u8]) -> bool {
        let now = self.now();
        if !self.links.has_session(from) {
            return dropped("unknown_session", from);
        }
        let Some(plain) = self.links.handle_inbound(from, buf, now) else {
            return dropped("decrypt_failed", from);
        };
        let msg = match LinkMessage::decode(&plain) {
            Ok(msg) => msg,
            Err(_) => return dropped("malformed", from),
        };
        metrics::link_message_received(msg.kind());
        self.handle_link_message(from, msg, now)
    }

    fn handle_link_message(&mut self, from: &RouterId, msg: LinkMessage, now: u64) -> bool {
        match msg {
            LinkMessage::RelayUpstream { path_id, payload } => {
                match self.paths.handle_relay_upstream(from, &path_id, &payload, now) {
                    Some(RelayOutcome::Forward((to, frame))) => self.send_link_message(&to, &frame),
                    Some(RelayOutcome::AtTerminal { rx_path, payload }) => {
                        self.handle_routing_at_terminal(rx_path, &payload, now)
                    }
                    Some(RelayOutcome::AtOriginator { .. }) | None => false,
                }
            }
            LinkMessage::RelayDownstream { path_id, payload } => {
                match self.paths.handle_relay_downstream(from, &path_id, &payload, now) {
                    Some(RelayOutcome::Forward((to, frame))) => self.send_link_message(&to, &frame),
                    Some(RelayOutcome::AtOriginator { path_id, payload }) => {
                        self.handle_routing_at_originator(path_id, &payload, now)
                    }
                    Some(RelayOutcome::AtTerminal { .. }) | None => false,
                }
            }
            LinkMessage::PathBuild(request) => {
                let effects = self.paths.accept_build(
                    from,
                    &request,
                    self.identity.encryption(),
                    self.verifier.as_ref(),
                    now,
                );
                self.apply_optional(effects)
            }
            LinkMessage::PathBuildReply { path_id, accepted } => {
                let effects = self.paths.handle_build_reply(from, path_id, accepted, now);
                self.apply_optional(effects)
            }
            LinkMessage::PathTeardown { path_id } => {
                let effects = self.paths.handle_teardown(from, &path_id, now);
                self.apply_optional(effects)
            }
            LinkMessage::DhtFindRouter {
                txid,
                target,
                explore,
            } => {
                let reply = self
                    .discovery
                    .handle_find_router(from, txid, &target, explore, &self.rc);
                self.send_link_message(from, &reply)
            }
            LinkMessage::DhtGotRouter { txid, contacts } => {
                let Some(outcome) = self.discovery.handle_got_router(from, txid, contacts, now)
                else {
                    return dropped("unsolicited", from);
                };
                metrics::set_known_contacts(self.discovery.node_db().len());
                self.handle_lookup_outcome(outcome, now);
                true
            }
        }
    }

    fn apply_optional(&mut self, effects: Option<PathEffects>) -> bool {
        match effects {
            Some(effects) => {
                self.apply_path_effects(effects);
                true
            }
            None => false,
        }
    }

    fn handle_lookup_outcome(&mut self, outcome: LookupOutcome, now: u64) {
        match outcome {
            LookupOutcome::Found(contact) => {
                if self.links.queued_for(&contact.router_id) > 0 {
                    self.links.establish_session(contact, now);
                }
            }
            LookupOutcome::Failed { target } => {
                let lost = self.links.drop_queue(&target);
                debug!(target = %target, lost, "lookup failed, queued frames dropped");
            }
            LookupOutcome::Explored { .. } | LookupOutcome::Retrying { .. } => {}
        }
    }

    /// Routing message that reached the last hop of someone else's path.
    fn handle_routing_at_terminal(&mut self, rx_path: PathId, payload: &[u8], now: u64) -> bool {
        match RoutingMessage::peek_type(payload) {
            Some(kind) if kind.is_control() => {}
            _ => return parse_routing_message_buffer(payload, &mut self.dispatcher, rx_path),
        }
        let Ok(msg) = RoutingMessage::decode(payload) else {
            metrics::frame_dropped("malformed_routing");
            return false;
        };
        match msg {
            RoutingMessage::PathExtend {
                next_hop,
                ephemeral_key,
                sealed_record,
            } => self.extend_transit(rx_path, next_hop, ephemeral_key, sealed_record, now),
            RoutingMessage::PathLatency { sent_ms, reply: false } => {
                let echo = RoutingMessage::PathLatency {
                    sent_ms,
                    reply: true,
                };
                self.reply_on_transit(&rx_path, &echo)
            }
            _ => {
                trace!(path = %rx_path, "control message not valid at terminal hop");
                metrics::frame_dropped("unexpected_control");
                false
            }
        }
    }

    /// Grow the path ending at our transit hop `rx_path` toward `next_hop`.
    fn extend_transit(
        &mut self,
        rx_path: PathId,
        next_hop: RouterContact,
        ephemeral_key: [u8; 32],
        sealed_record: Vec<u8>,
        now: u64,
    ) -> bool {
        let next = next_hop.router_id;
        if next == self.identity.router_id()
            || next_hop
                .verify(self.verifier.as_ref(), now, &self.policy)
                .is_err()
        {
            trace!(path = %rx_path, peer = %next, "extend names an unusable contact");
            metrics::frame_dropped("bad_contact");
            return self.refuse_extend(&rx_path);
        }
        let tx_id = match self.paths.begin_extend(&rx_path, next, now) {
            Ok(tx_id) => tx_id,
            Err(e) => {
                trace!(path = %rx_path, error = %e, "extend refused");
                metrics::frame_dropped("extend_refused");
                return self.refuse_extend(&rx_path);
            }
        };

        let contact = Arc::new(next_hop);
        match self.links.establish_session(contact, now) {
            EstablishOutcome::Rejected | EstablishOutcome::TryLater => {
                let effects = self.paths.reject_extend(&rx_path);
                return self.apply_optional(effects);
            }
            EstablishOutcome::Established | EstablishOutcome::Pending => {}
        }
        let request = PathBuildRequest::new_signed(
            self.identity.as_ref(),
            ephemeral_key,
            sealed_record,
            now,
        );
        debug!(rx = %rx_path, tx = %tx_id, next = %next, "forwarding path build");
        self.send_link_message(&next, &LinkMessage::PathBuild(request))
    }

    /// Tell the originator an extend went nowhere.
    fn refuse_extend(&mut self, rx_path: &PathId) -> bool {
        let reply = RoutingMessage::PathExtendReply { accepted: false };
        self.reply_on_transit(rx_path, &reply)
    }

    /// Routing message that came back along one of our own paths.
    fn handle_routing_at_originator(&mut self, path_id: PathId, payload: &[u8], now: u64) -> bool {
        match RoutingMessage::peek_type(payload) {
            Some(kind) if kind.is_control() => {}
            _ => return parse_routing_message_buffer(payload, &mut self.dispatcher, path_id),
        }
        match RoutingMessage::decode(payload) {
            Ok(RoutingMessage::PathExtendReply { accepted }) => {
                let effects = self.paths.handle_extend_reply(path_id, accepted, now);
                self.apply_optional(effects)
            }
            Ok(RoutingMessage::PathLatency { sent_ms, reply: true }) => {
                match self.paths.record_latency(&path_id, sent_ms, now) {
                    Some(latency) => {
                        trace!(path = %path_id, latency_ms = latency, "path latency measured");
                        true
                    }
                    None => false,
                }
            }
            _ => {
                metrics::frame_dropped("unexpected_control");
                false
            }
        }
    }

    // ---- paths ---------------------------------------------------------

    /// Build a path of the configured length through routers picked by
    /// discovery. The first hop is always a router we are connected to.
    pub fn build_path(&mut self) -> Result<PathBuildHandle, PathBuildError> {
        let now = self.now();
        let want = self.config.path.hop_count;
        if self.links.number_of_connected() < self.config.path.min_connected_for_build.max(1) {
            debug!(connected = self.links.number_of_connected(), "too few connected routers to build");
            return Err(PathBuildError::BuildFailed);
        }

        let first = self
            .links
            .connected_contacts()
            .into_iter()
            .filter(|rc| !self.profiling.is_bad_for_path(&rc.router_id))
            .min_by_key(|rc| self.profiling.get(&rc.router_id).map_or(0, |p| p.path_failures))
            .ok_or(PathBuildError::BuildFailed)?;

        let mut exclude = vec![first.router_id];
        let mut hops = vec![first];
        while hops.len() < want {
            let Some(id) = self
                .discovery
                .get_random_good_router(&self.profiling, &exclude, now)
            else {
                debug!(have = hops.len(), want, "not enough good routers for a path");
                return Err(PathBuildError::BuildFailed);
            };
            let Some(rc) = self.discovery.node_db().get(&id) else {
                return Err(PathBuildError::BuildFailed);
            };
            exclude.push(id);
            hops.push(rc);
        }
        self.build_path_through(hops)
    }

    /// Build a path through exactly `hops`, first hop first.
    pub fn build_path_through(
        &mut self,
        hops: Vec<Arc<RouterContact>>,
    ) -> Result<PathBuildHandle, PathBuildError> {
        let now = self.now();
        let first = hops.first().cloned();
        let (handle, effects) = match self.paths.begin_build(self.identity.as_ref(), hops, now) {
            Ok(started) => started,
            Err(e) => {
                let label = match e {
                    PathBuildError::ResourceExhausted => "resource_exhausted",
                    _ => "failed",
                };
                metrics::path_build_result(label);
                return Err(e);
            }
        };
        if let Some(first) = first {
            self.links.establish_session(first, now);
        }
        self.apply_path_effects(effects);
        Ok(handle)
    }

    /// Returns false when there is no such build (already done or cancelled).
    pub fn cancel_path_build(&mut self, path_id: &PathId) -> bool {
        let now = self.now();
        let effects = self.paths.cancel_build(path_id, now);
        self.apply_optional(effects)
    }

    pub fn teardown_path(&mut self, path_id: &PathId) -> bool {
        let now = self.now();
        let effects = self.paths.teardown_path(path_id, now);
        self.apply_optional(effects)
    }

    /// Send `msg` to the far end of our established path `path_id`.
    pub fn send_on_path(&mut self, path_id: &PathId, msg: &RoutingMessage) -> bool {
        let Ok(bytes) = msg.encode() else {
            return false;
        };
        match self.paths.send_on_path(path_id, &bytes) {
            Some((to, frame)) => self.send_link_message(&to, &frame),
            None => false,
        }
    }

    /// Answer from the terminal hop `rx_id` back to the path's originator.
    pub fn reply_on_transit(&mut self, rx_id: &PathId, msg: &RoutingMessage) -> bool {
        let now = self.now();
        let Ok(bytes) = msg.encode() else {
            return false;
        };
        match self.paths.reply_on_transit(rx_id, &bytes, now) {
            Some((to, frame)) => self.send_link_message(&to, &frame),
            None => false,
        }
    }

    pub fn probe_latency(&mut self, path_id: &PathId) -> bool {
        let now = self.now();
        match self.paths.latency_probe(path_id, now) {
            Some((to, frame)) => self.send_link_message(&to, &frame),
            None => false,
        }
    }

    pub fn register_handler(
        &mut self,
        kind: RoutingMessageType,
        handler: Box<dyn RoutingHandler + Send + Sync>,
    ) -> Result<(), DispatchError> {
        self.dispatcher.register(kind, handler)
    }

    // ---- housekeeping --------------------------------------------------

    /// Re-sign our contact once half its lifetime has passed.
    fn refresh_contact(&mut self, now: u64) {
        let half_life = self.policy.lifetime_ms / 2;
        if now < self.rc.timestamp_ms.saturating_add(half_life) {
            return;
        }
        let version = now.max(self.rc.version + 1);
        match RouterContact::new_signed(
            self.identity.as_ref(),
            self.rc.addresses.clone(),
            version,
            now,
        ) {
            Ok(rc) => {
                debug!(version, "own contact refreshed");
                self.rc = Arc::new(rc);
            }
            Err(e) => warn!(error = %e, "could not refresh own contact"),
        }
    }

    /// Periodic work: timeouts, expiry, lookups, explore, decay.
    pub fn tick(&mut self) {
        let now = self.now();

        for router in self.links.tick(now, &mut self.profiling) {
            let effects = self.paths.on_session_closed(&router, now);
            self.apply_path_effects(effects);
        }

        let effects = self.paths.tick(now);
        self.apply_path_effects(effects);
        self.retry_waiting_sessions(now);

        let work = self.discovery.tick(now, &self.links, &mut self.profiling);
        for (peer, msg) in work.outbound {
            self.send_link_message(&peer, &msg);
        }
        for target in work.failed {
            self.links.drop_queue(&target);
        }

        let expired = self.discovery.expire(now);
        if expired > 0 {
            debug!(expired, "stale contacts dropped");
        }
        metrics::set_known_contacts(self.discovery.node_db().len());
        self.profiling.decay(now);
        self.refresh_contact(now);
    }
}

impl SigningCapability for Router {
    fn router_id(&self) -> RouterId {
        self.identity.router_id()
    }

    fn sign(&self, msg: &[u8]) -> Vec<u8> {
        self.identity.sign(msg)
    }

    fn encryption_public(&self) -> [u8; 32] {
        self.identity.encryption_public()
    }
}

impl SessionAccess for Router {
    fn has_session(&self, router: &RouterId) -> bool {
        self.links.has_session(router)
    }

    fn connected_contacts(&self) -> Vec<Arc<RouterContact>> {
        self.links.connected_contacts()
    }

    fn number_of_connected(&self) -> usize {
        self.links.number_of_connected()
    }

    fn persist_session_until(&mut self, router: &RouterId, until_ms: u64) {
        self.links.persist_session_until(router, until_ms);
    }
}

impl PathAccess for Router {
    fn path_context(&self) -> &PathContext {
        &self.paths
    }

    fn path_context_mut(&mut self) -> &mut PathContext {
        &mut self.paths
    }
}

impl ProfilingAccess for Router {
    fn router_profiling(&self) -> &RouterProfiling {
        &self.profiling
    }

    fn router_profiling_mut(&mut self) -> &mut RouterProfiling {
        &mut self.profiling
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::core_path::PathStatus;
    use crate::test_utils::{TestRouter, TEST_NOW_MS};
    use std::sync::Mutex;
    use std::time::Duration;

    fn router_for(n: u8, clock: &ManualClock) -> Router {
        router_with(n, clock, RouterConfig::default())
    }

    fn router_with(n: u8, clock: &ManualClock, mut config: RouterConfig) -> Router {
        let test = TestRouter::new(n);
        config.router.public_addresses = vec![test.address()];
        Router::new(config, Arc::new(test.identity), Arc::new(clock.clone())).unwrap()
    }

    fn dialed(actions: Vec<TransportAction>) -> Vec<RouterId> {
        actions
            .into_iter()
            .filter_map(|a| match a {
                TransportAction::Dial { contact } => Some(contact.router_id),
                _ => None,
            })
            .collect()
    }

    /// Link two routers as the transport would after a handshake.
    fn link(a: &mut Router, b: &mut Router) {
        assert!(a.on_session_established(b.rc().as_ref().clone()));
        assert!(b.on_session_established(a.rc().as_ref().clone()));
    }

    /// Deliver every Transmit between routers until the network is quiet.
    fn pump(routers: &mut [Router]) -> usize {
        let mut delivered = 0;
        loop {
            let mut frames = Vec::new();
            for r in routers.iter_mut() {
                let from = r.router_id();
                for action in r.drain_transport_actions() {
                    if let TransportAction::Transmit { to, frame } = action {
                        frames.push((from, to, frame));
                    }
                }
            }
            if frames.is_empty() {
                return delivered;
            }
            for (from, to, frame) in frames {
                if let Some(dest) = routers.iter_mut().find(|r| r.router_id() == to) {
                    dest.handle_recv_link_message_buffer(&from, &frame);
                    delivered += 1;
                }
            }
        }
    }

    type Inbox = Arc<Mutex<Vec<(PathId, RoutingMessage)>>>;

    struct Collect(Inbox);

    impl RoutingHandler for Collect {
        fn handle_routing_message(&mut self, rx_path: PathId, msg: RoutingMessage) -> bool {
            self.0.lock().unwrap().push((rx_path, msg));
            true
        }
    }

    #[test]
    fn test_router_is_send_and_sync() {
        fn shareable<T: Send + Sync>() {}
        shareable::<Router>();
    }

    #[test]
    fn test_no_public_address_is_fatal() {
        let clock = ManualClock::new(TEST_NOW_MS);
        let mut config = RouterConfig::default();
        config.router.public_addresses.clear();
        let err = Router::new(config, Arc::new(Identity::generate()), Arc::new(clock));
        assert!(matches!(err, Err(RouterError::NoUsableTransport)));
    }

    #[test]
    fn test_frames_from_strangers_dropped() {
        let clock = ManualClock::new(TEST_NOW_MS);
        let mut a = router_for(1, &clock);
        let stranger = TestRouter::new(9).id();
        assert!(!a.handle_recv_link_message_buffer(&stranger, b"whatever"));
        assert!(a.drain_transport_actions().is_empty());
    }

    #[test]
    fn test_two_hop_path_carries_data_and_latency() {
        let clock = ManualClock::new(TEST_NOW_MS);
        let mut routers: Vec<Router> = (1..=3).map(|n| router_for(n, &clock)).collect();
        {
            let (a, rest) = routers.split_at_mut(1);
            let (b, c) = rest.split_at_mut(1);
            link(&mut a[0], &mut b[0]);
            link(&mut b[0], &mut c[0]);
        }
        let inbox: Inbox = Arc::default();
        routers[2]
            .register_handler(RoutingMessageType::DataTransfer, Box::new(Collect(inbox.clone())))
            .unwrap();

        let hops = vec![routers[1].rc().clone(), routers[2].rc().clone()];
        let mut handle = routers[0].build_path_through(hops).unwrap();
        pump(&mut routers);
        let path_id = handle.try_result().unwrap().unwrap();
        assert_eq!(
            routers[0].path_context().own_path(&path_id).unwrap().status(),
            PathStatus::Established
        );

        let msg = RoutingMessage::DataTransfer {
            protocol: 9,
            payload: b"over two hops".to_vec(),
        };
        assert!(routers[0].send_on_path(&path_id, &msg));
        pump(&mut routers);
        assert_eq!(inbox.lock().unwrap().len(), 1);
        assert_eq!(inbox.lock().unwrap()[0].1, msg);

        clock.advance(Duration::from_millis(40));
        assert!(routers[0].probe_latency(&path_id));
        pump(&mut routers);
        assert!(routers[0]
            .path_context()
            .own_path(&path_id)
            .unwrap()
            .latency_ms()
            .is_some());
    }

    #[test]
    fn test_send_on_unknown_path_touches_nothing() {
        let clock = ManualClock::new(TEST_NOW_MS);
        let mut a = router_for(1, &clock);
        let msg = RoutingMessage::DataDiscard { sequence: 1 };
        assert!(!a.send_on_path(&PathId::random(), &msg));
        assert!(!a.reply_on_transit(&PathId::random(), &msg));
        assert!(a.drain_transport_actions().is_empty());
        assert_eq!(a.number_of_connected(), 0);
    }

    #[test]
    fn test_build_needs_connected_routers() {
        let clock = ManualClock::new(TEST_NOW_MS);
        let mut a = router_for(1, &clock);
        assert_eq!(a.build_path().unwrap_err(), PathBuildError::BuildFailed);
    }

    #[test]
    fn test_cancel_twice_is_noop() {
        let clock = ManualClock::new(TEST_NOW_MS);
        let mut a = router_for(1, &clock);
        let mut b = router_for(2, &clock);
        link(&mut a, &mut b);
        a.drain_transport_actions();

        let handle = a.build_path_through(vec![b.rc().clone()]).unwrap();
        let id = handle.path_id();
        a.drain_transport_actions();
        assert!(a.cancel_path_build(&id));
        assert_eq!(a.drain_transport_actions().len(), 1);
        assert!(!a.cancel_path_build(&id));
        assert!(a.drain_transport_actions().is_empty());
        assert!(a.router_profiling().get(&b.router_id()).map_or(true, |p| p.path_failures == 0));
    }

    #[test]
    fn test_connect_timeout_fails_dependent_build() {
        let clock = ManualClock::new(TEST_NOW_MS);
        let mut a = router_for(1, &clock);
        let b = router_for(2, &clock);
        let b_id = b.router_id();

        let mut handle = a.build_path_through(vec![b.rc().clone()]).unwrap();
        let actions = a.drain_transport_actions();
        assert!(matches!(actions.as_slice(), [TransportAction::Dial { .. }]));

        clock.advance(a.config().link.connect_timeout);
        a.tick();
        assert_eq!(handle.try_result(), Some(Err(PathBuildError::BuildFailed)));
        assert_eq!(a.router_profiling().get(&b_id).unwrap().connect_timeouts, 1);
    }

    #[test]
    fn test_deferred_dial_retried_when_slot_frees() {
        let clock = ManualClock::new(TEST_NOW_MS);
        let mut config = RouterConfig::default();
        config.link.max_pending_sessions = 1;
        let mut a = router_with(1, &clock, config);
        let b = router_for(2, &clock);
        let c = router_for(3, &clock);
        a.add_contact(b.rc().as_ref().clone()).unwrap();
        a.add_contact(c.rc().as_ref().clone()).unwrap();

        assert!(a.send_to_or_queue(&b.router_id(), b"to b".to_vec()));
        assert!(a.send_to_or_queue(&c.router_id(), b"to c".to_vec()));
        assert_eq!(dialed(a.drain_transport_actions()), vec![b.router_id()]);
        assert_eq!(a.links().queued_for(&c.router_id()), 1);

        // still no free slot: nothing new
        a.tick();
        assert!(dialed(a.drain_transport_actions()).is_empty());

        assert!(a.on_session_established(b.rc().as_ref().clone()));
        a.drain_transport_actions();
        a.tick();
        assert_eq!(dialed(a.drain_transport_actions()), vec![c.router_id()]);
        assert_eq!(a.links().queued_for(&c.router_id()), 1);
    }

    #[test]
    fn test_send_to_unreachable_router_fails() {
        let clock = ManualClock::new(TEST_NOW_MS);
        let mut a = router_for(1, &clock);
        let stranger = TestRouter::new(9).id();

        assert!(!a.send_to_or_queue(&stranger, b"nowhere".to_vec()));
        assert!(a.drain_transport_actions().is_empty());
        assert_eq!(a.links().queued_for(&stranger), 0);

        // with a neighbour to ask, the frame waits on a lookup instead
        let mut b = router_for(2, &clock);
        link(&mut a, &mut b);
        a.drain_transport_actions();
        assert!(a.send_to_or_queue(&stranger, b"later".to_vec()));
        assert_eq!(a.links().queued_for(&stranger), 1);
        assert_eq!(a.discovery().pending_lookups(), 1);
        let actions = a.drain_transport_actions();
        assert!(matches!(
            actions.as_slice(),
            [TransportAction::Transmit { to, .. }] if *to == b.router_id()
        ));
    }

    #[test]
    fn test_own_path_keeps_first_hop_session_open() {
        let clock = ManualClock::new(TEST_NOW_MS);
        let mut routers: Vec<Router> = (1..=2).map(|n| router_for(n, &clock)).collect();
        {
            let (a, b) = routers.split_at_mut(1);
            link(&mut a[0], &mut b[0]);
        }
        let hops = vec![routers[1].rc().clone()];
        let mut handle = routers[0].build_path_through(hops).unwrap();
        pump(&mut routers);
        let path_id = handle.try_result().unwrap().unwrap();

        let idle = routers[0].config().link.idle_timeout;
        clock.advance(idle + Duration::from_secs(1));
        routers[0].tick();

        let b_id = routers[1].router_id();
        assert!(routers[0].has_session(&b_id));
        assert!(!routers[0]
            .drain_transport_actions()
            .contains(&TransportAction::Close { router: b_id }));
        assert_eq!(
            routers[0].path_context().own_path(&path_id).unwrap().status(),
            PathStatus::Established
        );
    }

    #[test]
    fn test_own_contact_refreshed_after_half_life() {
        let clock = ManualClock::new(TEST_NOW_MS);
        let mut a = router_for(1, &clock);
        let before = a.rc().version;
        a.tick();
        assert_eq!(a.rc().version, before);
        clock.advance(a.config().router.contact_lifetime / 2);
        a.tick();
        assert!(a.rc().version > before);
        assert!(a.rc().verify_signature(&Ed25519Verifier));
    }
}
