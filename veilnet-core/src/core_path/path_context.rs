/*
    PathContext - every path this router takes part in

    Two roles, one id space:

    ORIGINATOR                         TRANSIT HOP
    own[e0] -> Path (hops, keys)       transit[rx_id] -> TransitHop
    builds[e0] -> PendingBuild         tx_index[tx_id] -> rx_id

      me --e0--> hop1 --e1--> hop2 --e2--> hop3 (--e3-->)

    The originator draws every edge id up front and seals one extend record
    per hop. Hop 1 gets a PathBuild over the link; later hops are reached by
    a PathExtend routing message sent through the partial path, which the
    current terminal hop turns into a PathBuild of its own.

    No id may appear twice across own, transit and tx_index. Methods never
    send anything themselves: they return PathEffects (frames to send,
    sessions to pin, builds that resolved, paths that broke) and the router
    applies them. Rejected input returns None after a trace log and one
    counter increment.
*/

use hashlink::LruCache;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

use super::extend_record::ExtendRecord;
use super::hop_crypto::{open_record, seal_record};
use super::path::{BuildResult, HopConfig, Path, PathBuildError, PathBuildHandle, PendingBuild};
use super::transit_hop::TransitHop;
use super::{PathError, PathId, MAX_HOPS};
use crate::config::PathConfig;
use crate::core_identity::{
    EncryptionKey, RouterContact, RouterId, SignatureVerifier, SigningCapability,
};
use crate::core_router::metrics;
use crate::core_router::{LinkMessage, PathBuildRequest, RoutingMessage};

/// A link frame addressed to a neighbour.
pub type Outbound = (RouterId, LinkMessage);

/// A locally originated build that resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCompletion {
    pub path_id: PathId,
    pub outcome: Result<(), PathBuildError>,
    pub hops: Vec<RouterId>,
    /// Hop that rejected or did not answer, for local profiling only
    pub failed_hop: Option<RouterId>,
    pub elapsed_ms: u64,
}

/// What the router must do after a PathContext call.
#[derive(Debug, Default)]
pub struct PathEffects {
    pub outbound: Vec<Outbound>,
    /// Sessions to keep open until the given time
    pub persist: Vec<(RouterId, u64)>,
    pub completed: Vec<BuildCompletion>,
    /// Own established paths lost to a teardown, a closed session or expiry
    pub broken: Vec<PathId>,
}

impl PathEffects {
    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty()
            && self.persist.is_empty()
            && self.completed.is_empty()
            && self.broken.is_empty()
    }

    fn send(&mut self, to: RouterId, msg: LinkMessage) {
        self.outbound.push((to, msg));
    }
}

/// Where a relayed payload goes next.
#[derive(Debug, PartialEq, Eq)]
pub enum RelayOutcome {
    Forward(Outbound),
    /// Upstream payload reached the last hop; `payload` is a routing message
    AtTerminal { rx_path: PathId, payload: Vec<u8> },
    /// Downstream payload reached the originator with all layers removed
    AtOriginator { path_id: PathId, payload: Vec<u8> },
}

fn ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn dropped<T>(reason: &'static str, path_id: &PathId) -> Option<T> {
    trace!(reason, path = %path_id, "path frame dropped");
    metrics::frame_dropped(reason);
    None
}

/// Downstream frame from a transit hop toward its previous router.
fn downstream_frame(hop: &TransitHop, payload: &[u8]) -> Result<Outbound, PathError> {
    let sealed = hop.keys().add_downstream(payload)?;
    Ok((
        hop.prev,
        LinkMessage::RelayDownstream {
            path_id: hop.rx_id,
            payload: sealed,
        },
    ))
}

fn extend_reply_frame(hop: &TransitHop, accepted: bool) -> Option<Outbound> {
    let bytes = RoutingMessage::PathExtendReply { accepted }.encode().ok()?;
    downstream_frame(hop, &bytes).ok()
}

pub struct PathContext {
    config: PathConfig,
    own: HashMap<PathId, Path>,
    builds: HashMap<PathId, PendingBuild>,
    transit: HashMap<PathId, TransitHop>,
    tx_index: HashMap<PathId, PathId>,
    replay: LruCache<[u8; 32], u64>,
}

impl PathContext {
    pub fn new(config: PathConfig) -> Self {
        let replay = LruCache::new(config.replay_cache_size.max(1));
        PathContext {
            config,
            own: HashMap::new(),
            builds: HashMap::new(),
            transit: HashMap::new(),
            tx_index: HashMap::new(),
            replay,
        }
    }

    pub fn config(&self) -> &PathConfig {
        &self.config
    }

    pub fn own_path(&self, path_id: &PathId) -> Option<&Path> {
        self.own.get(path_id)
    }

    pub fn transit_hop(&self, rx_id: &PathId) -> Option<&TransitHop> {
        self.transit.get(rx_id)
    }

    pub fn number_of_own_paths(&self) -> usize {
        self.own.len()
    }

    pub fn number_of_transit_hops(&self) -> usize {
        self.transit.len()
    }

    pub fn number_of_pending_builds(&self) -> usize {
        self.builds.len()
    }

    /// True if `id` names any edge this router knows, in either role.
    pub fn id_in_use(&self, id: &PathId) -> bool {
        self.own.contains_key(id) || self.transit.contains_key(id) || self.tx_index.contains_key(id)
    }

    fn fresh_id(&self, taken: &[PathId]) -> PathId {
        loop {
            let id = PathId::random();
            if !self.id_in_use(&id) && !taken.contains(&id) {
                return id;
            }
        }
    }

    // ---- originator ----------------------------------------------------

    /// Start building a path through `hops`, in order.
    ///
    /// Fails immediately with `ResourceExhausted` when the concurrent build
    /// limit is reached. The returned effects hold the PathBuild for hop 1.
    pub fn begin_build(
        &mut self,
        signer: &dyn SigningCapability,
        hops: Vec<Arc<RouterContact>>,
        now_ms: u64,
    ) -> Result<(PathBuildHandle, PathEffects), PathBuildError> {
        if self.builds.len() >= self.config.max_concurrent_builds {
            debug!(in_flight = self.builds.len(), "path build refused, limit reached");
            return Err(PathBuildError::ResourceExhausted);
        }
        let local = signer.router_id();
        let mut seen = HashSet::new();
        if hops.is_empty()
            || hops.len() > MAX_HOPS
            || hops
                .iter()
                .any(|h| h.router_id == local || !seen.insert(h.router_id))
        {
            debug!(hops = hops.len(), "unusable hop list");
            return Err(PathBuildError::BuildFailed);
        }

        let mut edges: Vec<PathId> = Vec::with_capacity(hops.len() + 1);
        while edges.len() < hops.len() + 1 {
            let id = self.fresh_id(&edges);
            edges.push(id);
        }

        let lifetime_ms = ms(self.config.path_lifetime);
        let mut configs = Vec::with_capacity(hops.len());
        let mut plan = Vec::with_capacity(hops.len());
        for (i, contact) in hops.into_iter().enumerate() {
            let record = ExtendRecord {
                rx_id: edges[i],
                tx_id: edges[i + 1],
                lifetime_ms,
            };
            let (sealed, keys) = seal_record(&contact.encryption_key, &record).map_err(|e| {
                debug!(error = %e, hop = %contact.router_id, "sealing extend record failed");
                PathBuildError::BuildFailed
            })?;
            configs.push(HopConfig {
                router: contact.router_id,
                rx_id: edges[i],
                tx_id: edges[i + 1],
                keys,
            });
            plan.push((contact, sealed));
        }

        let path_id = edges[0];
        let first_hop = configs[0].router;
        let request = PathBuildRequest::new_signed(
            signer,
            plan[0].1.ephemeral_key,
            plan[0].1.sealed.clone(),
            now_ms,
        );
        let hop_count = configs.len();
        let path = Path::new(configs, now_ms, lifetime_ms);
        let expires_ms = path.expires_ms;
        let (pending, rx) = PendingBuild::new(
            plan,
            now_ms,
            now_ms.saturating_add(ms(self.config.hop_timeout)),
            now_ms.saturating_add(ms(self.config.build_deadline)),
        );
        self.own.insert(path_id, path);
        self.builds.insert(path_id, pending);
        metrics::set_own_paths(self.own.len());
        debug!(path = %path_id, hops = hop_count, "path build started");

        let mut effects = PathEffects::default();
        effects.persist.push((first_hop, expires_ms));
        effects.send(first_hop, LinkMessage::PathBuild(request));
        Ok((PathBuildHandle::new(path_id, rx), effects))
    }

    /// Record one hop's answer and either finish or ask the next hop.
    fn advance_build(
        &mut self,
        path_id: PathId,
        accepted: bool,
        now_ms: u64,
        effects: &mut PathEffects,
    ) {
        if !accepted {
            self.fail_build(path_id, true, true, now_ms, effects);
            return;
        }
        let hop_timeout = ms(self.config.hop_timeout);
        let (Some(path), Some(build)) = (self.own.get_mut(&path_id), self.builds.get_mut(&path_id))
        else {
            return;
        };

        if path.confirm_hop() {
            let routers = path.routers();
            info!(path = %path_id, hops = routers.len(), "path established");
            effects.persist.push((path.first_hop(), path.expires_ms));
            if let Some(mut build) = self.builds.remove(&path_id) {
                let result: BuildResult = Ok(path_id);
                build.complete(result);
                effects.completed.push(BuildCompletion {
                    path_id,
                    outcome: Ok(()),
                    hops: routers,
                    failed_hop: None,
                    elapsed_ms: now_ms.saturating_sub(build.started_ms),
                });
            }
            return;
        }

        let index = path.confirmed_hops().len();
        let frame = build.plan.get(index).and_then(|(contact, sealed)| {
            let extend = RoutingMessage::PathExtend {
                next_hop: (**contact).clone(),
                ephemeral_key: sealed.ephemeral_key,
                sealed_record: sealed.sealed.clone(),
            };
            let bytes = extend.encode().ok()?;
            path.wrap_upstream(&bytes).ok()
        });
        match frame {
            Some(payload) => {
                build.hop_deadline_ms = now_ms.saturating_add(hop_timeout);
                trace!(path = %path_id, hop = index + 1, "extending path");
                effects.send(path.first_hop(), LinkMessage::RelayUpstream { path_id, payload });
            }
            None => self.fail_build(path_id, false, true, now_ms, effects),
        }
    }

    /// Tear down a build in progress and resolve it with `BuildFailed`.
    fn fail_build(
        &mut self,
        path_id: PathId,
        blame_next_hop: bool,
        notify_first_hop: bool,
        now_ms: u64,
        effects: &mut PathEffects,
    ) {
        let Some(mut build) = self.builds.remove(&path_id) else {
            return;
        };
        let Some(mut path) = self.own.remove(&path_id) else {
            return;
        };
        path.mark_broken();
        let failed_hop = if blame_next_hop {
            path.next_unconfirmed().map(|h| h.router)
        } else {
            None
        };
        if notify_first_hop {
            effects.send(path.first_hop(), LinkMessage::PathTeardown { path_id });
        }
        build.complete(Err(PathBuildError::BuildFailed));
        debug!(path = %path_id, confirmed = path.confirmed_hops().len(), "path build failed");
        effects.completed.push(BuildCompletion {
            path_id,
            outcome: Err(PathBuildError::BuildFailed),
            hops: path.routers(),
            failed_hop,
            elapsed_ms: now_ms.saturating_sub(build.started_ms),
        });
        metrics::set_own_paths(self.own.len());
    }

    /// PathExtendReply that came back through our own partial path.
    pub fn handle_extend_reply(
        &mut self,
        path_id: PathId,
        accepted: bool,
        now_ms: u64,
    ) -> Option<PathEffects> {
        let confirmed = self.own.get(&path_id)?.confirmed_hops().len();
        if !self.builds.contains_key(&path_id) || confirmed == 0 {
            return dropped("unexpected_reply", &path_id);
        }
        let mut effects = PathEffects::default();
        self.advance_build(path_id, accepted, now_ms, &mut effects);
        Some(effects)
    }

    /// Abandon a build. A second call, or a call after completion, returns `None`.
    pub fn cancel_build(&mut self, path_id: &PathId, now_ms: u64) -> Option<PathEffects> {
        let mut build = self.builds.remove(path_id)?;
        let path = self.own.remove(path_id)?;
        build.complete(Err(PathBuildError::Cancelled));
        debug!(path = %path_id, "path build cancelled");

        let mut effects = PathEffects::default();
        effects.send(path.first_hop(), LinkMessage::PathTeardown { path_id: *path_id });
        effects.completed.push(BuildCompletion {
            path_id: *path_id,
            outcome: Err(PathBuildError::Cancelled),
            hops: path.routers(),
            failed_hop: None,
            elapsed_ms: now_ms.saturating_sub(build.started_ms),
        });
        metrics::set_own_paths(self.own.len());
        Some(effects)
    }

    /// Explicitly tear down one of our paths, built or not.
    pub fn teardown_path(&mut self, path_id: &PathId, now_ms: u64) -> Option<PathEffects> {
        if self.builds.contains_key(path_id) {
            return self.cancel_build(path_id, now_ms);
        }
        let path = self.own.remove(path_id)?;
        debug!(path = %path_id, "path torn down");
        let mut effects = PathEffects::default();
        effects.send(path.first_hop(), LinkMessage::PathTeardown { path_id: *path_id });
        metrics::set_own_paths(self.own.len());
        Some(effects)
    }

    /// Wrap an encoded routing message for every hop of an established path.
    pub fn send_on_path(&self, path_id: &PathId, message: &[u8]) -> Option<Outbound> {
        let Some(path) = self.own.get(path_id) else {
            return dropped("unknown_path", path_id);
        };
        if !path.is_established() {
            return dropped("path_not_ready", path_id);
        }
        let payload = path.wrap_upstream(message).ok()?;
        Some((
            path.first_hop(),
            LinkMessage::RelayUpstream {
                path_id: *path_id,
                payload,
            },
        ))
    }

    /// Latency probe for an established path.
    pub fn latency_probe(&self, path_id: &PathId, now_ms: u64) -> Option<Outbound> {
        let probe = RoutingMessage::PathLatency {
            sent_ms: now_ms,
            reply: false,
        }
        .encode()
        .ok()?;
        self.send_on_path(path_id, &probe)
    }

    /// Store the round trip of a returned probe. Returns the latency.
    pub fn record_latency(&mut self, path_id: &PathId, sent_ms: u64, now_ms: u64) -> Option<u64> {
        let path = self.own.get_mut(path_id)?;
        if sent_ms > now_ms {
            return None;
        }
        let latency = now_ms - sent_ms;
        path.set_latency(latency);
        metrics::path_latency(latency as f64 / 1000.0);
        Some(latency)
    }

    // ---- transit -------------------------------------------------------

    /// Handle a PathBuild received over the link from `from`.
    ///
    /// Unverifiable, stale, replayed or unreadable requests are dropped with
    /// no answer. Well formed requests that cannot be honoured get a
    /// negative PathBuildReply.
    pub fn accept_build(
        &mut self,
        from: &RouterId,
        request: &PathBuildRequest,
        local: &EncryptionKey,
        verifier: &dyn SignatureVerifier,
        now_ms: u64,
    ) -> Option<PathEffects> {
        let window = ms(self.config.freshness_window);
        if request.requester != *from || !request.verify(verifier) {
            trace!(peer = %from, "build request signature rejected");
            metrics::frame_dropped("bad_signature");
            return None;
        }
        if now_ms.abs_diff(request.timestamp_ms) > window {
            trace!(peer = %from, ts = request.timestamp_ms, "build request outside freshness window");
            metrics::frame_dropped("stale");
            return None;
        }
        if self.replay.contains_key(&request.ephemeral_key) {
            trace!(peer = %from, "build request replayed");
            metrics::frame_dropped("replay");
            return None;
        }
        self.replay.insert(request.ephemeral_key, request.timestamp_ms);

        let (record, keys) =
            match open_record(local, &request.ephemeral_key, &request.sealed_record) {
                Ok(opened) => opened,
                Err(e) => {
                    trace!(peer = %from, error = %e, "build record did not open");
                    metrics::frame_dropped("decrypt_failed");
                    return None;
                }
            };

        let mut effects = PathEffects::default();
        let refusal = if self.transit.len() >= self.config.max_transit_hops {
            Some(PathError::TransitFull)
        } else if record.rx_id == record.tx_id || self.id_in_use(&record.tx_id) {
            Some(PathError::Collision(record.tx_id))
        } else if self.id_in_use(&record.rx_id) {
            Some(PathError::Collision(record.rx_id))
        } else {
            None
        };
        if let Some(reason) = refusal {
            debug!(peer = %from, %reason, "transit build refused");
            metrics::transit_build_result(false);
            effects.send(
                *from,
                LinkMessage::PathBuildReply {
                    path_id: record.rx_id,
                    accepted: false,
                },
            );
            return Some(effects);
        }

        let hop = TransitHop::new(&record, *from, keys, now_ms, ms(self.config.path_lifetime));
        effects.persist.push((*from, hop.expires_ms));
        debug!(rx = %hop.rx_id, prev = %from, "transit hop installed");
        self.tx_index.insert(hop.tx_id, hop.rx_id);
        self.transit.insert(hop.rx_id, hop);
        metrics::transit_build_result(true);
        metrics::set_transit_hops(self.transit.len());

        effects.send(
            *from,
            LinkMessage::PathBuildReply {
                path_id: record.rx_id,
                accepted: true,
            },
        );
        Some(effects)
    }

    /// PathBuildReply from `from`, answering either our own first hop build
    /// or an extend a transit hop of ours forwarded.
    pub fn handle_build_reply(
        &mut self,
        from: &RouterId,
        path_id: PathId,
        accepted: bool,
        now_ms: u64,
    ) -> Option<PathEffects> {
        if self.builds.contains_key(&path_id) {
            let path = self.own.get(&path_id)?;
            if path.first_hop() != *from || !path.confirmed_hops().is_empty() {
                return dropped("wrong_neighbour", &path_id);
            }
            let mut effects = PathEffects::default();
            self.advance_build(path_id, accepted, now_ms, &mut effects);
            return Some(effects);
        }

        let Some(rx_id) = self.tx_index.get(&path_id).copied() else {
            return dropped("unknown_path", &path_id);
        };
        let hop = self.transit.get_mut(&rx_id)?;
        let mut effects = PathEffects::default();
        let confirmed = if accepted {
            if !hop.complete_extend(from) {
                return dropped("wrong_neighbour", &path_id);
            }
            effects.persist.push((*from, hop.expires_ms));
            debug!(rx = %rx_id, next = %from, "transit hop extended");
            true
        } else {
            match hop.pending_extend() {
                Some(p) if p.router == *from => {
                    hop.abort_extend();
                    false
                }
                _ => return dropped("wrong_neighbour", &path_id),
            }
        };
        if let Some(frame) = extend_reply_frame(hop, confirmed) {
            effects.outbound.push(frame);
        }
        Some(effects)
    }

    /// Terminal hop `rx_id` was asked to extend toward `next`.
    ///
    /// Returns the edge id to put in the PathBuild we forward.
    pub fn begin_extend(
        &mut self,
        rx_id: &PathId,
        next: RouterId,
        now_ms: u64,
    ) -> Result<PathId, PathError> {
        let deadline = now_ms.saturating_add(ms(self.config.hop_timeout));
        let hop = self
            .transit
            .get_mut(rx_id)
            .ok_or(PathError::UnknownPath(*rx_id))?;
        if next == hop.prev {
            return Err(PathError::NotTerminal(*rx_id));
        }
        hop.begin_extend(next, deadline)?;
        Ok(hop.tx_id)
    }

    /// Give up on a pending extend: tell the originator no, and tell the
    /// router we asked to forget it.
    pub fn reject_extend(&mut self, rx_id: &PathId) -> Option<PathEffects> {
        let hop = self.transit.get_mut(rx_id)?;
        let pending = hop.abort_extend()?;
        let mut effects = PathEffects::default();
        effects.send(pending.router, LinkMessage::PathTeardown { path_id: hop.tx_id });
        if let Some(frame) = extend_reply_frame(hop, false) {
            effects.outbound.push(frame);
        }
        debug!(rx = %rx_id, next = %pending.router, "transit extend abandoned");
        Some(effects)
    }

    /// Downstream reply from the terminal hop `rx_id` toward the originator.
    pub fn reply_on_transit(&self, rx_id: &PathId, message: &[u8], now_ms: u64) -> Option<Outbound> {
        let Some(hop) = self.transit.get(rx_id) else {
            return dropped("unknown_path", rx_id);
        };
        if !hop.is_terminal() || hop.is_expired(now_ms) {
            return dropped("not_terminal", rx_id);
        }
        downstream_frame(hop, message).ok()
    }

    // ---- relaying ------------------------------------------------------

    pub fn handle_relay_upstream(
        &mut self,
        from: &RouterId,
        path_id: &PathId,
        payload: &[u8],
        now_ms: u64,
    ) -> Option<RelayOutcome> {
        let Some(hop) = self.transit.get_mut(path_id) else {
            return dropped("unknown_path", path_id);
        };
        if hop.prev != *from {
            return dropped("wrong_neighbour", path_id);
        }
        if hop.is_expired(now_ms) {
            return dropped("unknown_path", path_id);
        }
        let Ok(inner) = hop.keys().peel_upstream(payload) else {
            return dropped("decrypt_failed", path_id);
        };
        hop.last_activity_ms = now_ms;
        Some(match hop.next() {
            Some(next) => RelayOutcome::Forward((
                *next,
                LinkMessage::RelayUpstream {
                    path_id: hop.tx_id,
                    payload: inner,
                },
            )),
            None => RelayOutcome::AtTerminal {
                rx_path: hop.rx_id,
                payload: inner,
            },
        })
    }

    pub fn handle_relay_downstream(
        &mut self,
        from: &RouterId,
        path_id: &PathId,
        payload: &[u8],
        now_ms: u64,
    ) -> Option<RelayOutcome> {
        if let Some(path) = self.own.get(path_id) {
            if path.first_hop() != *from {
                return dropped("wrong_neighbour", path_id);
            }
            let Ok(plain) = path.unwrap_downstream(payload) else {
                return dropped("decrypt_failed", path_id);
            };
            return Some(RelayOutcome::AtOriginator {
                path_id: *path_id,
                payload: plain,
            });
        }

        let Some(rx_id) = self.tx_index.get(path_id).copied() else {
            return dropped("unknown_path", path_id);
        };
        let hop = self.transit.get_mut(&rx_id)?;
        if hop.next() != Some(from) {
            return dropped("wrong_neighbour", path_id);
        }
        if hop.is_expired(now_ms) {
            return dropped("unknown_path", path_id);
        }
        hop.last_activity_ms = now_ms;
        match downstream_frame(hop, payload) {
            Ok(frame) => Some(RelayOutcome::Forward(frame)),
            Err(_) => dropped("encrypt_failed", path_id),
        }
    }

    // ---- teardown ------------------------------------------------------

    fn remove_transit(&mut self, rx_id: &PathId) -> Option<TransitHop> {
        let hop = self.transit.remove(rx_id)?;
        self.tx_index.remove(&hop.tx_id);
        metrics::set_transit_hops(self.transit.len());
        Some(hop)
    }

    /// PathTeardown received from `from`; propagated to the other neighbour.
    pub fn handle_teardown(
        &mut self,
        from: &RouterId,
        path_id: &PathId,
        now_ms: u64,
    ) -> Option<PathEffects> {
        let mut effects = PathEffects::default();

        if let Some(path) = self.own.get(path_id) {
            if path.first_hop() != *from {
                return dropped("wrong_neighbour", path_id);
            }
            if self.builds.contains_key(path_id) {
                self.fail_build(*path_id, false, false, now_ms, &mut effects);
            } else if let Some(mut path) = self.own.remove(path_id) {
                path.mark_broken();
                info!(path = %path_id, "path torn down by first hop");
                effects.broken.push(*path_id);
                metrics::set_own_paths(self.own.len());
            }
            return Some(effects);
        }

        if let Some(hop) = self.transit.get(path_id) {
            if hop.prev != *from {
                return dropped("wrong_neighbour", path_id);
            }
            let hop = self.remove_transit(path_id)?;
            if let Some(next) = hop.downstream_of() {
                effects.send(next, LinkMessage::PathTeardown { path_id: hop.tx_id });
            }
            debug!(rx = %hop.rx_id, "transit hop torn down from upstream");
            return Some(effects);
        }

        let Some(rx_id) = self.tx_index.get(path_id).copied() else {
            return dropped("unknown_path", path_id);
        };
        if self.transit.get(&rx_id)?.downstream_of() != Some(*from) {
            return dropped("wrong_neighbour", path_id);
        }
        let hop = self.remove_transit(&rx_id)?;
        effects.send(hop.prev, LinkMessage::PathTeardown { path_id: hop.rx_id });
        debug!(rx = %hop.rx_id, "transit hop torn down from downstream");
        Some(effects)
    }

    /// The session to `router` is gone. Every path using it breaks.
    pub fn on_session_closed(&mut self, router: &RouterId, now_ms: u64) -> PathEffects {
        let mut effects = PathEffects::default();

        let own: Vec<PathId> = self
            .own
            .iter()
            .filter(|(_, p)| p.first_hop() == *router)
            .map(|(id, _)| *id)
            .collect();
        for path_id in own {
            if self.builds.contains_key(&path_id) {
                self.fail_build(path_id, false, false, now_ms, &mut effects);
            } else if let Some(mut path) = self.own.remove(&path_id) {
                path.mark_broken();
                info!(path = %path_id, peer = %router, "path broken by closed session");
                effects.broken.push(path_id);
            }
        }
        metrics::set_own_paths(self.own.len());

        let transit: Vec<PathId> = self
            .transit
            .values()
            .filter(|h| h.prev == *router || h.downstream_of() == Some(*router))
            .map(|h| h.rx_id)
            .collect();
        for rx_id in transit {
            let Some(hop) = self.remove_transit(&rx_id) else {
                continue;
            };
            if hop.prev == *router {
                if let Some(next) = hop.downstream_of() {
                    effects.send(next, LinkMessage::PathTeardown { path_id: hop.tx_id });
                }
            } else {
                effects.send(hop.prev, LinkMessage::PathTeardown { path_id: hop.rx_id });
            }
        }
        effects
    }

    /// Enforce build deadlines, extend timeouts and path lifetimes.
    pub fn tick(&mut self, now_ms: u64) -> PathEffects {
        let mut effects = PathEffects::default();

        let overdue: Vec<PathId> = self
            .builds
            .iter()
            .filter(|(_, b)| b.is_overdue(now_ms))
            .map(|(id, _)| *id)
            .collect();
        for path_id in overdue {
            debug!(path = %path_id, "path build timed out");
            self.fail_build(path_id, true, true, now_ms, &mut effects);
        }

        let stalled: Vec<PathId> = self
            .transit
            .values()
            .filter(|h| h.pending_extend().is_some_and(|p| now_ms >= p.deadline_ms))
            .map(|h| h.rx_id)
            .collect();
        for rx_id in stalled {
            if let Some(more) = self.reject_extend(&rx_id) {
                effects.outbound.extend(more.outbound);
            }
        }

        let expired: Vec<PathId> = self
            .own
            .iter()
            .filter(|(id, p)| !self.builds.contains_key(*id) && p.is_expired(now_ms))
            .map(|(id, _)| *id)
            .collect();
        for path_id in expired {
            if let Some(mut path) = self.own.remove(&path_id) {
                path.mark_broken();
                debug!(path = %path_id, "path expired");
                effects.send(path.first_hop(), LinkMessage::PathTeardown { path_id });
                effects.broken.push(path_id);
            }
        }

        let expired_transit: Vec<PathId> = self
            .transit
            .values()
            .filter(|h| h.is_expired(now_ms))
            .map(|h| h.rx_id)
            .collect();
        for rx_id in expired_transit {
            self.remove_transit(&rx_id);
            trace!(rx = %rx_id, "transit hop expired");
        }

        metrics::set_own_paths(self.own.len());
        metrics::set_transit_hops(self.transit.len());
        effects
    }
}
