/*
    RouterProfiling - per-peer reliability scores

    Counts connect outcomes, path build outcomes and lookup timeouts per
    RouterId. The counters only steer selection (which peer to dial, which hop
    to pick); losing them never affects correctness, so profiles decay away
    when untouched.

    A peer is bad for connect (or for paths) once its failures outnumber its
    successes by the configured threshold, similar to a circuit breaker that
    only closes again on success.
*/

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::config::ProfilingConfig;
use crate::core_identity::RouterId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterProfile {
    pub connect_successes: u64,
    pub connect_timeouts: u64,
    pub path_successes: u64,
    pub path_failures: u64,
    pub lookup_timeouts: u64,
    pub last_updated_ms: u64,
}

impl RouterProfile {
    fn net_connect_failures(&self) -> u64 {
        self.connect_timeouts.saturating_sub(self.connect_successes)
    }

    fn net_path_failures(&self) -> u64 {
        self.path_failures.saturating_sub(self.path_successes)
    }
}

#[derive(Debug)]
pub struct RouterProfiling {
    profiles: HashMap<RouterId, RouterProfile>,
    config: ProfilingConfig,
}

impl RouterProfiling {
    pub fn new(config: ProfilingConfig) -> Self {
        Self {
            profiles: HashMap::new(),
            config,
        }
    }

    fn entry(&mut self, id: &RouterId, now_ms: u64) -> &mut RouterProfile {
        let profile = self.profiles.entry(*id).or_default();
        profile.last_updated_ms = profile.last_updated_ms.max(now_ms);
        profile
    }

    pub fn mark_connect_success(&mut self, id: &RouterId, now_ms: u64) {
        self.entry(id, now_ms).connect_successes += 1;
    }

    pub fn mark_connect_timeout(&mut self, id: &RouterId, now_ms: u64) {
        let profile = self.entry(id, now_ms);
        profile.connect_timeouts += 1;
        debug!(peer = %id, timeouts = profile.connect_timeouts, "connect timeout recorded");
    }

    pub fn mark_path_success(&mut self, id: &RouterId, now_ms: u64) {
        self.entry(id, now_ms).path_successes += 1;
    }

    pub fn mark_path_failure(&mut self, id: &RouterId, now_ms: u64) {
        self.entry(id, now_ms).path_failures += 1;
    }

    pub fn mark_lookup_timeout(&mut self, id: &RouterId, now_ms: u64) {
        self.entry(id, now_ms).lookup_timeouts += 1;
    }

    pub fn get(&self, id: &RouterId) -> Option<&RouterProfile> {
        self.profiles.get(id)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn is_bad_for_connect(&self, id: &RouterId) -> bool {
        self.profiles
            .get(id)
            .is_some_and(|p| p.net_connect_failures() >= self.config.connect_failure_threshold)
    }

    pub fn is_bad_for_path(&self, id: &RouterId) -> bool {
        self.profiles
            .get(id)
            .is_some_and(|p| p.net_path_failures() >= self.config.path_failure_threshold)
    }

    /// Relative weight for random selection, in (0, 1]. Unknown peers get 1.
    pub fn selection_weight(&self, id: &RouterId) -> f64 {
        match self.profiles.get(id) {
            None => 1.0,
            Some(p) => {
                let failures = p.net_connect_failures() + p.net_path_failures() + p.lookup_timeouts;
                1.0 / (1.0 + failures as f64)
            }
        }
    }

    /// Forget profiles untouched for the decay period. Returns how many went.
    pub fn decay(&mut self, now_ms: u64) -> usize {
        let horizon = self.config.profile_decay.as_millis() as u64;
        let before = self.profiles.len();
        self.profiles
            .retain(|_, p| now_ms.saturating_sub(p.last_updated_ms) < horizon);
        before - self.profiles.len()
    }
}
