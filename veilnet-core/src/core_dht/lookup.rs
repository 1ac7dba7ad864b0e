//! Table of in-flight router lookups.
//!
//! Each lookup asks one connected peer at a time. A timeout moves the lookup
//! into backoff; when the backoff elapses discovery asks the next peer, until
//! the attempt budget is spent.

use std::collections::HashMap;

use crate::core_identity::RouterId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupState {
    /// Waiting for `peer` to answer
    Waiting { deadline_ms: u64 },
    /// Timed out, next attempt not before `retry_after_ms`
    Backoff { retry_after_ms: u64 },
}

#[derive(Debug, Clone)]
pub struct PendingLookup {
    pub txid: u64,
    pub target: RouterId,
    pub explore: bool,
    /// Peer asked by the current attempt
    pub peer: RouterId,
    /// Every peer asked so far
    pub asked: Vec<RouterId>,
    pub attempts: u32,
    pub state: LookupState,
}

impl PendingLookup {
    /// Exponential backoff `base * 2^(attempts-1)`, capped.
    pub fn backoff_ms(&self, base_ms: u64, max_ms: u64) -> u64 {
        let multiplier = 1u64
            .checked_shl(self.attempts.saturating_sub(1))
            .unwrap_or(u64::MAX);
        base_ms.saturating_mul(multiplier).min(max_ms)
    }

    pub fn ask(&mut self, peer: RouterId, deadline_ms: u64) {
        self.peer = peer;
        self.asked.push(peer);
        self.attempts += 1;
        self.state = LookupState::Waiting { deadline_ms };
    }
}

#[derive(Debug, Default)]
pub struct LookupTable {
    pending: HashMap<u64, PendingLookup>,
    by_target: HashMap<RouterId, u64>,
}

impl LookupTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_txid(&self) -> u64 {
        loop {
            let txid = rand::random::<u64>();
            if txid != 0 && !self.pending.contains_key(&txid) {
                return txid;
            }
        }
    }

    /// Register a lookup already sent to `peer`.
    pub fn start(&mut self, target: RouterId, explore: bool, peer: RouterId, deadline_ms: u64) -> u64 {
        let txid = self.fresh_txid();
        self.pending.insert(
            txid,
            PendingLookup {
                txid,
                target,
                explore,
                peer,
                asked: vec![peer],
                attempts: 1,
                state: LookupState::Waiting { deadline_ms },
            },
        );
        if !explore {
            self.by_target.insert(target, txid);
        }
        txid
    }

    pub fn is_pending_for(&self, target: &RouterId) -> bool {
        self.by_target.contains_key(target)
    }

    pub fn get(&self, txid: u64) -> Option<&PendingLookup> {
        self.pending.get(&txid)
    }

    pub fn get_mut(&mut self, txid: u64) -> Option<&mut PendingLookup> {
        self.pending.get_mut(&txid)
    }

    pub fn take(&mut self, txid: u64) -> Option<PendingLookup> {
        let lookup = self.pending.remove(&txid)?;
        if self.by_target.get(&lookup.target) == Some(&txid) {
            self.by_target.remove(&lookup.target);
        }
        Some(lookup)
    }

    /// Lookups whose deadline or backoff has elapsed.
    pub fn due(&self, now_ms: u64) -> Vec<u64> {
        let mut due: Vec<u64> = self
            .pending
            .values()
            .filter(|l| match l.state {
                LookupState::Waiting { deadline_ms } => deadline_ms <= now_ms,
                LookupState::Backoff { retry_after_ms } => retry_after_ms <= now_ms,
            })
            .map(|l| l.txid)
            .collect();
        due.sort_unstable();
        due
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
