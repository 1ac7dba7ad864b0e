use super::extend_record::ExtendRecord;
use super::hop_crypto::HopKeys;
use super::{PathError, PathId};
use crate::core_identity::RouterId;

/// Extend this hop has forwarded and is waiting to hear back about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingExtend {
    pub router: RouterId,
    pub deadline_ms: u64,
}

/// This router's place in a path someone else built.
///
/// Upstream frames arrive from `prev` on `rx_id`, downstream frames from
/// `next` on `tx_id`. `next` is set at most once.
#[derive(Debug)]
pub struct TransitHop {
    pub rx_id: PathId,
    pub tx_id: PathId,
    pub prev: RouterId,
    next: Option<RouterId>,
    pending: Option<PendingExtend>,
    keys: HopKeys,
    pub created_ms: u64,
    pub expires_ms: u64,
    pub last_activity_ms: u64,
}

impl TransitHop {
    /// Install from an opened record. The lifetime is clamped to `max_lifetime_ms`.
    pub fn new(
        record: &ExtendRecord,
        prev: RouterId,
        keys: HopKeys,
        now_ms: u64,
        max_lifetime_ms: u64,
    ) -> Self {
        let lifetime = record.lifetime_ms.min(max_lifetime_ms);
        TransitHop {
            rx_id: record.rx_id,
            tx_id: record.tx_id,
            prev,
            next: None,
            pending: None,
            keys,
            created_ms: now_ms,
            expires_ms: now_ms.saturating_add(lifetime),
            last_activity_ms: now_ms,
        }
    }

    pub fn next(&self) -> Option<&RouterId> {
        self.next.as_ref()
    }

    pub fn pending_extend(&self) -> Option<&PendingExtend> {
        self.pending.as_ref()
    }

    /// The last hop of the path as far as this router knows.
    pub fn is_terminal(&self) -> bool {
        self.next.is_none()
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_ms
    }

    pub fn keys(&self) -> &HopKeys {
        &self.keys
    }

    /// Start growing the path toward `router`.
    pub fn begin_extend(&mut self, router: RouterId, deadline_ms: u64) -> Result<(), PathError> {
        if self.next.is_some() || self.pending.is_some() {
            return Err(PathError::NotTerminal(self.rx_id));
        }
        self.pending = Some(PendingExtend {
            router,
            deadline_ms,
        });
        Ok(())
    }

    /// Fix `next` once `from` confirmed the extend. False if `from` was not asked.
    pub fn complete_extend(&mut self, from: &RouterId) -> bool {
        match self.pending {
            Some(p) if p.router == *from && self.next.is_none() => {
                self.next = Some(p.router);
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    pub fn abort_extend(&mut self) -> Option<PendingExtend> {
        self.pending.take()
    }

    /// Any neighbour on the far side, confirmed or still pending.
    pub fn downstream_of(&self) -> Option<RouterId> {
        self.next.or(self.pending.map(|p| p.router))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hop() -> TransitHop {
        let record = ExtendRecord {
            rx_id: PathId::random(),
            tx_id: PathId::random(),
            lifetime_ms: 10_000,
        };
        TransitHop::new(
            &record,
            RouterId::from_bytes([1; 32]),
            HopKeys::from_parts([2; 32], [3; 32]),
            1_000,
            5_000,
        )
    }

    #[test]
    fn test_lifetime_clamped() {
        let h = hop();
        assert_eq!(h.expires_ms, 6_000);
        assert!(!h.is_expired(5_999));
        assert!(h.is_expired(6_000));
    }

    #[test]
    fn test_next_is_write_once() {
        let mut h = hop();
        let a = RouterId::from_bytes([7; 32]);
        let b = RouterId::from_bytes([8; 32]);

        h.begin_extend(a, 100).unwrap();
        assert!(matches!(h.begin_extend(b, 100), Err(PathError::NotTerminal(_))));
        assert!(!h.complete_extend(&b));
        assert!(h.complete_extend(&a));
        assert_eq!(h.next(), Some(&a));
        assert!(!h.is_terminal());

        assert!(h.begin_extend(b, 100).is_err());
        assert!(!h.complete_extend(&b));
        assert_eq!(h.next(), Some(&a));
    }

    #[test]
    fn test_aborted_extend_leaves_hop_terminal() {
        let mut h = hop();
        let a = RouterId::from_bytes([7; 32]);
        h.begin_extend(a, 100).unwrap();
        assert_eq!(h.downstream_of(), Some(a));
        assert_eq!(h.abort_extend().map(|p| p.router), Some(a));
        assert!(h.is_terminal());
        assert_eq!(h.downstream_of(), None);
    }
}
