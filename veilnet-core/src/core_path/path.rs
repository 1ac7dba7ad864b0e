use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

use super::hop_crypto::{self, HopKeys, SealedRecord};
use super::{PathError, PathId};
use crate::core_identity::{RouterContact, RouterId};

/// Result a caller sees for a path build. Never names the hop at fault.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PathBuildError {
    #[error("path build failed")]
    BuildFailed,

    #[error("too many path builds in flight")]
    ResourceExhausted,

    #[error("path build cancelled")]
    Cancelled,
}

pub type BuildResult = Result<PathId, PathBuildError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStatus {
    Building,
    Established,
    Broken,
}

/// One hop of a locally owned path.
#[derive(Debug)]
pub struct HopConfig {
    pub router: RouterId,
    pub rx_id: PathId,
    pub tx_id: PathId,
    pub keys: HopKeys,
}

/// A path this router originated.
#[derive(Debug)]
pub struct Path {
    hops: Vec<HopConfig>,
    confirmed: usize,
    status: PathStatus,
    pub created_ms: u64,
    pub expires_ms: u64,
    latency_ms: Option<u64>,
}

impl Path {
    pub(crate) fn new(hops: Vec<HopConfig>, now_ms: u64, lifetime_ms: u64) -> Self {
        Path {
            hops,
            confirmed: 0,
            status: PathStatus::Building,
            created_ms: now_ms,
            expires_ms: now_ms.saturating_add(lifetime_ms),
            latency_ms: None,
        }
    }

    /// Id of the first edge; the originator's handle for the whole path.
    pub fn id(&self) -> PathId {
        self.hops[0].rx_id
    }

    pub fn first_hop(&self) -> RouterId {
        self.hops[0].router
    }

    pub fn hops(&self) -> &[HopConfig] {
        &self.hops
    }

    pub fn routers(&self) -> Vec<RouterId> {
        self.hops.iter().map(|h| h.router).collect()
    }

    /// Hops that have confirmed the build so far.
    pub fn confirmed_hops(&self) -> &[HopConfig] {
        &self.hops[..self.confirmed]
    }

    pub fn status(&self) -> PathStatus {
        self.status
    }

    pub fn is_established(&self) -> bool {
        self.status == PathStatus::Established
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_ms
    }

    pub fn latency_ms(&self) -> Option<u64> {
        self.latency_ms
    }

    pub(crate) fn set_latency(&mut self, latency_ms: u64) {
        self.latency_ms = Some(latency_ms);
    }

    /// Record one more confirmed hop. Returns true when the path is complete.
    pub(crate) fn confirm_hop(&mut self) -> bool {
        if self.confirmed < self.hops.len() {
            self.confirmed += 1;
        }
        if self.confirmed == self.hops.len() {
            self.status = PathStatus::Established;
            true
        } else {
            false
        }
    }

    pub(crate) fn mark_broken(&mut self) {
        self.status = PathStatus::Broken;
    }

    /// Hop that has not confirmed yet, if the path is still growing.
    pub fn next_unconfirmed(&self) -> Option<&HopConfig> {
        self.hops.get(self.confirmed)
    }

    /// Layer `payload` for every confirmed hop.
    pub fn wrap_upstream(&self, payload: &[u8]) -> Result<Vec<u8>, PathError> {
        hop_crypto::wrap_upstream(self.confirmed_hops().iter().map(|h| &h.keys), payload)
    }

    /// Strip the layers of every confirmed hop.
    pub fn unwrap_downstream(&self, data: &[u8]) -> Result<Vec<u8>, PathError> {
        hop_crypto::unwrap_downstream(self.confirmed_hops().iter().map(|h| &h.keys), data)
    }
}

/// Build bookkeeping kept beside a `Building` path.
#[derive(Debug)]
pub(crate) struct PendingBuild {
    /// Contact and sealed record per hop, aligned with the path's hops
    pub plan: Vec<(Arc<RouterContact>, SealedRecord)>,
    pub started_ms: u64,
    pub hop_deadline_ms: u64,
    pub deadline_ms: u64,
    completion: Option<oneshot::Sender<BuildResult>>,
}

impl PendingBuild {
    pub fn new(
        plan: Vec<(Arc<RouterContact>, SealedRecord)>,
        started_ms: u64,
        hop_deadline_ms: u64,
        deadline_ms: u64,
    ) -> (Self, oneshot::Receiver<BuildResult>) {
        let (tx, rx) = oneshot::channel();
        (
            PendingBuild {
                plan,
                started_ms,
                hop_deadline_ms,
                deadline_ms,
                completion: Some(tx),
            },
            rx,
        )
    }

    pub fn is_overdue(&self, now_ms: u64) -> bool {
        now_ms >= self.hop_deadline_ms || now_ms >= self.deadline_ms
    }

    /// Resolve the build. Only the first call has any effect.
    pub fn complete(&mut self, result: BuildResult) {
        if let Some(tx) = self.completion.take() {
            // Receiver may have been dropped; nothing to do then
            let _ = tx.send(result);
        }
    }
}

impl Drop for PendingBuild {
    fn drop(&mut self) {
        self.complete(Err(PathBuildError::BuildFailed));
    }
}

/// Caller's side of a path build.
#[derive(Debug)]
pub struct PathBuildHandle {
    path_id: PathId,
    rx: oneshot::Receiver<BuildResult>,
}

impl PathBuildHandle {
    pub(crate) fn new(path_id: PathId, rx: oneshot::Receiver<BuildResult>) -> Self {
        PathBuildHandle { path_id, rx }
    }

    pub fn path_id(&self) -> PathId {
        self.path_id
    }

    /// Wait for the build to resolve.
    pub async fn wait(self) -> BuildResult {
        self.rx.await.unwrap_or(Err(PathBuildError::BuildFailed))
    }

    /// Non-blocking check; `None` while the build is in flight.
    pub fn try_result(&mut self) -> Option<BuildResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(PathBuildError::BuildFailed)),
        }
    }
}
