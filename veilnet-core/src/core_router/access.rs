//! Narrow views of the router handed to collaborators.
//!
//! Discovery only needs to see sessions, path code only needs profiling, and
//! so on. The `Router` coordinator implements all of them; the owning
//! components implement the ones that describe them.

use std::sync::Arc;

use super::profiling::RouterProfiling;
use crate::core_identity::{RouterContact, RouterId};
use crate::core_path::PathContext;

/// Read and pin link sessions.
pub trait SessionAccess {
    fn has_session(&self, router: &RouterId) -> bool;

    /// Contacts of every peer with a live session
    fn connected_contacts(&self) -> Vec<Arc<RouterContact>>;

    fn number_of_connected(&self) -> usize;

    /// Keep the session to `router` open until at least `until_ms`.
    fn persist_session_until(&mut self, router: &RouterId, until_ms: u64);
}

/// Read or mutate the set of paths this router takes part in.
pub trait PathAccess {
    fn path_context(&self) -> &PathContext;

    fn path_context_mut(&mut self) -> &mut PathContext;
}

/// Read or write peer scoring.
pub trait ProfilingAccess {
    fn router_profiling(&self) -> &RouterProfiling;

    fn router_profiling_mut(&mut self) -> &mut RouterProfiling;
}
