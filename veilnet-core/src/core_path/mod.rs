//! Onion paths: ids, per-hop crypto, transit hops, own paths and the
//! `PathContext` that holds all of them.

pub mod error;
pub mod extend_record;
pub mod hop_crypto;
pub mod path;
pub mod path_context;
pub mod path_id;
pub mod transit_hop;

/// Longest path this router will build
pub const MAX_HOPS: usize = 8;

pub use error::PathError;
pub use extend_record::ExtendRecord;
pub use hop_crypto::{HopKeys, SealedRecord, LAYER_OVERHEAD};
pub use path::{BuildResult, HopConfig, Path, PathBuildError, PathBuildHandle, PathStatus};
pub use path_context::{BuildCompletion, Outbound, PathContext, PathEffects, RelayOutcome};
pub use path_id::PathId;
pub use transit_hop::{PendingExtend, TransitHop};
