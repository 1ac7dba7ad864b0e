//! veilnet-core: routing core of an onion overlay router.
//!
//! The [`core_router::Router`] coordinator owns link sessions, onion paths,
//! peer discovery and peer profiling. [`core_router::RouterHandle`] runs it
//! on a tokio task and is how the transport and the application talk to it.

pub mod clock;
pub mod config;
pub mod core_dht;
pub mod core_identity;
pub mod core_path;
pub mod core_router;
pub mod dns;
pub mod logging;
pub mod util;

#[cfg(test)]
pub(crate) mod test_utils;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, RouterConfig};
pub use core_identity::{Identity, RouterContact, RouterId};
pub use core_path::{PathBuildError, PathId};
pub use core_router::{Router, RouterError, RouterHandle, TransportAction};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogLevel};
