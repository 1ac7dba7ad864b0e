pub mod access;
pub mod dispatcher;
pub mod link_message;
pub mod metrics;
pub mod profiling;
pub mod router;
pub mod router_handle;
pub mod routing_message;
pub mod session;
pub mod session_manager;

pub use access::{PathAccess, ProfilingAccess, SessionAccess};
pub use dispatcher::{
    parse_routing_message_buffer, DispatchError, RoutingHandler, RoutingMessageDispatcher,
};
pub use link_message::{CodecError, LinkMessage, PathBuildRequest, MAX_LINK_FRAME};
pub use profiling::{RouterProfile, RouterProfiling};
pub use router::{Router, RouterError};
pub use router_handle::{HandleError, RouterCommand, RouterHandle, RouterStatus};
pub use routing_message::{RoutingMessage, RoutingMessageType};
pub use session::{LinkSession, SessionError, SessionKeys, SessionState};
pub use session_manager::{EstablishOutcome, LinkSessionManager, SendOutcome, TransportAction};
