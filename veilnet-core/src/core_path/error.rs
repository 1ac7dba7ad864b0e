use thiserror::Error;

use super::PathId;

/// Internal failures while building, relaying or tearing down paths.
///
/// None of these leave the router as-is: relay code turns them into silent
/// drops and build code into the generic `PathBuildError::BuildFailed`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("key agreement produced a non-contributory secret")]
    KeyAgreement,

    #[error("layer encryption failed")]
    Seal,

    #[error("layer authentication failed")]
    Open,

    #[error("malformed extend record")]
    MalformedRecord,

    #[error("path id {0} already in use")]
    Collision(PathId),

    #[error("unknown path {0}")]
    UnknownPath(PathId),

    #[error("path {0} already extends to another router")]
    NotTerminal(PathId),

    #[error("transit hop table is full")]
    TransitFull,

    #[error("a path needs between 1 and {max} hops, got {requested}")]
    HopCount { requested: usize, max: usize },
}
