//! Test utilities shared by the unit tests of every module.
//!
//! Deterministic routers (identities derived from a small seed), signed
//! contacts, an in-memory session view and async receive helpers.

pub mod async_helpers;
pub mod fixtures;

pub use async_helpers::*;
pub use fixtures::*;
