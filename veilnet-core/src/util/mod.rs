//! Small shared utilities.

pub mod buffer;

pub use buffer::LinkBuffer;
