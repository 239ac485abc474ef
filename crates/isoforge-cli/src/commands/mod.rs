//! CLI command implementations.

pub mod builds;
pub mod download;
