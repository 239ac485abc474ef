//! Core domain types and traits for the isoforge build queue.
//!
//! This crate contains:
//! - Job identifiers and the job record with its lifecycle rules
//! - The `BuildExecutor` trait the worker drives
//! - The shared error type

pub mod error;
pub mod executor;
pub mod id;
pub mod job;

pub use error::{Error, Result};
pub use id::JobId;
pub use job::{Job, JobConfig, JobStatus};
