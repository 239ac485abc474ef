//! Durable storage for the isoforge build queue.
//!
//! Provides the `JobStore` trait plus a JSON file implementation for
//! production and an in-memory one for tests.

pub mod error;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use store::*;
