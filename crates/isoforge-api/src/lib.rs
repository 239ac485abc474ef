//! API server for isoforge.
//!
//! Provides the HTTP API and the WebSocket endpoint that pushes build
//! updates to connected browsers.

pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

#[cfg(test)]
mod testing;

pub use state::{AppState, build_executor};
pub use ws::NotificationHub;
