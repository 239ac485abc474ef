//! Build executors for isoforge.
//!
//! - [`ProcessExecutor`] runs the ISO build command as a child process
//! - [`SimulatedExecutor`] replays a staged build without touching the system

pub mod process;
pub mod simulated;

pub use isoforge_core::executor::{BuildEvent, BuildExecutor, BuildOutput, BuildRequest};
pub use process::ProcessExecutor;
pub use simulated::SimulatedExecutor;
