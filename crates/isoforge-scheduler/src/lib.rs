//! Build queue scheduling for isoforge.
//!
//! Holds the queue, the active slot and the history behind one lock, runs a
//! single worker that drains the queue in FIFO order, and publishes every
//! state change on a typed event bus.

pub mod events;
pub mod queue;
mod worker;

#[cfg(test)]
mod testing;

pub use events::{JobListener, QueueEvent};
pub use queue::{INTERRUPTED_ERROR, Overview, QueueManager, QueueSettings, QueueStatus, Submission};
