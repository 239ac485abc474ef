//! Queue events and listener delivery.
//!
//! The manager publishes events while it holds its state lock, which fixes
//! their order. Delivery happens on one task per listener, so a slow or
//! failing listener never blocks the worker, submitters or other listeners.

use isoforge_core::Job;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// Buffer size for the queue event bus.
pub const EVENT_BUFFER_SIZE: usize = 1024;

/// A change to the queue manager's state.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// A job was created or mutated. Carries the full updated job.
    JobUpdated(Job),
    /// Queue membership changed. Carries the new queue snapshot.
    QueueChanged(Vec<Job>),
    /// A job moved into history. Carries the new history snapshot.
    HistoryChanged(Vec<Job>),
}

impl QueueEvent {
    /// The job this event is about, if it is a job update.
    pub fn job(&self) -> Option<&Job> {
        match self {
            QueueEvent::JobUpdated(job) => Some(job),
            _ => None,
        }
    }
}

/// Observer of queue events.
///
/// An error or panic is logged and otherwise ignored.
pub trait JobListener: Send + Sync + 'static {
    fn on_event(&self, event: &QueueEvent) -> anyhow::Result<()>;
}

impl<F> JobListener for F
where
    F: Fn(&QueueEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn on_event(&self, event: &QueueEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Run a listener on its own task until the bus closes.
pub(crate) fn spawn_listener(
    mut rx: broadcast::Receiver<QueueEvent>,
    listener: Arc<dyn JobListener>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => deliver(listener.as_ref(), &event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Listener fell behind, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn deliver(listener: &dyn JobListener, event: &QueueEvent) {
    match std::panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Error in status listener"),
        Err(_) => error!("Status listener panicked"),
    }
}
