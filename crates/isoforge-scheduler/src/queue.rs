//! The build queue manager.
//!
//! Owns the pending queue, the active slot and the history. Every mutation
//! and every snapshot goes through one lock; persistence happens inside the
//! locked section so the durable record always follows the in-memory order.

use chrono::Utc;
use isoforge_core::executor::{BuildEvent, BuildExecutor, BuildOutput};
use isoforge_core::{Job, JobConfig, JobId, JobStatus};
use isoforge_store::{JobStore, StoredJobs};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, broadcast};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::events::{EVENT_BUFFER_SIZE, JobListener, QueueEvent, spawn_listener};
use crate::worker::Worker;

/// Error recorded on jobs that were building when the server stopped.
pub const INTERRUPTED_ERROR: &str = "interrupted by server restart";

/// Tunables for the queue manager.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Longest the idle worker waits before re-checking the queue.
    pub idle_poll: Duration,
    /// Capacity of the event bus.
    pub event_capacity: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            idle_poll: Duration::from_secs(1),
            event_capacity: EVENT_BUFFER_SIZE,
        }
    }
}

/// Result of a submission.
#[derive(Debug, Clone)]
pub struct Submission {
    pub job: Job,
    /// 0-based position of the new job in the queue.
    pub position: usize,
}

/// Summary counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    pub queue_length: usize,
    pub has_active_build: bool,
}

/// Active job, queue and history taken under a single lock acquisition.
#[derive(Debug, Clone)]
pub struct Overview {
    pub active: Option<Job>,
    pub queue: Vec<Job>,
    pub history: Vec<Job>,
}

#[derive(Default)]
struct State {
    queue: VecDeque<Job>,
    active: Option<Job>,
    history: Vec<Job>,
    worker_started: bool,
}

impl State {
    fn queue_snapshot(&self) -> Vec<Job> {
        self.queue.iter().cloned().collect()
    }
}

/// Single-worker FIFO build queue.
pub struct QueueManager {
    state: Mutex<State>,
    store: Arc<dyn JobStore>,
    executor: Arc<dyn BuildExecutor>,
    events: broadcast::Sender<QueueEvent>,
    wake: Notify,
    settings: QueueSettings,
}

impl QueueManager {
    /// Create a manager, restoring persisted state from `store`.
    ///
    /// Jobs that were building when the previous process stopped are failed
    /// and moved to history. If pending jobs remain, the worker starts right
    /// away.
    pub async fn open(
        store: Arc<dyn JobStore>,
        executor: Arc<dyn BuildExecutor>,
        settings: QueueSettings,
    ) -> Arc<Self> {
        let StoredJobs { queue, mut history } = store.load().await;

        let mut pending = VecDeque::with_capacity(queue.len());
        let mut recovered = 0usize;
        for mut job in queue {
            match job.status() {
                JobStatus::Queued => pending.push_back(job),
                JobStatus::InProgress => {
                    warn!(job_id = %job.id(), "Job was interrupted by a restart, marking failed");
                    if let Err(e) = job.fail(INTERRUPTED_ERROR, Utc::now()) {
                        warn!(job_id = %job.id(), error = %e, "Could not fail interrupted job");
                    }
                    history.push(job);
                    recovered += 1;
                }
                JobStatus::Completed | JobStatus::Failed => {
                    history.push(job);
                    recovered += 1;
                }
            }
        }

        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        let manager = Arc::new(Self {
            state: Mutex::new(State {
                queue: pending,
                history,
                ..State::default()
            }),
            store,
            executor,
            events,
            wake: Notify::new(),
            settings,
        });

        {
            let mut state = manager.state.lock().await;
            info!(
                queued = state.queue.len(),
                history = state.history.len(),
                "Queue manager ready"
            );
            if recovered > 0 {
                manager.persist(&state).await;
            }
            if !state.queue.is_empty() {
                manager.ensure_worker(&mut state);
            }
        }

        manager
    }

    /// Enqueue a new build.
    ///
    /// Never rejects a configuration; validation happens before this call.
    pub async fn submit(self: &Arc<Self>, config: JobConfig) -> Submission {
        let job = Job::new(config);

        let mut state = self.state.lock().await;
        let position = state.queue.len();
        state.queue.push_back(job.clone());
        self.persist(&state).await;
        info!(job_id = %job.id(), position, "Added new job to queue");

        self.ensure_worker(&mut state);
        self.publish(QueueEvent::JobUpdated(job.clone()));
        self.publish(QueueEvent::QueueChanged(state.queue_snapshot()));
        drop(state);

        self.wake.notify_one();
        Submission { job, position }
    }

    /// Find a job in the active slot, the queue or the history, in that order.
    pub async fn get(&self, id: JobId) -> Option<Job> {
        let state = self.state.lock().await;
        state
            .active
            .iter()
            .chain(state.queue.iter())
            .chain(state.history.iter())
            .find(|job| job.id() == id)
            .cloned()
    }

    pub async fn snapshot_queue(&self) -> Vec<Job> {
        self.state.lock().await.queue_snapshot()
    }

    pub async fn snapshot_history(&self) -> Vec<Job> {
        self.state.lock().await.history.clone()
    }

    /// The job currently building, if any.
    pub async fn active(&self) -> Option<Job> {
        self.state.lock().await.active.clone()
    }

    pub async fn status(&self) -> QueueStatus {
        let state = self.state.lock().await;
        QueueStatus {
            queue_length: state.queue.len(),
            has_active_build: state.active.is_some(),
        }
    }

    pub async fn overview(&self) -> Overview {
        let state = self.state.lock().await;
        Overview {
            active: state.active.clone(),
            queue: state.queue_snapshot(),
            history: state.history.clone(),
        }
    }

    /// Add an observer called for every event from now on.
    pub fn register_listener(&self, listener: impl JobListener) -> JoinHandle<()> {
        spawn_listener(self.events.subscribe(), Arc::new(listener))
    }

    /// Subscribe to the event bus directly.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub(crate) fn executor(&self) -> Arc<dyn BuildExecutor> {
        self.executor.clone()
    }

    /// Wait for a submission or the idle poll interval, whichever is first.
    pub(crate) async fn wait_for_work(&self) {
        let _ = tokio::time::timeout(self.settings.idle_poll, self.wake.notified()).await;
    }

    /// Move the head of the queue into the active slot.
    pub(crate) async fn claim_next(&self) -> Option<Job> {
        let mut state = self.state.lock().await;
        if state.active.is_some() {
            return None;
        }

        while let Some(mut job) = state.queue.pop_front() {
            if let Err(e) = job.start(Utc::now()) {
                error!(job_id = %job.id(), error = %e, "Dropping unstartable job from queue");
                continue;
            }
            state.active = Some(job.clone());
            self.persist(&state).await;
            self.publish(QueueEvent::QueueChanged(state.queue_snapshot()));
            self.publish(QueueEvent::JobUpdated(job.clone()));
            return Some(job);
        }
        None
    }

    /// Apply a report from the executor to the active job.
    pub(crate) async fn apply_build_event(&self, id: JobId, event: BuildEvent) {
        let mut state = self.state.lock().await;
        let Some(job) = state.active.as_mut().filter(|job| job.id() == id) else {
            warn!(job_id = %id, "Build event for a job that is not active");
            return;
        };

        let changed = match event {
            BuildEvent::Log(line) => job.push_log(&line, Utc::now()).map(|_| true),
            BuildEvent::Progress(value) => job.advance_progress(value),
        };
        match changed {
            Ok(true) => {
                let updated = job.clone();
                self.persist(&state).await;
                self.publish(QueueEvent::JobUpdated(updated));
            }
            Ok(false) => {}
            Err(e) => warn!(job_id = %id, error = %e, "Rejected build event"),
        }
    }

    /// Apply the terminal outcome and move the active job into history.
    pub(crate) async fn finish(&self, id: JobId, outcome: Result<BuildOutput, String>) {
        let mut state = self.state.lock().await;
        let Some(mut job) = state.active.take_if(|job| job.id() == id) else {
            error!(job_id = %id, "Finished job is not the active job");
            return;
        };

        let now = Utc::now();
        let applied = match outcome {
            Ok(output) => {
                info!(job_id = %id, output_path = ?output.output_path, "Job completed successfully");
                job.complete(output.output_path, now)
            }
            Err(message) => {
                error!(job_id = %id, error = %message, "Job failed");
                job.fail(message, now)
            }
        };
        if let Err(e) = applied {
            error!(job_id = %id, error = %e, "Could not apply terminal outcome");
        }

        state.history.push(job.clone());
        self.persist(&state).await;
        self.publish(QueueEvent::JobUpdated(job));
        self.publish(QueueEvent::QueueChanged(state.queue_snapshot()));
        self.publish(QueueEvent::HistoryChanged(state.history.clone()));
    }

    fn ensure_worker(self: &Arc<Self>, state: &mut State) {
        if state.worker_started {
            return;
        }
        state.worker_started = true;
        tokio::spawn(Worker::new(Arc::clone(self)).run());
        info!("Started worker");
    }

    fn publish(&self, event: QueueEvent) {
        // No receivers is fine: nobody is observing yet.
        let _ = self.events.send(event);
    }

    /// Write state through the store. The active job is persisted at the
    /// head of the queue so a crash mid-build leaves a record of it.
    async fn persist(&self, state: &State) {
        let queue: Vec<Job> = state
            .active
            .iter()
            .chain(state.queue.iter())
            .cloned()
            .collect();
        if let Err(e) = self.store.save(&queue, &state.history).await {
            error!(error = %e, "Failed to persist queue state");
        }
    }
}
