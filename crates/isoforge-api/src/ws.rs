//! WebSocket handling for real-time build updates.
//!
//! Every connected browser gets a session with its own outbound channel. A
//! single pump task turns queue events into messages and fans them out to
//! all sessions; each socket's writer task drains its own channel.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use isoforge_core::{Job, JobId};
use isoforge_scheduler::{QueueEvent, QueueManager};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::AppState;

/// Opaque identifier of one connected observer.
pub type SessionId = Uuid;

/// Message pushed to observers, encoded as `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    JobUpdate(Job),
    QueueUpdate(Vec<Job>),
    HistoryUpdate(Vec<Job>),
    ActiveJob(Option<Job>),
    Error { message: String },
}

impl From<QueueEvent> for ServerMessage {
    fn from(event: QueueEvent) -> Self {
        match event {
            QueueEvent::JobUpdated(job) => ServerMessage::JobUpdate(job),
            QueueEvent::QueueChanged(queue) => ServerMessage::QueueUpdate(queue),
            QueueEvent::HistoryChanged(history) => ServerMessage::HistoryUpdate(history),
        }
    }
}

/// Request sent by an observer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    GetQueue,
    GetHistory,
    GetActiveJob,
    GetJob { id: String },
}

/// Tracks connected observers and pushes queue events to them.
pub struct NotificationHub {
    manager: Arc<QueueManager>,
    sessions: RwLock<HashMap<SessionId, mpsc::UnboundedSender<ServerMessage>>>,
}

impl NotificationHub {
    /// Create the hub and start forwarding the manager's events.
    pub fn start(manager: Arc<QueueManager>) -> Arc<Self> {
        let events = manager.subscribe();
        let hub = Arc::new(Self {
            manager,
            sessions: RwLock::new(HashMap::new()),
        });
        tokio::spawn(Arc::clone(&hub).pump(events));
        hub
    }

    async fn pump(self: Arc<Self>, mut events: broadcast::Receiver<QueueEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.broadcast(ServerMessage::from(event)).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Notification hub fell behind, resynchronizing observers");
                    for message in self.snapshot_messages().await {
                        self.broadcast(message).await;
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    /// Register a new observer and queue its initial state.
    ///
    /// The session map stays write-locked while the snapshot is taken, so
    /// any broadcast not yet delivered reaches the new session afterwards.
    pub async fn connect(&self) -> (SessionId, mpsc::UnboundedReceiver<ServerMessage>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sessions = self.sessions.write().await;
        for message in self.snapshot_messages().await {
            let _ = tx.send(message);
        }
        sessions.insert(id, tx);
        drop(sessions);
        info!(session_id = %id, "Client connected");
        (id, rx)
    }

    pub async fn disconnect(&self, id: SessionId) {
        if self.sessions.write().await.remove(&id).is_some() {
            info!(session_id = %id, "Client disconnected");
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Send a message to every session, dropping sessions that went away.
    pub async fn broadcast(&self, message: ServerMessage) {
        let closed: Vec<SessionId> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .filter(|(_, tx)| tx.send(message.clone()).is_err())
                .map(|(id, _)| *id)
                .collect()
        };

        if !closed.is_empty() {
            let mut sessions = self.sessions.write().await;
            for id in closed {
                debug!(session_id = %id, "Pruning closed session");
                sessions.remove(&id);
            }
        }
    }

    /// Send a message to one session.
    pub async fn send_to(&self, id: SessionId, message: ServerMessage) {
        if let Some(tx) = self.sessions.read().await.get(&id) {
            let _ = tx.send(message);
        }
    }

    /// Answer one text frame from an observer.
    pub async fn handle_frame(&self, text: &str) -> ServerMessage {
        match serde_json::from_str::<ClientRequest>(text) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => ServerMessage::Error {
                message: format!("invalid request: {e}"),
            },
        }
    }

    /// Answer a point-to-point request.
    pub async fn handle_request(&self, request: ClientRequest) -> ServerMessage {
        match request {
            ClientRequest::GetQueue => ServerMessage::QueueUpdate(self.manager.snapshot_queue().await),
            ClientRequest::GetHistory => {
                ServerMessage::HistoryUpdate(self.manager.snapshot_history().await)
            }
            ClientRequest::GetActiveJob => ServerMessage::ActiveJob(self.manager.active().await),
            ClientRequest::GetJob { id } => {
                let job = match id.parse::<JobId>() {
                    Ok(job_id) => self.manager.get(job_id).await,
                    Err(_) => None,
                };
                match job {
                    Some(job) => ServerMessage::JobUpdate(job),
                    None => ServerMessage::Error {
                        message: format!("Job {id} not found"),
                    },
                }
            }
        }
    }

    async fn snapshot_messages(&self) -> [ServerMessage; 3] {
        let overview = self.manager.overview().await;
        [
            ServerMessage::QueueUpdate(overview.queue),
            ServerMessage::HistoryUpdate(overview.history),
            ServerMessage::ActiveJob(overview.active),
        ]
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<NotificationHub>) {
    let (id, mut outbox) = hub.connect().await;
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbox.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to encode message");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let reply = hub.handle_frame(text.as_str()).await;
                hub.send_to(id, reply).await;
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!(session_id = %id, error = %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    hub.disconnect(id).await;
    writer.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{job_config, test_manager};
    use serde_json::json;
    use std::time::Duration;

    async fn next(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_server_message_shape() {
        let value = serde_json::to_value(ServerMessage::QueueUpdate(Vec::new())).unwrap();
        assert_eq!(value, json!({ "type": "queue_update", "data": [] }));

        let value = serde_json::to_value(ServerMessage::ActiveJob(None)).unwrap();
        assert_eq!(value, json!({ "type": "active_job", "data": null }));

        let value = serde_json::to_value(ServerMessage::Error {
            message: "Job x not found".into(),
        })
        .unwrap();
        assert_eq!(
            value,
            json!({ "type": "error", "data": { "message": "Job x not found" } })
        );
    }

    #[test]
    fn test_job_update_carries_full_job() {
        let job = Job::new(job_config());
        let value = serde_json::to_value(ServerMessage::JobUpdate(job.clone())).unwrap();
        assert_eq!(value["type"], "job_update");
        assert_eq!(value["data"]["id"], job.id().to_string());
        assert_eq!(value["data"]["status"], "queued");
        assert_eq!(value["data"]["progress"], 0);
    }

    #[test]
    fn test_client_request_parsing() {
        let parse = |s: &str| serde_json::from_str::<ClientRequest>(s);
        assert_eq!(parse(r#"{"type":"get_queue"}"#).unwrap(), ClientRequest::GetQueue);
        assert_eq!(
            parse(r#"{"type":"get_active_job"}"#).unwrap(),
            ClientRequest::GetActiveJob
        );
        assert_eq!(
            parse(r#"{"type":"get_job","id":"abc"}"#).unwrap(),
            ClientRequest::GetJob { id: "abc".into() }
        );
        assert!(parse(r#"{"type":"cancel_job"}"#).is_err());
        assert!(parse("not json").is_err());
    }

    #[tokio::test]
    async fn test_connect_pushes_initial_state() {
        let manager = test_manager().await;
        let hub = NotificationHub::start(manager);

        let (_, mut rx) = hub.connect().await;
        assert!(matches!(next(&mut rx).await, ServerMessage::QueueUpdate(q) if q.is_empty()));
        assert!(matches!(next(&mut rx).await, ServerMessage::HistoryUpdate(h) if h.is_empty()));
        assert!(matches!(next(&mut rx).await, ServerMessage::ActiveJob(None)));
        assert_eq!(hub.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_job_updates_reach_every_session() {
        let manager = test_manager().await;
        let hub = NotificationHub::start(manager.clone());
        let (_, mut first) = hub.connect().await;
        let (_, mut second) = hub.connect().await;

        let id = manager.submit(job_config()).await.job.id();

        for rx in [&mut first, &mut second] {
            loop {
                if let ServerMessage::JobUpdate(job) = next(rx).await {
                    if job.id() == id && job.is_terminal() {
                        break;
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn test_terminal_job_is_followed_by_history_update() {
        let manager = test_manager().await;
        let hub = NotificationHub::start(manager.clone());
        let (_, mut rx) = hub.connect().await;

        let id = manager.submit(job_config()).await.job.id();

        let mut finished = false;
        loop {
            match next(&mut rx).await {
                ServerMessage::JobUpdate(job) if job.id() == id && job.is_terminal() => {
                    finished = true;
                }
                ServerMessage::HistoryUpdate(history) if finished => {
                    assert!(history.iter().any(|j| j.id() == id));
                    break;
                }
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn test_requests_are_answered() {
        let manager = test_manager().await;
        let hub = NotificationHub::start(manager.clone());
        let job = manager.submit(job_config()).await.job;

        match hub
            .handle_request(ClientRequest::GetJob {
                id: job.id().to_string(),
            })
            .await
        {
            ServerMessage::JobUpdate(found) => assert_eq!(found.id(), job.id()),
            other => panic!("unexpected reply {other:?}"),
        }

        assert!(matches!(
            hub.handle_request(ClientRequest::GetQueue).await,
            ServerMessage::QueueUpdate(_)
        ));
        assert!(matches!(
            hub.handle_request(ClientRequest::GetHistory).await,
            ServerMessage::HistoryUpdate(_)
        ));
        assert!(matches!(
            hub.handle_request(ClientRequest::GetActiveJob).await,
            ServerMessage::ActiveJob(_)
        ));
    }

    #[tokio::test]
    async fn test_unknown_job_yields_error() {
        let hub = NotificationHub::start(test_manager().await);

        for id in [JobId::new().to_string(), "not-a-uuid".to_string()] {
            match hub.handle_request(ClientRequest::GetJob { id: id.clone() }).await {
                ServerMessage::Error { message } => assert!(message.contains(&id)),
                other => panic!("unexpected reply {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_closed_sessions_are_pruned() {
        let hub = NotificationHub::start(test_manager().await);
        let (_, rx) = hub.connect().await;
        let (_, _kept) = hub.connect().await;
        drop(rx);

        hub.broadcast(ServerMessage::QueueUpdate(Vec::new())).await;
        assert_eq!(hub.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_disconnect_removes_session() {
        let hub = NotificationHub::start(test_manager().await);
        let (id, _rx) = hub.connect().await;
        hub.disconnect(id).await;
        assert_eq!(hub.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_connect_snapshot_waits_for_in_flight_broadcast() {
        let manager = test_manager().await;
        let hub = NotificationHub::start(manager.clone());

        // Stand in for a broadcast that is mid-delivery.
        let delivering = hub.sessions.read().await;
        let joining = tokio::spawn({
            let hub = Arc::clone(&hub);
            async move { hub.connect().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let id = manager.submit(job_config()).await.job.id();
        drop(delivering);

        let (_, mut rx) = joining.await.unwrap();
        let mut seen = false;
        for _ in 0..3 {
            seen |= match next(&mut rx).await {
                ServerMessage::QueueUpdate(jobs) | ServerMessage::HistoryUpdate(jobs) => {
                    jobs.iter().any(|job| job.id() == id)
                }
                ServerMessage::ActiveJob(job) => job.is_some_and(|job| job.id() == id),
                other => panic!("unexpected burst message {other:?}"),
            };
        }
        assert!(seen, "initial burst is missing job {id}");
    }

    #[tokio::test]
    async fn test_frames_are_answered_on_the_session() {
        let hub = NotificationHub::start(test_manager().await);
        let (id, mut rx) = hub.connect().await;
        for _ in 0..3 {
            next(&mut rx).await;
        }

        let reply = hub.handle_frame("{ not a request").await;
        hub.send_to(id, reply).await;
        match next(&mut rx).await {
            ServerMessage::Error { message } => assert!(message.starts_with("invalid request")),
            other => panic!("unexpected reply {other:?}"),
        }

        let reply = hub.handle_frame(r#"{"type":"get_active_job"}"#).await;
        hub.send_to(id, reply).await;
        assert!(matches!(next(&mut rx).await, ServerMessage::ActiveJob(_)));
    }
}
