use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{PropagationJob, TaskStatus};
use crate::signals::{ConfigEvent, SignalRegistry, Subscription};

/// Event types for WebSocket messages
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ConfigStatusChanged,
    ConfigModified,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
}

/// WebSocket event message
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub payload: serde_json::Value,
}

/// Payload for propagation task events
#[derive(Debug, Clone, Serialize)]
pub struct TaskPayload {
    pub job_id: Uuid,
    pub template_id: Uuid,
    pub status: TaskStatus,
    pub updated_configs: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// WebSocket hub manages connections and broadcasts events
pub struct Hub {
    tx: broadcast::Sender<String>,
    client_count: AtomicUsize,
}

impl Hub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            tx,
            client_count: AtomicUsize::new(0),
        }
    }

    /// Broadcast an event to all connected clients
    pub fn broadcast_event(&self, event: Event) {
        let data = match serde_json::to_string(&event) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("Error serializing WebSocket event: {}", e);
                return;
            }
        };

        let count = self.client_count();
        if count > 0 {
            if let Err(e) = self.tx.send(data) {
                tracing::warn!("Error broadcasting WebSocket event: {}", e);
            } else {
                tracing::debug!("Broadcasting {:?} to {} clients", event.event_type, count);
            }
        }
    }

    /// Broadcast a propagation job state change
    pub fn broadcast_job(&self, event_type: EventType, job: &PropagationJob) {
        self.broadcast_event(Event {
            event_type,
            payload: serde_json::to_value(TaskPayload {
                job_id: job.id,
                template_id: job.template_id,
                status: job.status,
                updated_configs: job.updated_configs,
                error: job.error.clone(),
            })
            .unwrap_or_default(),
        });
    }

    /// Forward config notifications to WebSocket clients for as long as the
    /// returned subscription is kept
    pub fn attach(self: &Arc<Self>, signals: &SignalRegistry) -> Subscription {
        let hub = self.clone();
        signals.subscribe(move |event| {
            let (event_type, payload) = match event {
                ConfigEvent::StatusChanged(e) => (EventType::ConfigStatusChanged, serde_json::to_value(e)),
                ConfigEvent::Modified(e) => (EventType::ConfigModified, serde_json::to_value(e)),
            };
            hub.broadcast_event(Event {
                event_type,
                payload: payload.unwrap_or_default(),
            });
        })
    }

    /// Get the number of connected clients
    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::SeqCst)
    }

    /// Subscribe to events
    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    fn increment_clients(&self) {
        let count = self.client_count.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!("WebSocket client connected. Total clients: {}", count);
    }

    fn decrement_clients(&self) {
        let previous = self
            .client_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| Some(c.saturating_sub(1)))
            .unwrap_or_default();
        tracing::info!(
            "WebSocket client disconnected. Total clients: {}",
            previous.saturating_sub(1)
        );
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

/// WebSocket handler for axum
pub async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<Hub>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<Hub>) {
    let (mut sender, mut receiver) = socket.split();

    hub.increment_clients();

    // Subscribe to broadcast events
    let mut rx = hub.subscribe();

    // Task to send messages to client
    let send_task = tokio::spawn(async move {
        while let Ok(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    // Task to receive messages from client (just to keep connection alive)
    let recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            if msg.is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    hub.decrement_clients();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::ConfigStatusChanged;

    #[tokio::test]
    async fn test_config_events_are_forwarded() {
        let hub = Arc::new(Hub::new());
        let signals = SignalRegistry::new();
        let _subscription = hub.attach(&signals);
        let mut rx = hub.subscribe();
        hub.increment_clients();

        let config = Uuid::new_v4();
        signals.send(&ConfigEvent::StatusChanged(ConfigStatusChanged { config }));

        let msg: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(msg["type"], "config_status_changed");
        assert_eq!(msg["payload"]["config"], config.to_string());
    }

    #[test]
    fn test_no_broadcast_without_clients() {
        let hub = Hub::new();
        let mut rx = hub.subscribe();
        hub.broadcast_event(Event {
            event_type: EventType::TaskStarted,
            payload: serde_json::Value::Null,
        });
        assert!(rx.try_recv().is_err());
        hub.increment_clients();
        hub.decrement_clients();
        hub.decrement_clients();
        assert_eq!(hub.client_count(), 0);
    }
}
