//! In-process notifications about config changes.
//!
//! Handlers run synchronously on the sending thread, in registration order.
//! A handler stays registered for as long as its [`Subscription`] lives.

use serde::Serialize;
use std::sync::{Arc, Mutex, Weak};
use uuid::Uuid;

/// Why a config's effective content changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigModifiedAction {
    /// Templates were added to or removed from the config
    TemplatesChanged,
    /// A template the config uses was edited
    RelatedTemplateChanged,
    /// Local overrides or variables were edited
    ConfigChanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigStatusChanged {
    pub config: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigModified {
    pub config: Uuid,
    pub device: Uuid,
    pub action: ConfigModifiedAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEvent {
    StatusChanged(ConfigStatusChanged),
    Modified(ConfigModified),
}

type Handler = Arc<dyn Fn(&ConfigEvent) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    next_id: u64,
    entries: Vec<(u64, Handler)>,
}

/// Multi-subscriber registry for [`ConfigEvent`]s
#[derive(Clone, Default)]
pub struct SignalRegistry {
    handlers: Arc<Mutex<Handlers>>,
}

/// Registration handle; dropping it removes the handler
pub struct Subscription {
    id: u64,
    handlers: Weak<Mutex<Handlers>>,
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ConfigEvent) + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        let id = handlers.next_id;
        handlers.next_id += 1;
        handlers.entries.push((id, Arc::new(handler)));
        Subscription {
            id,
            handlers: Arc::downgrade(&self.handlers),
        }
    }

    /// Deliver `event` to every current subscriber
    pub fn send(&self, event: &ConfigEvent) {
        // Snapshot so handlers may subscribe or unsubscribe while running
        let snapshot: Vec<Handler> = {
            let handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
            handlers.entries.iter().map(|(_, h)| h.clone()).collect()
        };
        for handler in snapshot {
            handler(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers
            .lock()
            .map(|h| h.entries.len())
            .unwrap_or_default()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(handlers) = self.handlers.upgrade() {
            let mut handlers = handlers.lock().unwrap_or_else(|e| e.into_inner());
            handlers.entries.retain(|(id, _)| *id != self.id);
        }
    }
}
