//! Status propagation after template edits.
//!
//! Saving a template with changed content enqueues its id. A single worker
//! drains the queue and marks every config using the template as modified.
//! Each run is bounded by a soft time limit; configs already updated when
//! the limit is hit stay updated.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::Store;
use crate::models::TaskStatus;
use crate::ws::{EventType, Hub};

/// Where template ids go to have their configs updated
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, template_id: Uuid);
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("template {0} not found")]
    TemplateNotFound(Uuid),
    #[error("soft time limit of {limit:?} exceeded after updating {updated} config(s)")]
    SoftTimeLimitExceeded { limit: Duration, updated: usize },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl TaskError {
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::TemplateNotFound(_) => TaskStatus::FailedRecoverable,
            Self::SoftTimeLimitExceeded { .. } | Self::Store(_) => TaskStatus::FailedFatal,
        }
    }

    fn updated(&self) -> usize {
        match self {
            Self::SoftTimeLimitExceeded { updated, .. } => *updated,
            _ => 0,
        }
    }
}

/// PropagationService runs status propagation jobs on a background worker
pub struct PropagationService {
    store: Store,
    ws_hub: Option<Arc<Hub>>,
    soft_time_limit: Duration,
    pending_tx: mpsc::Sender<Uuid>,
}

impl PropagationService {
    pub fn new(
        store: Store,
        ws_hub: Option<Arc<Hub>>,
        soft_time_limit: Duration,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let (pending_tx, pending_rx) = mpsc::channel(100);

        let service = Arc::new(Self {
            store,
            ws_hub,
            soft_time_limit,
            pending_tx,
        });

        // Start the worker
        let worker_service = service.clone();
        tokio::spawn(async move {
            worker_service.worker(pending_rx, shutdown).await;
        });

        service
    }

    async fn worker(&self, mut rx: mpsc::Receiver<Uuid>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Propagation worker stopping");
                    break;
                }
                next = rx.recv() => match next {
                    Some(template_id) => {
                        self.run(template_id).await;
                    }
                    None => break,
                },
            }
        }
    }

    /// Propagate a template change to its configs. Never fails: the outcome
    /// is recorded on the job and in the logs.
    pub async fn run(&self, template_id: Uuid) -> TaskStatus {
        let job = match self.store.create_job(template_id).await {
            Ok(job) => job,
            Err(e) => {
                tracing::error!("Failed to record propagation job for template {}: {}", template_id, e);
                return TaskStatus::FailedFatal;
            }
        };
        if let Err(e) = self.store.update_job_started(job.id).await {
            tracing::error!("Failed to start job {}: {}", job.id, e);
        }
        self.broadcast_job(EventType::TaskStarted, job.id).await;

        let (status, updated, error) = match self.propagate(template_id).await {
            Ok(updated) => {
                tracing::info!(
                    "Template {} change propagated to {} config(s)",
                    template_id,
                    updated
                );
                (TaskStatus::Completed, updated, None)
            }
            Err(e) => {
                match &e {
                    TaskError::TemplateNotFound(_) => {
                        tracing::warn!("Propagation skipped: {}", e);
                    }
                    _ => {
                        tracing::error!("Propagation for template {} aborted: {}", template_id, e);
                    }
                }
                (e.status(), e.updated(), Some(e.to_string()))
            }
        };

        if let Err(e) = self
            .store
            .update_job_finished(job.id, status, updated, error)
            .await
        {
            tracing::error!("Failed to finish job {}: {}", job.id, e);
        }
        let event = if status == TaskStatus::Completed {
            EventType::TaskCompleted
        } else {
            EventType::TaskFailed
        };
        self.broadcast_job(event, job.id).await;
        status
    }

    async fn propagate(&self, template_id: Uuid) -> Result<usize, TaskError> {
        let started = Instant::now();
        if self.store.get_template(template_id).await?.is_none() {
            return Err(TaskError::TemplateNotFound(template_id));
        }

        let mut updated = 0;
        for config_id in self.store.list_configs_for_template(template_id).await? {
            // Every run makes progress on at least one config
            if updated > 0 && started.elapsed() >= self.soft_time_limit {
                return Err(TaskError::SoftTimeLimitExceeded {
                    limit: self.soft_time_limit,
                    updated,
                });
            }
            self.store.update_related_config_status(config_id).await?;
            updated += 1;
        }
        Ok(updated)
    }

    async fn broadcast_job(&self, event_type: EventType, job_id: Uuid) {
        let Some(hub) = &self.ws_hub else {
            return;
        };
        if let Ok(Some(job)) = self.store.get_job(job_id).await {
            hub.broadcast_job(event_type, &job);
        }
    }
}

#[async_trait]
impl TaskQueue for PropagationService {
    async fn enqueue(&self, template_id: Uuid) {
        if let Err(e) = self.pending_tx.send(template_id).await {
            tracing::warn!("Failed to enqueue propagation for template {}: {}", template_id, e);
        }
    }
}
