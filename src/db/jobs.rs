use anyhow::Result;
use chrono::Utc;
use uuid::Uuid;

use crate::models::*;

use super::{not_found, Inner};

pub struct JobRepo;

impl JobRepo {
    pub fn create(inner: &mut Inner, template_id: Uuid) -> PropagationJob {
        let job = PropagationJob {
            id: Uuid::new_v4(),
            template_id,
            status: TaskStatus::Pending,
            error: None,
            updated_configs: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        inner.jobs.insert(job.id, job.clone());
        job
    }

    pub fn get(inner: &Inner, id: Uuid) -> Option<PropagationJob> {
        inner.jobs.get(&id).cloned()
    }

    /// Most recent first
    pub fn list(inner: &Inner) -> Vec<PropagationJob> {
        let mut jobs: Vec<PropagationJob> = inner.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub fn update_started(inner: &mut Inner, id: Uuid) -> Result<()> {
        let job = inner.jobs.get_mut(&id).ok_or_else(|| not_found("job", id))?;
        job.status = TaskStatus::Running;
        job.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn update_finished(
        inner: &mut Inner,
        id: Uuid,
        status: TaskStatus,
        updated_configs: usize,
        error: Option<String>,
    ) -> Result<()> {
        let job = inner.jobs.get_mut(&id).ok_or_else(|| not_found("job", id))?;
        if job.status.is_finished() {
            anyhow::bail!("job {} already finished", id);
        }
        job.status = status;
        job.updated_configs = updated_configs;
        job.error = error;
        job.completed_at = Some(Utc::now());
        Ok(())
    }
}
