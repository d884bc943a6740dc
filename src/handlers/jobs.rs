use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::*;
use crate::AppState;

use super::ApiError;

/// List propagation jobs, most recent first
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<PropagationJob>>, ApiError> {
    let jobs = state.store.list_jobs().await?;
    Ok(Json(jobs))
}

/// Get a single propagation job by ID
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PropagationJob>, ApiError> {
    let job = state
        .store
        .get_job(id)
        .await?
        .ok_or_else(|| ApiError::not_found("job"))?;
    Ok(Json(job))
}
