use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::*;
use crate::AppState;

use super::{created, ApiError};

/// List all organizations
pub async fn list_organizations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Organization>>, ApiError> {
    let orgs = state.store.list_organizations().await?;
    Ok(Json(orgs))
}

/// Get a single organization by ID
pub async fn get_organization(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Organization>, ApiError> {
    let org = state
        .store
        .get_organization(id)
        .await?
        .ok_or_else(|| ApiError::not_found("organization"))?;
    Ok(Json(org))
}

/// Create a new organization
pub async fn create_organization(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrganizationRequest>,
) -> Result<(axum::http::StatusCode, Json<Organization>), ApiError> {
    let org = state.store.create_organization(req).await?;
    Ok(created(org))
}
