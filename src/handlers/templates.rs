use axum::{
    extract::{Path, State},
    Json,
};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::*;
use crate::AppState;

use super::{created, ApiError};

/// List all templates
pub async fn list_templates(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Template>>, ApiError> {
    let templates = state.store.list_templates().await?;
    Ok(Json(templates))
}

/// Get a single template by ID
pub async fn get_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Template>, ApiError> {
    let template = state
        .store
        .get_template(id)
        .await?
        .ok_or_else(|| ApiError::not_found("template"))?;
    Ok(Json(template))
}

/// Create a new template
pub async fn create_template(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTemplateRequest>,
) -> Result<(axum::http::StatusCode, Json<Template>), ApiError> {
    let template = state.store.create_template(Template::from_request(req)).await?;
    Ok(created(template))
}

/// Update an existing template; content changes are propagated to its configs
pub async fn update_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<CreateTemplateRequest>,
) -> Result<Json<Template>, ApiError> {
    let template = state.store.update_template(id, req).await?;
    Ok(Json(template))
}

/// Delete a template
pub async fn delete_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<axum::http::StatusCode, ApiError> {
    state.store.delete_template(id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// Copy a template under the name "<name> (Clone)"
pub async fn clone_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    req: Option<Json<CloneTemplateRequest>>,
) -> Result<(axum::http::StatusCode, Json<Template>), ApiError> {
    let actor = req.map(|Json(r)| r.actor).unwrap_or_else(|| "api".to_string());
    let template = state.store.clone_template(id, &actor).await?;
    Ok(created(template))
}

/// Variables the template renders with
pub async fn get_template_context(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<HashMap<String, String>>, ApiError> {
    let context = state.store.get_template_context(id).await?;
    Ok(Json(context))
}

/// Render a template on its own
pub async fn preview_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TemplatePreviewResponse>, ApiError> {
    let output = state.store.preview_template(id).await?;
    Ok(Json(TemplatePreviewResponse { output }))
}

/// System and organization variables visible to the template
pub async fn get_template_system_context(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<HashMap<String, String>>, ApiError> {
    let context = state.store.get_template_system_context(id).await?;
    Ok(Json(context))
}
