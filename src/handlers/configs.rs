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

/// List all configs
pub async fn list_configs(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Config>>, ApiError> {
    let configs = state.store.list_configs().await?;
    Ok(Json(configs))
}

/// Attach a config to a device that has none
pub async fn create_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateConfigRequest>,
) -> Result<(axum::http::StatusCode, Json<Config>), ApiError> {
    let config = state.store.create_config(req).await?;
    Ok(created(config))
}

/// Get a single config by ID
pub async fn get_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Config>, ApiError> {
    let config = state
        .store
        .get_config(id)
        .await?
        .ok_or_else(|| ApiError::not_found("config"))?;
    Ok(Json(config))
}

/// Replace local overrides and/or variables
pub async fn update_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateConfigRequest>,
) -> Result<Json<Config>, ApiError> {
    let config = state.store.update_config(id, req).await?;
    Ok(Json(config))
}

/// Append a template to a config
pub async fn add_template(
    State(state): State<Arc<AppState>>,
    Path((id, template_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Config>, ApiError> {
    let config = state.store.add_template_to_config(id, template_id).await?;
    Ok(Json(config))
}

/// Detach a template from a config
pub async fn remove_template(
    State(state): State<Arc<AppState>>,
    Path((id, template_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Config>, ApiError> {
    let config = state.store.remove_template_from_config(id, template_id).await?;
    Ok(Json(config))
}

/// Mark a config as applied on its device
pub async fn set_applied(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Config>, ApiError> {
    let config = state.store.set_status_applied(id).await?;
    Ok(Json(config))
}

/// Mark a config as failed to apply
pub async fn set_error(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Config>, ApiError> {
    let config = state.store.set_status_error(id).await?;
    Ok(Json(config))
}

/// Rendered configuration text
pub async fn render_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<RenderedConfigResponse>, ApiError> {
    let config = state
        .store
        .get_config(id)
        .await?
        .ok_or_else(|| ApiError::not_found("config"))?;
    let output = state.store.render_config(id).await?;
    Ok(Json(RenderedConfigResponse {
        config: config.id,
        backend: config.backend,
        output,
    }))
}

/// Drop the cached rendering so the next render rebuilds it
pub async fn clear_rendered(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<axum::http::StatusCode, ApiError> {
    state
        .store
        .get_config(id)
        .await?
        .ok_or_else(|| ApiError::not_found("config"))?;
    state.store.clear_backend_instance(id).await;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// Variables the config renders with
pub async fn get_config_context(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<HashMap<String, String>>, ApiError> {
    let context = state.store.get_config_context(id).await?;
    Ok(Json(context))
}

/// VPN clients issued for the config
pub async fn list_vpn_clients(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<VpnClient>>, ApiError> {
    let clients = state.store.list_vpn_clients(id).await?;
    Ok(Json(clients))
}
