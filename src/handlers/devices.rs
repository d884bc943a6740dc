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

/// List all devices
pub async fn list_devices(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Device>>, ApiError> {
    let devices = state.store.list_devices().await?;
    Ok(Json(devices))
}

/// Get a single device by ID
pub async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Device>, ApiError> {
    let device = state
        .store
        .get_device(id)
        .await?
        .ok_or_else(|| ApiError::not_found("device"))?;
    Ok(Json(device))
}

/// Create a device and its config
pub async fn create_device(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateDeviceRequest>,
) -> Result<(axum::http::StatusCode, Json<Device>), ApiError> {
    let device = state.store.create_device(req).await?;
    Ok(created(device))
}

/// Delete a device along with its config
pub async fn delete_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<axum::http::StatusCode, ApiError> {
    state.store.delete_device(id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// Variables the device config renders with
pub async fn get_device_context(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<HashMap<String, String>>, ApiError> {
    let context = state.store.get_device_context(id).await?;
    Ok(Json(context))
}

/// Config attached to a device
pub async fn get_device_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Config>, ApiError> {
    let config = state
        .store
        .get_config_by_device(id)
        .await?
        .ok_or_else(|| ApiError::not_found("config"))?;
    Ok(Json(config))
}
