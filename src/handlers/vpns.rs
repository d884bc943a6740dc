use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::*;
use crate::AppState;

use super::{created, ApiError};

/// List all VPN servers
pub async fn list_vpns(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Vpn>>, ApiError> {
    let vpns = state.store.list_vpns().await?;
    Ok(Json(vpns))
}

/// Get a single VPN server by ID
pub async fn get_vpn(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vpn>, ApiError> {
    let vpn = state
        .store
        .get_vpn(id)
        .await?
        .ok_or_else(|| ApiError::not_found("vpn"))?;
    Ok(Json(vpn))
}

/// Create a VPN server with its CA
pub async fn create_vpn(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateVpnRequest>,
) -> Result<(axum::http::StatusCode, Json<Vpn>), ApiError> {
    let vpn = state.store.create_vpn(req).await?;
    Ok(created(vpn))
}

/// Get a certificate issued by one of the VPN CAs
pub async fn get_cert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Cert>, ApiError> {
    let cert = state
        .store
        .get_cert(id)
        .await?
        .ok_or_else(|| ApiError::not_found("cert"))?;
    Ok(Json(cert))
}
