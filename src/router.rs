use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::AppState;

/// Build the application router with all routes
pub fn build(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(handlers::healthcheck))
        .route("/api/system-context", get(handlers::get_system_context))
        // Organization routes
        .route(
            "/api/organizations",
            get(handlers::organizations::list_organizations)
                .post(handlers::organizations::create_organization),
        )
        .route("/api/organizations/:id", get(handlers::organizations::get_organization))
        // Device routes
        .route(
            "/api/devices",
            get(handlers::devices::list_devices).post(handlers::devices::create_device),
        )
        .route(
            "/api/devices/:id",
            get(handlers::devices::get_device).delete(handlers::devices::delete_device),
        )
        .route("/api/devices/:id/context", get(handlers::devices::get_device_context))
        .route("/api/devices/:id/config", get(handlers::devices::get_device_config))
        // VPN routes
        .route("/api/vpns", get(handlers::vpns::list_vpns).post(handlers::vpns::create_vpn))
        .route("/api/vpns/:id", get(handlers::vpns::get_vpn))
        .route("/api/certs/:id", get(handlers::vpns::get_cert))
        // Template routes
        .route(
            "/api/templates",
            get(handlers::templates::list_templates).post(handlers::templates::create_template),
        )
        .route(
            "/api/templates/:id",
            get(handlers::templates::get_template)
                .put(handlers::templates::update_template)
                .delete(handlers::templates::delete_template),
        )
        .route("/api/templates/:id/clone", post(handlers::templates::clone_template))
        .route("/api/templates/:id/context", get(handlers::templates::get_template_context))
        .route("/api/templates/:id/preview", get(handlers::templates::preview_template))
        .route(
            "/api/templates/:id/system-context",
            get(handlers::templates::get_template_system_context),
        )
        // Config routes
        .route(
            "/api/configs",
            get(handlers::configs::list_configs).post(handlers::configs::create_config),
        )
        .route(
            "/api/configs/:id",
            get(handlers::configs::get_config).put(handlers::configs::update_config),
        )
        .route(
            "/api/configs/:id/templates/:template_id",
            post(handlers::configs::add_template).delete(handlers::configs::remove_template),
        )
        .route("/api/configs/:id/applied", post(handlers::configs::set_applied))
        .route("/api/configs/:id/error", post(handlers::configs::set_error))
        .route(
            "/api/configs/:id/render",
            get(handlers::configs::render_config).delete(handlers::configs::clear_rendered),
        )
        .route("/api/configs/:id/context", get(handlers::configs::get_config_context))
        .route("/api/configs/:id/vpn-clients", get(handlers::configs::list_vpn_clients))
        // Propagation job routes
        .route("/api/jobs", get(handlers::jobs::list_jobs))
        .route("/api/jobs/:id", get(handlers::jobs::get_job))
        // WebSocket route
        .route("/api/ws", get(crate::ws_upgrade_handler))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
