mod backend;
mod config;
mod context;
mod db;
mod handlers;
mod models;
mod router;
mod signals;
mod tasks;
mod utils;
mod validation;
mod vpn;
mod ws;

use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use db::Store;
use tasks::PropagationService;
use ws::Hub;

/// Application state shared across handlers
pub struct AppState {
    pub store: Store,
    pub config: Config,
    pub ws_hub: Option<Arc<Hub>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "config_controller=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let cfg = Config::load();
    tracing::info!("Starting config controller");
    tracing::info!("Default backend: {}", cfg.default_backend);
    tracing::info!("Default template policy: {:?}", cfg.default_template_policy);
    tracing::info!("Listen: {}", cfg.listen_addr);

    let store = Store::new(&cfg);

    // Initialize WebSocket hub and forward config notifications to it
    let ws_hub = Arc::new(Hub::new());
    let _ws_subscription = ws_hub.attach(store.signals());
    tracing::debug!("Config signal subscribers: {}", store.signals().subscriber_count());

    // Start the status propagation worker
    let shutdown = CancellationToken::new();
    let propagation = PropagationService::new(
        store.clone(),
        Some(ws_hub.clone()),
        cfg.task_soft_time_limit,
        shutdown.clone(),
    );
    store.set_task_queue(propagation);

    // Create app state
    let state = Arc::new(AppState {
        store,
        config: cfg.clone(),
        ws_hub: Some(ws_hub),
    });

    // Build router
    let app = router::build(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    tracing::info!("Config controller listening on {}", cfg.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    tracing::info!("Config controller shutting down");
    Ok(())
}

/// WebSocket upgrade handler
pub async fn ws_upgrade_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> axum::response::Response {
    use axum::response::IntoResponse;

    if let Some(hub) = &state.ws_hub {
        ws::ws_handler(ws, axum::extract::State(hub.clone())).await
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE.into_response()
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => { sig.recv().await; }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
