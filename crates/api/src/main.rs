use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use renderq_api::background::EventForwarder;
use renderq_api::config::ServerConfig;
use renderq_api::router::build_app_router;
use renderq_api::state::AppState;
use renderq_api::ws;
use renderq_comfyui::ComfyUIBackend;
use renderq_engine::{Scheduler, SchedulerConfig, StaticNodeRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "renderq_api=debug,renderq_engine=debug,renderq_comfyui=info,tower_http=debug".into()
    });
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(filter)
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer()))
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().context("Invalid server configuration")?;
    let scheduler_config = SchedulerConfig::from_env().context("Invalid scheduler configuration")?;
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Compute nodes ---
    let registry = StaticNodeRegistry::from_env().context("Invalid RENDER_NODES")?;
    if registry.is_empty() {
        tracing::warn!("No compute nodes configured; jobs will stay queued");
    } else {
        tracing::info!(nodes = registry.len(), "Node registry loaded");
    }

    // --- Scheduler ---
    let auto_start = scheduler_config.auto_start;
    let scheduler = Arc::new(Scheduler::in_memory(
        Arc::new(registry),
        Arc::new(ComfyUIBackend::new()),
        scheduler_config,
    ));

    // --- WebSocket fan-out ---
    let ws_manager = Arc::new(ws::WsManager::new());
    let background_cancel = CancellationToken::new();
    let heartbeat_handle = ws::start_heartbeat(
        Arc::clone(&ws_manager),
        ws::HEARTBEAT_INTERVAL,
        background_cancel.clone(),
    );
    let forwarder_handle = tokio::spawn(
        EventForwarder::new(Arc::clone(&ws_manager))
            .run(scheduler.subscribe(), background_cancel.clone()),
    );

    if auto_start {
        scheduler.start();
    }

    // --- Router ---
    let state = AppState {
        scheduler: Arc::clone(&scheduler),
        config: Arc::new(config.clone()),
        ws_manager: Arc::clone(&ws_manager),
    };
    let app = build_app_router(state, &config)?;

    // --- Start server ---
    let host = config
        .host
        .parse::<std::net::IpAddr>()
        .with_context(|| format!("Invalid HOST address '{}'", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    let grace = Duration::from_secs(config.shutdown_timeout_secs);

    if tokio::time::timeout(grace, scheduler.shutdown()).await.is_err() {
        tracing::warn!("Scheduler loops did not stop within the shutdown timeout");
    }
    tracing::info!("Scheduler stopped");

    background_cancel.cancel();
    let _ = tokio::time::timeout(grace, forwarder_handle).await;
    let _ = tokio::time::timeout(grace, heartbeat_handle).await;

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
///
/// If a handler cannot be installed the failure is logged and that signal
/// is never observed.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
