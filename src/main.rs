use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;

use ara_realtime_delivery::config::Settings;
use ara_realtime_delivery::server::{create_app, AppState};
use ara_realtime_delivery::shutdown::GracefulShutdown;
use ara_realtime_delivery::storage::create_stores;
use ara_realtime_delivery::tasks::{HealthCheckTask, ReaperTask};
use ara_realtime_delivery::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Keep the guard alive until exit so spans get flushed
    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!("Configuration loaded");

    // Storage backends
    let stores = create_stores(&settings.database).await?;

    // Create application state
    let state = AppState::new(settings.clone(), stores);
    tracing::info!(
        comments = state.stores.comments.backend_name(),
        notifications = state.stores.notifications.backend_name(),
        "Application state initialized"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Start background sweeps
    let health_check = HealthCheckTask::new(
        settings.live_channel.clone(),
        state.registry.clone(),
        shutdown_tx.subscribe(),
    );
    let health_check_handle = tokio::spawn(async move {
        health_check.run().await;
    });

    let reaper = ReaperTask::new(
        settings.live_channel.clone(),
        state.registry.clone(),
        shutdown_tx.subscribe(),
    );
    let reaper_handle = tokio::spawn(async move {
        reaper.run().await;
    });

    let graceful = Arc::new(GracefulShutdown::new(
        state.registry.clone(),
        state.poll_engine.clone(),
        state.live_channel.clone(),
        shutdown_tx,
    ));

    // Create Axum app
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Live streams and polls are closed before axum waits for open responses
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(graceful))
        .await?;

    // Wait for background tasks to finish
    tracing::info!("Waiting for background tasks to finish...");
    let _ = tokio::join!(health_check_handle, reaper_handle);

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler(graceful: Arc<GracefulShutdown>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let reason = tokio::select! {
        _ = ctrl_c => "ctrl_c",
        _ = terminate => "sigterm",
    };
    tracing::info!(reason, "Shutdown signal received, initiating graceful shutdown");

    graceful.execute(reason).await;
}
