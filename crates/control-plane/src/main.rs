// Waypoint API server
// Decision: The durable runtime lives in-process; its store is in memory, so
// instances survive worker restarts inside one process but not a process exit

use anyhow::{Context, Result};
use waypoint_control_plane::config::Config;
use waypoint_control_plane::logging::{init_logging, LogConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    init_logging(&LogConfig::from_env().with_version(env!("CARGO_PKG_VERSION")));

    tracing::info!("waypoint-control-plane starting...");

    let config = Config::from_env().context("Failed to load configuration")?;
    if !config.api_prefix.is_empty() {
        tracing::info!(prefix = %config.api_prefix, "API prefix configured");
    }

    let app = waypoint_control_plane::build_app(config.runtime.clone(), &config.api_prefix);

    let report = app
        .runtime
        .start()
        .await
        .context("Failed to start durable runtime")?;
    tracing::info!(
        open_instances = report.open_instances,
        restarted = report.restarted,
        "Durable runtime ready"
    );

    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("HTTP server listening on {}", config.http_addr);

    axum::serve(listener, app.router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("HTTP server stopped, draining workers");
    app.runtime
        .shutdown()
        .await
        .context("Durable runtime did not shut down cleanly")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
