use std::future::ready;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use civiceye::config::Configuration;
use civiceye::telemetry;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // read configuration file. let it in memory.
    let path = std::env::var("CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_default();
    // no subscriber is installed yet: print start-up logs to stdout.
    let config = tracing::subscriber::with_default(
        tracing_subscriber::fmt().finish(),
        || Configuration::default().path(path).read(),
    )?;

    let _telemetry = telemetry::init(config.telemetry.as_ref())?;
    let metrics = telemetry::setup_metrics_recorder()?;

    let state = civiceye::initialize_state(Arc::clone(&config)).await?;

    // forget clients idle for a whole window.
    let limiter = Arc::clone(&state.limiter);
    tokio::spawn(async move {
        let period = limiter.window().max(Duration::from_secs(1));
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let tracked = limiter.purge();
            tracing::debug!(tracked, "rate limit buckets purged");
        }
    });

    let app = civiceye::app(state)
        // `GET /metrics` renders Prometheus metrics.
        .route("/metrics", get(move || ready(metrics.render())));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, version = %config.version, "server started");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }

    tracing::info!("shutting down");
}
