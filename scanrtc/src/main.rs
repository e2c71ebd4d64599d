use anyhow::{Context, Result};
use clap::Parser;
use scanrtc::{ScanRtc, ServerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::parse();

    // RUST_LOG wins over the configured verbosity
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level().as_str().to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        host = %config.host,
        port = config.port,
        static_dir = %config.static_dir.display(),
        "Starting scanrtc"
    );

    let scanner = ScanRtc::init_with(config).context("Failed to initialize scanner")?;
    let report = scanner
        .serve(shutdown_signal())
        .await
        .context("Server error")?;

    if !report.failed.is_empty() {
        info!(failed = report.failed.len(), "Some sessions did not close cleanly");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
