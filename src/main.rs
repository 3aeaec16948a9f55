//! Service Navigation Agent Binary

use service_nav::{Config, Dashboard, Result, SyncChannel};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    initialize_tracing();

    info!("Starting service navigation agent v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::from_env();

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    info!(
        "Agent configuration - Storage: {}, Backend: {}, Probe: {:?}, Check interval: {:?}",
        config.storage_dir.display(),
        config.backend_url.as_deref().unwrap_or("none"),
        config.probe_mode,
        config.health_check_interval
    );

    let channel = SyncChannel::new(config.sync_channel_capacity);
    let dashboard = Dashboard::start(config, channel)?;

    if dashboard.sync().has_backend() && !dashboard.sync().backend_health().await {
        warn!("Backend is not reachable, the catalog will start empty");
    }

    let loaded = dashboard.catalog().bootstrap().await;
    info!(
        "Catalog ready with {} services in {} categories (from backend: {})",
        dashboard.catalog().services().len(),
        dashboard.catalog().categories().len(),
        loaded
    );

    dashboard.start_health_monitoring();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutting down service navigation agent");
    dashboard.shutdown();

    Ok(())
}

/// Initialize structured logging
fn initialize_tracing() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .json();

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
