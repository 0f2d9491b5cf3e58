use std::sync::Arc;

use ctx_daemon::{routes, DaemonConfig, Discoverer, SystemClock};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = DaemonConfig::from_env()?;
    info!(
        time_slot_secs = config.lease.time_slot.as_secs(),
        default_slots = config.lease.default_slots,
        "Lease settings"
    );

    let discoverer = Arc::new(Discoverer::new(config.lease, Arc::new(SystemClock)));

    // Sweeps for the lifetime of the process
    let _sweeper = discoverer.spawn_sweeper();

    let app = routes::router(discoverer);

    info!("Listening on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
