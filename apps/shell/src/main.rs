//! LiveLink shell entry point.

mod app;
mod config;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting LiveLink shell");

    let config = match config::Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("invalid configuration, using defaults: {e:#}");
            config::Config::default()
        }
    };
    tracing::info!(url = %config.realtime_url, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("shell shut down cleanly");
    Ok(())
}
