//! meridiand — meridian peer node daemon.

use anyhow::{Context, Result};
use meridian_core::config::MeridianConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = MeridianConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = MeridianConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MeridianConfig::default()
    });

    let discovery_host = std::env::args()
        .nth(1)
        .context("usage: meridiand <discovery-host>")?;
    tracing::info!(discovery_host, "meridiand starting");

    let node = meridiand::node::spawn(config, &discovery_host).await?;
    tracing::info!(addr = %node.listen_addr, "peer listener ready");

    node.wait().await
}
