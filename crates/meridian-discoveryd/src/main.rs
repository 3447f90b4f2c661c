//! meridian-discoveryd — discovery service daemon.

use std::net::{Ipv4Addr, SocketAddr};

use anyhow::Result;
use meridian_core::config::MeridianConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = MeridianConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MeridianConfig::default()
    });

    let listen_addr = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), config.network.discovery_port);
    let service = meridian_discoveryd::spawn(listen_addr).await?;
    tracing::info!(addr = %service.listen_addr, "discovery service ready");

    service.wait().await
}
