//! Meridian integration test harness.
//!
//! Scenarios run real daemons in-process over loopback TCP: one discovery
//! service plus however many peer nodes the scenario needs. Each node
//! listens on its own 127.0.0.0/8 address so connection caches — which key
//! by host and ignore ports — treat the nodes as distinct machines, and on
//! port 0 so the OS picks free ports and tests can run concurrently.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use meridian_core::config::MeridianConfig;
use meridiand::node::{NodeHandle, NodeStatus};

mod discovery;
mod join;

// ── Harness ───────────────────────────────────────────────────────────────────

/// How long a scenario waits for any single protocol step to land.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Start a discovery service on an ephemeral loopback port.
pub async fn start_discovery() -> Result<meridian_discoveryd::DiscoveryHandle> {
    meridian_discoveryd::spawn("127.0.0.1:0".parse().unwrap()).await
}

/// Build a node config: own loopback host, OS-assigned port, fixed
/// identifier (empty = generated), pointed at the given discovery service.
pub fn node_config(host_octet: u8, identifier: &str, discovery: SocketAddr) -> MeridianConfig {
    let mut config = MeridianConfig::default();
    config.network.listen_addr = format!("127.0.0.{host_octet}:0").parse().unwrap();
    config.network.discovery_port = discovery.port();
    config.registration.identifier = identifier.to_string();
    config
}

/// Start a node and wait until its registration completes.
pub async fn start_node(
    host_octet: u8,
    identifier: &str,
    discovery: SocketAddr,
) -> Result<NodeHandle> {
    let config = node_config(host_octet, identifier, discovery);
    let mut node = meridiand::node::spawn(config, "127.0.0.1")
        .await
        .context("node failed to start")?;
    wait_until(&mut node, |status| status.id.is_some()).await?;
    Ok(node)
}

/// Wait until the node's published status satisfies the predicate.
pub async fn wait_until(
    node: &mut NodeHandle,
    predicate: impl FnMut(&NodeStatus) -> bool,
) -> Result<NodeStatus> {
    let outcome = tokio::time::timeout(STEP_TIMEOUT, node.status.wait_for(predicate))
        .await
        .map(|r| r.map(|status| status.clone()));
    match outcome {
        Ok(Ok(status)) => Ok(status),
        Ok(Err(_)) => bail!("node stopped publishing status"),
        Err(_) => bail!(
            "timed out waiting for status, last seen: {:?}",
            *node.status.borrow()
        ),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// A lone node registers, gets no bootstrap peer, and sits with an empty
/// leaf set waiting for joins.
#[tokio::test]
async fn first_node_waits_alone() -> Result<()> {
    let discovery = start_discovery().await?;
    let node = start_node(2, "1000", discovery.listen_addr).await?;

    let status = node.status.borrow().clone();
    assert_eq!(status.id, Some("1000".parse().unwrap()));
    assert!(status.low.is_none());
    assert!(status.high.is_none());
    assert!(status.last_route.is_none());

    node.shutdown();
    discovery.shutdown();
    Ok(())
}
