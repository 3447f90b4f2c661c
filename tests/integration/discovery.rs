use std::net::SocketAddr;

use anyhow::bail;
use meridiand::node::NodeHandle;

use crate::*;

/// Spawn a node and wait for its registration to settle. `Ok(Some(node))`
/// on success, `Ok(None)` when the discovery service refused the fixed
/// identifier (the node's event loop then dies and stops publishing).
async fn try_register(
    host_octet: u8,
    identifier: &str,
    discovery: SocketAddr,
) -> Result<Option<NodeHandle>> {
    let config = node_config(host_octet, identifier, discovery);
    let mut node = meridiand::node::spawn(config, "127.0.0.1").await?;

    let registered = tokio::time::timeout(
        STEP_TIMEOUT,
        node.status.wait_for(|status| status.id.is_some()),
    )
    .await
    .map(|r| r.is_ok());
    match registered {
        Ok(true) => Ok(Some(node)),
        Ok(false) => Ok(None),
        Err(_) => bail!("registration neither succeeded nor failed"),
    }
}

/// A fixed identifier held by a live member is refused.
#[tokio::test]
async fn duplicate_identifier_is_refused_while_holder_lives() -> Result<()> {
    let discovery = start_discovery().await?;

    let holder = try_register(2, "00aa", discovery.listen_addr).await?;
    assert!(holder.is_some(), "first claim should be granted");

    let contender = try_register(3, "00aa", discovery.listen_addr).await?;
    assert!(contender.is_none(), "second claim should be refused");

    holder.unwrap().shutdown();
    discovery.shutdown();
    Ok(())
}

/// Departure releases the identifier: once the holder's discovery
/// connection closes, the same identifier can be claimed again.
#[tokio::test]
async fn identifier_is_released_when_the_holder_departs() -> Result<()> {
    let discovery = start_discovery().await?;

    let holder = try_register(2, "00aa", discovery.listen_addr).await?;
    assert!(holder.is_some());
    holder.unwrap().shutdown();

    // The release happens when the discovery service observes the closed
    // connection, so poll briefly.
    let mut reclaimed = None;
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Some(node) = try_register(3, "00aa", discovery.listen_addr).await? {
            reclaimed = Some(node);
            break;
        }
    }
    let reclaimed = reclaimed.expect("identifier was never released");

    reclaimed.shutdown();
    discovery.shutdown();
    Ok(())
}

/// Two nodes registering with generated identifiers never end up sharing
/// one — the discovery service refuses collisions and the client retries.
#[tokio::test]
async fn generated_identifiers_are_unique() -> Result<()> {
    let discovery = start_discovery().await?;

    let first = start_node(2, "", discovery.listen_addr).await?;
    let second = start_node(3, "", discovery.listen_addr).await?;

    let first_id = first.status.borrow().id.unwrap();
    let second_id = second.status.borrow().id.unwrap();
    assert_ne!(first_id, second_id);

    first.shutdown();
    second.shutdown();
    discovery.shutdown();
    Ok(())
}
