use meridian_core::NodeId;

use crate::*;

fn id(hex: &str) -> NodeId {
    hex.parse().unwrap()
}

/// B joins a one-node overlay through A: both end up pointing at each other
/// on both sides, and the join's route trace is exactly A.
#[tokio::test]
async fn two_node_bootstrap_is_symmetric() -> Result<()> {
    let discovery = start_discovery().await?;
    let mut a = start_node(2, "1000", discovery.listen_addr).await?;
    let mut b = start_node(3, "2000", discovery.listen_addr).await?;

    let b_status = wait_until(&mut b, |status| status.low.is_some()).await?;
    assert_eq!(b_status.low.unwrap().id, id("1000"));
    assert_eq!(b_status.high.unwrap().id, id("1000"));

    let route = b_status.last_route.unwrap();
    assert_eq!(route.len(), 1, "only A was visited");
    assert_eq!(route.hops()[0].id, id("1000"));
    assert_eq!(route.hops()[0].addr, a.listen_addr);

    let a_status = wait_until(&mut a, |status| status.low.is_some()).await?;
    assert_eq!(a_status.low.unwrap().id, id("2000"));
    assert_eq!(a_status.high.unwrap().id, id("2000"));
    assert_eq!(a_status.low.unwrap().addr, b.listen_addr);

    a.shutdown();
    b.shutdown();
    discovery.shutdown();
    Ok(())
}

/// C joins a two-node overlay. Whichever member terminates the join hands C
/// its ring neighbors, refreshes its own leaf set with C, and the third
/// member keeps its two-member view.
#[tokio::test]
async fn three_node_overlay_forms_a_ring() -> Result<()> {
    let discovery = start_discovery().await?;
    let mut a = start_node(2, "1000", discovery.listen_addr).await?;
    let mut b = start_node(3, "2000", discovery.listen_addr).await?;
    // Joins are sequential: the two-node overlay must settle on both sides
    // before C shows up.
    wait_until(&mut a, |status| status.low.is_some()).await?;
    wait_until(&mut b, |status| status.low.is_some()).await?;

    let mut c = start_node(4, "3000", discovery.listen_addr).await?;
    let c_status = wait_until(&mut c, |status| status.low.is_some()).await?;

    // C's ring neighbors among {A, B}: low is B, high wraps to A.
    assert_eq!(c_status.low.unwrap().id, id("2000"));
    assert_eq!(c_status.high.unwrap().id, id("1000"));
    assert!(!c_status.last_route.as_ref().unwrap().is_empty());

    // The responder refreshed its leaves before answering, so both statuses
    // are already settled. Discovery picks the bootstrap at random, so
    // either A or B terminated the join.
    let a_status = a.status.borrow().clone();
    let b_status = b.status.borrow().clone();

    let a_leaves = (a_status.low.unwrap().id, a_status.high.unwrap().id);
    let b_leaves = (b_status.low.unwrap().id, b_status.high.unwrap().id);

    if a_leaves == (id("3000"), id("2000")) {
        // A answered; B still sees the two-member overlay.
        assert_eq!(b_leaves, (id("1000"), id("1000")));
    } else {
        // B answered; A still sees the two-member overlay.
        assert_eq!(b_leaves, (id("1000"), id("3000")));
        assert_eq!(a_leaves, (id("2000"), id("2000")));
    }

    // No node ever names itself as a leaf.
    for (status, own) in [
        (&a_status, id("1000")),
        (&b_status, id("2000")),
        (&c_status, id("3000")),
    ] {
        assert_ne!(status.low.unwrap().id, own);
        assert_ne!(status.high.unwrap().id, own);
    }

    a.shutdown();
    b.shutdown();
    c.shutdown();
    discovery.shutdown();
    Ok(())
}

/// A fourth join through a three-node overlay terminates within N hops,
/// visiting each forwarding node at most once.
#[tokio::test]
async fn fourth_join_terminates_within_bound() -> Result<()> {
    let discovery = start_discovery().await?;
    let mut a = start_node(2, "1000", discovery.listen_addr).await?;
    let mut b = start_node(3, "2000", discovery.listen_addr).await?;
    wait_until(&mut a, |status| status.low.is_some()).await?;
    wait_until(&mut b, |status| status.low.is_some()).await?;
    let mut c = start_node(4, "3000", discovery.listen_addr).await?;
    wait_until(&mut c, |status| status.low.is_some()).await?;

    let mut d = start_node(5, "4000", discovery.listen_addr).await?;
    let d_status = wait_until(&mut d, |status| status.low.is_some()).await?;

    // Every termination path hands D the same pair: low B, high wraps to A.
    assert_eq!(d_status.low.unwrap().id, id("2000"));
    assert_eq!(d_status.high.unwrap().id, id("1000"));

    let route = d_status.last_route.unwrap();
    assert!(
        (1..=3).contains(&route.len()),
        "expected at most one hop per existing member, got {route}"
    );

    let mut seen: Vec<NodeId> = route.hops().iter().map(|hop| hop.id).collect();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), route.len(), "a forwarding cycle revisited a node");

    a.shutdown();
    b.shutdown();
    c.shutdown();
    d.shutdown();
    discovery.shutdown();
    Ok(())
}
