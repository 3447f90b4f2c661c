//! Leaf set manager — the local node's two nearest neighbors in identifier
//! space, and the join-termination predicate built on them.

use meridian_core::{id, NodeId, PeerRef};

/// The low/high neighbor pointers of the local node.
///
/// Both empty only before any join completes. `low.id == high.id` is a valid
/// state: the overlay has exactly two members and both pointers name the one
/// other member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeafSet {
    low: Option<PeerRef>,
    high: Option<PeerRef>,
}

impl LeafSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn low(&self) -> Option<&PeerRef> {
        self.low.as_ref()
    }

    pub fn high(&self) -> Option<&PeerRef> {
        self.high.as_ref()
    }

    /// Must this node answer an incoming join itself?
    ///
    /// True when the node is alone (no leaves yet) or when the overlay has
    /// exactly two members — in either case every existing member is one of
    /// the joiner's neighbors, so routing further cannot improve the answer.
    pub fn is_responsible_for_join(&self) -> bool {
        match (&self.low, &self.high) {
            (None, None) => true,
            (Some(low), Some(high)) => low.id == high.id,
            _ => false,
        }
    }

    /// Install after a join response carrying no leaf information: the
    /// responder was alone and is forming a two-node overlay with us.
    pub fn install_bootstrap(&mut self, peer: PeerRef) {
        self.low = Some(peer);
        self.high = Some(peer);
    }

    /// Install a reported leaf pair.
    pub fn install(&mut self, low: PeerRef, high: PeerRef) {
        self.low = Some(low);
        self.high = Some(high);
    }

    /// Responder-side refresh when a join terminates here: recompute the
    /// ring neighbors of `local` from the current leaves plus the joiner.
    pub fn admit(&mut self, local: NodeId, joiner: PeerRef) {
        let mut candidates = self.members();
        if !candidates.iter().any(|p| p.id == joiner.id) {
            candidates.push(joiner);
        }
        let ids: Vec<NodeId> = candidates.iter().map(|p| p.id).collect();

        if let Some((low_id, high_id)) = id::ring_neighbors(local, &ids) {
            let find = |want: NodeId| candidates.iter().copied().find(|p| p.id == want);
            if let (Some(low), Some(high)) = (find(low_id), find(high_id)) {
                self.low = Some(low);
                self.high = Some(high);
            }
        }
    }

    /// The distinct peers currently referenced by the leaf set.
    pub fn members(&self) -> Vec<PeerRef> {
        let mut peers = Vec::with_capacity(2);
        if let Some(low) = self.low {
            peers.push(low);
        }
        if let Some(high) = self.high {
            if !peers.iter().any(|p| p.id == high.id) {
                peers.push(high);
            }
        }
        peers
    }
}
