//! Join coordinator — drives outbound joins, answers or forwards inbound
//! join requests, and installs returned leaf sets.

use std::net::SocketAddr;

use meridian_core::{Event, NodeId, PeerRef, RouteTrace};

use crate::leafset::LeafSet;

/// An event the daemon must deliver to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub to: SocketAddr,
    pub event: Event,
}

/// Per-node join protocol state. Owned by the daemon's event loop; every
/// method runs under that loop's serialization.
#[derive(Debug)]
pub struct JoinCoordinator {
    /// The local node's identifier and advertised listen address.
    local: PeerRef,
    leaves: LeafSet,
}

impl JoinCoordinator {
    pub fn new(local: PeerRef) -> Self {
        Self {
            local,
            leaves: LeafSet::new(),
        }
    }

    pub fn local(&self) -> PeerRef {
        self.local
    }

    pub fn leaves(&self) -> &LeafSet {
        &self.leaves
    }

    /// Build the initial join request. `None` when no bootstrap peer was
    /// named — the first node of an overlay simply waits for joins.
    pub fn initiate_join(&self, bootstrap: Option<SocketAddr>) -> Option<Directive> {
        let to = bootstrap?;
        Some(Directive {
            to,
            event: Event::JoinRequest {
                origin: self.local.addr,
                target: self.local.id,
                trace: RouteTrace::new(),
            },
        })
    }

    /// Handle an inbound join request.
    ///
    /// This node's hop is recorded first — the terminating node is part of
    /// the final trace. If the leaf set makes this node responsible it
    /// answers the joiner directly and admits it into its own leaf set;
    /// otherwise the request is forwarded toward the known peer numerically
    /// closest to the target, skipping peers already in the trace. Returns
    /// `None` when the request must be dropped.
    pub fn on_join_request(
        &mut self,
        origin: SocketAddr,
        target: NodeId,
        mut trace: RouteTrace,
    ) -> Option<Directive> {
        trace.push(self.local);

        tracing::info!(
            target = %target,
            hops = trace.len(),
            "processing join request"
        );

        if self.leaves.is_responsible_for_join() {
            let joiner = PeerRef { id: target, addr: origin };
            let (low, high) = self.neighbors_for(joiner);
            self.leaves.admit(self.local.id, joiner);

            return Some(Directive {
                to: origin,
                event: Event::JoinResponse {
                    responder: self.local.id,
                    low,
                    high,
                    trace,
                },
            });
        }

        let next = self
            .leaves
            .members()
            .into_iter()
            .filter(|p| !trace.visited(p.addr))
            .min_by_key(|p| p.id.distance(target));

        match next {
            Some(peer) => Some(Directive {
                to: peer.addr,
                event: Event::JoinRequest { origin, target, trace },
            }),
            None => {
                tracing::warn!(
                    target = %target,
                    route = %trace,
                    "no unvisited peer to forward join toward, dropping request"
                );
                None
            }
        }
    }

    /// Handle the join response addressed to this (originating) node.
    ///
    /// Empty leaves mean the responder was alone: install a symmetric leaf
    /// set pointing back at it. Otherwise install the reported pair. Either
    /// way, report the outcome — that is the only user-visible output of a
    /// completed join.
    pub fn on_join_response(
        &mut self,
        responder: NodeId,
        low: Option<PeerRef>,
        high: Option<PeerRef>,
        trace: &RouteTrace,
    ) {
        match (low, high) {
            (None, None) => {
                // The responder appended itself to the trace before
                // answering, so the last hop carries its listen address.
                match trace.last() {
                    Some(hop) => self.leaves.install_bootstrap(*hop),
                    None => {
                        tracing::warn!(
                            responder = %responder,
                            "join response carried neither leaves nor a route, ignoring"
                        );
                        return;
                    }
                }
            }
            (Some(low), Some(high)) => {
                if low.id == self.local.id || high.id == self.local.id {
                    tracing::warn!(
                        responder = %responder,
                        "join response names this node as its own leaf, ignoring"
                    );
                    return;
                }
                self.leaves.install(low, high);
            }
            _ => {
                tracing::warn!(
                    responder = %responder,
                    "join response carried only one leaf, ignoring"
                );
                return;
            }
        }

        tracing::info!(
            low = %self.leaves.low().map(|p| p.id.to_string()).unwrap_or_default(),
            high = %self.leaves.high().map(|p| p.id.to_string()).unwrap_or_default(),
            route = %trace,
            hops = trace.len(),
            "join complete, new leaf set installed"
        );
    }

    /// The joiner's ring neighbors among the members this node knows:
    /// itself plus its current leaves. Empty when this node is alone — the
    /// joiner then bootstraps a two-node overlay with us.
    fn neighbors_for(&self, joiner: PeerRef) -> (Option<PeerRef>, Option<PeerRef>) {
        let mut known = self.leaves.members();
        if known.is_empty() {
            return (None, None);
        }
        known.push(self.local);

        let ids: Vec<NodeId> = known.iter().map(|p| p.id).collect();
        match meridian_core::id::ring_neighbors(joiner.id, &ids) {
            Some((low_id, high_id)) => {
                let find = |want: NodeId| known.iter().copied().find(|p| p.id == want);
                (find(low_id), find(high_id))
            }
            None => (None, None),
        }
    }
}
