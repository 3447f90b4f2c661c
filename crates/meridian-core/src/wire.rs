//! Meridian wire format — the events nodes and the discovery service
//! exchange, and the frame codec that carries them.
//!
//! Events form a closed sum type; receivers dispatch with an exhaustive
//! match and log-and-ignore variants they do not expect. On the wire each
//! event is one frame: a u32 big-endian length prefix followed by the JSON
//! encoding of the event.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::id::NodeId;

// ── Route traces ──────────────────────────────────────────────────────────────

/// One node's identity on the wire: identifier plus advertised listen
/// address. Used both as a route-trace hop and as a reported leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRef {
    pub id: NodeId,
    pub addr: SocketAddr,
}

/// Ordered record of every node a join request passed through.
///
/// Grows by exactly one entry per hop and never shrinks. Read-only once the
/// join completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteTrace(Vec<PeerRef>);

impl RouteTrace {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a hop. The only mutation a trace ever sees.
    pub fn push(&mut self, hop: PeerRef) {
        self.0.push(hop);
    }

    /// Has a node at this address already forwarded the request?
    pub fn visited(&self, addr: SocketAddr) -> bool {
        self.0.iter().any(|h| h.addr == addr)
    }

    pub fn hops(&self) -> &[PeerRef] {
        &self.0
    }

    pub fn last(&self) -> Option<&PeerRef> {
        self.0.last()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for RouteTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for hop in &self.0 {
            if !first {
                write!(f, " -> ")?;
            }
            write!(f, "{}", hop.id)?;
            first = false;
        }
        Ok(())
    }
}

// ── Events ────────────────────────────────────────────────────────────────────

/// Everything that can arrive over a meridian connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Claim an identifier with the discovery service.
    Register {
        /// Address other peers can connect to the registrant on.
        listen_addr: SocketAddr,
        id: NodeId,
    },

    /// The discovery service's verdict on a Register.
    RegisterAck {
        /// False means the identifier is already held by a live member.
        success: bool,
        /// Echo of the requested identifier.
        id: NodeId,
        /// An existing member to join through. Absent when the registrant
        /// is the first member of the overlay.
        bootstrap: Option<SocketAddr>,
    },

    /// Locate the joining node's position in the identifier space.
    /// Forwarded hop by hop; every forwarding node appends itself to the
    /// trace.
    JoinRequest {
        /// The joining node's listen address — where the answer goes.
        origin: SocketAddr,
        /// The joining node's identifier.
        target: NodeId,
        trace: RouteTrace,
    },

    /// The terminating node's answer: the joiner's leaf set and the full
    /// route the request took. Both leaves absent means the responder was
    /// alone and the joiner should form a two-node overlay with it.
    JoinResponse {
        responder: NodeId,
        low: Option<PeerRef>,
        high: Option<PeerRef>,
        trace: RouteTrace,
    },
}

// ── Frame codec ───────────────────────────────────────────────────────────────

/// Maximum frame payload size. A join response for any plausible overlay is
/// far below this; anything larger is a corrupt or hostile frame.
pub const MAX_FRAME: usize = 64 * 1024;

/// Length of the frame header (u32 big-endian payload length).
pub const FRAME_HEADER: usize = 4;

/// Encode an event as one frame: length prefix plus JSON payload.
pub fn encode(event: &Event) -> Result<Vec<u8>, WireError> {
    let payload = serde_json::to_vec(event).map_err(WireError::Encode)?;
    if payload.len() > MAX_FRAME {
        return Err(WireError::FrameTooLarge(payload.len()));
    }
    let mut frame = Vec::with_capacity(FRAME_HEADER + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode one frame payload (the bytes after the length prefix).
pub fn decode(payload: &[u8]) -> Result<Event, WireError> {
    serde_json::from_slice(payload).map_err(WireError::Decode)
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("frame payload {0} bytes exceeds maximum {MAX_FRAME}")]
    FrameTooLarge(usize),
    #[error("event encode failed: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("event decode failed: {0}")]
    Decode(#[source] serde_json::Error),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
