//! Identifier space model.
//!
//! Node identifiers are 16-bit values rendered as four hex digits. Ordering
//! is plain integer ordering and distance is the absolute difference — no
//! modular ring metric. Uniqueness among live members is enforced by the
//! discovery service, not here.

use serde::{Deserialize, Serialize};

/// A node's position in the identifier space.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u16);

impl NodeId {
    /// Numeric distance to another identifier.
    pub fn distance(self, other: NodeId) -> u16 {
        self.0.abs_diff(other.0)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl std::str::FromStr for NodeId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > 4 {
            return Err(ParseIdError::BadLength(s.len()));
        }
        u16::from_str_radix(s, 16)
            .map(NodeId)
            .map_err(|_| ParseIdError::BadDigit(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseIdError {
    #[error("identifier must be 1-4 hex digits, got {0} characters")]
    BadLength(usize),
    #[error("identifier contains a non-hex digit: {0:?}")]
    BadDigit(String),
}

/// Generate an identifier from the current time: the low 16 bits of
/// unix-epoch milliseconds.
pub fn generate() -> NodeId {
    NodeId(unix_millis() as u16)
}

/// Generate a fresh identifier after a collision. Mixes a random salt into
/// the low byte so back-to-back retries within one millisecond still differ.
pub fn regenerate() -> NodeId {
    NodeId(unix_millis() as u16 ^ rand::random::<u8>() as u16)
}

/// Ring neighbors of `of` among `candidates`: the nearest identifier below
/// (wrapping to the largest when none is below) and the nearest above
/// (wrapping to the smallest). Candidates equal to `of` are ignored.
/// Returns `None` when no other candidate exists.
pub fn ring_neighbors(of: NodeId, candidates: &[NodeId]) -> Option<(NodeId, NodeId)> {
    let others: Vec<NodeId> = candidates.iter().copied().filter(|c| *c != of).collect();
    let largest = others.iter().copied().max()?;
    let smallest = others.iter().copied().min()?;

    let below = others.iter().copied().filter(|c| *c < of).max();
    let above = others.iter().copied().filter(|c| *c > of).min();

    Some((below.unwrap_or(largest), above.unwrap_or(smallest)))
}

fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}
