//! Registration client — claims an identifier from the discovery service
//! and retries collisions on generated identifiers with bounded backoff.

use std::net::SocketAddr;
use std::time::Duration;

use meridian_core::{id, Event, NodeId};
use rand::Rng;

/// What the node runtime must do after a register ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// Identifier granted. Join through the named bootstrap peer, if any.
    Registered {
        id: NodeId,
        bootstrap: Option<SocketAddr>,
    },
    /// Collision on a generated identifier. Send `request` to the discovery
    /// service again after `delay`.
    Retry { request: Event, delay: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    /// The explicitly requested identifier is held by a live member.
    /// Not retried — a fixed identifier that is taken is an operator error.
    #[error("identifier {0} is already claimed by a live member")]
    IdentifierTaken(NodeId),
    /// Generated identifiers kept colliding.
    #[error("gave up registering after {0} identifier collisions")]
    AttemptsExhausted(u32),
}

/// Drives registration with the discovery service.
#[derive(Debug)]
pub struct RegistrationClient {
    listen_addr: SocketAddr,
    /// Set when the operator pinned an identifier; collisions are then fatal.
    requested: Option<NodeId>,
    current: NodeId,
    collisions: u32,
    max_attempts: u32,
    backoff: Duration,
}

impl RegistrationClient {
    pub fn new(
        listen_addr: SocketAddr,
        fixed: Option<NodeId>,
        max_attempts: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            listen_addr,
            requested: fixed,
            current: fixed.unwrap_or_else(id::generate),
            collisions: 0,
            max_attempts,
            backoff,
        }
    }

    /// The register event for the identifier currently being claimed.
    pub fn request(&self) -> Event {
        Event::Register {
            listen_addr: self.listen_addr,
            id: self.current,
        }
    }

    /// Handle the discovery service's ack.
    pub fn on_ack(
        &mut self,
        success: bool,
        id: NodeId,
        bootstrap: Option<SocketAddr>,
    ) -> Result<AckOutcome, RegistrationError> {
        if success {
            tracing::info!(
                id = %id,
                bootstrap = ?bootstrap,
                "identifier registered"
            );
            return Ok(AckOutcome::Registered { id, bootstrap });
        }

        if self.requested.is_some() {
            return Err(RegistrationError::IdentifierTaken(self.current));
        }

        self.collisions += 1;
        if self.collisions >= self.max_attempts {
            return Err(RegistrationError::AttemptsExhausted(self.collisions));
        }

        self.current = id::regenerate();
        let delay = self.retry_delay();
        tracing::warn!(
            collisions = self.collisions,
            next_id = %self.current,
            delay_ms = delay.as_millis() as u64,
            "identifier collision, retrying registration"
        );
        Ok(AckOutcome::Retry {
            request: self.request(),
            delay,
        })
    }

    /// Exponential backoff with jitter: base * 2^(collisions-1), plus up to
    /// half the base on top so simultaneous joiners desynchronize.
    fn retry_delay(&self) -> Duration {
        let exp = self.collisions.saturating_sub(1).min(16);
        let base = self.backoff.saturating_mul(1u32 << exp);
        let jitter_ceiling = (self.backoff.as_millis() as u64 / 2).max(1);
        let jitter = rand::thread_rng().gen_range(0..jitter_ceiling);
        base + Duration::from_millis(jitter)
    }
}
