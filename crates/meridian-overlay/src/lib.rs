//! meridian-overlay — the membership protocol itself: leaf sets, the join
//! coordinator, and the registration client.
//!
//! Everything here is pure protocol state. Handlers take a decoded event and
//! return directives describing what to send where; the daemon owns the
//! sockets and performs the IO. All mutation happens in the daemon's single
//! event-loop task, so none of these types need internal locking.

mod join;
mod leafset;
mod registration;

pub use join::{Directive, JoinCoordinator};
pub use leafset::LeafSet;
pub use registration::{AckOutcome, RegistrationClient, RegistrationError};
