//! meridiand — the meridian peer node daemon.
//!
//! The binary lives in `main.rs`; everything else is a library so the
//! integration tests can run full nodes in-process over loopback TCP.

pub mod node;
pub mod registry;
pub mod transport;
