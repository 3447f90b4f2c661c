//! meridian-core — identifier space model, wire events, and configuration.
//! All other meridian crates depend on this one.

pub mod config;
pub mod id;
pub mod wire;

pub use id::NodeId;
pub use wire::{Event, PeerRef, RouteTrace};
