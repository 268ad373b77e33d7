//! Master (routing tier)
//!
//! Tracks shard primaries from coordination membership and redirects
//! keyed requests to them. Also hosts the coordination service.

pub mod http;
pub mod routing;
pub mod server;

pub use routing::{plan_clones, select_primaries, Candidate, Router, RouterStatus, RoutingTable};
pub use server::MasterServer;
