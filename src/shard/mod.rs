//! Reference shard participant
//!
//! Fenced instruction handling with simulated data movement, reachable
//! in-process or over HTTP.

pub mod agent;
pub mod http;
pub mod local;
pub mod server;

pub use agent::{Pacing, ShardAgent};
pub use local::LocalParticipants;
pub use server::ShardServer;
