//! Coordinator process
//!
//! The coordinator is responsible for:
//! - Durable metadata (operation records, collection routing, shard registry)
//! - Tracking whether this node holds the metadata authority
//! - Talking to shard participants over HTTP
//! - Serving the reshard command and admin endpoints

pub mod authority;
pub mod http;
pub mod metadata;
pub mod server;
pub mod shard_client;

pub use authority::{Authority, AuthorityRole};
pub use metadata::MetadataStore;
pub use server::Coordinator;
pub use shard_client::HttpParticipantClient;
