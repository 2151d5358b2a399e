//! # minireshard
//!
//! An online resharding coordinator. It moves a live sharded collection onto
//! a new shard key by driving donor and recipient shards through a durable,
//! resumable sequence of phases:
//! - One operation record per collection, persisted in RocksDB
//! - At most one running instance per collection; duplicates attach
//! - Resumes after restart or failover from the persisted phase
//! - Fencing sequence numbers make participant instructions idempotent
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │           Coordinator                    │
//! │  registry ─ state machine ─ phase table  │
//! │  RocksDB: operations, collections, shards│
//! └───────────┬──────────────────────────────┘
//!             │ HTTP (instructions + status polls)
//!   ┌─────────┴──────────┬──────────────┐
//!   │                    │              │
//! ┌─▼──────────┐   ┌─────▼──────┐   ┌───▼──────────┐
//! │ Shard 1    │   │ Shard 2    │   │ Shard 3      │
//! │ (donor)    │   │ (donor +   │   │ (recipient)  │
//! │            │   │ recipient) │   │              │
//! └────────────┘   └────────────┘   └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a coordinator
//! ```bash
//! minireshard-coord serve --id coord-1 --bind 0.0.0.0:5000 --db ./coord-data \
//!   --shard shard-1=http://localhost:6001 --shard shard-2=http://localhost:6002
//! ```
//!
//! ### Start shard participants
//! ```bash
//! minireshard-shard serve --id shard-1 --bind 0.0.0.0:6001
//! ```
//!
//! ### Use the CLI
//! ```bash
//! minireshard collection shop.orders --key '{"_id": 1}' --shards shard-1
//! minireshard reshard shop.orders --key '{"customer": 1}'
//! minireshard list
//! minireshard show <operation-id>
//! minireshard forget <operation-id>
//! ```

pub mod common;
pub mod coordinator;
pub mod ops;
pub mod reshard;
pub mod shard;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::Coordinator;
pub use reshard::{ReshardCollectionRequest, ReshardService, ReshardingResult};
pub use shard::ShardServer;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
