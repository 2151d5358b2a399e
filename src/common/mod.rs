//! Common utilities and types shared across minireshard

pub mod config;
pub mod error;
pub mod hash;
pub mod metrics;
pub mod tracing_middleware;
pub mod utils;

pub use config::{Config, CoordinatorConfig, RetryPolicy, ShardConfig, ShardEndpoint};
pub use error::{Error, FailureCode, OperationFailure, Result};
pub use hash::{hrw_hash, select_nodes};
pub use metrics::METRICS;
pub use utils::{
    encode_segment, retry_with_backoff, retry_with_backoff_when, shutdown_signal,
    timestamp_now_millis, NodeState,
};
