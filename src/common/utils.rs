//! Utility functions for minireshard

use crate::common::RetryPolicy;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Percent-encoding set for path segments (namespaces contain dots, keep them readable)
const SEGMENT_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'%')
    .add(b' ')
    .add(b'?')
    .add(b'#')
    .add(b'&');

/// Encode a value for use as a URL path segment
pub fn encode_segment(value: &str) -> String {
    utf8_percent_encode(value, SEGMENT_ENCODE_SET).to_string()
}

/// Get current Unix timestamp (milliseconds)
pub fn timestamp_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Resolves on Ctrl-C; used for graceful server shutdown
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Shard health state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Alive,
    Suspect,
    Dead,
    Draining,
}

impl NodeState {
    /// Can this shard take on new data (become a recipient)?
    pub fn can_write(&self) -> bool {
        matches!(self, NodeState::Alive)
    }

    /// Can this shard still serve its data (act as a donor)?
    pub fn can_read(&self) -> bool {
        matches!(self, NodeState::Alive | NodeState::Draining)
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Alive => write!(f, "alive"),
            NodeState::Suspect => write!(f, "suspect"),
            NodeState::Dead => write!(f, "dead"),
            NodeState::Draining => write!(f, "draining"),
        }
    }
}

/// Retry with exponential backoff, bounded by the policy.
///
/// Each attempt is cut off after `call_timeout`. Non-retryable errors are
/// returned immediately; the last retryable error is returned once the
/// attempt budget is spent.
pub async fn retry_with_backoff<F, Fut, T>(f: F, policy: &RetryPolicy) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = crate::Result<T>>,
{
    retry_with_backoff_when(f, policy, crate::Error::is_retryable).await
}

/// Like [`retry_with_backoff`], with the caller deciding which errors are
/// worth another attempt.
pub async fn retry_with_backoff_when<F, Fut, T>(
    mut f: F,
    policy: &RetryPolicy,
    retryable: impl Fn(&crate::Error) -> bool,
) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = crate::Result<T>>,
{
    let mut delay = policy.initial_backoff();
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 0..max_attempts {
        let outcome = match tokio::time::timeout(policy.call_timeout(), f()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(crate::Error::Timeout(format!(
                "call exceeded {:?}",
                policy.call_timeout()
            ))),
        };

        match outcome {
            Ok(result) => return Ok(result),
            Err(e) if retryable(&e) && attempt + 1 < max_attempts => {
                tracing::warn!(
                    "Retry attempt {} failed: {}, retrying in {:?}",
                    attempt + 1,
                    e,
                    delay
                );
                crate::common::metrics::METRICS.participant_retries.inc();
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(policy.max_backoff());
            }
            Err(e) => return Err(e),
        }
    }

    Err(crate::Error::Internal("Max retries exceeded".into()))
}
