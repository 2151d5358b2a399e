//! Completion bridge between a coordinator instance and its callers
//!
//! The instance publishes its terminal outcome once; any number of callers
//! wait on cloned receivers. Waiting holds no lock, it only observes the
//! watch channel.

use crate::common::{FailureCode, OperationFailure};
use crate::reshard::record::ReshardingResult;
use tokio::sync::watch;

pub type Completion = std::result::Result<ReshardingResult, OperationFailure>;

/// Publishing side, owned by the running instance
#[derive(Debug)]
pub struct CompletionSender {
    tx: watch::Sender<Option<Completion>>,
}

/// Waiting side, cloned into every handle
#[derive(Debug, Clone)]
pub struct CompletionReceiver {
    rx: watch::Receiver<Option<Completion>>,
}

pub fn channel() -> (CompletionSender, CompletionReceiver) {
    let (tx, rx) = watch::channel(None);
    (CompletionSender { tx }, CompletionReceiver { rx })
}

impl CompletionSender {
    /// Publish the terminal outcome. Later publishes are ignored.
    pub fn publish(&self, outcome: Completion) {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        });
    }
}

impl CompletionReceiver {
    /// Outcome if already published
    pub fn peek(&self) -> Option<Completion> {
        self.rx.borrow().clone()
    }

    /// Wait for the outcome.
    ///
    /// Resolves with `Interrupted` if the instance went away without
    /// publishing, which is what happens on leadership loss.
    pub async fn wait(&self) -> Completion {
        let mut rx = self.rx.clone();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            Err(OperationFailure::new(
                FailureCode::Interrupted,
                "coordinator instance stopped before completion",
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reshard::types::Namespace;
    use uuid::Uuid;

    fn result() -> ReshardingResult {
        let id = Uuid::new_v4();
        ReshardingResult {
            operation_id: id,
            namespace: Namespace::parse("shop.orders").unwrap(),
            new_collection_uuid: id,
            key_pattern: serde_json::from_value(serde_json::json!({"region": 1})).unwrap(),
            donors: vec!["shard-1".into()],
            recipients: vec!["shard-2".into()],
            documents_copied: 10,
        }
    }

    #[tokio::test]
    async fn test_all_waiters_see_the_same_outcome() {
        let (tx, rx) = channel();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let rx = rx.clone();
                tokio::spawn(async move { rx.wait().await })
            })
            .collect();

        let expected = result();
        tx.publish(Ok(expected.clone()));

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), Ok(expected.clone()));
        }
    }

    #[tokio::test]
    async fn test_outcome_survives_sender_drop() {
        let (tx, rx) = channel();
        tx.publish(Err(OperationFailure::participant("shard-3", "unreachable")));
        drop(tx);

        let outcome = rx.wait().await;
        assert_eq!(outcome.unwrap_err().shard.as_deref(), Some("shard-3"));
    }

    #[tokio::test]
    async fn test_dropped_instance_interrupts_waiters() {
        let (tx, rx) = channel();
        drop(tx);
        let failure = rx.wait().await.unwrap_err();
        assert_eq!(failure.code, FailureCode::Interrupted);
    }

    #[test]
    fn test_first_publish_wins() {
        let (tx, rx) = channel();
        tx.publish(Ok(result()));
        tx.publish(Err(OperationFailure::new(FailureCode::Internal, "late")));
        assert!(rx.peek().unwrap().is_ok());
    }
}
