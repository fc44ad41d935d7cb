//! GossipSub publish helpers with retry.
//!
//! Publishing to a topic whose mesh has not formed yet fails with
//! "insufficient peers". That is a transient condition right after
//! subscribing, so callers that need reliable delivery use
//! [`publish_with_retry`], which backs off exponentially while the mesh
//! settles.

use std::time::Duration;

use libp2p::gossipsub::PublishError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use relaypad_shared::constants::{
    PUBLISH_RETRY_ATTEMPTS, PUBLISH_RETRY_BASE_MS, PUBLISH_RETRY_GROWTH,
};

use crate::swarm::SwarmCommand;

/// Why a publish failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PublishFault {
    /// No peers in the topic mesh yet; retryable.
    #[error("no peers subscribed to topic")]
    NoPeers,
    /// Anything else (oversized message, duplicate, swarm gone).
    #[error("{0}")]
    Other(String),
}

impl From<PublishError> for PublishFault {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::InsufficientPeers => PublishFault::NoPeers,
            other => PublishFault::Other(other.to_string()),
        }
    }
}

/// Publish a single message, no retries.
pub async fn publish_once(
    cmd_tx: &mpsc::Sender<SwarmCommand>,
    topic: &str,
    data: Vec<u8>,
) -> Result<(), PublishFault> {
    let (reply_tx, reply_rx) = oneshot::channel();
    cmd_tx
        .send(SwarmCommand::Publish {
            topic: topic.to_string(),
            data,
            reply: reply_tx,
        })
        .await
        .map_err(|_| PublishFault::Other("swarm task gone".into()))?;
    reply_rx
        .await
        .map_err(|_| PublishFault::Other("swarm task gone".into()))?
}

/// Publish with exponential backoff while the topic mesh forms.
///
/// Retries only the no-peers case; other faults are returned immediately.
pub async fn publish_with_retry(
    cmd_tx: &mpsc::Sender<SwarmCommand>,
    topic: &str,
    data: Vec<u8>,
) -> Result<(), PublishFault> {
    let mut delay = Duration::from_millis(PUBLISH_RETRY_BASE_MS);

    for attempt in 1..=PUBLISH_RETRY_ATTEMPTS {
        match publish_once(cmd_tx, topic, data.clone()).await {
            Ok(()) => {
                if attempt > 1 {
                    info!(topic = %topic, attempt, "Message sent on retry");
                }
                return Ok(());
            }
            Err(PublishFault::NoPeers) if attempt < PUBLISH_RETRY_ATTEMPTS => {
                debug!(
                    topic = %topic,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "No mesh peers yet, retrying publish"
                );
                tokio::time::sleep(delay).await;
                delay *= PUBLISH_RETRY_GROWTH;
            }
            Err(fault) => {
                warn!(topic = %topic, attempt, fault = %fault, "Publish failed");
                return Err(fault);
            }
        }
    }

    Err(PublishFault::NoPeers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_from_publish_error() {
        let fault = PublishFault::from(PublishError::InsufficientPeers);
        assert!(matches!(fault, PublishFault::NoPeers));

        let fault = PublishFault::from(PublishError::MessageTooLarge);
        assert!(matches!(fault, PublishFault::Other(_)));
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<SwarmCommand>(16);

        // Always answer with the retryable fault.
        tokio::spawn(async move {
            while let Some(SwarmCommand::Publish { reply, .. }) = cmd_rx.recv().await {
                let _ = reply.send(Err(PublishFault::NoPeers));
            }
        });

        tokio::time::pause();
        let handle = tokio::spawn(async move {
            publish_with_retry(&cmd_tx, "test-topic", b"hello".to_vec()).await
        });
        // Advance past the full backoff schedule.
        for _ in 0..PUBLISH_RETRY_ATTEMPTS {
            tokio::time::advance(Duration::from_secs(30)).await;
            tokio::task::yield_now().await;
        }
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(PublishFault::NoPeers)));
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_second_attempt() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<SwarmCommand>(16);

        tokio::spawn(async move {
            let mut first = true;
            while let Some(SwarmCommand::Publish { reply, .. }) = cmd_rx.recv().await {
                if first {
                    first = false;
                    let _ = reply.send(Err(PublishFault::NoPeers));
                } else {
                    let _ = reply.send(Ok(()));
                }
            }
        });

        tokio::time::pause();
        let handle = tokio::spawn(async move {
            publish_with_retry(&cmd_tx, "test-topic", b"hello".to_vec()).await
        });
        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        let result = handle.await.unwrap();
        assert!(result.is_ok());
    }
}
