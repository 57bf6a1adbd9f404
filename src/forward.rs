//! Sequential, rate-limited forwarding with a checkpoint after every success

use std::path::Path;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::backend::ForwardService;
use crate::chat::{retry_rate_limited, ChatPair};
use crate::checkpoint::CheckpointStore;
use crate::config::TRANSIENT_ERROR_PAUSE;
use crate::error::{Error, Result};
use crate::metrics::{self, ForwardOutcome};

/// Counts reported at the end of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardReport {
    pub total: usize,
    pub forwarded: usize,
    pub failed: usize,
}

/// Everything the forwarder needs besides the ids.
pub struct Forwarder<'a, F> {
    service: &'a F,
    store: &'a CheckpointStore,
    pair: &'a ChatPair,
    checkpoint: &'a Path,
    delay: Duration,
}

impl<'a, F: ForwardService> Forwarder<'a, F> {
    pub fn new(
        service: &'a F,
        store: &'a CheckpointStore,
        pair: &'a ChatPair,
        checkpoint: &'a Path,
        delay: Duration,
    ) -> Self {
        Self {
            service,
            store,
            pair,
            checkpoint,
            delay,
        }
    }

    /// Forward `ids` in order.
    ///
    /// A deleted message or a transient error only costs that one message.
    /// The batch is aborted when a chat is unreachable, before the first
    /// message or during the batch, or when the checkpoint cannot be saved.
    pub async fn run(&self, ids: &[i32]) -> Result<ForwardReport> {
        let mut report = ForwardReport {
            total: ids.len(),
            ..ForwardReport::default()
        };

        retry_rate_limited("prepare forwarding", || {
            self.service.prepare(&self.pair.source, &self.pair.destination)
        })
        .await?;

        for (index, &message_id) in ids.iter().enumerate() {
            println!("Forwarding: {}/{}", index + 1, ids.len());

            match self.forward_with_backoff(message_id).await {
                Ok(()) => {
                    self.store.save(self.checkpoint, message_id)?;
                    report.forwarded += 1;
                    metrics::record_forward(ForwardOutcome::Forwarded);
                    if index + 1 < ids.len() {
                        sleep(self.delay).await;
                    }
                }
                Err(e @ Error::ChatNotFound { .. }) => {
                    metrics::record_forward(ForwardOutcome::Failed);
                    return Err(e);
                }
                Err(Error::MessageGone(reason)) => {
                    debug!(message_id, %reason, "Message no longer exists, skipping");
                    report.failed += 1;
                    metrics::record_forward(ForwardOutcome::Gone);
                }
                Err(e) => {
                    warn!(message_id, "Failed to forward message: {}", e);
                    report.failed += 1;
                    metrics::record_forward(ForwardOutcome::Failed);
                    sleep(TRANSIENT_ERROR_PAUSE).await;
                }
            }
        }

        info!(
            total = report.total,
            forwarded = report.forwarded,
            failed = report.failed,
            "Batch finished"
        );
        Ok(report)
    }

    /// Attempt one message, waiting out rate limits for as long as the
    /// server keeps asking.
    async fn forward_with_backoff(&self, message_id: i32) -> Result<()> {
        loop {
            match self
                .service
                .forward(&self.pair.source, &self.pair.destination, message_id)
                .await
            {
                Err(Error::RateLimited { seconds }) => {
                    warn!(message_id, seconds, "Rate limited, waiting before retrying");
                    metrics::record_rate_limit(seconds);
                    sleep(Duration::from_secs(u64::from(seconds))).await;
                }
                other => return other,
            }
        }
    }
}
