//! Message tracker
//!
//! Answers "has this cross-chain message landed, and can I prove it yet?" for
//! both directions:
//! - L1 to L2 messages (bridge deposits, portal confirmations) by message key
//! - L2 to L1 messages (intents) by content and emitting L2 block
//!
//! A message is ready once its inclusion block is at or below the current L2
//! block and the node hands back a membership witness. Anything short of that
//! is reported as not ready rather than as an error.

use crate::chain::{InclusionWitness, MessageSource};
use crate::error::{BridgeError, BridgeResult};
use crate::field::Fr;
use crate::retry::{with_backoff, RetryPolicy};

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Claimability of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Readiness {
    Ready {
        /// L2 block the witness was taken at
        block: u64,
        included_at: u64,
        witness: InclusionWitness,
    },
    NotReady {
        /// Inclusion block if the message is already in the tree
        included_at: Option<u64>,
    },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }
}

/// Polls a [`MessageSource`] for message inclusion and witnesses
pub struct MessageTracker<S: ?Sized + MessageSource> {
    source: Arc<S>,
    poll_interval: Duration,
    retry: RetryPolicy,
}

impl<S: ?Sized + MessageSource> Clone for MessageTracker<S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            poll_interval: self.poll_interval,
            retry: self.retry,
        }
    }
}

impl<S: ?Sized + MessageSource> MessageTracker<S> {
    pub fn new(source: Arc<S>, poll_interval: Duration, retry: RetryPolicy) -> Self {
        Self {
            source,
            poll_interval,
            retry,
        }
    }

    /// L2 block at which the message entered the tree, if it has
    pub async fn is_message_included(&self, message_key: &Fr) -> BridgeResult<Option<u64>> {
        with_backoff(&self.retry, "message inclusion", || {
            self.source.is_message_included(message_key)
        })
        .await
    }

    /// Witness as of `at_block`; `None` while `at_block` precedes inclusion
    pub async fn get_inclusion_witness(
        &self,
        at_block: u64,
        message_key: &Fr,
    ) -> BridgeResult<Option<InclusionWitness>> {
        match self.is_message_included(message_key).await? {
            Some(included) if included <= at_block => {
                with_backoff(&self.retry, "inclusion witness", || {
                    self.source.get_inclusion_witness(at_block, message_key)
                })
                .await
            }
            Some(included) => {
                debug!(
                    "Message {} included at {}, witness requested for {}",
                    message_key, included, at_block
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Current readiness; witness fetch failures count as not ready
    pub async fn readiness(&self, message_key: &Fr) -> BridgeResult<Readiness> {
        let Some(included) = self.is_message_included(message_key).await? else {
            return Ok(Readiness::NotReady { included_at: None });
        };

        let current = with_backoff(&self.retry, "l2 block number", || {
            self.source.get_block_number()
        })
        .await?;
        if included > current {
            return Ok(Readiness::NotReady {
                included_at: Some(included),
            });
        }

        match self.source.get_inclusion_witness(current, message_key).await {
            Ok(Some(witness)) => Ok(Readiness::Ready {
                block: current,
                included_at: included,
                witness,
            }),
            Ok(None) => Ok(Readiness::NotReady {
                included_at: Some(included),
            }),
            Err(e @ (BridgeError::Network(_) | BridgeError::WitnessUnavailable { .. })) => {
                warn!("Witness for {} not available yet: {}", message_key, e);
                Ok(Readiness::NotReady {
                    included_at: Some(included),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Poll until the message is ready or `ceiling` elapses
    pub async fn wait_until_ready(
        &self,
        message_key: &Fr,
        ceiling: Duration,
    ) -> BridgeResult<(u64, InclusionWitness)> {
        let started = Instant::now();

        loop {
            match self.readiness(message_key).await {
                Ok(Readiness::Ready { block, witness, .. }) => return Ok((block, witness)),
                Ok(Readiness::NotReady { included_at }) => {
                    debug!("Message {} not ready (included at {:?})", message_key, included_at);
                }
                Err(e) if e.is_retryable() => {
                    warn!("Readiness check for {} failed: {}", message_key, e);
                }
                Err(e) => return Err(e),
            }

            if started.elapsed() >= ceiling {
                return Err(BridgeError::Timeout {
                    operation: format!("message {}", message_key),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Poll for the outbox witness of an L2 to L1 message emitted in `l2_block`
    pub async fn wait_for_outbox_witness(
        &self,
        l2_block: u64,
        message: &Fr,
        ceiling: Duration,
    ) -> BridgeResult<InclusionWitness> {
        let started = Instant::now();

        loop {
            match self.source.get_outbox_witness(l2_block, message).await {
                Ok(Some(witness)) => return Ok(witness),
                Ok(None) => debug!("Outbox witness for {} not yet available", message),
                Err(e) if e.is_retryable() || e.is_pending() => {
                    warn!("Outbox witness for {} failed: {}", message, e);
                }
                Err(e) => return Err(e),
            }

            if started.elapsed() >= ceiling {
                return Err(BridgeError::Timeout {
                    operation: format!("outbox witness for {}", message),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
