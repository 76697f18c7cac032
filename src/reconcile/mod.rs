//! Bridge reconciliation
//!
//! Rebuilds the set of claimable token bridges from chain data alone: deposit
//! events on the L1 token portal are joined against locally held secrets, and
//! each match is classified by asking the L2 node whether its message can be
//! proven yet. Nothing here writes to the store or either chain.

use crate::chain::{L1Client, MessageSource};
use crate::commitment::CommitmentEngine;
use crate::error::BridgeResult;
use crate::events::{self, topics, BridgeDeposit, PortalEvent};
use crate::field::Fr;
use crate::retry::{with_backoff, RetryPolicy};
use crate::store::{SecretKind, SecretRecord, SecretStore};
use crate::tracker::{MessageTracker, Readiness};

use ethers::types::{Address, H256};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeStatus {
    /// Message not yet provable on L2
    Pending,
    /// Claimable now
    Ready,
    /// The L2 node could not be asked
    Unknown,
}

impl BridgeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeStatus::Pending => "pending",
            BridgeStatus::Ready => "ready",
            BridgeStatus::Unknown => "unknown",
        }
    }
}

/// A bridge deposit joined with the secret that can claim it
#[derive(Debug, Clone)]
pub struct PendingBridge {
    pub deposit: BridgeDeposit,
    pub record: SecretRecord,
    pub status: BridgeStatus,
    /// L2 block at which the message entered the tree
    pub included_at: Option<u64>,
}

impl PendingBridge {
    pub fn message_key(&self) -> Fr {
        self.deposit.message_key
    }

    pub fn summary(&self) -> BridgeSummary {
        BridgeSummary {
            message_key: self.deposit.message_key,
            message_index: self.deposit.message_index,
            amount: self.deposit.amount.to_string(),
            kind: self.record.kind,
            intent_id: self.record.intent_id(),
            status: self.status,
            source_tx_hash: self.deposit.source_tx_hash,
            source_block_number: self.deposit.source_block_number,
            included_at: self.included_at,
        }
    }
}

/// Secret-free view of a pending bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeSummary {
    pub message_key: Fr,
    pub message_index: u64,
    pub amount: String,
    pub kind: SecretKind,
    pub intent_id: Option<Fr>,
    pub status: BridgeStatus,
    pub source_tx_hash: H256,
    pub source_block_number: u64,
    pub included_at: Option<u64>,
}

/// Outcome of one scan
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub bridges: Vec<PendingBridge>,
    /// Bridge deposit events seen
    pub total_events: usize,
    /// Events that matched a held secret
    pub matched_events: usize,
    pub from_block: u64,
    pub to_block: u64,
}

impl ScanResult {
    pub fn count(&self, status: BridgeStatus) -> usize {
        self.bridges.iter().filter(|b| b.status == status).count()
    }

    pub fn ready(&self) -> impl Iterator<Item = &PendingBridge> {
        self.bridges
            .iter()
            .filter(|b| b.status == BridgeStatus::Ready)
    }
}

/// Joins token portal deposits against held secrets
pub struct BridgeScanner<S: ?Sized + MessageSource> {
    l1: Arc<dyn L1Client>,
    tracker: MessageTracker<S>,
    token_portal: Address,
    engine: CommitmentEngine,
    retry: RetryPolicy,
    /// First L1 block the next incremental scan reads
    checkpoint: AtomicU64,
}

impl<S: ?Sized + MessageSource> BridgeScanner<S> {
    pub fn new(
        l1: Arc<dyn L1Client>,
        tracker: MessageTracker<S>,
        token_portal: Address,
        engine: CommitmentEngine,
        retry: RetryPolicy,
        start_block: u64,
    ) -> Self {
        Self {
            l1,
            tracker,
            token_portal,
            engine,
            retry,
            checkpoint: AtomicU64::new(start_block),
        }
    }

    pub fn checkpoint(&self) -> u64 {
        self.checkpoint.load(Ordering::Relaxed)
    }

    pub fn set_checkpoint(&self, block: u64) {
        self.checkpoint.store(block, Ordering::Relaxed);
    }

    /// Scan from the checkpoint, then move it to the oldest block still holding a match
    pub async fn scan_incremental(
        &self,
        store: &dyn SecretStore,
        owner: &Fr,
    ) -> BridgeResult<ScanResult> {
        let result = self.scan(store, owner, self.checkpoint()).await?;

        let next = result
            .bridges
            .iter()
            .map(|b| b.deposit.source_block_number)
            .min()
            .unwrap_or(result.to_block.saturating_add(1))
            .max(result.from_block);
        self.set_checkpoint(next);
        Ok(result)
    }

    /// Full scan from `from_block` to the latest L1 block
    pub async fn scan(
        &self,
        store: &dyn SecretStore,
        owner: &Fr,
        from_block: u64,
    ) -> BridgeResult<ScanResult> {
        let latest = with_backoff(&self.retry, "l1 block number", || {
            self.l1.get_block_number()
        })
        .await?;

        if from_block > latest {
            return Ok(ScanResult {
                from_block,
                to_block: latest,
                ..Default::default()
            });
        }

        let logs = with_backoff(&self.retry, "bridge deposit logs", || {
            self.l1
                .query_events(self.token_portal, *topics::DEPOSIT_TO_L2_PRIVATE, from_block)
        })
        .await?;

        let deposits: Vec<BridgeDeposit> = logs
            .iter()
            .filter_map(|log| match events::parse_log(log) {
                Ok(PortalEvent::BridgeDeposit(deposit)) => Some(deposit),
                Ok(_) => None,
                Err(e) => {
                    warn!("Skipping undecodable bridge log {:?}: {}", log.transaction_hash, e);
                    None
                }
            })
            .collect();

        let records = store.list_all(owner).await?;
        let matches = self.match_deposits(&deposits, records);
        let matched_events = matches.len();

        let bridges = join_all(matches.into_iter().map(|(deposit, record)| async move {
            let (status, included_at) = match self.tracker.readiness(&deposit.message_key).await {
                Ok(Readiness::Ready { included_at, .. }) => (BridgeStatus::Ready, Some(included_at)),
                Ok(Readiness::NotReady { included_at }) => (BridgeStatus::Pending, included_at),
                Err(e) => {
                    warn!(
                        "Could not classify bridge {}: {}",
                        deposit.message_key, e
                    );
                    (BridgeStatus::Unknown, None)
                }
            };
            PendingBridge {
                deposit,
                record,
                status,
                included_at,
            }
        }))
        .await;

        info!(
            "Scanned blocks {}..={}: {} bridge events, {} matched",
            from_block,
            latest,
            deposits.len(),
            matched_events
        );

        Ok(ScanResult {
            bridges,
            total_events: deposits.len(),
            matched_events,
            from_block,
            to_block: latest,
        })
    }

    /// Pair deposits with records whose secret verifies against the event
    fn match_deposits(
        &self,
        deposits: &[BridgeDeposit],
        records: Vec<SecretRecord>,
    ) -> Vec<(BridgeDeposit, SecretRecord)> {
        let mut by_key: HashMap<String, SecretRecord> = HashMap::new();
        let mut by_hash: HashMap<String, Vec<SecretRecord>> = HashMap::new();

        for record in records {
            // deposit confirmations are consumed by finalize_deposit, never claimed
            if record.kind == SecretKind::Deposit {
                continue;
            }
            match record.message_key_normalized() {
                Some(key) => {
                    if let Some(first) = by_key.get(&key) {
                        warn!(
                            "Secrets {} and {} both claim message {}, keeping the first",
                            first.key, record.key, key
                        );
                        continue;
                    }
                    by_key.insert(key, record);
                }
                None => by_hash
                    .entry(record.secret_hash.to_key())
                    .or_default()
                    .push(record),
            }
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut used_records: HashSet<String> = HashSet::new();
        let mut matches = Vec::new();

        for deposit in deposits {
            let key = deposit.message_key.to_key();
            if !seen.insert(key.clone()) {
                warn!("Duplicate bridge event for message {}", deposit.message_key);
                continue;
            }

            let candidate = match by_key.get(&key) {
                Some(record) => Some(record),
                None => by_hash
                    .get(&deposit.secret_hash.to_key())
                    .and_then(|records| records.iter().find(|r| !used_records.contains(&r.key))),
            };

            let Some(record) = candidate else {
                continue;
            };

            if !self.engine.verify(&record.secret, &deposit.secret_hash) {
                warn!(
                    "Secret {} is keyed to message {} but does not open its hash",
                    record.key, deposit.message_key
                );
                continue;
            }

            debug!("Matched message {} to secret {}", deposit.message_key, record.key);
            used_records.insert(record.key.clone());
            matches.push((deposit.clone(), record.clone()));
        }

        matches
    }
}
