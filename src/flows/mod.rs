//! Flow orchestration
//!
//! Drives the multi-step lending flows across both chains:
//! - Deposit: L2 request, L1 execution, L2 finalization
//! - Withdraw: L2 request, L1 execution, token claim, L2 finalization
//! - Recovery: cancel an expired deposit, refund an expired withdrawal
//! - Bridge claims found by reconciliation
//!
//! Every step first reads chain state to decide whether it already landed, so a
//! flow can be re-entered at any point after a crash or a dropped future.
//! Message waits are bounded; when a bound elapses the flow reports
//! [`FlowProgress::Pending`] and can be resumed later from the stored secret.

mod claim;
mod deposit;
mod recovery;
mod withdraw;

pub use claim::ClaimOutcome;
pub use deposit::{DepositOutcome, DepositRequest};
pub use recovery::{CancelOutcome, RefundOutcome};
pub use withdraw::{WithdrawOutcome, WithdrawRequest};

use crate::chain::{L1Client, L2Call, L2Client, L2TxReceipt, SigningProvider};
use crate::commitment::{CommitmentEngine, Intent};
use crate::config::Settings;
use crate::contracts::portal::{self, LendingPortal};
use crate::contracts::program::{
    self, IntentState, IntentStatus, L2Token, LendingProgram, Position,
};
use crate::error::{BridgeError, BridgeResult, FlowKind, StepContext};
use crate::events::{self, topics, ExecutionConfirmed, PortalEvent};
use crate::fees::FeeSchedule;
use crate::field::Fr;
use crate::metrics;
use crate::reconcile::BridgeScanner;
use crate::retry::{with_backoff, RetryPolicy};
use crate::store::{SecretRecord, SecretStore};
use crate::tracker::MessageTracker;

use dashmap::DashMap;
use ethers::types::{Address, TransactionReceipt, H256};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Where a flow stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FlowProgress {
    Completed,
    /// Waiting on the other chain; resume later
    Pending { waiting_for: String },
}

impl FlowProgress {
    pub fn pending(waiting_for: impl Into<String>) -> Self {
        FlowProgress::Pending {
            waiting_for: waiting_for.into(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, FlowProgress::Completed)
    }
}

/// Tunables shared by all flows
#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub poll_interval: Duration,
    /// Bound on any single cross-chain message wait
    pub message_wait_ceiling: Duration,
    pub receipt_timeout: Duration,
    /// Longest accepted distance between now and an intent deadline
    pub max_deadline_window: u64,
    pub retry: RetryPolicy,
    pub fees: FeeSchedule,
    /// First L1 block holding bridge events for this client
    pub scan_from_block: u64,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            message_wait_ceiling: Duration::from_secs(600),
            receipt_timeout: Duration::from_secs(120),
            max_deadline_window: 7 * 24 * 3600,
            retry: RetryPolicy::default(),
            fees: FeeSchedule::default(),
            scan_from_block: 0,
        }
    }
}

impl From<&Settings> for FlowSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            poll_interval: settings.client.poll_interval(),
            message_wait_ceiling: settings.client.message_wait_ceiling(),
            receipt_timeout: settings.client.receipt_timeout(),
            max_deadline_window: settings.deadline.max_window_secs,
            retry: RetryPolicy::from(&settings.client),
            fees: FeeSchedule::from(&settings.fees),
            scan_from_block: settings.l1.scan_from_block,
        }
    }
}

/// Contracts the orchestrator talks to
#[derive(Debug, Clone, Copy)]
pub struct ContractAddresses {
    pub lending_portal: Address,
    pub token_portal: Address,
    pub program: Fr,
}

impl ContractAddresses {
    pub fn from_settings(settings: &Settings) -> BridgeResult<Self> {
        Ok(Self {
            lending_portal: settings.lending_portal()?,
            token_portal: settings.token_portal()?,
            program: settings.program_address()?,
        })
    }
}

/// At most one running flow per (owner, intent)
#[derive(Debug, Clone, Default)]
pub struct FlowGuard {
    active: Arc<DashMap<(Fr, Fr), FlowKind>>,
}

impl FlowGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `subject` for `owner`; released when the lease drops
    pub fn acquire(&self, owner: Fr, subject: Fr, kind: FlowKind) -> BridgeResult<FlowLease> {
        use dashmap::mapref::entry::Entry;

        match self.active.entry((owner, subject)) {
            Entry::Occupied(running) => Err(BridgeError::Validation(format!(
                "{} flow already running for {}",
                running.get(),
                subject
            ))),
            Entry::Vacant(slot) => {
                slot.insert(kind);
                Ok(FlowLease {
                    active: self.active.clone(),
                    key: (owner, subject),
                })
            }
        }
    }

    pub fn is_active(&self, owner: &Fr, subject: &Fr) -> bool {
        self.active.contains_key(&(*owner, *subject))
    }
}

/// Held for the lifetime of a flow
#[derive(Debug)]
pub struct FlowLease {
    active: Arc<DashMap<(Fr, Fr), FlowKind>>,
    key: (Fr, Fr),
}

impl Drop for FlowLease {
    fn drop(&mut self) {
        self.active.remove(&self.key);
    }
}

/// Client-side engine for the lending flows
pub struct Orchestrator {
    l1: Arc<dyn L1Client>,
    l2: Arc<dyn L2Client>,
    store: Arc<dyn SecretStore>,
    signer: Arc<dyn SigningProvider>,
    engine: CommitmentEngine,
    tracker: MessageTracker<dyn L2Client>,
    scanner: BridgeScanner<dyn L2Client>,
    portal: LendingPortal,
    program: LendingProgram,
    contracts: ContractAddresses,
    settings: FlowSettings,
    guard: FlowGuard,
}

impl Orchestrator {
    pub fn new(
        l1: Arc<dyn L1Client>,
        l2: Arc<dyn L2Client>,
        store: Arc<dyn SecretStore>,
        signer: Arc<dyn SigningProvider>,
        contracts: ContractAddresses,
        settings: FlowSettings,
    ) -> Self {
        Self::with_engine(
            l1,
            l2,
            store,
            signer,
            contracts,
            settings,
            CommitmentEngine::default(),
        )
    }

    /// Same as [`Orchestrator::new`] with a custom commitment engine
    pub fn with_engine(
        l1: Arc<dyn L1Client>,
        l2: Arc<dyn L2Client>,
        store: Arc<dyn SecretStore>,
        signer: Arc<dyn SigningProvider>,
        contracts: ContractAddresses,
        settings: FlowSettings,
        engine: CommitmentEngine,
    ) -> Self {
        let tracker = MessageTracker::new(l2.clone(), settings.poll_interval, settings.retry);
        let scanner = BridgeScanner::new(
            l1.clone(),
            tracker.clone(),
            contracts.token_portal,
            engine.clone(),
            settings.retry,
            settings.scan_from_block,
        );

        Self {
            l1,
            l2,
            store,
            signer,
            engine,
            tracker,
            scanner,
            portal: LendingPortal::new(contracts.lending_portal),
            program: LendingProgram::new(contracts.program),
            contracts,
            settings,
            guard: FlowGuard::new(),
        }
    }

    pub fn engine(&self) -> &CommitmentEngine {
        &self.engine
    }

    pub fn guard(&self) -> &FlowGuard {
        &self.guard
    }

    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    /// L2 identity flows act for
    pub fn owner(&self) -> Fr {
        self.signer.l2_address()
    }

    /// Run a flow body inside a span, recording metrics on exit
    async fn run_flow<T, F>(&self, kind: FlowKind, subject: Option<Fr>, body: F) -> BridgeResult<T>
    where
        F: Future<Output = BridgeResult<T>>,
        T: HasProgress,
    {
        let flow_id = Uuid::new_v4();
        let subject = subject.map(|s| s.to_string()).unwrap_or_default();
        let span = info_span!("flow", kind = %kind, subject = %subject, flow_id = %flow_id);

        metrics::record_flow_started(kind.as_str());
        let started = Instant::now();

        let result = body.instrument(span.clone()).await;
        let elapsed = started.elapsed().as_secs_f64();

        let _entered = span.enter();
        match &result {
            Ok(outcome) => match outcome.progress() {
                FlowProgress::Completed => {
                    info!("Flow completed in {:.2}s", elapsed);
                    metrics::record_flow_completed(kind.as_str(), elapsed);
                }
                FlowProgress::Pending { waiting_for } => {
                    info!("Flow pending on {}", waiting_for);
                    metrics::record_flow_pending(kind.as_str());
                }
            },
            Err(e) => {
                warn!("Flow failed: {}", e);
                metrics::record_flow_failed(kind.as_str(), e.kind());
            }
        }
        result
    }

    async fn read_view(&self, call: L2Call) -> BridgeResult<Vec<Fr>> {
        let operation = format!("view {}", call.function);
        with_backoff(&self.settings.retry, &operation, || {
            self.l2.simulate_view(call.clone())
        })
        .await
    }

    async fn position(&self, nonce: &Fr) -> BridgeResult<Option<Position>> {
        let values = self.read_view(self.program.get_position(nonce)).await?;
        program::decode_position(nonce, &values)
    }

    async fn intent_state(&self, intent_id: &Fr) -> BridgeResult<IntentState> {
        let values = self.read_view(self.program.get_intent(intent_id)).await?;
        program::decode_intent(&values)
    }

    async fn private_balance(&self, token: &L2Token, owner: &Fr) -> BridgeResult<u128> {
        let values = self.read_view(token.balance_of_private(owner)).await?;
        program::decode_amount(&values)
    }

    async fn message_claimed(&self, token: &L2Token, message_key: &Fr) -> BridgeResult<bool> {
        let values = self.read_view(token.is_claimed(message_key)).await?;
        program::decode_flag(&values)
    }

    /// Whether the portal has executed the intent on L1
    async fn l1_consumed(&self, intent_id: &Fr) -> BridgeResult<bool> {
        let data = with_backoff(&self.settings.retry, "intentConsumed", || {
            self.l1.read_contract(self.portal.intent_consumed(intent_id))
        })
        .await?;
        portal::decode_bool(&data)
    }

    async fn l1_block(&self) -> BridgeResult<u64> {
        with_backoff(&self.settings.retry, "l1 block number", || {
            self.l1.get_block_number()
        })
        .await
    }

    async fn l2_timestamp(&self) -> BridgeResult<u64> {
        with_backoff(&self.settings.retry, "l2 timestamp", || {
            self.l2.get_timestamp()
        })
        .await
    }

    /// Reject deadlines already passed on either chain or too far out
    async fn check_deadline(&self, deadline: u64) -> BridgeResult<()> {
        let l1_now = with_backoff(&self.settings.retry, "l1 timestamp", || {
            self.l1.get_timestamp()
        })
        .await?;
        let l2_now = self.l2_timestamp().await?;

        let now = l1_now.max(l2_now);
        if deadline <= now {
            return Err(BridgeError::Deadline { deadline, now });
        }
        let window = deadline - l1_now.min(l2_now);
        if window > self.settings.max_deadline_window {
            return Err(BridgeError::Validation(format!(
                "deadline {}s out exceeds the {}s window",
                window, self.settings.max_deadline_window
            )));
        }
        Ok(())
    }

    /// Submit an L2 call and wait for it to be mined
    async fn submit_l2(&self, call: L2Call) -> BridgeResult<L2TxReceipt> {
        let function = call.function.clone();
        let tx_hash = self.l2.submit_transaction(call).await?;
        info!("Submitted {} as {}", function, tx_hash);
        let receipt = self
            .l2
            .wait_for_inclusion(&tx_hash, self.settings.receipt_timeout)
            .await?;
        info!("{} mined in L2 block {}", function, receipt.block_number);
        Ok(receipt)
    }

    async fn wait_l1(&self, tx_hash: H256) -> BridgeResult<TransactionReceipt> {
        self.l1
            .wait_for_receipt(tx_hash, self.settings.receipt_timeout)
            .await
    }

    /// Find the portal's confirmation for an intent, from a receipt or the logs
    async fn find_confirmation(
        &self,
        intent_id: &Fr,
        deposit: bool,
        receipt: Option<&TransactionReceipt>,
        from_block: u64,
    ) -> BridgeResult<Option<ExecutionConfirmed>> {
        let pick = |event: PortalEvent| match (event, deposit) {
            (PortalEvent::DepositConfirmed(c), true) | (PortalEvent::WithdrawConfirmed(c), false)
                if c.intent_id == *intent_id =>
            {
                Some(c)
            }
            _ => None,
        };

        if let Some(receipt) = receipt {
            let found = events::events_in_receipt(receipt, self.contracts.lending_portal)?
                .into_iter()
                .find_map(pick);
            if found.is_some() {
                return Ok(found);
            }
        }

        let topic = if deposit {
            *topics::DEPOSIT_CONFIRMED
        } else {
            *topics::WITHDRAW_CONFIRMED
        };
        let logs = with_backoff(&self.settings.retry, "portal confirmations", || {
            self.l1
                .query_events(self.contracts.lending_portal, topic, from_block)
        })
        .await?;

        for log in &logs {
            match events::parse_log(log) {
                Ok(event) => {
                    if let Some(confirmed) = pick(event) {
                        return Ok(Some(confirmed));
                    }
                }
                Err(e) => warn!("Skipping undecodable portal log: {}", e),
            }
        }
        Ok(None)
    }

    async fn save(&self, record: &mut SecretRecord) -> BridgeResult<()> {
        record.touch();
        self.store.put(record.clone()).await
    }

    /// Make sure the L2 request of `record` is mined, submitting `request` if it
    /// was persisted but never sent; yields the L2 block that recorded it
    async fn ensure_requested(
        &self,
        flow: FlowKind,
        record: &mut SecretRecord,
        request: L2Call,
    ) -> BridgeResult<Landed<u64>> {
        if let Some(block) = record.request_block {
            return Ok(Landed::Done(block));
        }
        let intent_id = record.intent_id().ok_or_else(|| {
            BridgeError::Store(format!("record {} has no intent", record.key))
        })?;

        if record.l2_tx_hash.is_none() {
            let state = self.intent_state(&intent_id).await.step(flow, "observe_intent")?;
            if state.status == IntentStatus::None {
                // persisted, then interrupted before submission
                let tx_hash = self
                    .l2
                    .submit_transaction(request)
                    .await
                    .step(flow, "submit_request")?;
                record.l2_tx_hash = Some(tx_hash);
                self.save(record).await.step(flow, "submit_request")?;
            }
        }

        if let Some(tx_hash) = record.l2_tx_hash.clone() {
            match self
                .l2
                .wait_for_inclusion(&tx_hash, self.settings.receipt_timeout)
                .await
            {
                Ok(receipt) => debug!("Request mined in L2 block {}", receipt.block_number),
                Err(e) if e.is_pending() => {
                    return Ok(Landed::Waiting(format!("{} request inclusion", flow)));
                }
                Err(e) => return Err(e.at(flow, "await_request")),
            }
        }

        let state = self.intent_state(&intent_id).await.step(flow, "observe_intent")?;
        match state.status {
            IntentStatus::Pending | IntentStatus::Consumed => {}
            IntentStatus::Cancelled => {
                self.store.delete(&record.key).await.step(flow, "observe_intent")?;
                return Err(BridgeError::Replay {
                    id: intent_id.to_string(),
                }
                .at(flow, "observe_intent"));
            }
            IntentStatus::None => {
                return Err(BridgeError::Validation(format!(
                    "L2 program has no intent {}",
                    intent_id
                ))
                .at(flow, "observe_intent"));
            }
        }

        record.request_block = Some(state.request_block);
        self.save(record).await.step(flow, "observe_intent")?;
        Ok(Landed::Done(state.request_block))
    }

    /// Have the portal execute the intent on L1 unless it already has, then
    /// record the confirmation's message key and amount
    async fn settle_on_l1(
        &self,
        flow: FlowKind,
        record: &mut SecretRecord,
        intent: &Intent,
        request_block: u64,
    ) -> BridgeResult<Landed<(Fr, u128)>> {
        if let (Some(key), Some(amount)) = (record.message_key, record.amount) {
            return Ok(Landed::Done((key, amount)));
        }
        let deposit = flow == FlowKind::Deposit;
        let intent_id = intent.intent_id;

        let consumed = self.l1_consumed(&intent_id).await.step(flow, "check_l1")?;
        if !consumed && record.l1_tx_hash.is_none() {
            let message = self.engine.outbound_message(&intent_id);
            let witness = match self
                .tracker
                .wait_for_outbox_witness(request_block, &message, self.settings.message_wait_ceiling)
                .await
            {
                Ok(witness) => witness,
                Err(e) if e.is_pending() => {
                    return Ok(Landed::Waiting(format!("{} intent outbox proof", flow)));
                }
                Err(e) => return Err(e.at(flow, "outbox_witness")),
            };

            let call = if deposit {
                self.portal.execute_deposit(intent, request_block, &witness)
            } else {
                self.portal.execute_withdraw(intent, request_block, &witness)
            };
            let tx_hash = self
                .l1
                .send_transaction(call)
                .await
                .step(flow, "execute_on_l1")?;
            info!("Portal execution of {} sent as {:?}", intent_id, tx_hash);
            record.l1_tx_hash = Some(tx_hash);
            self.save(record).await.step(flow, "execute_on_l1")?;
        }

        let mut receipt = None;
        if let Some(tx_hash) = record.l1_tx_hash {
            match self.wait_l1(tx_hash).await {
                Ok(r) => receipt = Some(r),
                Err(e) if e.is_pending() => {
                    return Ok(Landed::Waiting(format!("{} execution receipt", flow)));
                }
                Err(e) => {
                    // our transaction failed either way; the hash is dead
                    record.l1_tx_hash = None;
                    self.save(record).await.step(flow, "await_execution")?;
                    if !self.l1_consumed(&intent_id).await.step(flow, "check_l1")? {
                        return Err(e.at(flow, "await_execution"));
                    }
                    // another executor won the race; its confirmation is in the logs
                    warn!(
                        "Execution {:?} of {} failed but the intent is consumed: {}",
                        tx_hash, intent_id, e
                    );
                }
            }
        }

        let from_block = record.l1_from_block.unwrap_or(self.settings.scan_from_block);
        let confirmed = self
            .find_confirmation(&intent_id, deposit, receipt.as_ref(), from_block)
            .await
            .step(flow, "decode_confirmation")?
            .ok_or_else(|| {
                BridgeError::Validation(format!(
                    "no portal confirmation for {} from block {}",
                    intent_id, from_block
                ))
                .at(flow, "decode_confirmation")
            })?;

        info!(
            "Intent {} executed on L1: amount {}, message {}",
            intent_id, confirmed.amount, confirmed.message_key
        );
        record.message_key = Some(confirmed.message_key);
        record.message_index = Some(confirmed.message_index);
        record.amount = Some(confirmed.amount);
        record.l1_tx_hash = Some(record.l1_tx_hash.unwrap_or(confirmed.tx_hash));
        self.save(record).await.step(flow, "decode_confirmation")?;

        Ok(Landed::Done((confirmed.message_key, confirmed.amount)))
    }
}

/// Result of a step that may have to wait on the other chain
pub(crate) enum Landed<T> {
    Done(T),
    Waiting(String),
}

/// Outcomes that report how far their flow got
pub trait HasProgress {
    fn progress(&self) -> &FlowProgress;
}
