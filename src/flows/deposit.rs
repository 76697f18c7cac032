//! Deposit flow
//!
//! 1. private balance covers the gross amount
//! 2. deadline checked on both clocks; secret persisted; `request_deposit` submitted
//! 3. request mined and intent observed on L2
//! 4. portal executes the intent on L1 (skipped if already consumed)
//! 5. `DepositConfirmed` decoded for shares and message key
//! 6. confirmation message consumed by `finalize_deposit`; position active

use super::{FlowProgress, HasProgress, Landed, Orchestrator};
use crate::contracts::program::{L2Token, PositionStatus};
use crate::error::{BridgeError, BridgeResult, FlowKind, StepContext};
use crate::field::Fr;
use crate::store::{SecretKind, SecretRecord};

use ethers::types::{Address, H256};
use rand::rngs::OsRng;
use serde::Serialize;
use tracing::info;

const FLOW: FlowKind = FlowKind::Deposit;

/// Parameters of a deposit into the lending pool
#[derive(Debug, Clone)]
pub struct DepositRequest {
    /// L1 asset the portal supplies to the pool
    pub asset: Address,
    /// L2 token holding the private balance
    pub l2_token: Fr,
    /// Gross amount debited; the protocol fee is carved from it
    pub amount: u128,
    pub original_decimals: u8,
    pub deadline: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepositOutcome {
    pub intent_id: Fr,
    /// Nonce of the resulting position
    pub position_nonce: Fr,
    pub gross_amount: String,
    pub fee: String,
    pub net_amount: String,
    pub shares: Option<String>,
    pub l2_request_tx: Option<String>,
    pub l1_tx: Option<H256>,
    pub l2_finalize_tx: Option<String>,
    pub progress: FlowProgress,
}

impl HasProgress for DepositOutcome {
    fn progress(&self) -> &FlowProgress {
        &self.progress
    }
}

impl DepositOutcome {
    fn from_record(record: &SecretRecord, intent_id: Fr, net: u128) -> Self {
        Self {
            intent_id,
            position_nonce: intent_id,
            gross_amount: record.gross_amount.to_string(),
            fee: record.fee.to_string(),
            net_amount: net.to_string(),
            shares: record.amount.map(|s| s.to_string()),
            l2_request_tx: record.l2_tx_hash.clone(),
            l1_tx: record.l1_tx_hash,
            l2_finalize_tx: None,
            progress: FlowProgress::Completed,
        }
    }

    fn pending(mut self, waiting_for: &str) -> Self {
        self.progress = FlowProgress::pending(waiting_for);
        self
    }

    pub fn shares(&self) -> Option<u128> {
        self.shares.as_deref().and_then(|s| s.parse().ok())
    }
}

impl Orchestrator {
    /// Deposit `request.amount` of private balance into the L1 lending pool
    pub async fn execute_deposit_flow(&self, request: DepositRequest) -> BridgeResult<DepositOutcome> {
        self.run_flow(FLOW, None, async {
            let owner = self.owner();
            let token = L2Token::new(request.l2_token);

            // 1. balance and fee
            let (fee, net) = self.settings.fees.split(request.amount).step(FLOW, "check_balance")?;
            let balance = self
                .private_balance(&token, &owner)
                .await
                .step(FLOW, "check_balance")?;
            if balance < request.amount {
                return Err(BridgeError::Validation(format!(
                    "private balance {} below deposit amount {}",
                    balance, request.amount
                ))
                .at(FLOW, "check_balance"));
            }

            // 2. deadline, secret, request
            self.check_deadline(request.deadline)
                .await
                .step(FLOW, "check_deadline")?;

            let secret = self.engine.generate_secret(&mut OsRng);
            let secret_hash = self.engine.commit(&secret);
            let intent = self
                .engine
                .build_intent(
                    &owner,
                    request.asset,
                    net,
                    request.original_decimals,
                    request.deadline,
                    secret_hash,
                )
                .step(FLOW, "build_intent")?;
            let intent_id = intent.intent_id;
            let _lease = self.guard.acquire(owner, intent_id, FLOW)?;

            let mut record =
                SecretRecord::for_intent(owner, SecretKind::Deposit, secret, secret_hash, intent);
            record.l2_token = Some(request.l2_token);
            record.gross_amount = request.amount;
            record.fee = fee;
            record.position_nonce = Some(intent_id);
            record.l1_from_block = Some(self.l1_block().await.step(FLOW, "persist_secret")?);
            self.save(&mut record).await.step(FLOW, "persist_secret")?;
            info!(
                "Deposit intent {}: gross {}, fee {}, net {}",
                intent_id, request.amount, fee, net
            );

            let call = self.program.request_deposit(
                &request.asset,
                request.amount,
                request.original_decimals,
                request.deadline,
                &secret_hash,
            );
            let tx_hash = match self.l2.submit_transaction(call).await {
                Ok(tx_hash) => tx_hash,
                Err(e) => {
                    // a rejected request never reaches the chain; a network error might have
                    if !e.is_retryable() && !e.is_pending() {
                        self.store.delete(&record.key).await.step(FLOW, "request_deposit")?;
                    }
                    return Err(e.at(FLOW, "request_deposit"));
                }
            };
            record.l2_tx_hash = Some(tx_hash);
            self.save(&mut record).await.step(FLOW, "request_deposit")?;

            self.drive_deposit(record).await
        })
        .await
    }

    /// Re-enter a deposit from its stored secret
    pub async fn resume_deposit_flow(&self, intent_id: &Fr) -> BridgeResult<DepositOutcome> {
        self.run_flow(FLOW, Some(*intent_id), async {
            let record = self
                .store
                .get(&intent_id.to_key())
                .await
                .step(FLOW, "load_secret")?
                .filter(|r| r.kind == SecretKind::Deposit)
                .ok_or_else(|| {
                    BridgeError::Validation(format!("no deposit secret for {}", intent_id))
                        .at(FLOW, "load_secret")
                })?;
            let _lease = self.guard.acquire(record.owner, *intent_id, FLOW)?;
            self.drive_deposit(record).await
        })
        .await
    }

    /// Steps 3 to 6, each skipped when chain state shows it already landed
    async fn drive_deposit(&self, mut record: SecretRecord) -> BridgeResult<DepositOutcome> {
        let intent = record.intent.clone().ok_or_else(|| {
            BridgeError::Store(format!("deposit record {} has no intent", record.key))
        })?;
        let intent_id = intent.intent_id;
        let mut outcome = DepositOutcome::from_record(&record, intent_id, intent.amount);

        // 3. request mined and visible
        let request = self.program.request_deposit(
            &intent.asset,
            record.gross_amount,
            intent.original_decimals,
            intent.deadline,
            &record.secret_hash,
        );
        let request_block = match self.ensure_requested(FLOW, &mut record, request).await? {
            Landed::Done(block) => block,
            Landed::Waiting(what) => return Ok(outcome.pending(&what)),
        };
        outcome.l2_request_tx = record.l2_tx_hash.clone();

        // a finalize that landed before a crash leaves only cleanup
        if let Some(position) = self.position(&intent_id).await.step(FLOW, "observe_position")? {
            if position.status == PositionStatus::Active {
                self.store.delete(&record.key).await.step(FLOW, "cleanup")?;
                outcome.shares = Some(position.shares.to_string());
                return Ok(outcome);
            }
        }

        // 4 and 5. L1 execution and confirmation
        let (message_key, shares) = match self
            .settle_on_l1(FLOW, &mut record, &intent, request_block)
            .await?
        {
            Landed::Done(settled) => settled,
            Landed::Waiting(what) => return Ok(outcome.pending(&what)),
        };
        outcome.shares = Some(shares.to_string());
        outcome.l1_tx = record.l1_tx_hash;

        // 6. finalize on L2
        let (_, witness) = match self
            .tracker
            .wait_until_ready(&message_key, self.settings.message_wait_ceiling)
            .await
        {
            Ok(ready) => ready,
            Err(e) if e.is_pending() => return Ok(outcome.pending("deposit confirmation message")),
            Err(e) => return Err(e.at(FLOW, "await_confirmation")),
        };

        let receipt = match self
            .submit_l2(self.program.finalize_deposit(
                &intent_id,
                shares,
                &record.secret,
                witness.leaf_index,
            ))
            .await
        {
            Ok(receipt) => receipt,
            Err(e) if e.is_pending() => return Ok(outcome.pending("finalize_deposit inclusion")),
            Err(e) => return Err(e.at(FLOW, "finalize_deposit")),
        };
        outcome.l2_finalize_tx = Some(receipt.tx_hash);

        let position = self
            .position(&intent_id)
            .await
            .step(FLOW, "observe_position")?;
        match position {
            Some(p) if p.status == PositionStatus::Active => {
                self.store.delete(&record.key).await.step(FLOW, "cleanup")?;
                info!("Position {} active with {} shares", intent_id, p.shares);
                Ok(outcome)
            }
            other => Err(BridgeError::Validation(format!(
                "position {} not active after finalize: {:?}",
                intent_id,
                other.map(|p| p.status)
            ))
            .at(FLOW, "observe_position")),
        }
    }
}
