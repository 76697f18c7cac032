//! Withdraw flow
//!
//! 1. position active, or pending withdrawal with a local secret (resume)
//! 2. deadline checked; withdrawal secret persisted; `request_withdraw` submitted
//! 3. request mined and intent observed on L2
//! 4. portal executes the withdrawal on L1
//! 5. `WithdrawConfirmed` decoded; the returned tokens are a bridge deposit
//! 6. tokens claimed privately, then `finalize_withdraw`; position consumed

use super::{FlowProgress, HasProgress, Landed, Orchestrator};
use crate::contracts::program::{L2Token, PositionStatus};
use crate::error::{BridgeError, BridgeResult, FlowKind, StepContext};
use crate::field::Fr;
use crate::store::{SecretKind, SecretRecord};

use ethers::types::H256;
use rand::rngs::OsRng;
use serde::Serialize;
use tracing::info;

const FLOW: FlowKind = FlowKind::Withdraw;

#[derive(Debug, Clone)]
pub struct WithdrawRequest {
    pub position_nonce: Fr,
    /// L2 token the returned funds are claimed into
    pub l2_token: Fr,
    pub deadline: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WithdrawOutcome {
    pub intent_id: Fr,
    pub position_nonce: Fr,
    pub shares: String,
    /// Amount the position is expected to return
    pub expected_amount: String,
    /// Amount the portal actually returned
    pub amount: Option<String>,
    pub message_key: Option<Fr>,
    pub l2_request_tx: Option<String>,
    pub l1_tx: Option<H256>,
    pub claim_tx: Option<String>,
    pub finalize_tx: Option<String>,
    pub progress: FlowProgress,
}

impl HasProgress for WithdrawOutcome {
    fn progress(&self) -> &FlowProgress {
        &self.progress
    }
}

impl WithdrawOutcome {
    fn pending(mut self, waiting_for: &str) -> Self {
        self.progress = FlowProgress::pending(waiting_for);
        self
    }

    pub fn amount(&self) -> Option<u128> {
        self.amount.as_deref().and_then(|s| s.parse().ok())
    }
}

impl Orchestrator {
    /// Withdraw an active position back into private balance
    pub async fn execute_withdraw_flow(
        &self,
        request: WithdrawRequest,
    ) -> BridgeResult<WithdrawOutcome> {
        let nonce = request.position_nonce;
        self.run_flow(FLOW, Some(nonce), async {
            let owner = self.owner();
            let _lease = self.guard.acquire(owner, nonce, FLOW)?;

            // 1. position state
            let position = self
                .position(&nonce)
                .await
                .step(FLOW, "check_position")?
                .ok_or_else(|| {
                    BridgeError::Validation(format!("no position {}", nonce))
                        .at(FLOW, "check_position")
                })?;

            match position.status {
                PositionStatus::Active => {}
                PositionStatus::PendingWithdraw => {
                    let record = self
                        .withdraw_record(&owner, &nonce, &position.intent_id)
                        .await?
                        .ok_or_else(|| {
                            BridgeError::Validation(format!(
                                "position {} has a withdrawal pending without a local secret",
                                nonce
                            ))
                            .at(FLOW, "check_position")
                        })?;
                    info!("Resuming pending withdrawal {}", position.intent_id);
                    return self.drive_withdraw(record).await;
                }
                other => {
                    return Err(BridgeError::Validation(format!(
                        "position {} is {}",
                        nonce,
                        other.as_str()
                    ))
                    .at(FLOW, "check_position"));
                }
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
                    position.asset,
                    position.shares,
                    position.original_decimals,
                    request.deadline,
                    secret_hash,
                )
                .step(FLOW, "build_intent")?;
            let intent_id = intent.intent_id;

            let mut record =
                SecretRecord::for_intent(owner, SecretKind::Withdraw, secret, secret_hash, intent);
            record.l2_token = Some(request.l2_token);
            record.position_nonce = Some(nonce);
            record.gross_amount = position.net_amount;
            record.l1_from_block = Some(self.l1_block().await.step(FLOW, "persist_secret")?);
            self.save(&mut record).await.step(FLOW, "persist_secret")?;
            info!(
                "Withdraw intent {} for position {} ({} shares)",
                intent_id, nonce, position.shares
            );

            let call = self
                .program
                .request_withdraw(&nonce, request.deadline, &secret_hash);
            let tx_hash = match self.l2.submit_transaction(call).await {
                Ok(tx_hash) => tx_hash,
                Err(e) => {
                    if !e.is_retryable() && !e.is_pending() {
                        self.store.delete(&record.key).await.step(FLOW, "request_withdraw")?;
                    }
                    return Err(e.at(FLOW, "request_withdraw"));
                }
            };
            record.l2_tx_hash = Some(tx_hash);
            self.save(&mut record).await.step(FLOW, "request_withdraw")?;

            self.drive_withdraw(record).await
        })
        .await
    }

    /// Re-enter a withdrawal from its stored secret
    pub async fn resume_withdraw_flow(&self, intent_id: &Fr) -> BridgeResult<WithdrawOutcome> {
        self.run_flow(FLOW, Some(*intent_id), async {
            let record = self
                .store
                .get(&intent_id.to_key())
                .await
                .step(FLOW, "load_secret")?
                .filter(|r| r.kind == SecretKind::Withdraw)
                .ok_or_else(|| {
                    BridgeError::Validation(format!("no withdrawal secret for {}", intent_id))
                        .at(FLOW, "load_secret")
                })?;
            let nonce = record.position_nonce.ok_or_else(|| {
                BridgeError::Store(format!("withdrawal record {} has no position", record.key))
            })?;
            let _lease = self.guard.acquire(record.owner, nonce, FLOW)?;
            self.drive_withdraw(record).await
        })
        .await
    }

    async fn withdraw_record(
        &self,
        owner: &Fr,
        nonce: &Fr,
        intent_id: &Fr,
    ) -> BridgeResult<Option<SecretRecord>> {
        let records = self.store.list_all(owner).await.step(FLOW, "load_secret")?;
        Ok(records.into_iter().find(|r| {
            r.kind == SecretKind::Withdraw
                && r.position_nonce.as_ref() == Some(nonce)
                && r.intent_id().as_ref() == Some(intent_id)
        }))
    }

    /// Steps 3 to 6
    async fn drive_withdraw(&self, mut record: SecretRecord) -> BridgeResult<WithdrawOutcome> {
        let intent = record.intent.clone().ok_or_else(|| {
            BridgeError::Store(format!("withdrawal record {} has no intent", record.key))
        })?;
        let intent_id = intent.intent_id;
        let nonce = record.position_nonce.ok_or_else(|| {
            BridgeError::Store(format!("withdrawal record {} has no position", record.key))
        })?;
        let token = L2Token::new(record.l2_token.ok_or_else(|| {
            BridgeError::Store(format!("withdrawal record {} has no token", record.key))
        })?);

        let mut outcome = WithdrawOutcome {
            intent_id,
            position_nonce: nonce,
            shares: intent.amount.to_string(),
            expected_amount: self
                .settings
                .fees
                .withdrawal_return(record.gross_amount)
                .to_string(),
            amount: record.amount.map(|a| a.to_string()),
            message_key: record.message_key,
            l2_request_tx: record.l2_tx_hash.clone(),
            l1_tx: record.l1_tx_hash,
            claim_tx: None,
            finalize_tx: None,
            progress: FlowProgress::Completed,
        };

        // 3. request mined and visible
        let request = self
            .program
            .request_withdraw(&nonce, intent.deadline, &record.secret_hash);
        let request_block = match self.ensure_requested(FLOW, &mut record, request).await? {
            Landed::Done(block) => block,
            Landed::Waiting(what) => return Ok(outcome.pending(&what)),
        };
        outcome.l2_request_tx = record.l2_tx_hash.clone();

        if let Some(position) = self.position(&nonce).await.step(FLOW, "observe_position")? {
            if position.status == PositionStatus::Consumed {
                self.store.delete(&record.key).await.step(FLOW, "cleanup")?;
                return Ok(outcome);
            }
        }

        // 4 and 5. L1 execution and confirmation
        let (message_key, amount) = match self
            .settle_on_l1(FLOW, &mut record, &intent, request_block)
            .await?
        {
            Landed::Done(settled) => settled,
            Landed::Waiting(what) => return Ok(outcome.pending(&what)),
        };
        outcome.amount = Some(amount.to_string());
        outcome.message_key = Some(message_key);
        outcome.l1_tx = record.l1_tx_hash;

        // 6. claim the returned tokens, then close the position
        if !self
            .message_claimed(&token, &message_key)
            .await
            .step(FLOW, "claim_tokens")?
        {
            let (_, witness) = match self
                .tracker
                .wait_until_ready(&message_key, self.settings.message_wait_ceiling)
                .await
            {
                Ok(ready) => ready,
                Err(e) if e.is_pending() => return Ok(outcome.pending("withdrawal return message")),
                Err(e) => return Err(e.at(FLOW, "await_return")),
            };

            let receipt = match self
                .submit_l2(token.claim_private(amount, &record.secret, witness.leaf_index))
                .await
            {
                Ok(receipt) => receipt,
                Err(e) if e.is_pending() => return Ok(outcome.pending("claim_private inclusion")),
                Err(e) => return Err(e.at(FLOW, "claim_tokens")),
            };
            outcome.claim_tx = Some(receipt.tx_hash);
        }

        let receipt = match self.submit_l2(self.program.finalize_withdraw(&intent_id)).await {
            Ok(receipt) => receipt,
            Err(e) if e.is_pending() => return Ok(outcome.pending("finalize_withdraw inclusion")),
            Err(e) => return Err(e.at(FLOW, "finalize_withdraw")),
        };
        outcome.finalize_tx = Some(receipt.tx_hash);

        let position = self.position(&nonce).await.step(FLOW, "observe_position")?;
        match position {
            Some(p) if p.status == PositionStatus::Consumed => {
                self.store.delete(&record.key).await.step(FLOW, "cleanup")?;
                info!("Position {} withdrawn: {} returned", nonce, amount);
                Ok(outcome)
            }
            other => Err(BridgeError::Validation(format!(
                "position {} not consumed after finalize: {:?}",
                nonce,
                other.map(|p| p.status)
            ))
            .at(FLOW, "observe_position")),
        }
    }
}
