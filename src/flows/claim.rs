//! Reconciliation entry points: find bridge deposits we hold secrets for and
//! claim the ready ones

use super::{FlowProgress, HasProgress, Orchestrator};
use crate::contracts::program::{L2Token, PositionStatus};
use crate::error::{BridgeError, BridgeResult, FlowKind, StepContext};
use crate::field::Fr;
use crate::reconcile::{PendingBridge, ScanResult};
use crate::store::SecretKind;
use crate::tracker::Readiness;

use serde::Serialize;
use tracing::info;

const FLOW: FlowKind = FlowKind::BridgeClaim;

#[derive(Debug, Clone, Serialize)]
pub struct ClaimOutcome {
    pub message_key: Fr,
    pub amount: String,
    pub kind: SecretKind,
    pub claim_tx: Option<String>,
    /// Set when the claim closed a withdrawal
    pub finalize_tx: Option<String>,
    pub progress: FlowProgress,
}

impl HasProgress for ClaimOutcome {
    fn progress(&self) -> &FlowProgress {
        &self.progress
    }
}

impl Orchestrator {
    /// Full reconciliation from the configured start block
    pub async fn scan_pending_bridges(&self) -> BridgeResult<ScanResult> {
        let owner = self.owner();
        self.scanner
            .scan(&*self.store, &owner, self.settings.scan_from_block)
            .await
            .step(FlowKind::Scan, "scan")
    }

    /// Claim a bridge deposit into private balance; a withdrawal's returned
    /// tokens also close the position
    pub async fn execute_bridge_claim(&self, pending: &PendingBridge) -> BridgeResult<ClaimOutcome> {
        let message_key = pending.message_key();

        self.run_flow(FLOW, Some(message_key), async {
            let owner = self.owner();
            let record = &pending.record;
            if record.kind == SecretKind::Deposit {
                return Err(BridgeError::Validation(format!(
                    "message {} confirms a deposit; it is consumed by finalize_deposit",
                    message_key
                ))
                .at(FLOW, "check_record"));
            }
            if !self.engine.verify(&record.secret, &pending.deposit.secret_hash) {
                return Err(BridgeError::Validation(format!(
                    "secret {} does not open message {}",
                    record.key, message_key
                ))
                .at(FLOW, "check_record"));
            }
            let token = L2Token::new(record.l2_token.ok_or_else(|| {
                BridgeError::Store(format!("record {} has no token", record.key))
            })?);

            // a withdrawal's return is claimed under the same lease as its flow
            let subject = match record.kind {
                SecretKind::Withdraw => record.position_nonce.ok_or_else(|| {
                    BridgeError::Store(format!("withdrawal record {} has no position", record.key))
                })?,
                _ => message_key,
            };
            let _lease = self.guard.acquire(owner, subject, FLOW)?;

            let amount = pending.deposit.amount;
            let mut outcome = ClaimOutcome {
                message_key,
                amount: amount.to_string(),
                kind: record.kind,
                claim_tx: None,
                finalize_tx: None,
                progress: FlowProgress::Completed,
            };

            if !self
                .message_claimed(&token, &message_key)
                .await
                .step(FLOW, "check_claimed")?
            {
                // status may be stale; readiness is re-read before claiming
                let witness = match self.tracker.readiness(&message_key).await {
                    Ok(Readiness::Ready { witness, .. }) => witness,
                    Ok(Readiness::NotReady { .. }) => {
                        outcome.progress = FlowProgress::pending("bridge message inclusion");
                        return Ok(outcome);
                    }
                    Err(e) => return Err(e.at(FLOW, "check_ready")),
                };

                let receipt = match self
                    .submit_l2(token.claim_private(amount, &record.secret, witness.leaf_index))
                    .await
                {
                    Ok(receipt) => receipt,
                    Err(e) if e.is_pending() => {
                        outcome.progress = FlowProgress::pending("claim_private inclusion");
                        return Ok(outcome);
                    }
                    Err(e) => return Err(e.at(FLOW, "claim_private")),
                };
                outcome.claim_tx = Some(receipt.tx_hash);
                info!("Claimed {} from message {}", amount, message_key);
            }

            if record.kind == SecretKind::Withdraw {
                let intent_id = record.intent_id().ok_or_else(|| {
                    BridgeError::Store(format!("withdrawal record {} has no intent", record.key))
                })?;
                let nonce = record.position_nonce.ok_or_else(|| {
                    BridgeError::Store(format!("withdrawal record {} has no position", record.key))
                })?;

                let consumed = self
                    .position(&nonce)
                    .await
                    .step(FLOW, "observe_position")?
                    .map(|p| p.status == PositionStatus::Consumed)
                    .unwrap_or(false);
                if !consumed {
                    let receipt = match self.submit_l2(self.program.finalize_withdraw(&intent_id)).await {
                        Ok(receipt) => receipt,
                        Err(e) if e.is_pending() => {
                            outcome.progress = FlowProgress::pending("finalize_withdraw inclusion");
                            return Ok(outcome);
                        }
                        Err(e) => return Err(e.at(FLOW, "finalize_withdraw")),
                    };
                    outcome.finalize_tx = Some(receipt.tx_hash);

                    let status = self
                        .position(&nonce)
                        .await
                        .step(FLOW, "observe_position")?
                        .map(|p| p.status);
                    if status != Some(PositionStatus::Consumed) {
                        return Err(BridgeError::Validation(format!(
                            "position {} not consumed after finalize: {:?}",
                            nonce, status
                        ))
                        .at(FLOW, "observe_position"));
                    }
                }
            }

            self.store.delete(&record.key).await.step(FLOW, "cleanup")?;
            Ok(outcome)
        })
        .await
    }
}
