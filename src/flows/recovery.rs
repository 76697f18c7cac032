//! Recovery of intents the portal never executed
//!
//! Both paths are only open once the intent deadline has passed by the L2 clock
//! and the portal has not consumed the intent on L1.

use super::{FlowProgress, HasProgress, Orchestrator};
use crate::contracts::program::{L2Token, Position, PositionStatus};
use crate::error::{BridgeError, BridgeResult, FlowKind, StepContext};
use crate::field::Fr;
use crate::store::{SecretKind, SecretRecord};

use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    pub intent_id: Fr,
    pub net_amount: String,
    /// Private balance increase observed around the cancel
    pub restored: Option<String>,
    pub l2_tx: Option<String>,
    pub progress: FlowProgress,
}

impl HasProgress for CancelOutcome {
    fn progress(&self) -> &FlowProgress {
        &self.progress
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundOutcome {
    pub position_nonce: Fr,
    /// Nonce of the reissued position
    pub refund_nonce: Fr,
    pub shares: String,
    pub l2_tx: Option<String>,
    pub progress: FlowProgress,
}

impl HasProgress for RefundOutcome {
    fn progress(&self) -> &FlowProgress {
        &self.progress
    }
}

impl Orchestrator {
    /// Return the net amount of an expired, unexecuted deposit to private balance
    pub async fn execute_cancel_deposit(&self, intent_id: &Fr) -> BridgeResult<CancelOutcome> {
        const FLOW: FlowKind = FlowKind::CancelDeposit;

        self.run_flow(FLOW, Some(*intent_id), async {
            let owner = self.owner();
            let _lease = self.guard.acquire(owner, *intent_id, FLOW)?;

            let position = self.expect_position(FLOW, intent_id).await?;
            let outcome = CancelOutcome {
                intent_id: *intent_id,
                net_amount: position.net_amount.to_string(),
                restored: None,
                l2_tx: None,
                progress: FlowProgress::Completed,
            };
            let record = self
                .store
                .get(&intent_id.to_key())
                .await
                .step(FLOW, "load_secret")?
                .filter(|r| r.kind == SecretKind::Deposit);

            match (position.status, record) {
                (PositionStatus::PendingDeposit, Some(record)) => {
                    self.cancel_pending(intent_id, &position, record, outcome).await
                }
                (PositionStatus::PendingDeposit, None) => Err(BridgeError::Validation(format!(
                    "no deposit record for {}",
                    intent_id
                ))
                .at(FLOW, "load_secret")),
                // cancel landed before an interruption
                (PositionStatus::Cancelled, Some(record)) => {
                    self.store.delete(&record.key).await.step(FLOW, "cleanup")?;
                    Ok(outcome)
                }
                // the intent was already consumed by a cancel or a finalize
                _ => Err(BridgeError::Replay {
                    id: intent_id.to_string(),
                }
                .at(FLOW, "check_position")),
            }
        })
        .await
    }

    /// Steps of a cancel once the position is confirmed pending
    async fn cancel_pending(
        &self,
        intent_id: &Fr,
        position: &Position,
        record: SecretRecord,
        mut outcome: CancelOutcome,
    ) -> BridgeResult<CancelOutcome> {
        const FLOW: FlowKind = FlowKind::CancelDeposit;

        let owner = self.owner();
        let net = position.net_amount;
        let token = L2Token::new(record.l2_token.ok_or_else(|| {
            BridgeError::Store(format!("deposit record {} has no token", record.key))
        })?);

        let now = self.l2_timestamp().await.step(FLOW, "check_deadline")?;
        if now <= position.deadline {
            return Err(BridgeError::Deadline {
                deadline: position.deadline,
                now,
            }
            .at(FLOW, "check_deadline"));
        }
        if self.l1_consumed(intent_id).await.step(FLOW, "check_l1")? {
            return Err(BridgeError::Replay {
                id: intent_id.to_string(),
            }
            .at(FLOW, "check_l1"));
        }

        let before = self
            .private_balance(&token, &owner)
            .await
            .step(FLOW, "read_balance")?;
        let receipt = match self
            .submit_l2(self.program.cancel_deposit(intent_id, now, net))
            .await
        {
            Ok(receipt) => receipt,
            Err(e) if e.is_pending() => {
                outcome.progress = FlowProgress::pending("cancel_deposit inclusion");
                return Ok(outcome);
            }
            Err(e) => return Err(e.at(FLOW, "cancel_deposit")),
        };
        outcome.l2_tx = Some(receipt.tx_hash);

        let after = self
            .private_balance(&token, &owner)
            .await
            .step(FLOW, "read_balance")?;
        let restored = after.checked_sub(before).ok_or_else(|| {
            BridgeError::Validation(format!(
                "private balance fell from {} to {} across cancel",
                before, after
            ))
            .at(FLOW, "verify_balance")
        })?;
        outcome.restored = Some(restored.to_string());
        if restored != net {
            return Err(BridgeError::Validation(format!(
                "cancel restored {} but the deposit carried {}",
                restored, net
            ))
            .at(FLOW, "verify_balance"));
        }

        let status = self.expect_position(FLOW, intent_id).await?.status;
        if status != PositionStatus::Cancelled {
            return Err(BridgeError::Validation(format!(
                "deposit {} is {} after cancel",
                intent_id,
                status.as_str()
            ))
            .at(FLOW, "observe_position"));
        }

        self.store.delete(&record.key).await.step(FLOW, "cleanup")?;
        info!("Deposit {} cancelled, {} restored", intent_id, restored);
        Ok(outcome)
    }

    /// Reissue the shares of an expired, unexecuted withdrawal
    pub async fn execute_claim_refund(&self, nonce: &Fr) -> BridgeResult<RefundOutcome> {
        const FLOW: FlowKind = FlowKind::ClaimRefund;

        self.run_flow(FLOW, Some(*nonce), async {
            let owner = self.owner();
            let _lease = self.guard.acquire(owner, *nonce, FLOW)?;

            let refund_nonce = self.engine.refund_nonce(nonce);
            let position = self.expect_position(FLOW, nonce).await?;
            let withdraw_key = position.intent_id.to_key();
            let mut outcome = RefundOutcome {
                position_nonce: *nonce,
                refund_nonce,
                shares: position.shares.to_string(),
                l2_tx: None,
                progress: FlowProgress::Completed,
            };

            if position.status != PositionStatus::PendingWithdraw {
                // refund landed before an interruption
                if let Some(refunded) = self.position(&refund_nonce).await.step(FLOW, "observe_refund")? {
                    if refunded.status == PositionStatus::Active {
                        self.store.delete(&withdraw_key).await.step(FLOW, "cleanup")?;
                        outcome.shares = refunded.shares.to_string();
                        return Ok(outcome);
                    }
                }
                return Err(BridgeError::Validation(format!(
                    "position {} is {}, not pending withdrawal",
                    nonce,
                    position.status.as_str()
                ))
                .at(FLOW, "check_position"));
            }

            let now = self.l2_timestamp().await.step(FLOW, "check_deadline")?;
            if now <= position.deadline {
                return Err(BridgeError::Deadline {
                    deadline: position.deadline,
                    now,
                }
                .at(FLOW, "check_deadline"));
            }
            if self.l1_consumed(&position.intent_id).await.step(FLOW, "check_l1")? {
                return Err(BridgeError::Replay {
                    id: position.intent_id.to_string(),
                }
                .at(FLOW, "check_l1"));
            }

            let receipt = match self.submit_l2(self.program.claim_refund(nonce, now)).await {
                Ok(receipt) => receipt,
                Err(e) if e.is_pending() => {
                    outcome.progress = FlowProgress::pending("claim_refund inclusion");
                    return Ok(outcome);
                }
                Err(e) => return Err(e.at(FLOW, "claim_refund")),
            };
            outcome.l2_tx = Some(receipt.tx_hash);

            let refunded = self.expect_position(FLOW, &refund_nonce).await?;
            if refunded.status != PositionStatus::Active || refunded.shares != position.shares {
                return Err(BridgeError::Validation(format!(
                    "refund position {} is {} with {} shares, expected active with {}",
                    refund_nonce,
                    refunded.status.as_str(),
                    refunded.shares,
                    position.shares
                ))
                .at(FLOW, "observe_refund"));
            }

            if self.store.get(&withdraw_key).await.step(FLOW, "cleanup")?.is_none() {
                warn!("No withdrawal record {} to clear after refund", withdraw_key);
            }
            self.store.delete(&withdraw_key).await.step(FLOW, "cleanup")?;
            info!(
                "Position {} refunded as {} with {} shares",
                nonce, refund_nonce, refunded.shares
            );
            Ok(outcome)
        })
        .await
    }

    async fn expect_position(&self, flow: FlowKind, nonce: &Fr) -> BridgeResult<Position> {
        self.position(nonce)
            .await
            .step(flow, "observe_position")?
            .ok_or_else(|| {
                BridgeError::Validation(format!("no position {}", nonce)).at(flow, "observe_position")
            })
    }
}
