//! Secret persistence
//!
//! Secrets outlive the process: a flow interrupted between steps resumes from
//! the record written before its first submission. Records are keyed by intent
//! id for flow secrets and by message key for bridge secrets, and carry enough
//! flow context to re-enter the state machine.
//!
//! Backends:
//! - [`MemorySecretStore`]: process-local, for tests and ephemeral clients
//! - [`PgSecretStore`]: PostgreSQL, writes serialized per owner

mod memory;
mod postgres;

pub use memory::MemorySecretStore;
pub use postgres::PgSecretStore;

use crate::commitment::{Intent, Secret};
use crate::error::BridgeResult;
use crate::field::Fr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};

/// What a stored secret unlocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretKind {
    /// Consumes the portal's deposit confirmation
    Deposit,
    /// Consumes the tokens returned by the portal on withdrawal
    Withdraw,
    /// Consumes a plain token bridge deposit
    Bridge,
}

impl SecretKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretKind::Deposit => "deposit",
            SecretKind::Withdraw => "withdraw",
            SecretKind::Bridge => "bridge",
        }
    }
}

/// Persisted secret plus the flow context needed to resume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRecord {
    pub key: String,
    pub owner: Fr,
    pub kind: SecretKind,
    pub secret: Secret,
    pub secret_hash: Fr,

    pub intent: Option<Intent>,
    /// Token contract the flow moves funds through
    pub asset: Option<Address>,
    pub l2_token: Option<Fr>,
    #[serde(with = "crate::field::amount_serde")]
    pub gross_amount: u128,
    #[serde(with = "crate::field::amount_serde")]
    pub fee: u128,
    pub position_nonce: Option<Fr>,
    pub l2_tx_hash: Option<String>,
    /// L2 block that recorded the request
    pub request_block: Option<u64>,
    /// L1 block to start scanning from for the portal confirmation
    pub l1_from_block: Option<u64>,
    pub l1_tx_hash: Option<H256>,

    /// Message this secret consumes, once the portal has emitted it
    pub message_key: Option<Fr>,
    pub message_index: Option<u64>,
    /// Shares (deposit) or amount (withdraw / bridge) carried by the message
    #[serde(default, with = "crate::field::amount_serde::option")]
    pub amount: Option<u128>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SecretRecord {
    /// Record for a lending flow, keyed by intent id
    pub fn for_intent(
        owner: Fr,
        kind: SecretKind,
        secret: Secret,
        secret_hash: Fr,
        intent: Intent,
    ) -> Self {
        let now = Utc::now();
        Self {
            key: intent.intent_id.to_key(),
            owner,
            kind,
            secret,
            secret_hash,
            asset: Some(intent.asset),
            intent: Some(intent),
            l2_token: None,
            gross_amount: 0,
            fee: 0,
            position_nonce: None,
            l2_tx_hash: None,
            request_block: None,
            l1_from_block: None,
            l1_tx_hash: None,
            message_key: None,
            message_index: None,
            amount: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record for a token bridge deposit made outside the lending flows
    pub fn for_bridge(owner: Fr, secret: Secret, secret_hash: Fr, l2_token: Fr) -> Self {
        let now = Utc::now();
        Self {
            key: secret_hash.to_key(),
            owner,
            kind: SecretKind::Bridge,
            secret,
            secret_hash,
            intent: None,
            asset: None,
            l2_token: Some(l2_token),
            gross_amount: 0,
            fee: 0,
            position_nonce: None,
            l2_tx_hash: None,
            request_block: None,
            l1_from_block: None,
            l1_tx_hash: None,
            message_key: None,
            message_index: None,
            amount: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn intent_id(&self) -> Option<Fr> {
        self.intent.as_ref().map(|i| i.intent_id)
    }

    /// Message key in the lowercase form used for matching
    pub fn message_key_normalized(&self) -> Option<String> {
        self.message_key.map(|k| k.to_key())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Durable secret storage
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, key: &str) -> BridgeResult<Option<SecretRecord>>;

    /// Insert or replace by key
    async fn put(&self, record: SecretRecord) -> BridgeResult<()>;

    /// Removing a missing key is not an error
    async fn delete(&self, key: &str) -> BridgeResult<()>;

    /// All records of `owner`, oldest first
    async fn list_all(&self, owner: &Fr) -> BridgeResult<Vec<SecretRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::CommitmentEngine;

    #[test]
    fn test_record_json_keeps_large_amounts() {
        let engine = CommitmentEngine::default();
        let secret = Secret::from_field(Fr::from_u64(11)).unwrap();
        let hash = engine.commit(&secret);
        let intent = engine
            .build_intent(
                &Fr::from_u64(0xca11),
                Address::repeat_byte(0x44),
                u128::MAX / 3,
                18,
                1_800_000_000,
                hash,
            )
            .unwrap();

        let mut record = SecretRecord::for_intent(
            Fr::from_u64(0xca11),
            SecretKind::Deposit,
            secret,
            hash,
            intent,
        );
        record.gross_amount = u128::MAX / 2;
        record.amount = Some(u128::MAX);

        let value = serde_json::to_value(&record).unwrap();
        let decoded: SecretRecord = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.key, record.intent_id().unwrap().to_key());
    }
}
