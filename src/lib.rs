//! Private Lending Bridge - client engine for private L2 lending intents
//!
//! A user on the privacy rollup commits to a deposit or withdrawal intent, the
//! L1 lending portal executes it against the pool, and the result travels back
//! as a message only the holder of the intent secret can consume. This crate
//! drives those flows from the client side:
//!
//! - [`commitment`]: secrets, commitments and intent ids
//! - [`tracker`]: L1 to L2 message readiness
//! - [`reconcile`]: token portal deposits matched against held secrets
//! - [`flows`]: the deposit, withdraw, cancel, refund and claim state machines

pub mod api;
pub mod chain;
pub mod commitment;
pub mod config;
pub mod contracts;
pub mod error;
pub mod events;
pub mod fees;
pub mod field;
pub mod flows;
pub mod metrics;
pub mod reconcile;
pub mod retry;
pub mod store;
pub mod tracker;

pub use commitment::{CommitmentEngine, Intent, Secret};
pub use error::{BridgeError, BridgeResult, FlowKind};
pub use field::Fr;
pub use flows::{
    CancelOutcome, ClaimOutcome, ContractAddresses, DepositOutcome, DepositRequest, FlowGuard,
    FlowProgress, FlowSettings, Orchestrator, RefundOutcome, WithdrawOutcome, WithdrawRequest,
};
pub use reconcile::{BridgeScanner, BridgeStatus, PendingBridge, ScanResult};
pub use store::{MemorySecretStore, PgSecretStore, SecretKind, SecretRecord, SecretStore};
