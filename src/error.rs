//! Error types for the bridge client

use std::fmt;
use thiserror::Error;

/// Flow a failing step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    Deposit,
    Withdraw,
    CancelDeposit,
    ClaimRefund,
    BridgeClaim,
    Scan,
}

impl FlowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowKind::Deposit => "deposit",
            FlowKind::Withdraw => "withdraw",
            FlowKind::CancelDeposit => "cancel_deposit",
            FlowKind::ClaimRefund => "claim_refund",
            FlowKind::BridgeClaim => "bridge_claim",
            FlowKind::Scan => "scan",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the bridge client
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Deadline {deadline} not satisfied at chain time {now}")]
    Deadline { deadline: u64, now: u64 },

    #[error("Signing request rejected: {0}")]
    UserRejected(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Already consumed: {id}")]
    Replay { id: String },

    #[error("Inclusion witness for message {message_key} not yet available at block {block}")]
    WitnessUnavailable { message_key: String, block: u64 },

    #[error("Transaction reverted: {0}")]
    Reverted(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Secret store error: {0}")]
    Store(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("{flow} step `{step}` failed: {source}")]
    Step {
        flow: FlowKind,
        step: &'static str,
        #[source]
        source: Box<BridgeError>,
    },
}

impl BridgeError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::Network(_) => true,
            BridgeError::Step { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Errors that mean "not yet", not failure
    pub fn is_pending(&self) -> bool {
        match self {
            BridgeError::Timeout { .. } | BridgeError::WitnessUnavailable { .. } => true,
            BridgeError::Step { source, .. } => source.is_pending(),
            _ => false,
        }
    }

    /// Errors that require manual reconciliation
    pub fn is_fatal(&self) -> bool {
        match self {
            BridgeError::Replay { .. } => true,
            BridgeError::Step { source, .. } => source.is_fatal(),
            _ => false,
        }
    }

    /// Innermost error, with step context stripped
    pub fn root(&self) -> &BridgeError {
        match self {
            BridgeError::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self.root() {
            BridgeError::Validation(_) => "validation",
            BridgeError::Deadline { .. } => "deadline",
            BridgeError::UserRejected(_) => "user_rejected",
            BridgeError::Network(_) => "network",
            BridgeError::Timeout { .. } => "timeout",
            BridgeError::Replay { .. } => "replay",
            BridgeError::WitnessUnavailable { .. } => "witness_unavailable",
            BridgeError::Reverted(_) => "reverted",
            BridgeError::Config(_) => "config",
            BridgeError::Store(_) | BridgeError::Database(_) => "store",
            BridgeError::Encoding(_) => "encoding",
            BridgeError::Step { .. } => "step",
        }
    }

    /// Attach flow and step context
    pub fn at(self, flow: FlowKind, step: &'static str) -> Self {
        match self {
            // keep the innermost step, it is the one a caller resumes from
            e @ BridgeError::Step { .. } => e,
            e => BridgeError::Step {
                flow,
                step,
                source: Box::new(e),
            },
        }
    }
}

/// Map a revert reason onto the error taxonomy
pub fn classify_revert(reason: &str, id: impl Into<String>) -> BridgeError {
    let lower = reason.to_ascii_lowercase();
    if lower.contains("consumed")
        || lower.contains("nullifier")
        || lower.contains("already claimed")
        || lower.contains("already executed")
    {
        BridgeError::Replay { id: id.into() }
    } else if lower.contains("deadline") {
        BridgeError::Validation(format!("deadline check failed on-chain: {}", reason))
    } else {
        BridgeError::Reverted(reason.to_string())
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Step context for results
pub trait StepContext<T> {
    fn step(self, flow: FlowKind, step: &'static str) -> BridgeResult<T>;
}

impl<T> StepContext<T> for BridgeResult<T> {
    fn step(self, flow: FlowKind, step: &'static str) -> BridgeResult<T> {
        self.map_err(|e| e.at(flow, step))
    }
}
