//! Call encoding for the contracts the flows drive
//!
//! - [`portal::LendingPortal`]: L1 portal executing intents against the lending pool
//! - [`program::LendingProgram`] / [`program::L2Token`]: L2 lending program and token

pub mod portal;
pub mod program;

pub use portal::LendingPortal;
pub use program::{IntentState, IntentStatus, L2Token, LendingProgram, Position, PositionStatus};
pub use crate::commitment::Intent;
