//! Protocol fee arithmetic
//!
//! The fee is charged once, on entry: a deposit of `gross` creates a position
//! worth `gross - fee`, and withdrawing that position returns the full net amount.

use crate::config::FeeConfig;
use crate::error::{BridgeError, BridgeResult};

/// Basis-point denominator
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Fee parameters applied to deposits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSchedule {
    pub fee_bps: u32,
    /// Floor applied when the proportional fee rounds below it
    pub min_fee: u128,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            fee_bps: 10,
            min_fee: 0,
        }
    }
}

impl From<&FeeConfig> for FeeSchedule {
    fn from(config: &FeeConfig) -> Self {
        Self {
            fee_bps: config.deposit_fee_bps,
            min_fee: config.min_fee,
        }
    }
}

impl FeeSchedule {
    /// Protocol fee for a gross deposit
    pub fn fee_for(&self, gross: u128) -> BridgeResult<u128> {
        let proportional = gross
            .checked_mul(self.fee_bps as u128)
            .ok_or_else(|| BridgeError::Validation(format!("fee overflow for {}", gross)))?
            / BPS_DENOMINATOR;
        Ok(proportional.max(self.min_fee))
    }

    /// Split a gross deposit into `(fee, net)`
    ///
    /// Fails when the amount is zero or does not cover the fee floor.
    pub fn split(&self, gross: u128) -> BridgeResult<(u128, u128)> {
        if gross == 0 {
            return Err(BridgeError::Validation("amount must be positive".into()));
        }
        let fee = self.fee_for(gross)?;
        match gross.checked_sub(fee) {
            Some(net) if net > 0 => Ok((fee, net)),
            _ => Err(BridgeError::Validation(format!(
                "amount {} does not cover fee {}",
                gross, fee
            ))),
        }
    }

    /// Amount returned when a position is withdrawn; no exit fee
    pub fn withdrawal_return(&self, net: u128) -> u128 {
        net
    }
}
