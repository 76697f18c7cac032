//! L2 lending program and token calls

use crate::chain::L2Call;
use crate::commitment::Secret;
use crate::error::{BridgeError, BridgeResult};
use crate::field::Fr;

use ethers::types::Address;
use serde::{Deserialize, Serialize};

/// Status of an intent as recorded by the L2 program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentStatus {
    None,
    Pending,
    Consumed,
    Cancelled,
}

impl IntentStatus {
    pub fn from_code(code: u64) -> BridgeResult<Self> {
        match code {
            0 => Ok(IntentStatus::None),
            1 => Ok(IntentStatus::Pending),
            2 => Ok(IntentStatus::Consumed),
            3 => Ok(IntentStatus::Cancelled),
            other => Err(BridgeError::Encoding(format!("unknown intent status {}", other))),
        }
    }

    pub fn code(&self) -> u64 {
        match self {
            IntentStatus::None => 0,
            IntentStatus::Pending => 1,
            IntentStatus::Consumed => 2,
            IntentStatus::Cancelled => 3,
        }
    }
}

/// Result of `get_intent`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntentState {
    pub status: IntentStatus,
    /// L2 block that recorded the request, 0 when unknown
    pub request_block: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionStatus {
    Unknown,
    PendingDeposit,
    Active,
    PendingWithdraw,
    Consumed,
    Cancelled,
}

impl PositionStatus {
    pub fn from_code(code: u64) -> BridgeResult<Self> {
        match code {
            0 => Ok(PositionStatus::Unknown),
            1 => Ok(PositionStatus::PendingDeposit),
            2 => Ok(PositionStatus::Active),
            3 => Ok(PositionStatus::PendingWithdraw),
            4 => Ok(PositionStatus::Consumed),
            5 => Ok(PositionStatus::Cancelled),
            other => Err(BridgeError::Encoding(format!("unknown position status {}", other))),
        }
    }

    pub fn code(&self) -> u64 {
        match self {
            PositionStatus::Unknown => 0,
            PositionStatus::PendingDeposit => 1,
            PositionStatus::Active => 2,
            PositionStatus::PendingWithdraw => 3,
            PositionStatus::Consumed => 4,
            PositionStatus::Cancelled => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Unknown => "unknown",
            PositionStatus::PendingDeposit => "pending_deposit",
            PositionStatus::Active => "active",
            PositionStatus::PendingWithdraw => "pending_withdraw",
            PositionStatus::Consumed => "consumed",
            PositionStatus::Cancelled => "cancelled",
        }
    }
}

/// Shielded lending position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub nonce: Fr,
    pub status: PositionStatus,
    pub asset: Address,
    pub shares: u128,
    pub net_amount: u128,
    pub original_decimals: u8,
    pub deadline: u64,
    /// Intent currently attached to the position
    pub intent_id: Fr,
}

/// Lending program on L2
#[derive(Debug, Clone, Copy)]
pub struct LendingProgram {
    address: Fr,
}

impl LendingProgram {
    pub fn new(address: Fr) -> Self {
        Self { address }
    }

    pub fn address(&self) -> Fr {
        self.address
    }

    pub fn request_deposit(
        &self,
        asset: &Address,
        gross_amount: u128,
        original_decimals: u8,
        deadline: u64,
        secret_hash: &Fr,
    ) -> L2Call {
        self.call(
            "request_deposit",
            vec![
                Fr::from_address(asset),
                Fr::from_u128(gross_amount),
                Fr::from_u64(original_decimals as u64),
                Fr::from_u64(deadline),
                *secret_hash,
            ],
        )
    }

    pub fn finalize_deposit(
        &self,
        intent_id: &Fr,
        shares: u128,
        secret: &Secret,
        leaf_index: u64,
    ) -> L2Call {
        self.call(
            "finalize_deposit",
            vec![
                *intent_id,
                Fr::from_u128(shares),
                secret.expose(),
                Fr::from_u64(leaf_index),
            ],
        )
    }

    pub fn request_withdraw(&self, nonce: &Fr, deadline: u64, secret_hash: &Fr) -> L2Call {
        self.call(
            "request_withdraw",
            vec![*nonce, Fr::from_u64(deadline), *secret_hash],
        )
    }

    pub fn finalize_withdraw(&self, intent_id: &Fr) -> L2Call {
        self.call("finalize_withdraw", vec![*intent_id])
    }

    pub fn cancel_deposit(&self, intent_id: &Fr, now: u64, net_amount: u128) -> L2Call {
        self.call(
            "cancel_deposit",
            vec![*intent_id, Fr::from_u64(now), Fr::from_u128(net_amount)],
        )
    }

    pub fn claim_refund(&self, nonce: &Fr, now: u64) -> L2Call {
        self.call("claim_refund", vec![*nonce, Fr::from_u64(now)])
    }

    pub fn get_intent(&self, intent_id: &Fr) -> L2Call {
        self.call("get_intent", vec![*intent_id])
    }

    pub fn get_position(&self, nonce: &Fr) -> L2Call {
        self.call("get_position", vec![*nonce])
    }

    fn call(&self, function: &str, args: Vec<Fr>) -> L2Call {
        L2Call::new(self.address, function, args)
    }
}

/// Decode `get_intent` output `[status, request_block]`
pub fn decode_intent(values: &[Fr]) -> BridgeResult<IntentState> {
    let [status, request_block] = values else {
        return Err(BridgeError::Encoding(format!(
            "get_intent returned {} values, expected 2",
            values.len()
        )));
    };
    Ok(IntentState {
        status: IntentStatus::from_code(status.to_u64()?)?,
        request_block: request_block.to_u64()?,
    })
}

/// Decode `get_position` output; `None` when the program does not know the nonce
pub fn decode_position(nonce: &Fr, values: &[Fr]) -> BridgeResult<Option<Position>> {
    let [status, asset, shares, net_amount, decimals, deadline, intent_id] = values else {
        return Err(BridgeError::Encoding(format!(
            "get_position returned {} values, expected 7",
            values.len()
        )));
    };

    let status = PositionStatus::from_code(status.to_u64()?)?;
    if status == PositionStatus::Unknown {
        return Ok(None);
    }

    let decimals = decimals.to_u64()?;
    let original_decimals = u8::try_from(decimals)
        .map_err(|_| BridgeError::Encoding(format!("decimals {} out of range", decimals)))?;

    Ok(Some(Position {
        nonce: *nonce,
        status,
        asset: asset.to_address()?,
        shares: shares.to_u128()?,
        net_amount: net_amount.to_u128()?,
        original_decimals,
        deadline: deadline.to_u64()?,
        intent_id: *intent_id,
    }))
}

/// Token contract on L2
#[derive(Debug, Clone, Copy)]
pub struct L2Token {
    address: Fr,
}

impl L2Token {
    pub fn new(address: Fr) -> Self {
        Self { address }
    }

    pub fn address(&self) -> Fr {
        self.address
    }

    /// Consume an L1 to L2 deposit message into the private balance
    pub fn claim_private(&self, amount: u128, secret: &Secret, leaf_index: u64) -> L2Call {
        L2Call::new(
            self.address,
            "claim_private",
            vec![
                Fr::from_u128(amount),
                secret.expose(),
                Fr::from_u64(leaf_index),
            ],
        )
    }

    pub fn balance_of_private(&self, owner: &Fr) -> L2Call {
        L2Call::new(self.address, "balance_of_private", vec![*owner])
    }

    pub fn is_claimed(&self, message_key: &Fr) -> L2Call {
        L2Call::new(self.address, "is_claimed", vec![*message_key])
    }
}

/// Decode a single amount returned by a view
pub fn decode_amount(values: &[Fr]) -> BridgeResult<u128> {
    match values {
        [value] => value.to_u128(),
        other => Err(BridgeError::Encoding(format!(
            "expected one value, got {}",
            other.len()
        ))),
    }
}

/// Decode a single boolean returned by a view
pub fn decode_flag(values: &[Fr]) -> BridgeResult<bool> {
    match decode_amount(values)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(BridgeError::Encoding(format!("expected boolean, got {}", other))),
    }
}
