//! Portal event types and parsing
//!
//! Defines the events emitted by the L1 token portal and lending portal that the
//! client consumes: bridge deposits (funds locked for an L2 claim) and execution
//! confirmations for lending intents.

use crate::error::{BridgeError, BridgeResult};
use crate::field::Fr;

use ethers::abi::{decode, ParamType, Token};
use ethers::types::{Address, Log, TransactionReceipt, H256, U256};
use serde::{Deserialize, Serialize};

/// Event topic signatures (keccak256 of event signature)
pub mod topics {
    use ethers::types::H256;
    use ethers::utils::keccak256;
    use lazy_static::lazy_static;

    pub const DEPOSIT_TO_L2_PRIVATE_SIG: &str =
        "DepositToAztecPrivate(uint256,bytes32,bytes32,uint256)";
    pub const DEPOSIT_CONFIRMED_SIG: &str = "DepositConfirmed(bytes32,uint256,bytes32,uint256)";
    pub const WITHDRAW_CONFIRMED_SIG: &str =
        "WithdrawConfirmed(bytes32,uint256,bytes32,uint256)";

    lazy_static! {
        // Token portal
        pub static ref DEPOSIT_TO_L2_PRIVATE: H256 = H256::from(keccak256(DEPOSIT_TO_L2_PRIVATE_SIG));
        // Lending portal
        pub static ref DEPOSIT_CONFIRMED: H256 = H256::from(keccak256(DEPOSIT_CONFIRMED_SIG));
        pub static ref WITHDRAW_CONFIRMED: H256 = H256::from(keccak256(WITHDRAW_CONFIRMED_SIG));
    }
}

/// Funds locked on L1 pending a matching claim on L2
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeDeposit {
    pub message_key: Fr,
    pub message_index: u64,
    pub amount: u128,
    pub secret_hash: Fr,
    pub source_tx_hash: H256,
    pub source_block_number: u64,
}

/// The portal executed an intent and sent a message back to L2
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionConfirmed {
    pub intent_id: Fr,
    /// Shares for deposits, released amount for withdrawals
    pub amount: u128,
    pub message_key: Fr,
    pub message_index: u64,
    pub tx_hash: H256,
    pub block_number: u64,
}

/// Events emitted by the portals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortalEvent {
    BridgeDeposit(BridgeDeposit),
    DepositConfirmed(ExecutionConfirmed),
    WithdrawConfirmed(ExecutionConfirmed),
    Unknown { topic: H256, block_number: u64 },
}

impl PortalEvent {
    /// Get event name for metrics
    pub fn name(&self) -> &'static str {
        match self {
            PortalEvent::BridgeDeposit(_) => "bridge_deposit",
            PortalEvent::DepositConfirmed(_) => "deposit_confirmed",
            PortalEvent::WithdrawConfirmed(_) => "withdraw_confirmed",
            PortalEvent::Unknown { .. } => "unknown",
        }
    }
}

/// Parse a log entry into a PortalEvent
pub fn parse_log(log: &Log) -> BridgeResult<PortalEvent> {
    let block_number = log.block_number.map(|b| b.as_u64()).unwrap_or(0);
    let tx_hash = log.transaction_hash.unwrap_or_default();
    let topic = log.topics.first().copied().unwrap_or_default();

    if topic == *topics::DEPOSIT_TO_L2_PRIVATE {
        let tokens = decode_data(
            log,
            &[
                ParamType::Uint(256),
                ParamType::FixedBytes(32),
                ParamType::FixedBytes(32),
                ParamType::Uint(256),
            ],
        )?;

        Ok(PortalEvent::BridgeDeposit(BridgeDeposit {
            amount: token_u128(&tokens[0], "amount")?,
            secret_hash: token_field(&tokens[1], "secretHash")?,
            message_key: token_field(&tokens[2], "key")?,
            message_index: token_u64(&tokens[3], "index")?,
            source_tx_hash: tx_hash,
            source_block_number: block_number,
        }))
    } else if topic == *topics::DEPOSIT_CONFIRMED || topic == *topics::WITHDRAW_CONFIRMED {
        let intent_topic = log
            .topics
            .get(1)
            .ok_or_else(|| BridgeError::Encoding("confirmation without intent topic".into()))?;
        let tokens = decode_data(
            log,
            &[
                ParamType::Uint(256),
                ParamType::FixedBytes(32),
                ParamType::Uint(256),
            ],
        )?;

        let confirmed = ExecutionConfirmed {
            intent_id: Fr::from_h256(intent_topic)?,
            amount: token_u128(&tokens[0], "amount")?,
            message_key: token_field(&tokens[1], "messageKey")?,
            message_index: token_u64(&tokens[2], "messageIndex")?,
            tx_hash,
            block_number,
        };

        if topic == *topics::DEPOSIT_CONFIRMED {
            Ok(PortalEvent::DepositConfirmed(confirmed))
        } else {
            Ok(PortalEvent::WithdrawConfirmed(confirmed))
        }
    } else {
        Ok(PortalEvent::Unknown {
            topic,
            block_number,
        })
    }
}

/// Events from `emitter` in a receipt, skipping logs of other contracts
pub fn events_in_receipt(
    receipt: &TransactionReceipt,
    emitter: Address,
) -> BridgeResult<Vec<PortalEvent>> {
    receipt
        .logs
        .iter()
        .filter(|log| log.address == emitter)
        .map(|log| {
            // receipts carry block/tx on the receipt, not always on the log
            let mut log = log.clone();
            log.block_number = log.block_number.or(receipt.block_number);
            log.transaction_hash = log.transaction_hash.or(Some(receipt.transaction_hash));
            parse_log(&log)
        })
        .collect()
}

fn decode_data(log: &Log, types: &[ParamType]) -> BridgeResult<Vec<Token>> {
    decode(types, &log.data).map_err(|e| BridgeError::Encoding(format!("log data: {}", e)))
}

fn token_uint(token: &Token, name: &str) -> BridgeResult<U256> {
    match token {
        Token::Uint(value) => Ok(*value),
        other => Err(BridgeError::Encoding(format!("{} is not uint: {:?}", name, other))),
    }
}

fn token_u128(token: &Token, name: &str) -> BridgeResult<u128> {
    let value = token_uint(token, name)?;
    if value > U256::from(u128::MAX) {
        return Err(BridgeError::Encoding(format!("{} overflows u128: {}", name, value)));
    }
    Ok(value.as_u128())
}

fn token_u64(token: &Token, name: &str) -> BridgeResult<u64> {
    let value = token_uint(token, name)?;
    if value > U256::from(u64::MAX) {
        return Err(BridgeError::Encoding(format!("{} overflows u64: {}", name, value)));
    }
    Ok(value.as_u64())
}

fn token_field(token: &Token, name: &str) -> BridgeResult<Fr> {
    match token {
        Token::FixedBytes(bytes) if bytes.len() == 32 => {
            Fr::from_h256(&H256::from_slice(bytes))
                .map_err(|e| BridgeError::Encoding(format!("{}: {}", name, e)))
        }
        other => Err(BridgeError::Encoding(format!("{} is not bytes32: {:?}", name, other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::encode;
    use ethers::types::U64;

    fn bridge_log(amount: U256, key: Fr) -> Log {
        Log {
            address: Address::repeat_byte(0x11),
            topics: vec![*topics::DEPOSIT_TO_L2_PRIVATE],
            data: encode(&[
                Token::Uint(amount),
                Token::FixedBytes(Fr::from_u64(5).to_bytes_be().to_vec()),
                Token::FixedBytes(key.to_bytes_be().to_vec()),
                Token::Uint(U256::from(9)),
            ])
            .into(),
            block_number: Some(U64::from(120)),
            transaction_hash: Some(H256::repeat_byte(0xaa)),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_bridge_deposit() {
        let event = parse_log(&bridge_log(U256::from(999_000u64), Fr::from_u64(77))).unwrap();
        match event {
            PortalEvent::BridgeDeposit(deposit) => {
                assert_eq!(deposit.amount, 999_000);
                assert_eq!(deposit.secret_hash, Fr::from_u64(5));
                assert_eq!(deposit.message_key, Fr::from_u64(77));
                assert_eq!(deposit.message_index, 9);
                assert_eq!(deposit.source_block_number, 120);
                assert_eq!(deposit.source_tx_hash, H256::repeat_byte(0xaa));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_amount_overflow_is_an_error() {
        let log = bridge_log(U256::MAX, Fr::from_u64(1));
        assert!(matches!(parse_log(&log), Err(BridgeError::Encoding(_))));
    }

    #[test]
    fn test_parse_confirmation_from_receipt() {
        let portal = Address::repeat_byte(0x22);
        let intent = Fr::from_u64(0xbeef);
        let log = Log {
            address: portal,
            topics: vec![*topics::WITHDRAW_CONFIRMED, intent.to_h256()],
            data: encode(&[
                Token::Uint(U256::from(999_000u64)),
                Token::FixedBytes(Fr::from_u64(3).to_bytes_be().to_vec()),
                Token::Uint(U256::from(4)),
            ])
            .into(),
            ..Default::default()
        };
        let receipt = TransactionReceipt {
            transaction_hash: H256::repeat_byte(0x01),
            block_number: Some(U64::from(55)),
            logs: vec![log, bridge_log(U256::one(), Fr::from_u64(1))],
            ..Default::default()
        };

        let events = events_in_receipt(&receipt, portal).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            PortalEvent::WithdrawConfirmed(confirmed) => {
                assert_eq!(confirmed.intent_id, intent);
                assert_eq!(confirmed.amount, 999_000);
                assert_eq!(confirmed.message_key, Fr::from_u64(3));
                assert_eq!(confirmed.block_number, 55);
                assert_eq!(confirmed.tx_hash, H256::repeat_byte(0x01));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_unknown_topic() {
        let log = Log {
            topics: vec![H256::repeat_byte(0x99)],
            ..Default::default()
        };
        assert_eq!(parse_log(&log).unwrap().name(), "unknown");
    }
}
