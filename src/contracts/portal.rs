//! L1 lending portal ABI

use crate::chain::{InclusionWitness, L1Call};
use crate::commitment::Intent;
use crate::error::{BridgeError, BridgeResult};
use crate::field::Fr;

use ethers::abi::{decode, encode, ParamType, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::id;

pub const EXECUTE_DEPOSIT_SIG: &str = "executeDeposit((bytes32,bytes32,address,uint256,uint8,uint64,bytes32,bytes32),uint256,uint256,bytes32[])";
pub const EXECUTE_WITHDRAW_SIG: &str = "executeWithdraw((bytes32,bytes32,address,uint256,uint8,uint64,bytes32,bytes32),uint256,uint256,bytes32[])";
pub const INTENT_CONSUMED_SIG: &str = "intentConsumed(bytes32)";

/// Decoded `executeDeposit` / `executeWithdraw` arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteCall {
    pub intent: Intent,
    pub l2_block: u64,
    pub witness: InclusionWitness,
}

/// Typed handle on the lending portal
#[derive(Debug, Clone, Copy)]
pub struct LendingPortal {
    address: Address,
}

impl LendingPortal {
    pub fn new(address: Address) -> Self {
        Self { address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn execute_deposit(
        &self,
        intent: &Intent,
        l2_block: u64,
        witness: &InclusionWitness,
    ) -> L1Call {
        self.execute(EXECUTE_DEPOSIT_SIG, intent, l2_block, witness)
    }

    pub fn execute_withdraw(
        &self,
        intent: &Intent,
        l2_block: u64,
        witness: &InclusionWitness,
    ) -> L1Call {
        self.execute(EXECUTE_WITHDRAW_SIG, intent, l2_block, witness)
    }

    pub fn intent_consumed(&self, intent_id: &Fr) -> L1Call {
        L1Call::new(
            self.address,
            encode_call(INTENT_CONSUMED_SIG, &[bytes32(intent_id)]),
        )
    }

    fn execute(
        &self,
        signature: &str,
        intent: &Intent,
        l2_block: u64,
        witness: &InclusionWitness,
    ) -> L1Call {
        let path = witness.sibling_path.iter().map(bytes32).collect();
        L1Call::new(
            self.address,
            encode_call(
                signature,
                &[
                    intent_token(intent),
                    Token::Uint(U256::from(l2_block)),
                    Token::Uint(U256::from(witness.leaf_index)),
                    Token::Array(path),
                ],
            ),
        )
    }
}

/// Decode the boolean returned by a view call
pub fn decode_bool(data: &Bytes) -> BridgeResult<bool> {
    let tokens = decode(&[ParamType::Bool], data)
        .map_err(|e| BridgeError::Encoding(format!("bool return: {}", e)))?;
    match tokens.first() {
        Some(Token::Bool(value)) => Ok(*value),
        other => Err(BridgeError::Encoding(format!("expected bool, got {:?}", other))),
    }
}

/// Decode calldata of an execute call (selector included)
pub fn decode_execute(data: &[u8]) -> BridgeResult<ExecuteCall> {
    if data.len() < 4 {
        return Err(BridgeError::Encoding("calldata shorter than selector".into()));
    }
    let types = [
        ParamType::Tuple(vec![
            ParamType::FixedBytes(32),
            ParamType::FixedBytes(32),
            ParamType::Address,
            ParamType::Uint(256),
            ParamType::Uint(8),
            ParamType::Uint(64),
            ParamType::FixedBytes(32),
            ParamType::FixedBytes(32),
        ]),
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Array(Box::new(ParamType::FixedBytes(32))),
    ];
    let tokens = decode(&types, &data[4..])
        .map_err(|e| BridgeError::Encoding(format!("execute calldata: {}", e)))?;

    let (fields, l2_block, leaf_index, path) = match tokens.as_slice() {
        [Token::Tuple(fields), Token::Uint(block), Token::Uint(index), Token::Array(path)]
            if fields.len() == 8 =>
        {
            (fields, *block, *index, path)
        }
        _ => return Err(BridgeError::Encoding("unexpected execute layout".into())),
    };

    let intent = Intent {
        intent_id: field_of(&fields[0])?,
        owner_commitment: field_of(&fields[1])?,
        asset: match &fields[2] {
            Token::Address(a) => *a,
            other => return Err(BridgeError::Encoding(format!("asset: {:?}", other))),
        },
        amount: uint_of(&fields[3])?.as_u128(),
        original_decimals: uint_of(&fields[4])?.low_u32() as u8,
        deadline: uint_of(&fields[5])?.as_u64(),
        salt: field_of(&fields[6])?,
        secret_hash: field_of(&fields[7])?,
    };

    Ok(ExecuteCall {
        intent,
        l2_block: l2_block.as_u64(),
        witness: InclusionWitness {
            leaf_index: leaf_index.as_u64(),
            sibling_path: path.iter().map(field_of).collect::<BridgeResult<Vec<_>>>()?,
        },
    })
}

/// Selector of an encoded call
pub fn selector(data: &[u8]) -> Option<[u8; 4]> {
    data.get(..4).map(|s| [s[0], s[1], s[2], s[3]])
}

fn encode_call(signature: &str, tokens: &[Token]) -> Bytes {
    let mut data = id(signature).to_vec();
    data.extend(encode(tokens));
    data.into()
}

fn bytes32(value: &Fr) -> Token {
    Token::FixedBytes(value.to_bytes_be().to_vec())
}

fn intent_token(intent: &Intent) -> Token {
    Token::Tuple(vec![
        bytes32(&intent.intent_id),
        bytes32(&intent.owner_commitment),
        Token::Address(intent.asset),
        Token::Uint(U256::from(intent.amount)),
        Token::Uint(U256::from(intent.original_decimals)),
        Token::Uint(U256::from(intent.deadline)),
        bytes32(&intent.salt),
        bytes32(&intent.secret_hash),
    ])
}

fn field_of(token: &Token) -> BridgeResult<Fr> {
    match token {
        Token::FixedBytes(bytes) if bytes.len() == 32 => Fr::from_h256(&H256::from_slice(bytes)),
        other => Err(BridgeError::Encoding(format!("expected bytes32, got {:?}", other))),
    }
}

fn uint_of(token: &Token) -> BridgeResult<U256> {
    match token {
        Token::Uint(value) => Ok(*value),
        other => Err(BridgeError::Encoding(format!("expected uint, got {:?}", other))),
    }
}
