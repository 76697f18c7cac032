//! Hash primitive shared with the L2 program

use crate::field::Fr;

use sha3::{Digest, Keccak256};

/// Domain separators, one per hash use
pub mod separators {
    pub const SECRET_HASH: u32 = 26;
    pub const OWNER_COMMITMENT: u32 = 0x4f57_4e52;
    pub const INTENT_SALT: u32 = 0x5341_4c54;
    pub const INTENT_ID: u32 = 0x494e_5444;
    pub const OUTBOUND_MESSAGE: u32 = 0x4f55_5442;
    pub const REFUND_NONCE: u32 = 0x5246_4e44;
}

/// Hash of a separator and an ordered tuple of field elements
pub trait FieldHasher: Send + Sync {
    fn hash(&self, separator: u32, inputs: &[Fr]) -> Fr;
}

/// Keccak-256 over `separator_be || input_0 || ...`, reduced into the field
#[derive(Debug, Clone, Copy, Default)]
pub struct Keccak256Hasher;

impl FieldHasher for Keccak256Hasher {
    fn hash(&self, separator: u32, inputs: &[Fr]) -> Fr {
        let mut hasher = Keccak256::new();
        hasher.update(separator.to_be_bytes());
        for input in inputs {
            hasher.update(input.to_bytes_be());
        }
        let digest: [u8; 32] = hasher.finalize().into();
        Fr::reduce_bytes_be(&digest)
    }
}
