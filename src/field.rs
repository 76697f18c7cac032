//! Scalar field elements of the L2 (BN254 scalar field)
//!
//! Every value that crosses into the L2 program is an `Fr`. Construction from
//! untrusted input is checked against the modulus; only hash output is reduced.

use crate::error::{BridgeError, BridgeResult};

use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// BN254 scalar field modulus
pub const MODULUS: U256 = U256([
    0x43e1f593f0000001,
    0x2833e84879b97091,
    0xb85045b68181585d,
    0x30644e72e131a029,
]);

/// Element of the L2 native field
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Fr(U256);

impl Fr {
    pub const ZERO: Fr = Fr(U256([0, 0, 0, 0]));

    /// Checked construction, rejects values outside the field
    pub fn new(value: U256) -> BridgeResult<Self> {
        if value >= MODULUS {
            return Err(BridgeError::Validation(format!(
                "value {:#x} exceeds the field modulus",
                value
            )));
        }
        Ok(Self(value))
    }

    pub fn from_u64(value: u64) -> Self {
        Self(U256::from(value))
    }

    pub fn from_u128(value: u128) -> Self {
        Self(U256::from(value))
    }

    /// L1 addresses are 160 bits and always fit
    pub fn from_address(address: &Address) -> Self {
        Self(U256::from_big_endian(address.as_bytes()))
    }

    pub fn from_h256(value: &H256) -> BridgeResult<Self> {
        Self::from_bytes_be(value.as_fixed_bytes())
    }

    pub fn from_bytes_be(bytes: &[u8; 32]) -> BridgeResult<Self> {
        Self::new(U256::from_big_endian(bytes))
    }

    /// Reduce an arbitrary 256-bit string into the field
    pub fn reduce_bytes_be(bytes: &[u8; 32]) -> Self {
        Self(U256::from_big_endian(bytes) % MODULUS)
    }

    pub fn to_bytes_be(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        self.0.to_big_endian(&mut out);
        out
    }

    pub fn to_h256(&self) -> H256 {
        H256::from(self.to_bytes_be())
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn to_u64(&self) -> BridgeResult<u64> {
        if self.0 > U256::from(u64::MAX) {
            return Err(BridgeError::Validation(format!("{} does not fit in u64", self)));
        }
        Ok(self.0.as_u64())
    }

    pub fn to_u128(&self) -> BridgeResult<u128> {
        if self.0 > U256::from(u128::MAX) {
            return Err(BridgeError::Validation(format!("{} does not fit in u128", self)));
        }
        Ok(self.0.as_u128())
    }

    pub fn to_address(&self) -> BridgeResult<Address> {
        let bytes = self.to_bytes_be();
        if bytes[..12].iter().any(|b| *b != 0) {
            return Err(BridgeError::Validation(format!("{} is not an L1 address", self)));
        }
        Ok(Address::from_slice(&bytes[12..]))
    }

    /// Lowercase hex without the 0x prefix, used as a store key
    pub fn to_key(&self) -> String {
        hex::encode(self.to_bytes_be())
    }
}

impl fmt::Display for Fr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_key())
    }
}

impl fmt::Debug for Fr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fr({})", self)
    }
}

impl FromStr for Fr {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_start_matches("0x").trim_start_matches("0X");
        if digits.is_empty() || digits.len() > 64 {
            return Err(BridgeError::Validation(format!("invalid field element: {:?}", s)));
        }
        let value = U256::from_str_radix(digits, 16)
            .map_err(|e| BridgeError::Validation(format!("invalid field element {:?}: {}", s, e)))?;
        Fr::new(value)
    }
}

impl From<u64> for Fr {
    fn from(value: u64) -> Self {
        Fr::from_u64(value)
    }
}

impl Serialize for Fr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Fr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Fr::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde for `u128` amounts as decimal strings; JSON numbers lose precision past 2^64
pub mod amount_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<u128>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => serializer.serialize_some(&v.to_string()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<u128>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|s| s.parse().map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
