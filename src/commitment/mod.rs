//! Commitment engine
//!
//! Derives the hashes that bind an L2 intent to its L1 execution:
//! - secret hash: published on-chain, unlocked later by revealing the secret
//! - owner commitment: stands in for the L2 owner in every L1-visible intent
//! - intent salt and intent id: composite hashes over ordered tuples
//!
//! The hash primitive is injected through [`FieldHasher`]. Separators and input
//! ordering are part of the wire contract with the L2 program.

mod hasher;

pub use hasher::{separators, FieldHasher, Keccak256Hasher};

use crate::error::{BridgeError, BridgeResult};
use crate::field::{Fr, MODULUS};

use ethers::types::{Address, U256};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Largest decimals value a token can declare
pub const MAX_DECIMALS: u8 = 36;

/// Private scalar, never logged
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(Fr);

impl Secret {
    pub fn from_field(value: Fr) -> BridgeResult<Self> {
        if value.is_zero() {
            return Err(BridgeError::Validation("secret must be non-zero".into()));
        }
        Ok(Self(value))
    }

    /// The raw scalar, only for revealing to the L2 program
    pub fn expose(&self) -> Fr {
        self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Cross-chain intent as committed on L2 and executed on L1
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub intent_id: Fr,
    pub owner_commitment: Fr,
    pub asset: Address,
    #[serde(with = "crate::field::amount_serde")]
    pub amount: u128,
    pub original_decimals: u8,
    pub deadline: u64,
    pub salt: Fr,
    pub secret_hash: Fr,
}

/// Hashing and secret generation
#[derive(Clone)]
pub struct CommitmentEngine {
    hasher: Arc<dyn FieldHasher>,
}

impl Default for CommitmentEngine {
    fn default() -> Self {
        Self::new(Arc::new(Keccak256Hasher))
    }
}

impl CommitmentEngine {
    pub fn new(hasher: Arc<dyn FieldHasher>) -> Self {
        Self { hasher }
    }

    /// Uniform random non-zero field element
    pub fn generate_secret<R: RngCore + CryptoRng>(&self, rng: &mut R) -> Secret {
        let mut bytes = [0u8; 32];
        loop {
            rng.fill_bytes(&mut bytes);
            // the modulus is 254 bits; masking keeps the rejection rate under 25%
            bytes[0] &= 0x3f;
            let candidate = U256::from_big_endian(&bytes);
            if candidate.is_zero() || candidate >= MODULUS {
                continue;
            }
            if let Ok(fr) = Fr::new(candidate) {
                return Secret(fr);
            }
        }
    }

    /// Secret hash published on-chain
    pub fn commit(&self, secret: &Secret) -> Fr {
        self.hasher.hash(separators::SECRET_HASH, &[secret.0])
    }

    /// Check a revealed secret against a published hash
    pub fn verify(&self, secret: &Secret, secret_hash: &Fr) -> bool {
        self.commit(secret) == *secret_hash
    }

    pub fn owner_commitment(&self, owner: &Fr) -> Fr {
        self.hasher.hash(separators::OWNER_COMMITMENT, &[*owner])
    }

    pub fn intent_salt(&self, caller: &Fr, secret_hash: &Fr) -> Fr {
        self.hasher
            .hash(separators::INTENT_SALT, &[*caller, *secret_hash])
    }

    pub fn intent_id(
        &self,
        caller: &Fr,
        asset: &Address,
        amount: u128,
        original_decimals: u8,
        deadline: u64,
        salt: &Fr,
    ) -> BridgeResult<Fr> {
        if amount == 0 {
            return Err(BridgeError::Validation("amount must be positive".into()));
        }
        if original_decimals > MAX_DECIMALS {
            return Err(BridgeError::Validation(format!(
                "decimals {} out of range (max {})",
                original_decimals, MAX_DECIMALS
            )));
        }
        if deadline == 0 {
            return Err(BridgeError::Validation("deadline must be set".into()));
        }
        if caller.is_zero() {
            return Err(BridgeError::Validation("caller must be set".into()));
        }

        Ok(self.hasher.hash(
            separators::INTENT_ID,
            &[
                *caller,
                Fr::from_address(asset),
                Fr::from_u128(amount),
                Fr::from_u64(original_decimals as u64),
                Fr::from_u64(deadline),
                *salt,
            ],
        ))
    }

    /// Assemble the full intent for `caller` from a fresh secret hash
    pub fn build_intent(
        &self,
        caller: &Fr,
        asset: Address,
        amount: u128,
        original_decimals: u8,
        deadline: u64,
        secret_hash: Fr,
    ) -> BridgeResult<Intent> {
        let salt = self.intent_salt(caller, &secret_hash);
        let intent_id =
            self.intent_id(caller, &asset, amount, original_decimals, deadline, &salt)?;

        Ok(Intent {
            intent_id,
            owner_commitment: self.owner_commitment(caller),
            asset,
            amount,
            original_decimals,
            deadline,
            salt,
            secret_hash,
        })
    }

    /// Content of the L2 to L1 message emitted for an intent
    pub fn outbound_message(&self, intent_id: &Fr) -> Fr {
        self.hasher.hash(separators::OUTBOUND_MESSAGE, &[*intent_id])
    }

    /// Nonce of the position reissued by a refund
    pub fn refund_nonce(&self, nonce: &Fr) -> Fr {
        self.hasher.hash(separators::REFUND_NONCE, &[*nonce])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use std::collections::HashSet;

    fn asset() -> Address {
        "0x6B175474E89094C44Da98b954EedeAC495271d0F".parse().unwrap()
    }

    #[test]
    fn test_commit_is_deterministic() {
        let engine = CommitmentEngine::default();
        let secret = Secret::from_field(Fr::from_u64(42)).unwrap();
        assert_eq!(engine.commit(&secret), engine.commit(&secret));
        assert!(engine.verify(&secret, &engine.commit(&secret)));

        let wrong = Secret::from_field(Fr::from_u64(43)).unwrap();
        assert!(!engine.verify(&wrong, &engine.commit(&secret)));
    }

    #[test]
    fn test_ten_thousand_distinct_commitments() {
        let engine = CommitmentEngine::default();
        let mut rng = OsRng;
        let commitments: HashSet<Fr> = (0..10_000)
            .map(|_| engine.commit(&engine.generate_secret(&mut rng)))
            .collect();
        assert_eq!(commitments.len(), 10_000);
    }

    #[test]
    fn test_generated_secrets_in_field() {
        let engine = CommitmentEngine::default();
        let mut rng = OsRng;
        for _ in 0..1_000 {
            let secret = engine.generate_secret(&mut rng);
            assert!(secret.expose().as_u256() < MODULUS);
            assert!(!secret.expose().is_zero());
        }
    }

    #[test]
    fn test_zero_secret_rejected() {
        assert!(Secret::from_field(Fr::ZERO).is_err());
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::from_field(Fr::from_u64(7)).unwrap();
        assert_eq!(format!("{:?}", secret), "Secret(<redacted>)");
    }

    #[test]
    fn test_fresh_secrets_give_distinct_intents() {
        let engine = CommitmentEngine::default();
        let mut rng = OsRng;
        let caller = Fr::from_u64(0xca11);

        let a = engine.generate_secret(&mut rng);
        let b = engine.generate_secret(&mut rng);
        let first = engine
            .build_intent(&caller, asset(), 999_000, 18, 1_700_000_000, engine.commit(&a))
            .unwrap();
        let second = engine
            .build_intent(&caller, asset(), 999_000, 18, 1_700_000_000, engine.commit(&b))
            .unwrap();

        assert_ne!(first.salt, second.salt);
        assert_ne!(first.intent_id, second.intent_id);
        assert_eq!(first.owner_commitment, second.owner_commitment);
    }

    #[test]
    fn test_field_order_matters() {
        let engine = CommitmentEngine::default();
        let x = Fr::from_u64(1);
        let y = Fr::from_u64(2);
        assert_ne!(engine.intent_salt(&x, &y), engine.intent_salt(&y, &x));
    }

    #[test]
    fn test_separators_isolate_domains() {
        let engine = CommitmentEngine::default();
        let value = Fr::from_u64(99);
        let secret = Secret::from_field(value).unwrap();
        assert_ne!(engine.commit(&secret), engine.owner_commitment(&value));
        assert_ne!(engine.outbound_message(&value), engine.refund_nonce(&value));
    }

    #[test]
    fn test_intent_id_validation() {
        let engine = CommitmentEngine::default();
        let caller = Fr::from_u64(1);
        let salt = Fr::from_u64(2);

        assert!(matches!(
            engine.intent_id(&caller, &asset(), 0, 18, 1, &salt),
            Err(BridgeError::Validation(_))
        ));
        assert!(matches!(
            engine.intent_id(&caller, &asset(), 1, 80, 1, &salt),
            Err(BridgeError::Validation(_))
        ));
        assert!(matches!(
            engine.intent_id(&Fr::ZERO, &asset(), 1, 18, 1, &salt),
            Err(BridgeError::Validation(_))
        ));
        assert!(engine.intent_id(&caller, &asset(), 1, 18, 1, &salt).is_ok());
    }
}
