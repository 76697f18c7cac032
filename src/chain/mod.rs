//! Chain collaborators
//!
//! The core never talks to a concrete chain library. Flows, the tracker and the
//! scanner consume these traits; adapters live next to them:
//! - [`provider::EthersL1Client`]: settlement chain over ethers HTTP providers with failover
//! - [`node::NodeRpcClient`]: read-only L2 node JSON-RPC

pub mod node;
pub mod provider;

pub use node::NodeRpcClient;
pub use provider::EthersL1Client;

use crate::error::BridgeResult;
use crate::field::Fr;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, Log, TransactionReceipt, H256, U256};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Call against an L1 contract
#[derive(Debug, Clone)]
pub struct L1Call {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

impl L1Call {
    pub fn new(to: Address, data: Bytes) -> Self {
        Self {
            to,
            data,
            value: U256::zero(),
        }
    }
}

/// Call against an L2 contract function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L2Call {
    pub contract: Fr,
    pub function: String,
    pub args: Vec<Fr>,
}

impl L2Call {
    pub fn new(contract: Fr, function: &str, args: Vec<Fr>) -> Self {
        Self {
            contract,
            function: function.to_string(),
            args,
        }
    }
}

/// Mined L2 transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L2TxReceipt {
    pub tx_hash: String,
    pub block_number: u64,
}

/// Membership proof of a message in a message tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionWitness {
    pub leaf_index: u64,
    pub sibling_path: Vec<Fr>,
}

/// Settlement chain client
#[async_trait]
pub trait L1Client: Send + Sync {
    /// Sign and broadcast, returning the transaction hash
    async fn send_transaction(&self, call: L1Call) -> BridgeResult<H256>;

    /// Wait for a successful receipt; `Timeout` when `timeout` elapses first
    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        timeout: Duration,
    ) -> BridgeResult<TransactionReceipt>;

    /// Logs with `topic0` emitted by `contract` from `from_block` to latest
    async fn query_events(
        &self,
        contract: Address,
        topic0: H256,
        from_block: u64,
    ) -> BridgeResult<Vec<Log>>;

    /// Execute a view call
    async fn read_contract(&self, call: L1Call) -> BridgeResult<Bytes>;

    async fn get_block_number(&self) -> BridgeResult<u64>;

    /// Timestamp of the latest block
    async fn get_timestamp(&self) -> BridgeResult<u64>;
}

/// Read access to the L2 message trees
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn get_block_number(&self) -> BridgeResult<u64>;

    /// L2 block at which an L1 to L2 message entered the message tree
    async fn is_message_included(&self, message_key: &Fr) -> BridgeResult<Option<u64>>;

    /// Witness for an L1 to L2 message as of `at_block`
    async fn get_inclusion_witness(
        &self,
        at_block: u64,
        message_key: &Fr,
    ) -> BridgeResult<Option<InclusionWitness>>;

    /// Witness for an L2 to L1 message emitted in `l2_block`
    async fn get_outbox_witness(
        &self,
        l2_block: u64,
        message: &Fr,
    ) -> BridgeResult<Option<InclusionWitness>>;
}

/// Privacy rollup client with a signing account
#[async_trait]
pub trait L2Client: MessageSource {
    /// Prove and send, returning the transaction hash
    async fn submit_transaction(&self, call: L2Call) -> BridgeResult<String>;

    async fn wait_for_inclusion(
        &self,
        tx_hash: &str,
        timeout: Duration,
    ) -> BridgeResult<L2TxReceipt>;

    /// Run an unconstrained view function
    async fn simulate_view(&self, call: L2Call) -> BridgeResult<Vec<Fr>>;

    /// Timestamp of the latest L2 block
    async fn get_timestamp(&self) -> BridgeResult<u64>;
}

/// Caller identity exposed by the wallet
pub trait SigningProvider: Send + Sync {
    fn l1_address(&self) -> Address;
    fn l2_address(&self) -> Fr;
}

/// Identity known up front
#[derive(Debug, Clone, Copy)]
pub struct StaticIdentity {
    pub l1: Address,
    pub l2: Fr,
}

impl SigningProvider for StaticIdentity {
    fn l1_address(&self) -> Address {
        self.l1
    }

    fn l2_address(&self) -> Fr {
        self.l2
    }
}
