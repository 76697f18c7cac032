//! Settlement chain client with multi-RPC support and automatic failover

use super::{L1Call, L1Client};
use crate::config::L1Config;
use crate::error::{classify_revert, BridgeError, BridgeResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Multi-provider L1 client with automatic failover
pub struct EthersL1Client {
    /// Chain configuration
    config: L1Config,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    /// Wallet for signing, absent in read-only mode
    wallet: Option<LocalWallet>,
    /// Receipt polling interval
    poll_interval: Duration,
}

impl EthersL1Client {
    /// Create a new L1 client
    pub fn new(
        config: L1Config,
        wallet: Option<LocalWallet>,
        poll_interval: Duration,
    ) -> BridgeResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(BridgeError::Config(format!(
                "No valid RPC providers for chain {}",
                config.chain_id
            )));
        }

        let wallet = wallet.map(|w| w.with_chain_id(config.chain_id));
        if let Some(ref w) = wallet {
            info!("L1 client initialized with wallet: {:?}", w.address());
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
            wallet,
            poll_interval,
        })
    }

    /// Load wallet from the configured environment variable
    pub fn load_wallet(config: &L1Config) -> BridgeResult<Option<LocalWallet>> {
        let Some(ref env_name) = config.private_key_env else {
            return Ok(None);
        };

        match std::env::var(env_name) {
            Ok(key) => key
                .parse::<LocalWallet>()
                .map(Some)
                .map_err(|e| BridgeError::Config(format!("Invalid private key: {}", e))),
            Err(_) => Err(BridgeError::Config(format!(
                "Private key variable {} is not set",
                env_name
            ))),
        }
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Health check failed for chain {}: {}", self.config.chain_id, e);
                false
            }
        }
    }

    /// Get chain ID
    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    /// Signing address, if any
    pub fn sender(&self) -> Option<Address> {
        self.wallet.as_ref().map(|w| w.address())
    }

    /// Logs for a single bounded range, rotating providers on failure
    async fn get_logs(&self, filter: &Filter) -> BridgeResult<Vec<Log>> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_logs(filter).await {
                Ok(logs) => return Ok(logs),
                Err(e) => {
                    warn!("Failed to get logs from chain {}: {}", self.config.chain_id, e);
                    self.failover();
                }
            }
        }

        Err(BridgeError::Network(format!(
            "All providers failed to get logs on chain {}",
            self.config.chain_id
        )))
    }
}

/// Map a provider error onto the error taxonomy
pub fn classify_provider_error(message: &str, context: &str) -> BridgeError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("user rejected") || lower.contains("user denied") {
        BridgeError::UserRejected(message.to_string())
    } else if lower.contains("revert") {
        classify_revert(message, context)
    } else if lower.contains("insufficient funds") {
        BridgeError::Validation(format!("insufficient funds for {}: {}", context, message))
    } else {
        BridgeError::Network(message.to_string())
    }
}

#[async_trait]
impl L1Client for EthersL1Client {
    async fn send_transaction(&self, call: L1Call) -> BridgeResult<H256> {
        let wallet = self
            .wallet
            .as_ref()
            .ok_or_else(|| BridgeError::Config("L1 client is read-only".to_string()))?;

        let request = TransactionRequest::new()
            .from(wallet.address())
            .to(call.to)
            .data(call.data)
            .value(call.value)
            .chain_id(self.config.chain_id);
        let mut tx: TypedTransaction = request.into();

        self.http()
            .fill_transaction(&mut tx, None)
            .await
            .map_err(|e| classify_provider_error(&e.to_string(), "fill transaction"))?;

        let signature = wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| BridgeError::UserRejected(e.to_string()))?;
        let raw = tx.rlp_signed(&signature);

        let pending = self
            .http()
            .send_raw_transaction(raw)
            .await
            .map_err(|e| classify_provider_error(&e.to_string(), "send transaction"))?;

        let tx_hash = pending.tx_hash();
        info!("Transaction sent on chain {}: {:?}", self.config.chain_id, tx_hash);
        Ok(tx_hash)
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        timeout: Duration,
    ) -> BridgeResult<TransactionReceipt> {
        let started = Instant::now();

        loop {
            match self.http().get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    if receipt.status == Some(1.into()) {
                        return Ok(receipt);
                    }
                    return Err(BridgeError::Reverted(format!(
                        "transaction {:?} reverted on chain {}",
                        tx_hash, self.config.chain_id
                    )));
                }
                Ok(None) => {
                    debug!("Receipt for {:?} not yet available", tx_hash);
                }
                Err(e) => {
                    warn!("Failed to get receipt for {:?}: {}", tx_hash, e);
                    self.failover();
                }
            }

            if started.elapsed() >= timeout {
                return Err(BridgeError::Timeout {
                    operation: format!("receipt for {:?}", tx_hash),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn query_events(
        &self,
        contract: Address,
        topic0: H256,
        from_block: u64,
    ) -> BridgeResult<Vec<Log>> {
        let latest = self.get_block_number().await?;
        let mut logs = Vec::new();
        let mut start = from_block;
        let chunk = self.config.log_chunk_size.max(1);

        // Calculate block ranges (limit to prevent huge queries)
        while start <= latest {
            let end = std::cmp::min(latest, start + chunk - 1);

            debug!(
                "Chain {}: querying logs {} to {}",
                self.config.chain_id, start, end
            );

            let filter = Filter::new()
                .address(contract)
                .topic0(topic0)
                .from_block(start)
                .to_block(end);

            logs.extend(self.get_logs(&filter).await?);
            start = end + 1;
        }

        Ok(logs)
    }

    async fn read_contract(&self, call: L1Call) -> BridgeResult<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new().to(call.to).data(call.data).into();

        self.http()
            .call(&tx, None)
            .await
            .map_err(|e| classify_provider_error(&e.to_string(), "contract read"))
    }

    async fn get_block_number(&self) -> BridgeResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(BridgeError::Network(format!(
            "All providers failed on chain {}",
            self.config.chain_id
        )))
    }

    async fn get_timestamp(&self) -> BridgeResult<u64> {
        let block = self
            .http()
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| BridgeError::Network(e.to_string()))?
            .ok_or_else(|| BridgeError::Network("No latest block".to_string()))?;

        Ok(block.timestamp.as_u64())
    }
}
