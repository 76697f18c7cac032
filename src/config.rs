//! Configuration management for the bridge client
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::error::{BridgeError, BridgeResult};
use crate::field::Fr;

use anyhow::{Context, Result};
use ethers::types::Address;
use lazy_static::lazy_static;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub client: ClientConfig,
    pub l1: L1Config,
    pub l2: L2Config,
    #[serde(default)]
    pub fees: FeeConfig,
    #[serde(default)]
    pub deadline: DeadlineConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub instance_id: String,
    pub poll_interval_ms: u64,
    pub scan_interval_secs: u64,
    pub message_wait_ceiling_secs: u64,
    pub receipt_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    pub health_check_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct L1Config {
    pub chain_id: u64,
    pub rpc_urls: Vec<String>,
    pub lending_portal_address: String,
    pub token_portal_address: String,
    #[serde(default)]
    pub scan_from_block: u64,
    #[serde(default = "default_log_chunk_size")]
    pub log_chunk_size: u64,
    pub private_key_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct L2Config {
    pub node_urls: Vec<String>,
    pub program_address: String,
    pub owner_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeeConfig {
    pub deposit_fee_bps: u32,
    #[serde(default)]
    pub min_fee: u128,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            deposit_fee_bps: 10,
            min_fee: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeadlineConfig {
    pub max_window_secs: u64,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            max_window_secs: 7 * 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

fn default_max_retry_delay_ms() -> u64 {
    30_000
}

fn default_log_chunk_size() -> u64 {
    1_000
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("BRIDGE_CLIENT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.l1.rpc_urls.is_empty() {
            anyhow::bail!("L1 has no RPC URLs configured");
        }
        if self.l2.node_urls.is_empty() {
            anyhow::bail!("L2 has no node URLs configured");
        }
        self.lending_portal()?;
        self.token_portal()?;
        self.program_address()?;
        self.owner_address()?;

        if self.fees.deposit_fee_bps >= 10_000 {
            anyhow::bail!(
                "deposit_fee_bps must be below 10000, got {}",
                self.fees.deposit_fee_bps
            );
        }
        if self.client.message_wait_ceiling_secs == 0 {
            anyhow::bail!("message_wait_ceiling_secs must be positive");
        }
        if self.l1.private_key_env.is_none() {
            tracing::warn!("No L1 private key configured - running read-only");
        }

        Ok(())
    }

    pub fn lending_portal(&self) -> BridgeResult<Address> {
        parse_address("l1.lending_portal_address", &self.l1.lending_portal_address)
    }

    pub fn token_portal(&self) -> BridgeResult<Address> {
        parse_address("l1.token_portal_address", &self.l1.token_portal_address)
    }

    pub fn program_address(&self) -> BridgeResult<Fr> {
        parse_field("l2.program_address", &self.l2.program_address)
    }

    pub fn owner_address(&self) -> BridgeResult<Fr> {
        parse_field("l2.owner_address", &self.l2.owner_address)
    }
}

impl ClientConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn message_wait_ceiling(&self) -> Duration {
        Duration::from_secs(self.message_wait_ceiling_secs)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }
}

fn parse_address(name: &str, value: &str) -> BridgeResult<Address> {
    Address::from_str(value)
        .map_err(|e| BridgeError::Config(format!("Invalid {} {:?}: {}", name, value, e)))
}

fn parse_field(name: &str, value: &str) -> BridgeResult<Fr> {
    Fr::from_str(value).map_err(|e| BridgeError::Config(format!("Invalid {}: {}", name, e)))
}

lazy_static! {
    static ref ENV_VAR: regex::Regex =
        regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static regex");
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
