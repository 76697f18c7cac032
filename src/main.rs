//! Private Lending Bridge watcher
//!
//! Runs bridge reconciliation for one identity: token portal deposits on L1 are
//! matched against the secrets held in the store and classified by L2
//! readiness. Results are served over the status API and as metrics.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};

use private_lending_bridge::api::{self, AppState, BridgeSnapshot, ReadinessProbe};
use private_lending_bridge::chain::{EthersL1Client, L1Client, MessageSource, NodeRpcClient};
use private_lending_bridge::commitment::CommitmentEngine;
use private_lending_bridge::config::Settings;
use private_lending_bridge::field::Fr;
use private_lending_bridge::metrics;
use private_lending_bridge::reconcile::{BridgeScanner, BridgeStatus};
use private_lending_bridge::retry::RetryPolicy;
use private_lending_bridge::store::PgSecretStore;
use private_lending_bridge::tracker::MessageTracker;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Private Lending Bridge watcher v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    let owner = settings.owner_address()?;
    info!(
        "Loaded configuration for instance {} (L1 chain {})",
        settings.client.instance_id, settings.l1.chain_id
    );

    // Initialize database connection
    let store = Arc::new(
        PgSecretStore::open(&settings.database)
            .await
            .context("Failed to open secret store")?,
    );
    store.run_migrations().await?;
    info!("Secret store ready");

    // Chain clients; the watcher never signs
    let l1 = Arc::new(EthersL1Client::new(
        settings.l1.clone(),
        None,
        settings.client.poll_interval(),
    )?);
    let l2 = Arc::new(NodeRpcClient::new(&settings.l2.node_urls)?);
    info!("Chain clients initialized");

    let retry = RetryPolicy::from(&settings.client);
    let tracker = MessageTracker::new(l2.clone(), settings.client.poll_interval(), retry);
    let start_block = store
        .get_checkpoint(&owner)
        .await?
        .unwrap_or(settings.l1.scan_from_block);
    let scanner = Arc::new(BridgeScanner::new(
        l1.clone() as Arc<dyn L1Client>,
        tracker,
        settings.token_portal()?,
        CommitmentEngine::default(),
        retry,
        start_block,
    ));
    info!("Reconciliation starts at L1 block {}", start_block);

    let snapshot = Arc::new(RwLock::new(BridgeSnapshot::default()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start API server
    let api_handle = tokio::spawn({
        let state = AppState {
            probe: Arc::new(WatcherProbe {
                store: store.clone(),
                l1: l1.clone(),
                l2: l2.clone(),
            }),
            snapshot: snapshot.clone(),
        };
        let config = settings.api.clone();
        let mut rx = shutdown_rx.clone();
        async move {
            let shutdown = async move {
                let _ = rx.changed().await;
            };
            if let Err(e) = api::run_server(config, state, shutdown).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Reconciliation loop
    let scan_handle = tokio::spawn({
        let scanner = scanner.clone();
        let store = store.clone();
        let snapshot = snapshot.clone();
        let l2 = l2.clone();
        let interval = Duration::from_secs(settings.client.scan_interval_secs.max(1));
        let mut rx = shutdown_rx.clone();
        async move {
            let mut ticker = tokio::time::interval(interval);
            let mut last_status: HashMap<Fr, BridgeStatus> = HashMap::new();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = rx.changed() => break,
                }

                let result = match scanner.scan_incremental(&*store, &owner).await {
                    Ok(result) => result,
                    Err(e) => {
                        error!("Reconciliation scan failed: {}", e);
                        continue;
                    }
                };

                let mut current = HashMap::new();
                for bridge in &result.bridges {
                    let key = bridge.message_key();
                    if bridge.status == BridgeStatus::Ready
                        && last_status.get(&key) == Some(&BridgeStatus::Pending)
                    {
                        info!(
                            "Bridge {} ({} tokens) is ready to claim",
                            key, bridge.deposit.amount
                        );
                    }
                    current.insert(key, bridge.status);
                }
                last_status = current;

                metrics::record_scan(&result);
                metrics::record_block_height("l1", result.to_block);
                if let Ok(block) = l2.get_block_number().await {
                    metrics::record_block_height("l2", block);
                }
                *snapshot.write().await = BridgeSnapshot::from_scan(&result);

                if let Err(e) = store.save_checkpoint(&owner, scanner.checkpoint()).await {
                    warn!("Failed to persist scan checkpoint: {}", e);
                }
            }
        }
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let store = store.clone();
        let l1 = l1.clone();
        let l2 = l2.clone();
        let interval = settings.client.health_check_interval_secs.max(1);
        async move {
            loop {
                tokio::time::sleep(Duration::from_secs(interval)).await;

                let mut healthy = true;
                if !l1.health_check().await {
                    warn!("L1 health check failed");
                    metrics::record_health_check_failure("l1");
                    healthy = false;
                }
                if !l2.health_check().await {
                    warn!("L2 node health check failed");
                    metrics::record_health_check_failure("l2");
                    healthy = false;
                }
                if let Err(e) = store.health_check().await {
                    warn!("Database health check failed: {}", e);
                    metrics::record_health_check_failure("database");
                    healthy = false;
                }

                if healthy {
                    metrics::record_health_check();
                }
            }
        }
    });

    info!("Private Lending Bridge watcher is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown
    let _ = shutdown_tx.send(true);
    if let Err(e) = scan_handle.await {
        warn!("Reconciliation loop ended abnormally: {}", e);
    }
    if let Err(e) = store.save_checkpoint(&owner, scanner.checkpoint()).await {
        warn!("Failed to persist scan checkpoint: {}", e);
    }
    health_handle.abort();
    if let Err(e) = api_handle.await {
        warn!("API server ended abnormally: {}", e);
    }
    store.close().await;

    info!("Private Lending Bridge watcher stopped");
    Ok(())
}

/// Dependencies reported by `/ready`
struct WatcherProbe {
    store: Arc<PgSecretStore>,
    l1: Arc<EthersL1Client>,
    l2: Arc<NodeRpcClient>,
}

#[async_trait]
impl ReadinessProbe for WatcherProbe {
    async fn check(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("database", self.store.health_check().await.is_ok()),
            ("l1", self.l1.health_check().await),
            ("l2", self.l2.health_check().await),
        ]
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,private_lending_bridge=debug,sqlx=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
