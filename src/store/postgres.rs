//! PostgreSQL secret store

use super::{SecretRecord, SecretStore};
use crate::config::DatabaseConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::field::Fr;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info};

/// Secret store backed by PostgreSQL
///
/// Writes for one owner are serialized with a transaction-scoped advisory lock.
pub struct PgSecretStore {
    pool: PgPool,
}

impl PgSecretStore {
    /// Connect and return an open handle
    pub async fn open(config: &DatabaseConfig) -> BridgeResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        info!("Secret store connected");
        Ok(Self { pool })
    }

    /// Release all connections
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Secret store closed");
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> BridgeResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bridge_secrets (
                key VARCHAR(64) PRIMARY KEY,
                owner VARCHAR(64) NOT NULL,
                kind VARCHAR(16) NOT NULL,
                secret_hash VARCHAR(64) NOT NULL,
                message_key VARCHAR(64),
                record JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_bridge_secrets_owner
            ON bridge_secrets (owner, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scan_checkpoints (
                owner VARCHAR(64) PRIMARY KEY,
                block_number BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> BridgeResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Last L1 block scanned for `owner`
    pub async fn get_checkpoint(&self, owner: &Fr) -> BridgeResult<Option<u64>> {
        let row = sqlx::query("SELECT block_number FROM scan_checkpoints WHERE owner = $1")
            .bind(owner.to_key())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get::<i64, _>("block_number") as u64))
    }

    pub async fn save_checkpoint(&self, owner: &Fr, block_number: u64) -> BridgeResult<()> {
        sqlx::query(
            r#"
            INSERT INTO scan_checkpoints (owner, block_number, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (owner)
            DO UPDATE SET block_number = $2, updated_at = NOW()
            "#,
        )
        .bind(owner.to_key())
        .bind(block_number as i64)
        .execute(&self.pool)
        .await?;

        debug!("Saved scan checkpoint for {}: block {}", owner, block_number);
        Ok(())
    }
}

fn decode_record(value: serde_json::Value) -> BridgeResult<SecretRecord> {
    serde_json::from_value(value).map_err(|e| BridgeError::Store(format!("corrupt record: {}", e)))
}

#[async_trait]
impl SecretStore for PgSecretStore {
    async fn get(&self, key: &str) -> BridgeResult<Option<SecretRecord>> {
        let row = sqlx::query("SELECT record FROM bridge_secrets WHERE key = $1")
            .bind(key.to_ascii_lowercase())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| decode_record(r.get("record"))).transpose()
    }

    async fn put(&self, mut record: SecretRecord) -> BridgeResult<()> {
        record.key = record.key.to_ascii_lowercase();
        let value = serde_json::to_value(&record)
            .map_err(|e| BridgeError::Store(format!("encode record: {}", e)))?;
        let owner = record.owner.to_key();

        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&owner)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO bridge_secrets
                (key, owner, kind, secret_hash, message_key, record, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (key)
            DO UPDATE SET message_key = $5, record = $6, updated_at = $8
            "#,
        )
        .bind(&record.key)
        .bind(&owner)
        .bind(record.kind.as_str())
        .bind(record.secret_hash.to_key())
        .bind(record.message_key_normalized())
        .bind(value)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Stored {} secret {}", record.kind.as_str(), record.key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> BridgeResult<()> {
        sqlx::query("DELETE FROM bridge_secrets WHERE key = $1")
            .bind(key.to_ascii_lowercase())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_all(&self, owner: &Fr) -> BridgeResult<Vec<SecretRecord>> {
        let rows = sqlx::query(
            "SELECT record FROM bridge_secrets WHERE owner = $1 ORDER BY created_at",
        )
        .bind(owner.to_key())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| decode_record(row.get("record")))
            .collect()
    }
}
