use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

use magpie_common::{MagpieError, Result};

use super::StateStore;

/// Postgres-backed StateStore. One table, keyed text values, nullable
/// expiry. Survives process restarts so polling resumes exactly where it
/// left off.
pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(store_err)?;
        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the state table if missing. Idempotent, run at startup.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS magpie_state (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                expires_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        info!("State store migration complete");
        Ok(())
    }
}

#[async_trait]
impl StateStore for PgStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT value FROM magpie_state
             WHERE key = $1 AND (expires_at IS NULL OR expires_at > now())",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.map(|r| r.try_get("value").map_err(store_err)).transpose()
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let ttl_secs = ttl.map(|t| t.as_secs_f64());
        sqlx::query(
            "INSERT INTO magpie_state (key, value, expires_at)
             VALUES ($1, $2, now() + $3 * interval '1 second')
             ON CONFLICT (key) DO UPDATE
             SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(ttl_secs)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn put_if_equals(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool> {
        let result = match expected {
            // Key must currently be absent (or expired).
            None => sqlx::query(
                "INSERT INTO magpie_state (key, value, expires_at)
                 VALUES ($1, $2, NULL)
                 ON CONFLICT (key) DO UPDATE
                 SET value = EXCLUDED.value, expires_at = NULL
                 WHERE magpie_state.expires_at IS NOT NULL
                   AND magpie_state.expires_at <= now()",
            )
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(store_err)?,
            // Key must currently hold the expected live value.
            Some(expected) => sqlx::query(
                "UPDATE magpie_state
                 SET value = $2, expires_at = NULL
                 WHERE key = $1 AND value = $3
                   AND (expires_at IS NULL OR expires_at > now())",
            )
            .bind(key)
            .bind(value)
            .bind(expected)
            .execute(&self.pool)
            .await
            .map_err(store_err)?,
        };
        Ok(result.rows_affected() == 1)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM magpie_state WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM magpie_state WHERE expires_at IS NOT NULL AND expires_at <= now()",
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT key FROM magpie_state
             WHERE key LIKE $1 || '%' AND (expires_at IS NULL OR expires_at > now())
             ORDER BY key",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.into_iter()
            .map(|r| r.try_get("key").map_err(store_err))
            .collect()
    }
}

fn store_err(e: sqlx::Error) -> MagpieError {
    MagpieError::Store(e.to_string())
}
