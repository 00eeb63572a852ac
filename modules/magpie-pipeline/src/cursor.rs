use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use magpie_common::{Cursor, MagpieError, Result};

use crate::store::StateStore;

const CURSOR_KEY: &str = "mentions:cursor";
const PROCESSED_PREFIX: &str = "mentions:processed:";

/// Default retention for processed-event ids. Events older than this are
/// operationally irrelevant; expiring them bounds memory at the cost of a
/// small reprocessing risk.
pub const DEFAULT_PROCESSED_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Typed repository for the pagination cursor and the processed-id set.
///
/// Sole writer of both. The cursor only moves forward: `advance` is a
/// compare-and-swap against the value read at fetch start, so a stale
/// poller gets `CursorConflict` instead of silently rewinding progress.
pub struct CursorStore {
    store: Arc<dyn StateStore>,
    processed_ttl: Duration,
}

impl CursorStore {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            processed_ttl: DEFAULT_PROCESSED_TTL,
        }
    }

    pub fn with_processed_ttl(mut self, ttl: Duration) -> Self {
        self.processed_ttl = ttl;
        self
    }

    pub async fn cursor(&self) -> Result<Option<Cursor>> {
        match self.store.get(CURSOR_KEY).await? {
            Some(raw) => {
                let cursor = serde_json::from_str(&raw)
                    .map_err(|e| MagpieError::Store(format!("corrupt cursor: {e}")))?;
                Ok(Some(cursor))
            }
            None => Ok(None),
        }
    }

    /// Advance to the platform-issued `next_value`, affirming that it
    /// derives from a fetch that started at `base`. Rejects stale bases.
    pub async fn advance(&self, base: Option<&Cursor>, next_value: &str) -> Result<Cursor> {
        let next = Cursor {
            value: next_value.to_string(),
            updated_at: Utc::now(),
        };
        let expected = base
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| MagpieError::Store(e.to_string()))?;
        let serialized =
            serde_json::to_string(&next).map_err(|e| MagpieError::Store(e.to_string()))?;

        let swapped = self
            .store
            .put_if_equals(CURSOR_KEY, expected.as_deref(), &serialized)
            .await?;
        if !swapped {
            let stored = self.cursor().await?;
            return Err(MagpieError::CursorConflict {
                expected: base.map(|c| c.value.clone()),
                stored: stored.map(|c| c.value),
            });
        }
        debug!(cursor = next.value.as_str(), "Cursor advanced");
        Ok(next)
    }

    /// Manual operator override. The only sanctioned way to rewind.
    pub async fn force_set(&self, value: &str) -> Result<Cursor> {
        let cursor = Cursor {
            value: value.to_string(),
            updated_at: Utc::now(),
        };
        let serialized =
            serde_json::to_string(&cursor).map_err(|e| MagpieError::Store(e.to_string()))?;
        self.store.put(CURSOR_KEY, &serialized, None).await?;
        info!(cursor = value, "Cursor manually overridden");
        Ok(cursor)
    }

    pub async fn is_processed(&self, event_id: &str) -> Result<bool> {
        self.store.exists(&processed_key(event_id)).await
    }

    /// Idempotent; re-marking resets the TTL to its full duration.
    pub async fn mark_processed(&self, event_id: &str) -> Result<()> {
        let marked_at = Utc::now().to_rfc3339();
        self.store
            .put(&processed_key(event_id), &marked_at, Some(self.processed_ttl))
            .await
    }

    /// Drop processed-set entries past their TTL. Backends already hide
    /// expired entries from reads; this reclaims the storage.
    pub async fn expire_old(&self) -> Result<u64> {
        self.store.purge_expired().await
    }

    /// Currently live processed ids, for the operator stats surface.
    pub async fn processed_ids(&self) -> Result<Vec<String>> {
        let keys = self.store.keys_with_prefix(PROCESSED_PREFIX).await?;
        Ok(keys
            .into_iter()
            .map(|k| k[PROCESSED_PREFIX.len()..].to_string())
            .collect())
    }
}

fn processed_key(event_id: &str) -> String {
    format!("{PROCESSED_PREFIX}{event_id}")
}
