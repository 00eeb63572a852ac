// Durable key/value state with per-key TTL.
//
// One shared store backs every typed repository (cursor, processed set,
// trend snapshots); key conventions live inside the repositories, never in
// callers. Postgres is the production backend; the in-memory store backs
// tests and local runs.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStateStore;
pub use postgres::PgStateStore;

use std::time::Duration;

use async_trait::async_trait;

use magpie_common::Result;

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read a live (non-expired) value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one. `ttl = None` means the
    /// entry never expires; `Some` resets the expiry to the full duration.
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Atomic compare-and-swap: write `value` only if the current live
    /// value equals `expected` (`None` = key absent). Returns whether the
    /// write happened. This is what lets cursor advancement reject stale
    /// bases without a read-modify-write race.
    async fn put_if_equals(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool>;

    /// Whether a live entry exists for `key`.
    async fn exists(&self, key: &str) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Drop entries past their TTL. Returns how many were removed.
    async fn purge_expired(&self) -> Result<u64>;

    /// Live keys starting with `prefix` (operator stats surface).
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}
