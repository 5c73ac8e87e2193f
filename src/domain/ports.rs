use super::ledger::{ClientId, EntryKind, LedgerEntry};
use super::money::Balance;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Append-only store of ledger entries.
///
/// Implementations must make each append atomic and must not lose concurrent
/// appends. They do not enforce any balance invariant.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn append_entry(&self, entry: LedgerEntry) -> Result<()>;

    /// Sum of all `kind` amounts recorded for `client`, zero when there are none.
    async fn sum_by_kind_for_client(&self, client: ClientId, kind: EntryKind) -> Result<Balance>;

    async fn entries_for_client(&self, client: ClientId) -> Result<Vec<LedgerEntry>>;

    /// Clients with at least one entry, in ascending order.
    async fn clients(&self) -> Result<Vec<ClientId>>;

    /// Drops every entry. Administrative reset, never part of request handling.
    async fn clear(&self) -> Result<()>;
}

/// Key-value store with expiring keys, used as a distributed mutex.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Sets `key` to `value` with the given time-to-live unless the key exists.
    /// Returns whether the key was set.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Deletes `key` only while it still holds `value`. Returns whether it was deleted.
    async fn delete_if_value(&self, key: &str, value: &str) -> Result<bool>;
}

pub type SharedLedgerStore = Arc<dyn LedgerStore>;
pub type SharedLockService = Arc<dyn LockService>;
