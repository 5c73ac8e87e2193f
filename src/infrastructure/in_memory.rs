use crate::domain::ledger::{ClientId, EntryKind, LedgerEntry};
use crate::domain::money::Balance;
use crate::domain::ports::{LedgerStore, LockService};
use crate::error::{GuardError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

/// A thread-safe in-memory ledger.
///
/// Uses `Arc<RwLock<HashMap<ClientId, Vec<LedgerEntry>>>>`; clones share the same entries,
/// which is how several engines in one process stand in for replicas sharing a database.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    entries: Arc<RwLock<HashMap<ClientId, Vec<LedgerEntry>>>>,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn append_entry(&self, entry: LedgerEntry) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.entry(entry.client).or_default().push(entry);
        Ok(())
    }

    async fn sum_by_kind_for_client(&self, client: ClientId, kind: EntryKind) -> Result<Balance> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&client)
            .into_iter()
            .flatten()
            .filter(|entry| entry.kind == kind)
            .map(|entry| Balance::from(entry.amount))
            .sum())
    }

    async fn entries_for_client(&self, client: ClientId) -> Result<Vec<LedgerEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.get(&client).cloned().unwrap_or_default())
    }

    async fn clients(&self) -> Result<Vec<ClientId>> {
        let entries = self.entries.read().await;
        let mut clients: Vec<ClientId> = entries.keys().copied().collect();
        clients.sort();
        Ok(clients)
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }
}

struct LockRecord {
    value: String,
    expires_at: Instant,
}

impl LockRecord {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-process lock service with expiring keys.
///
/// Expiry is measured with `tokio::time`, so tests running on a paused clock
/// can step over a lease without sleeping. Expired records are dropped lazily.
#[derive(Default, Clone)]
pub struct InMemoryLockService {
    records: Arc<Mutex<HashMap<String, LockRecord>>>,
}

impl InMemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of the live record under `key`, if any.
    pub async fn holder(&self, key: &str) -> Option<String> {
        let records = self.records.lock().await;
        records
            .get(key)
            .filter(|record| record.is_live(Instant::now()))
            .map(|record| record.value.clone())
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        if ttl.is_zero() {
            return Err(GuardError::Validation(format!(
                "lock {key} needs a time-to-live"
            )));
        }

        let now = Instant::now();
        let mut records = self.records.lock().await;
        if records.get(key).is_some_and(|record| record.is_live(now)) {
            return Ok(false);
        }
        records.insert(
            key.to_string(),
            LockRecord {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.records.lock().await.remove(key);
        Ok(())
    }

    async fn delete_if_value(&self, key: &str, value: &str) -> Result<bool> {
        let now = Instant::now();
        let mut records = self.records.lock().await;
        let (live, owned) = match records.get(key) {
            Some(record) => (record.is_live(now), record.value == value),
            None => return Ok(false),
        };
        if !live || owned {
            records.remove(key);
        }
        Ok(live && owned)
    }
}
