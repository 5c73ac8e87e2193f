#![allow(dead_code)]

use async_trait::async_trait;
use overdraft_guard::application::engine::LedgerEngine;
use overdraft_guard::config::{GuardConfig, RetryPolicy};
use overdraft_guard::domain::ledger::{ClientId, EntryKind, LedgerEntry};
use overdraft_guard::domain::money::Balance;
use overdraft_guard::domain::ports::{LedgerStore, LockService};
use overdraft_guard::error::Result;
use overdraft_guard::infrastructure::in_memory::{InMemoryLedgerStore, InMemoryLockService};
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn generate_csv(path: &Path, rows: &[(&str, u64, &str)]) -> std::result::Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(["type", "client", "amount"])?;
    for (kind, client, amount) in rows {
        wtr.write_record([*kind, &client.to_string(), *amount])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Lots of cheap attempts so that contention in tests ends in a decision,
/// not in `LockUnavailable`.
pub fn patient_config() -> GuardConfig {
    let mut config = GuardConfig::default();
    config.lock.retry = RetryPolicy::fixed(2_000, Duration::from_millis(1));
    config
}

/// Several engines over the same ledger and lock service, like replicas of
/// one deployment sharing a database and a lock server.
pub fn replicas(
    ledger: Arc<dyn LedgerStore>,
    locks: Arc<dyn LockService>,
    config: &GuardConfig,
    count: usize,
) -> Vec<LedgerEngine> {
    (0..count)
        .map(|_| LedgerEngine::new(ledger.clone(), locks.clone(), config))
        .collect()
}

/// Counts withdrawals inside their critical section, per client.
///
/// A withdrawal enters when it reads the client's credits and leaves when it
/// hands the lock back.
#[derive(Default)]
pub struct CriticalSectionMonitor {
    inside: Mutex<HashMap<ClientId, usize>>,
    overlaps: AtomicUsize,
    entries: AtomicUsize,
}

impl CriticalSectionMonitor {
    fn enter(&self, client: ClientId) {
        let mut inside = self.inside.lock().unwrap();
        let count = inside.entry(client).or_default();
        *count += 1;
        if *count > 1 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.entries.fetch_add(1, Ordering::SeqCst);
    }

    fn leave(&self, key: &str) {
        if let Some(client) = ClientId::from_withdraw_lock_key(key) {
            let mut inside = self.inside.lock().unwrap();
            let count = inside.entry(client).or_default();
            *count = count.saturating_sub(1);
        }
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    pub fn entries(&self) -> usize {
        self.entries.load(Ordering::SeqCst)
    }
}

/// In-memory ledger that reports credit reads to a monitor and can stall them
/// to widen the critical section.
#[derive(Clone)]
pub struct MonitoredLedger {
    inner: InMemoryLedgerStore,
    monitor: Arc<CriticalSectionMonitor>,
    stall: Duration,
    scripted: Arc<Mutex<VecDeque<Duration>>>,
}

impl MonitoredLedger {
    /// Every credit read stalls for `stall`.
    pub fn new(monitor: Arc<CriticalSectionMonitor>, stall: Duration) -> Self {
        Self::scripted(monitor, Vec::new(), stall)
    }

    /// Credit reads stall for the scripted durations in order, then for `stall`.
    pub fn scripted(
        monitor: Arc<CriticalSectionMonitor>,
        stalls: Vec<Duration>,
        stall: Duration,
    ) -> Self {
        Self {
            inner: InMemoryLedgerStore::new(),
            monitor,
            stall,
            scripted: Arc::new(Mutex::new(stalls.into())),
        }
    }

    fn next_stall(&self) -> Duration {
        self.scripted
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.stall)
    }
}

#[async_trait]
impl LedgerStore for MonitoredLedger {
    async fn append_entry(&self, entry: LedgerEntry) -> Result<()> {
        self.inner.append_entry(entry).await
    }

    async fn sum_by_kind_for_client(&self, client: ClientId, kind: EntryKind) -> Result<Balance> {
        if kind == EntryKind::Credit {
            self.monitor.enter(client);
            let stall = self.next_stall();
            if !stall.is_zero() {
                tokio::time::sleep(stall).await;
            }
        }
        self.inner.sum_by_kind_for_client(client, kind).await
    }

    async fn entries_for_client(&self, client: ClientId) -> Result<Vec<LedgerEntry>> {
        self.inner.entries_for_client(client).await
    }

    async fn clients(&self) -> Result<Vec<ClientId>> {
        self.inner.clients().await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }
}

/// In-memory lock service that tells the monitor when a lock is handed back,
/// before the key is actually freed.
#[derive(Clone)]
pub struct MonitoredLocks {
    inner: InMemoryLockService,
    monitor: Arc<CriticalSectionMonitor>,
}

impl MonitoredLocks {
    pub fn new(monitor: Arc<CriticalSectionMonitor>) -> Self {
        Self {
            inner: InMemoryLockService::new(),
            monitor,
        }
    }

    pub async fn holder(&self, key: &str) -> Option<String> {
        self.inner.holder(key).await
    }
}

#[async_trait]
impl LockService for MonitoredLocks {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.monitor.leave(key);
        self.inner.delete(key).await
    }

    async fn delete_if_value(&self, key: &str, value: &str) -> Result<bool> {
        self.monitor.leave(key);
        self.inner.delete_if_value(key, value).await
    }
}
