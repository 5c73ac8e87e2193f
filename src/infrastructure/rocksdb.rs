use crate::domain::ledger::{ClientId, EntryKind, LedgerEntry};
use crate::domain::money::Balance;
use crate::domain::ports::LedgerStore;
use crate::error::{GuardError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Column Family holding ledger entries.
pub const CF_LEDGER: &str = "ledger";

/// A persistent ledger backed by RocksDB.
///
/// Entries live in the `ledger` column family under `client_id (big endian) ++ entry id`,
/// so one client's entries are contiguous and a prefix scan yields them all. Every
/// entry has its own key, which makes concurrent appends independent puts.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDbLedgerStore {
    db: Arc<DB>,
}

impl RocksDbLedgerStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the `ledger` column family exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_ledger = ColumnFamilyDescriptor::new(CF_LEDGER, Options::default());
        let db = DB::open_cf_descriptors(&opts, path, vec![cf_ledger]).map_err(GuardError::ledger)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn ledger_cf(&self) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(CF_LEDGER)
            .ok_or_else(|| GuardError::ledger("ledger column family not found"))
    }

    fn entry_key(client: ClientId, id: Uuid) -> Vec<u8> {
        let mut key = Vec::with_capacity(24);
        key.extend_from_slice(&client.0.to_be_bytes());
        key.extend_from_slice(id.as_bytes());
        key
    }

    fn client_of(key: &[u8]) -> Result<ClientId> {
        let prefix: [u8; 8] = key
            .get(..8)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| GuardError::ledger("malformed ledger key"))?;
        Ok(ClientId(u64::from_be_bytes(prefix)))
    }

    fn scan_client(&self, client: ClientId) -> Result<Vec<LedgerEntry>> {
        let cf = self.ledger_cf()?;
        let prefix = client.0.to_be_bytes();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_slice(), Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(GuardError::ledger)?;
            if !key.starts_with(&prefix) {
                break;
            }
            let entry: LedgerEntry = serde_json::from_slice(&value).map_err(GuardError::ledger)?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

#[async_trait]
impl LedgerStore for RocksDbLedgerStore {
    async fn append_entry(&self, entry: LedgerEntry) -> Result<()> {
        let cf = self.ledger_cf()?;
        let key = Self::entry_key(entry.client, entry.id);
        let value = serde_json::to_vec(&entry).map_err(GuardError::ledger)?;
        self.db.put_cf(cf, key, value).map_err(GuardError::ledger)
    }

    async fn sum_by_kind_for_client(&self, client: ClientId, kind: EntryKind) -> Result<Balance> {
        Ok(self
            .scan_client(client)?
            .into_iter()
            .filter(|entry| entry.kind == kind)
            .map(|entry| Balance::from(entry.amount))
            .sum())
    }

    async fn entries_for_client(&self, client: ClientId) -> Result<Vec<LedgerEntry>> {
        let mut entries = self.scan_client(client)?;
        entries.sort_by_key(|entry| entry.created_at);
        Ok(entries)
    }

    async fn clients(&self) -> Result<Vec<ClientId>> {
        let cf = self.ledger_cf()?;
        let mut clients: Vec<ClientId> = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _value) = item.map_err(GuardError::ledger)?;
            let client = Self::client_of(&key)?;
            // Keys are sorted, so duplicates are adjacent.
            if clients.last() != Some(&client) {
                clients.push(client);
            }
        }
        Ok(clients)
    }

    async fn clear(&self) -> Result<()> {
        let cf = self.ledger_cf()?;
        let mut batch = WriteBatch::default();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _value) = item.map_err(GuardError::ledger)?;
            batch.delete_cf(cf, key);
        }
        self.db.write(batch).map_err(GuardError::ledger)
    }
}
