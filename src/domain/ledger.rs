use super::money::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Prefix of the per-client lock key guarding withdrawals.
pub const WITHDRAW_LOCK_PREFIX: &str = "withdraw_lock_";

/// Opaque client identifier. Groups ledger entries; not a stored entity itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub u64);

impl ClientId {
    /// Key of the distributed lock serializing this client's withdrawals.
    pub fn withdraw_lock_key(&self) -> String {
        format!("{WITHDRAW_LOCK_PREFIX}{}", self.0)
    }

    /// Inverse of [`ClientId::withdraw_lock_key`].
    pub fn from_withdraw_lock_key(key: &str) -> Option<Self> {
        key.strip_prefix(WITHDRAW_LOCK_PREFIX)?.parse().ok().map(Self)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Credit,
    Debit,
}

/// One immutable movement in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub client: ClientId,
    pub amount: Amount,
    pub kind: EntryKind,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn credit(client: ClientId, amount: Amount) -> Self {
        Self::new(client, amount, EntryKind::Credit)
    }

    pub fn debit(client: ClientId, amount: Amount) -> Self {
        Self::new(client, amount, EntryKind::Debit)
    }

    fn new(client: ClientId, amount: Amount, kind: EntryKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            client,
            amount,
            kind,
            created_at: Utc::now(),
        }
    }
}
