use crate::domain::ledger::{ClientId, EntryKind};
use crate::domain::money::Balance;
use crate::domain::ports::SharedLedgerStore;
use crate::error::Result;

/// Derived balance read: credits minus debits, recomputed on every call.
///
/// Credits are read before debits. Debits only change under the client's
/// withdrawal lock and credits only grow, so a read taken while holding that
/// lock can underestimate the headroom but never overestimate it.
#[derive(Clone)]
pub struct BalanceQuery {
    ledger: SharedLedgerStore,
}

impl BalanceQuery {
    pub fn new(ledger: SharedLedgerStore) -> Self {
        Self { ledger }
    }

    pub async fn balance(&self, client: ClientId) -> Result<Balance> {
        let credits = self
            .ledger
            .sum_by_kind_for_client(client, EntryKind::Credit)
            .await?;
        let debits = self
            .ledger
            .sum_by_kind_for_client(client, EntryKind::Debit)
            .await?;
        Ok(credits - debits)
    }
}
