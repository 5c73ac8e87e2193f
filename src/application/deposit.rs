use crate::domain::ledger::{ClientId, LedgerEntry};
use crate::domain::money::Amount;
use crate::domain::ports::SharedLedgerStore;
use crate::error::Result;
use tracing::info;

/// Appends credit entries. Takes no lock: a deposit can only add headroom.
#[derive(Clone)]
pub struct DepositRecorder {
    ledger: SharedLedgerStore,
}

impl DepositRecorder {
    pub fn new(ledger: SharedLedgerStore) -> Self {
        Self { ledger }
    }

    pub async fn deposit(&self, client: ClientId, amount: Amount) -> Result<LedgerEntry> {
        let entry = LedgerEntry::credit(client, amount);
        self.ledger.append_entry(entry.clone()).await?;
        info!(%client, %amount, "deposit recorded");
        Ok(entry)
    }
}
