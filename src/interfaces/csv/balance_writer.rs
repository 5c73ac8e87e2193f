use crate::domain::ledger::ClientId;
use crate::domain::money::Balance;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct BalanceRow {
    client: u64,
    balance: String,
}

/// Writes `client,balance` rows. Balances are printed without trailing zeros.
pub struct BalanceWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> BalanceWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_balances(
        &mut self,
        balances: impl IntoIterator<Item = (ClientId, Balance)>,
    ) -> Result<()> {
        let mut written = false;
        for (client, balance) in balances {
            self.writer.serialize(BalanceRow {
                client: client.0,
                balance: balance.to_string(),
            })?;
            written = true;
        }
        if !written {
            // serde-driven headers only appear with the first row.
            self.writer.write_record(["client", "balance"])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
