//! Concurrent load against a single engine: random deposits and withdrawals
//! for a handful of clients, all in flight at once.

use super::engine::LedgerEngine;
use super::tally::Tally;
use crate::domain::ledger::ClientId;
use crate::domain::money::{Amount, Balance};
use crate::domain::request::Request;
use crate::error::{GuardError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::ops::RangeInclusive;
use tokio::task::JoinSet;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationPlan {
    /// Requests target clients `1..=clients`.
    pub clients: u64,
    pub deposits: usize,
    pub withdrawals: usize,
    pub deposit_range: RangeInclusive<i64>,
    pub withdrawal_range: RangeInclusive<i64>,
    /// Fixes the generated requests; `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for SimulationPlan {
    fn default() -> Self {
        Self {
            clients: 3,
            deposits: 30,
            withdrawals: 30,
            deposit_range: 10..=50,
            withdrawal_range: 40..=100,
            seed: None,
        }
    }
}

impl SimulationPlan {
    /// Deposits first, then withdrawals; submission order is irrelevant since
    /// everything runs concurrently.
    pub fn requests(&self) -> Result<Vec<Request>> {
        if self.clients == 0 {
            return Err(GuardError::Validation(
                "simulation needs at least one client".to_string(),
            ));
        }
        for range in [&self.deposit_range, &self.withdrawal_range] {
            if range.is_empty() || *range.start() <= 0 {
                return Err(GuardError::Validation(format!(
                    "amount range {range:?} must be non-empty and positive"
                )));
            }
        }

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut draw = |range: &RangeInclusive<i64>| -> Result<(ClientId, Amount)> {
            let client = ClientId(rng.gen_range(1..=self.clients));
            let amount = Amount::new(Decimal::from(rng.gen_range(range.clone())))?;
            Ok((client, amount))
        };

        let mut requests = Vec::with_capacity(self.deposits + self.withdrawals);
        for _ in 0..self.deposits {
            let (client, amount) = draw(&self.deposit_range)?;
            requests.push(Request::deposit(client, amount));
        }
        for _ in 0..self.withdrawals {
            let (client, amount) = draw(&self.withdrawal_range)?;
            requests.push(Request::withdrawal(client, amount));
        }
        Ok(requests)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationReport {
    pub tally: Tally,
    pub balances: Vec<(ClientId, Balance)>,
}

/// Clears the ledger and the planned clients' locks, submits every planned
/// request at once and reports the final balances.
pub async fn simulate(engine: &LedgerEngine, plan: &SimulationPlan) -> Result<SimulationReport> {
    let requests = plan.requests()?;
    engine.reset().await?;
    // A lock left by an earlier run would stall this one until its lease ran out.
    for client in (1..=plan.clients).map(ClientId) {
        engine.withdrawals().force_unlock(client).await?;
    }

    let mut tasks = JoinSet::new();
    for request in requests {
        let engine = engine.clone();
        tasks.spawn(async move { engine.process(request).await });
    }

    let mut tally = Tally::default();
    while let Some(joined) = tasks.join_next().await {
        tally.record(&joined?);
    }

    let balances = engine.balances().await?;
    info!(
        deposits = tally.deposits,
        accepted = tally.accepted,
        rejected = tally.rejected,
        lock_unavailable = tally.lock_unavailable,
        failed = tally.failed,
        "simulation finished"
    );
    Ok(SimulationReport { tally, balances })
}
