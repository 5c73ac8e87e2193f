use super::balance::BalanceQuery;
use super::deposit::DepositRecorder;
use super::withdrawal::{WithdrawalAuthorizer, WithdrawalOutcome};
use crate::config::GuardConfig;
use crate::domain::ledger::{ClientId, LedgerEntry};
use crate::domain::money::Balance;
use crate::domain::ports::{SharedLedgerStore, SharedLockService};
use crate::domain::request::{Request, RequestType};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Deposited(LedgerEntry),
    Withdrawal(WithdrawalOutcome),
}

/// The entry point intake adapters talk to.
///
/// `LedgerEngine` bundles the deposit recorder, the withdrawal authorizer and the
/// balance query over one ledger and one lock service. It is cheap to clone and
/// every clone shares the same stores, so requests can be fanned out to tasks.
/// Engines built over the same stores behave like replicas of one service.
#[derive(Clone)]
pub struct LedgerEngine {
    ledger: SharedLedgerStore,
    deposits: DepositRecorder,
    withdrawals: WithdrawalAuthorizer,
    balances: BalanceQuery,
}

impl LedgerEngine {
    /// Creates a new `LedgerEngine`.
    ///
    /// # Arguments
    ///
    /// * `ledger` - The store holding credit and debit entries.
    /// * `locks` - The lock service coordinating withdrawals across replicas.
    /// * `config` - Lease, retry and deadline settings.
    pub fn new(ledger: SharedLedgerStore, locks: SharedLockService, config: &GuardConfig) -> Self {
        Self {
            deposits: DepositRecorder::new(ledger.clone()),
            withdrawals: WithdrawalAuthorizer::new(ledger.clone(), locks, config),
            balances: BalanceQuery::new(ledger.clone()),
            ledger,
        }
    }

    pub async fn process(&self, request: Request) -> Result<RequestOutcome> {
        match request.r#type {
            RequestType::Deposit => self
                .deposits
                .deposit(request.client, request.amount)
                .await
                .map(RequestOutcome::Deposited),
            RequestType::Withdrawal => self
                .withdrawals
                .withdraw(request.client, request.amount)
                .await
                .map(RequestOutcome::Withdrawal),
        }
    }

    pub fn deposits(&self) -> &DepositRecorder {
        &self.deposits
    }

    pub fn withdrawals(&self) -> &WithdrawalAuthorizer {
        &self.withdrawals
    }

    pub async fn balance(&self, client: ClientId) -> Result<Balance> {
        self.balances.balance(client).await
    }

    /// Current balance of every client present in the ledger.
    pub async fn balances(&self) -> Result<Vec<(ClientId, Balance)>> {
        let mut balances = Vec::new();
        for client in self.ledger.clients().await? {
            balances.push((client, self.balances.balance(client).await?));
        }
        Ok(balances)
    }

    pub async fn entries(&self, client: ClientId) -> Result<Vec<LedgerEntry>> {
        self.ledger.entries_for_client(client).await
    }

    /// Wipes the ledger. Administrative reset used before a simulation run.
    pub async fn reset(&self) -> Result<()> {
        self.ledger.clear().await
    }
}
