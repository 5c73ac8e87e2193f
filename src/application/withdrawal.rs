use super::balance::BalanceQuery;
use super::mutex::DistributedMutex;
use crate::config::{COMMIT_MARGIN, GuardConfig};
use crate::domain::ledger::{ClientId, LedgerEntry};
use crate::domain::money::{Amount, Balance};
use crate::domain::ports::{SharedLedgerStore, SharedLockService};
use crate::error::{GuardError, Result};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What happened to the lock after a debit was committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockRelease {
    Released,
    /// Release failed; the record stays until its lease expires and the
    /// client's next withdrawals may wait for it.
    PendingExpiry { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalReceipt {
    pub entry: LedgerEntry,
    pub balance_after: Balance,
    pub release: LockRelease,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WithdrawalOutcome {
    Accepted(WithdrawalReceipt),
    /// Authoritative refusal: the balance read under the lock did not cover the amount.
    /// Nothing was written.
    InsufficientFunds {
        client: ClientId,
        requested: Amount,
        balance: Balance,
    },
}

impl WithdrawalOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

enum Decision {
    Committed {
        entry: LedgerEntry,
        balance_after: Balance,
    },
    Rejected {
        balance: Balance,
    },
}

/// Debits a client only while holding that client's distributed lock.
///
/// A request goes `LOCKING -> CHECKING -> (REJECTED | COMMITTING) -> RELEASED`.
/// Failing to lock ends the request before any ledger access. Once the lock
/// is held it is released on every path out, including ledger errors and an
/// expired deadline. Ledger failures are reported, never retried inside the
/// critical section. No debit is written once the lease is about to run out.
#[derive(Clone)]
pub struct WithdrawalAuthorizer {
    mutex: DistributedMutex,
    balances: BalanceQuery,
    ledger: SharedLedgerStore,
    lease: Duration,
    ledger_timeout: Option<Duration>,
}

impl WithdrawalAuthorizer {
    pub fn new(ledger: SharedLedgerStore, locks: SharedLockService, config: &GuardConfig) -> Self {
        Self {
            mutex: DistributedMutex::new(locks, &config.lock),
            balances: BalanceQuery::new(ledger.clone()),
            ledger,
            lease: config.lock.lease,
            ledger_timeout: config.ledger_timeout,
        }
    }

    /// Withdraws under the configured ledger timeout, or within the lock lease
    /// when none is configured.
    pub async fn withdraw(&self, client: ClientId, amount: Amount) -> Result<WithdrawalOutcome> {
        self.authorize(client, amount, self.ledger_timeout).await
    }

    /// Withdraws with a caller-supplied deadline on the balance check and debit.
    pub async fn withdraw_within(
        &self,
        client: ClientId,
        amount: Amount,
        deadline: Duration,
    ) -> Result<WithdrawalOutcome> {
        self.authorize(client, amount, Some(deadline)).await
    }

    /// Deletes the client's withdrawal lock whoever holds it.
    pub async fn force_unlock(&self, client: ClientId) -> Result<()> {
        self.mutex.force_release(&client.withdraw_lock_key()).await
    }

    async fn authorize(
        &self,
        client: ClientId,
        amount: Amount,
        deadline: Option<Duration>,
    ) -> Result<WithdrawalOutcome> {
        let key = client.withdraw_lock_key();
        let guard = self.mutex.acquire(&key, self.lease).await?;
        let expires_at = guard.expires_at();
        debug!(%client, %amount, "checking balance under lock");

        // The section never outlives the lease, whatever deadline was asked for.
        let lease_left = expires_at
            .saturating_duration_since(Instant::now())
            .saturating_sub(COMMIT_MARGIN);
        let limit = deadline.map_or(lease_left, |deadline| deadline.min(lease_left));
        let decision = tokio::time::timeout(limit, self.check_and_commit(client, amount, expires_at))
            .await
            .unwrap_or_else(|_| {
                Err(GuardError::DeadlineExceeded {
                    operation: "withdrawal critical section",
                    after: limit,
                })
            });

        let released = self.mutex.release(guard).await;

        match decision {
            Ok(Decision::Committed {
                entry,
                balance_after,
            }) => {
                let release = match released {
                    Ok(()) => LockRelease::Released,
                    Err(e) => {
                        warn!(%client, error = %e, "debit committed but lock release failed; waiting for lease expiry");
                        LockRelease::PendingExpiry {
                            reason: e.to_string(),
                        }
                    }
                };
                info!(%client, %amount, %balance_after, "withdrawal accepted");
                Ok(WithdrawalOutcome::Accepted(WithdrawalReceipt {
                    entry,
                    balance_after,
                    release,
                }))
            }
            Ok(Decision::Rejected { balance }) => {
                if let Err(e) = released {
                    warn!(%client, error = %e, "lock release failed after rejection");
                }
                info!(%client, %amount, %balance, "withdrawal rejected: insufficient funds");
                Ok(WithdrawalOutcome::InsufficientFunds {
                    client,
                    requested: amount,
                    balance,
                })
            }
            Err(e) => {
                if let Err(release_err) = released {
                    warn!(%client, error = %release_err, "lock release failed after aborted withdrawal");
                }
                warn!(%client, %amount, error = %e, "withdrawal aborted");
                Err(e)
            }
        }
    }

    async fn check_and_commit(
        &self,
        client: ClientId,
        amount: Amount,
        expires_at: Instant,
    ) -> Result<Decision> {
        let balance = self.balances.balance(client).await?;
        if !balance.covers(amount) {
            return Ok(Decision::Rejected { balance });
        }

        // Past this point another replica may hold the lock and have read the same balance.
        if Instant::now() + COMMIT_MARGIN >= expires_at {
            warn!(%client, %amount, lease = ?self.lease, "lease ran out before the debit; nothing written");
            return Err(GuardError::DeadlineExceeded {
                operation: "debit within the lock lease",
                after: self.lease,
            });
        }

        let entry = LedgerEntry::debit(client, amount);
        self.ledger.append_entry(entry.clone()).await?;
        Ok(Decision::Committed {
            entry,
            balance_after: balance - Balance::from(amount),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LockConfig, RetryPolicy};
    use crate::domain::ledger::EntryKind;
    use crate::domain::ports::{LedgerStore, LockService};
    use crate::infrastructure::in_memory::{InMemoryLedgerStore, InMemoryLockService};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    const CLIENT: ClientId = ClientId(1);

    fn config() -> GuardConfig {
        GuardConfig {
            lock: LockConfig {
                lease: Duration::from_secs(10),
                retry: RetryPolicy::fixed(3, Duration::from_millis(10)),
                ..LockConfig::default()
            },
            ledger_timeout: None,
        }
    }

    fn amount(value: rust_decimal::Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    async fn funded(value: rust_decimal::Decimal) -> InMemoryLedgerStore {
        let ledger = InMemoryLedgerStore::new();
        ledger
            .append_entry(LedgerEntry::credit(CLIENT, amount(value)))
            .await
            .unwrap();
        ledger
    }

    /// Ledger wrapper that can fail writes, stall, and counts every call.
    #[derive(Default)]
    struct FaultyLedger {
        inner: InMemoryLedgerStore,
        fail_appends: AtomicBool,
        stall: Option<Duration>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LedgerStore for FaultyLedger {
        async fn append_entry(&self, entry: LedgerEntry) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_appends.load(Ordering::SeqCst) {
                return Err(GuardError::ledger("disk full"));
            }
            self.inner.append_entry(entry).await
        }

        async fn sum_by_kind_for_client(
            &self,
            client: ClientId,
            kind: EntryKind,
        ) -> Result<Balance> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(stall) = self.stall {
                tokio::time::sleep(stall).await;
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

    /// Lock service that grants every lock but never manages to release one.
    struct StickyLocks;

    #[async_trait]
    impl LockService for StickyLocks {
        async fn set_if_absent(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<bool> {
            Ok(true)
        }

        async fn delete(&self, _key: &str) -> Result<()> {
            Err(GuardError::lock_service("connection reset"))
        }

        async fn delete_if_value(&self, _key: &str, _value: &str) -> Result<bool> {
            Err(GuardError::lock_service("connection reset"))
        }
    }

    #[tokio::test]
    async fn test_withdrawal_within_balance_is_accepted() {
        let ledger = funded(dec!(100)).await;
        let locks = InMemoryLockService::new();
        let authorizer =
            WithdrawalAuthorizer::new(Arc::new(ledger.clone()), Arc::new(locks.clone()), &config());

        let outcome = authorizer.withdraw(CLIENT, amount(dec!(100))).await.unwrap();

        let receipt = match outcome {
            WithdrawalOutcome::Accepted(receipt) => receipt,
            other => panic!("expected acceptance, got {other:?}"),
        };
        assert_eq!(receipt.balance_after, Balance::ZERO);
        assert_eq!(receipt.release, LockRelease::Released);
        assert_eq!(receipt.entry.kind, EntryKind::Debit);
        assert!(locks.holder(&CLIENT.withdraw_lock_key()).await.is_none());
    }

    #[tokio::test]
    async fn test_overdraft_is_rejected_without_mutation() {
        let ledger = funded(dec!(39.99)).await;
        let locks = InMemoryLockService::new();
        let authorizer =
            WithdrawalAuthorizer::new(Arc::new(ledger.clone()), Arc::new(locks.clone()), &config());
        let before = ledger.entries_for_client(CLIENT).await.unwrap();

        let outcome = authorizer.withdraw(CLIENT, amount(dec!(40))).await.unwrap();

        assert_eq!(
            outcome,
            WithdrawalOutcome::InsufficientFunds {
                client: CLIENT,
                requested: amount(dec!(40)),
                balance: Balance::new(dec!(39.99)),
            }
        );
        assert_eq!(ledger.entries_for_client(CLIENT).await.unwrap(), before);
        assert!(locks.holder(&CLIENT.withdraw_lock_key()).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_unavailable_skips_ledger() {
        let ledger = Arc::new(FaultyLedger::default());
        let locks = InMemoryLockService::new();
        locks
            .set_if_absent(&CLIENT.withdraw_lock_key(), "other-replica", Duration::from_secs(60))
            .await
            .unwrap();
        let authorizer = WithdrawalAuthorizer::new(ledger.clone(), Arc::new(locks), &config());

        let result = authorizer.withdraw(CLIENT, amount(dec!(1))).await;

        assert!(matches!(
            result,
            Err(GuardError::LockUnavailable { attempts: 3, .. })
        ));
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ledger_write_failure_still_releases_lock() {
        let ledger = Arc::new(FaultyLedger::default());
        ledger
            .inner
            .append_entry(LedgerEntry::credit(CLIENT, amount(dec!(100))))
            .await
            .unwrap();
        ledger.fail_appends.store(true, Ordering::SeqCst);
        let locks = InMemoryLockService::new();
        let authorizer =
            WithdrawalAuthorizer::new(ledger.clone(), Arc::new(locks.clone()), &config());

        let result = authorizer.withdraw(CLIENT, amount(dec!(10))).await;

        assert!(matches!(result, Err(GuardError::StoreUnavailable { .. })));
        assert!(locks.holder(&CLIENT.withdraw_lock_key()).await.is_none());
        // Exactly one write attempt: no retry inside the critical section.
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry_releases_lock() {
        let ledger = Arc::new(FaultyLedger {
            stall: Some(Duration::from_secs(5)),
            ..FaultyLedger::default()
        });
        let locks = InMemoryLockService::new();
        let authorizer =
            WithdrawalAuthorizer::new(ledger.clone(), Arc::new(locks.clone()), &config());

        let result = authorizer
            .withdraw_within(CLIENT, amount(dec!(10)), Duration::from_millis(250))
            .await;

        assert!(matches!(
            result,
            Err(GuardError::DeadlineExceeded { after, .. }) if after == Duration::from_millis(250)
        ));
        assert!(locks.holder(&CLIENT.withdraw_lock_key()).await.is_none());
        assert!(ledger.inner.entries_for_client(CLIENT).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_ledger_timeout_applies() {
        let ledger = Arc::new(FaultyLedger {
            stall: Some(Duration::from_secs(5)),
            ..FaultyLedger::default()
        });
        let mut config = config();
        config.ledger_timeout = Some(Duration::from_secs(1));
        let authorizer =
            WithdrawalAuthorizer::new(ledger, Arc::new(InMemoryLockService::new()), &config);

        let result = authorizer.withdraw(CLIENT, amount(dec!(10))).await;

        assert!(matches!(result, Err(GuardError::DeadlineExceeded { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_bounds_section_without_configured_timeout() {
        let ledger = Arc::new(FaultyLedger {
            stall: Some(Duration::from_secs(30)),
            ..FaultyLedger::default()
        });
        let locks = InMemoryLockService::new();
        let authorizer =
            WithdrawalAuthorizer::new(ledger.clone(), Arc::new(locks.clone()), &config());

        let result = authorizer.withdraw(CLIENT, amount(dec!(10))).await;

        assert!(matches!(
            result,
            Err(GuardError::DeadlineExceeded { after, .. })
                if after == Duration::from_secs(10) - COMMIT_MARGIN
        ));
        assert!(locks.holder(&CLIENT.withdraw_lock_key()).await.is_none());
        assert!(ledger.inner.entries_for_client(CLIENT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_refused_once_lease_has_run_out() {
        let ledger = funded(dec!(100)).await;
        let authorizer = WithdrawalAuthorizer::new(
            Arc::new(ledger.clone()),
            Arc::new(InMemoryLockService::new()),
            &config(),
        );

        let result = authorizer
            .check_and_commit(CLIENT, amount(dec!(10)), Instant::now())
            .await;

        assert!(matches!(result, Err(GuardError::DeadlineExceeded { .. })));
        assert_eq!(ledger.entries_for_client(CLIENT).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_release_failure_after_commit_is_reported_as_warning() {
        let ledger = funded(dec!(50)).await;
        let authorizer =
            WithdrawalAuthorizer::new(Arc::new(ledger.clone()), Arc::new(StickyLocks), &config());

        let outcome = authorizer.withdraw(CLIENT, amount(dec!(20))).await.unwrap();

        let receipt = match outcome {
            WithdrawalOutcome::Accepted(receipt) => receipt,
            other => panic!("expected acceptance, got {other:?}"),
        };
        assert!(matches!(
            receipt.release,
            LockRelease::PendingExpiry { ref reason } if reason.contains("connection reset")
        ));
        assert_eq!(receipt.balance_after, Balance::new(dec!(30)));
        assert_eq!(ledger.entries_for_client(CLIENT).await.unwrap().len(), 2);
    }
}
