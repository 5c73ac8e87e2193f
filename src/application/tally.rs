use super::engine::RequestOutcome;
use super::withdrawal::WithdrawalOutcome;
use crate::domain::money::Balance;
use crate::error::{GuardError, Result};
use tracing::warn;

/// Running count of request outcomes for a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tally {
    pub deposits: usize,
    pub deposited: Balance,
    pub accepted: usize,
    pub withdrawn: Balance,
    pub rejected: usize,
    /// Withdrawals that never got the client lock. Safe to resubmit.
    pub lock_unavailable: usize,
    pub failed: usize,
}

impl Tally {
    pub fn record(&mut self, outcome: &Result<RequestOutcome>) {
        match outcome {
            Ok(RequestOutcome::Deposited(entry)) => {
                self.deposits += 1;
                self.deposited += Balance::from(entry.amount);
            }
            Ok(RequestOutcome::Withdrawal(WithdrawalOutcome::Accepted(receipt))) => {
                self.accepted += 1;
                self.withdrawn += Balance::from(receipt.entry.amount);
            }
            Ok(RequestOutcome::Withdrawal(WithdrawalOutcome::InsufficientFunds { .. })) => {
                self.rejected += 1;
            }
            Err(GuardError::LockUnavailable { .. }) => self.lock_unavailable += 1,
            Err(e) => {
                warn!(error = %e, "request failed");
                self.failed += 1;
            }
        }
    }

    pub fn total(&self) -> usize {
        self.deposits + self.accepted + self.rejected + self.lock_unavailable + self.failed
    }
}
