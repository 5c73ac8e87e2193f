//! Application layer: the withdrawal critical section and the operations around it.
//!
//! [`engine::LedgerEngine`] is the entry point for intake adapters. Withdrawals go
//! through [`withdrawal::WithdrawalAuthorizer`], which serializes each client's
//! balance check and debit with a [`mutex::DistributedMutex`]. Deposits and
//! balance reads take no lock.

pub mod balance;
pub mod deposit;
pub mod engine;
pub mod mutex;
pub mod replay;
pub mod simulation;
pub mod tally;
pub mod withdrawal;
