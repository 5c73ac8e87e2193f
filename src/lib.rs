//! Overdraft-safe withdrawals over a shared ledger.
//!
//! Several replicas can debit the same client concurrently without the balance
//! ever going negative: each withdrawal checks the balance and appends its debit
//! while holding a per-client lock taken from an external lock service with a
//! lease. Deposits append credits freely.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
