//! Domain types and the ports the application layer talks through.

pub mod ledger;
pub mod money;
pub mod ports;
pub mod request;
