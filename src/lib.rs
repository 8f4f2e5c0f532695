//! Expense ledger and its offline cache controller.

pub mod cache;
pub mod config;
pub mod ledger;
pub mod logging;
pub mod net;
pub mod worker;

#[cfg(test)]
mod testing;
