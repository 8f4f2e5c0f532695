//! Expense ledger over a tabular row store.
//!
//! Three record kinds live in their own sheets: business transactions,
//! personal transactions and categories. Each kind supports the actions
//! `get`, `add`, `modifica` and `elimina`.

mod records;
mod response;
mod rows;
mod service;

pub use records::{Params, PersonalTransaction, Record, Transaction};
pub use response::ApiResponse;
pub use rows::{Cell, MemoryRowStore, Row, RowStore, SqliteRowStore};
pub use service::{LedgerService, DEFAULT_CATEGORIES};
