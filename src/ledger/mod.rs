//! Ledger module
//!
//! Durable storage for holders, movements and reconciliations.

mod error;
mod memory;
mod postgres;
mod store;

pub use error::LedgerError;
pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;
pub use store::{LedgerStore, LedgerTx, MovementFilter};
