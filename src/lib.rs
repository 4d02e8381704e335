//! cash_ledger Library
//!
//! Re-exports modules for integration testing and external use.

pub mod aggregate;
pub mod api;
pub mod domain;
pub mod handlers;
pub mod idempotency;
pub mod jobs;
pub mod ledger;
pub mod query;

pub mod config;
pub mod db;
pub mod error;

pub use config::{Config, LedgerSettings};
pub use error::{AppError, AppResult};
pub use domain::{Amount, AmountError, DomainError, HolderRef, Money, Movement, MovementKind, OperationContext};
pub use ledger::{LedgerStore, MemoryLedgerStore, PgLedgerStore};
