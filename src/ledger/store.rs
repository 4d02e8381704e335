//! Ledger store traits
//!
//! Every mutation runs inside one [`LedgerTx`]. Inside it, `lock_*` reads take
//! the holder's row lock until commit, so two writers can never observe the
//! same `balance_before`. Dropping a transaction without committing discards
//! everything written through it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::aggregate::{Register, Session, Vault};
use crate::domain::{HolderRef, Movement, Reconciliation};
use crate::idempotency::IdempotencyRecord;

use super::LedgerError;

/// Filter for movement reads. Results are always in `(timestamp, sequence)`
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovementFilter {
    /// Inclusive lower bound
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub to: Option<DateTime<Utc>>,
    /// Paging cursor: only movements with a greater sequence
    pub after_sequence: Option<i64>,
    pub limit: Option<i64>,
}

impl MovementFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        Self {
            from,
            to,
            ..Self::default()
        }
    }

    pub fn until(to: DateTime<Utc>) -> Self {
        Self {
            to: Some(to),
            ..Self::default()
        }
    }

    pub fn page(after_sequence: Option<i64>, limit: i64) -> Self {
        Self {
            after_sequence,
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn matches(&self, movement: &Movement) -> bool {
        self.from.map_or(true, |from| movement.timestamp >= from)
            && self.to.map_or(true, |to| movement.timestamp <= to)
            && self.after_sequence.map_or(true, |after| movement.sequence > after)
    }
}

/// Read side of the ledger plus the entry point for transactions
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, LedgerError>;

    async fn vault(&self, id: Uuid) -> Result<Option<Vault>, LedgerError>;

    async fn vaults(&self) -> Result<Vec<Vault>, LedgerError>;

    async fn register(&self, id: Uuid) -> Result<Option<Register>, LedgerError>;

    async fn registers(&self) -> Result<Vec<Register>, LedgerError>;

    async fn session(&self, id: Uuid) -> Result<Option<Session>, LedgerError>;

    /// Sessions of a register, newest first
    async fn sessions_for_register(&self, register_id: Uuid) -> Result<Vec<Session>, LedgerError>;

    async fn movements(&self, holder: HolderRef, filter: &MovementFilter) -> Result<Vec<Movement>, LedgerError>;

    /// Both sides of a linked pair
    async fn linked_movements(&self, link_id: Uuid) -> Result<Vec<Movement>, LedgerError>;

    async fn reconciliations_for_session(&self, session_id: Uuid) -> Result<Vec<Reconciliation>, LedgerError>;

    /// Delete idempotency records that expired before `now`
    async fn purge_expired_idempotency(&self, now: DateTime<Utc>) -> Result<u64, LedgerError>;
}

/// One atomic unit of work
#[async_trait]
pub trait LedgerTx: Send {
    async fn lock_vault(&mut self, id: Uuid) -> Result<Option<Vault>, LedgerError>;

    async fn lock_register(&mut self, id: Uuid) -> Result<Option<Register>, LedgerError>;

    async fn lock_session(&mut self, id: Uuid) -> Result<Option<Session>, LedgerError>;

    /// Plain read, used to find a session's register before taking locks in order
    async fn session(&mut self, id: Uuid) -> Result<Option<Session>, LedgerError>;

    async fn vault_by_code(&mut self, code: &str) -> Result<Option<Vault>, LedgerError>;

    async fn register_by_code(&mut self, code: &str) -> Result<Option<Register>, LedgerError>;

    /// Highest session number used on a register, 0 if none
    async fn last_session_number(&mut self, register_id: Uuid) -> Result<i64, LedgerError>;

    async fn insert_vault(&mut self, vault: &Vault) -> Result<(), LedgerError>;

    async fn update_vault(&mut self, vault: &Vault) -> Result<(), LedgerError>;

    async fn insert_register(&mut self, register: &Register) -> Result<(), LedgerError>;

    async fn update_register(&mut self, register: &Register) -> Result<(), LedgerError>;

    async fn insert_session(&mut self, session: &Session) -> Result<(), LedgerError>;

    async fn update_session(&mut self, session: &Session) -> Result<(), LedgerError>;

    /// Append a movement, returning it with its insertion sequence
    async fn append_movement(&mut self, movement: &Movement) -> Result<Movement, LedgerError>;

    async fn insert_reconciliation(&mut self, reconciliation: &Reconciliation) -> Result<(), LedgerError>;

    async fn idempotency_record(&mut self, key: &str) -> Result<Option<IdempotencyRecord>, LedgerError>;

    async fn save_idempotency_record(&mut self, record: &IdempotencyRecord) -> Result<(), LedgerError>;

    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;
}
