//! In-memory ledger store.
//!
//! Intended for tests and local development. Transactions are serialized
//! behind one async mutex: `begin` takes the lock and works on a copy of the
//! state, `commit` writes the copy back, and dropping the transaction leaves
//! the state untouched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::aggregate::{Register, Session, SessionState, Vault};
use crate::domain::{sort_for_replay, HolderRef, HolderType, Movement, Reconciliation};
use crate::idempotency::IdempotencyRecord;

use super::{LedgerError, LedgerStore, LedgerTx, MovementFilter};

#[derive(Debug, Clone, Default)]
struct LedgerState {
    vaults: HashMap<Uuid, Vault>,
    registers: HashMap<Uuid, Register>,
    sessions: HashMap<Uuid, Session>,
    movements: Vec<Movement>,
    reconciliations: Vec<Reconciliation>,
    idempotency: HashMap<String, IdempotencyRecord>,
    last_sequence: i64,
}

impl LedgerState {
    fn movements(&self, holder: HolderRef, filter: &MovementFilter) -> Vec<Movement> {
        let mut found: Vec<Movement> = self
            .movements
            .iter()
            .filter(|m| m.holder == holder && filter.matches(m))
            .cloned()
            .collect();
        sort_for_replay(&mut found);
        if let Some(limit) = filter.limit {
            found.truncate(limit.max(0) as usize);
        }
        found
    }

    fn holder_exists(&self, holder: HolderRef) -> bool {
        match holder.holder_type {
            HolderType::Vault => self.vaults.contains_key(&holder.holder_id),
            HolderType::Session => self.sessions.contains_key(&holder.holder_id),
        }
    }
}

/// In-memory ledger store
#[derive(Debug, Clone, Default)]
pub struct MemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, LedgerError> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }

    async fn vault(&self, id: Uuid) -> Result<Option<Vault>, LedgerError> {
        Ok(self.state.lock().await.vaults.get(&id).cloned())
    }

    async fn vaults(&self) -> Result<Vec<Vault>, LedgerError> {
        let state = self.state.lock().await;
        let mut vaults: Vec<Vault> = state.vaults.values().cloned().collect();
        vaults.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(vaults)
    }

    async fn register(&self, id: Uuid) -> Result<Option<Register>, LedgerError> {
        Ok(self.state.lock().await.registers.get(&id).cloned())
    }

    async fn registers(&self) -> Result<Vec<Register>, LedgerError> {
        let state = self.state.lock().await;
        let mut registers: Vec<Register> = state.registers.values().cloned().collect();
        registers.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(registers)
    }

    async fn session(&self, id: Uuid) -> Result<Option<Session>, LedgerError> {
        Ok(self.state.lock().await.sessions.get(&id).cloned())
    }

    async fn sessions_for_register(&self, register_id: Uuid) -> Result<Vec<Session>, LedgerError> {
        let state = self.state.lock().await;
        let mut sessions: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| s.register_id == register_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.sequence_number.cmp(&a.sequence_number));
        Ok(sessions)
    }

    async fn movements(&self, holder: HolderRef, filter: &MovementFilter) -> Result<Vec<Movement>, LedgerError> {
        Ok(self.state.lock().await.movements(holder, filter))
    }

    async fn linked_movements(&self, link_id: Uuid) -> Result<Vec<Movement>, LedgerError> {
        let state = self.state.lock().await;
        let mut pair: Vec<Movement> = state
            .movements
            .iter()
            .filter(|m| m.linked_movement_id == Some(link_id))
            .cloned()
            .collect();
        pair.sort_by_key(|m| m.sequence);
        Ok(pair)
    }

    async fn reconciliations_for_session(&self, session_id: Uuid) -> Result<Vec<Reconciliation>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .reconciliations
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn purge_expired_idempotency(&self, now: DateTime<Utc>) -> Result<u64, LedgerError> {
        let mut state = self.state.lock().await;
        let before = state.idempotency.len();
        state.idempotency.retain(|_, record| !record.is_expired(now));
        Ok((before - state.idempotency.len()) as u64)
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<LedgerState>,
    work: LedgerState,
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn lock_vault(&mut self, id: Uuid) -> Result<Option<Vault>, LedgerError> {
        Ok(self.work.vaults.get(&id).cloned())
    }

    async fn lock_register(&mut self, id: Uuid) -> Result<Option<Register>, LedgerError> {
        Ok(self.work.registers.get(&id).cloned())
    }

    async fn lock_session(&mut self, id: Uuid) -> Result<Option<Session>, LedgerError> {
        Ok(self.work.sessions.get(&id).cloned())
    }

    async fn session(&mut self, id: Uuid) -> Result<Option<Session>, LedgerError> {
        Ok(self.work.sessions.get(&id).cloned())
    }

    async fn vault_by_code(&mut self, code: &str) -> Result<Option<Vault>, LedgerError> {
        Ok(self.work.vaults.values().find(|v| v.code == code).cloned())
    }

    async fn register_by_code(&mut self, code: &str) -> Result<Option<Register>, LedgerError> {
        Ok(self.work.registers.values().find(|r| r.code == code).cloned())
    }

    async fn last_session_number(&mut self, register_id: Uuid) -> Result<i64, LedgerError> {
        Ok(self
            .work
            .sessions
            .values()
            .filter(|s| s.register_id == register_id)
            .map(|s| s.sequence_number)
            .max()
            .unwrap_or(0))
    }

    async fn insert_vault(&mut self, vault: &Vault) -> Result<(), LedgerError> {
        if self.work.vaults.values().any(|v| v.code == vault.code) {
            return Err(LedgerError::Conflict(format!("vault code {} already exists", vault.code)));
        }
        self.work.vaults.insert(vault.id, vault.clone());
        Ok(())
    }

    async fn update_vault(&mut self, vault: &Vault) -> Result<(), LedgerError> {
        match self.work.vaults.get_mut(&vault.id) {
            Some(existing) => {
                *existing = vault.clone();
                Ok(())
            }
            None => Err(LedgerError::Corrupt(format!("update of unknown vault {}", vault.id))),
        }
    }

    async fn insert_register(&mut self, register: &Register) -> Result<(), LedgerError> {
        if self.work.registers.values().any(|r| r.code == register.code) {
            return Err(LedgerError::Conflict(format!("register code {} already exists", register.code)));
        }
        self.work.registers.insert(register.id, register.clone());
        Ok(())
    }

    async fn update_register(&mut self, register: &Register) -> Result<(), LedgerError> {
        match self.work.registers.get_mut(&register.id) {
            Some(existing) => {
                *existing = register.clone();
                Ok(())
            }
            None => Err(LedgerError::Corrupt(format!("update of unknown register {}", register.id))),
        }
    }

    async fn insert_session(&mut self, session: &Session) -> Result<(), LedgerError> {
        let clash = self.work.sessions.values().any(|s| {
            s.register_id == session.register_id
                && (s.sequence_number == session.sequence_number
                    || (s.state == SessionState::Open && session.state == SessionState::Open))
        });
        if clash {
            return Err(LedgerError::Conflict(format!(
                "register {} already has an open session or session number {}",
                session.register_id, session.sequence_number
            )));
        }
        self.work.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn update_session(&mut self, session: &Session) -> Result<(), LedgerError> {
        match self.work.sessions.get_mut(&session.id) {
            Some(existing) => {
                *existing = session.clone();
                Ok(())
            }
            None => Err(LedgerError::Corrupt(format!("update of unknown session {}", session.id))),
        }
    }

    async fn append_movement(&mut self, movement: &Movement) -> Result<Movement, LedgerError> {
        if !self.work.holder_exists(movement.holder) {
            return Err(LedgerError::Corrupt(format!("movement for unknown {}", movement.holder)));
        }
        self.work.last_sequence += 1;
        let stored = Movement {
            sequence: self.work.last_sequence,
            ..movement.clone()
        };
        self.work.movements.push(stored.clone());
        Ok(stored)
    }

    async fn insert_reconciliation(&mut self, reconciliation: &Reconciliation) -> Result<(), LedgerError> {
        self.work.reconciliations.push(reconciliation.clone());
        Ok(())
    }

    async fn idempotency_record(&mut self, key: &str) -> Result<Option<IdempotencyRecord>, LedgerError> {
        Ok(self.work.idempotency.get(key).cloned())
    }

    async fn save_idempotency_record(&mut self, record: &IdempotencyRecord) -> Result<(), LedgerError> {
        self.work.idempotency.insert(record.key.clone(), record.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let MemoryTx { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }
}
