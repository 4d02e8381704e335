//! Query Service
//!
//! Every figure is derived from the movement log. Cached holder balances are
//! only used by the dashboard and the session status, where they are read in
//! one call and may lag a concurrent writer.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::aggregate::{RegisterState, SessionState};
use crate::domain::{
    fold_balance, DomainError, Effect, HolderRef, HolderType, Money, Movement, MovementKind, Reconciliation,
};
use crate::error::AppError;
use crate::ledger::{LedgerStore, MovementFilter};

pub const DEFAULT_PAGE_SIZE: i64 = 100;
pub const MAX_PAGE_SIZE: i64 = 500;

/// One page of a holder's history
#[derive(Debug, Clone, Serialize)]
pub struct MovementPage {
    pub holder: HolderRef,
    pub movements: Vec<Movement>,
    /// Cursor for the next page, absent on the last one
    pub next_after_sequence: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KindTotal {
    pub kind: MovementKind,
    pub count: u64,
    pub total: Decimal,
}

/// Sums of a holder's movements in a period, by kind
#[derive(Debug, Clone, Serialize)]
pub struct PeriodTotals {
    pub holder: HolderRef,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub by_kind: Vec<KindTotal>,
    pub credits: Decimal,
    pub debits: Decimal,
    pub net: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    #[serde(flatten)]
    pub movement: Movement,
    /// Holder on the other side of a linked pair
    pub counterpart: Option<HolderRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditTrail {
    pub holder: HolderRef,
    pub entries: Vec<AuditEntry>,
    /// Counts recorded against a session in the same period
    pub reconciliations: Vec<Reconciliation>,
}

/// What a caller needs before operating a register
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub register_id: Uuid,
    pub register_state: RegisterState,
    pub active: bool,
    /// Latest session on the register, if any
    pub session_id: Option<Uuid>,
    pub session_state: Option<SessionState>,
    pub sequence_number: Option<i64>,
    pub current_responsible: Option<Uuid>,
    pub opening_time: Option<DateTime<Utc>>,
    pub current_balance: Money,
}

#[derive(Debug, Clone, Serialize)]
pub struct VaultBalance {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub total_balance: Money,
    pub available_balance: Money,
    pub allocated_balance: Money,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterBalance {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub state: RegisterState,
    pub active: bool,
    pub current_responsible: Option<Uuid>,
    pub session_id: Option<Uuid>,
    /// Open session's balance, 0 when closed
    pub current_balance: Money,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub vaults: Vec<VaultBalance>,
    pub registers: Vec<RegisterBalance>,
    pub generated_at: DateTime<Utc>,
}

/// Read-only query service
pub struct QueryService {
    store: Arc<dyn LedgerStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    // =========================================================================
    // Balances
    // =========================================================================

    /// Last `balance_after` in the holder's log, or zero before any movement
    pub async fn current_balance(&self, holder: HolderRef) -> Result<Money, AppError> {
        self.ensure_exists(holder).await?;
        let history = self.store.movements(holder, &MovementFilter::all()).await?;
        Ok(history.last().map(|m| m.balance_after).unwrap_or(Money::ZERO))
    }

    /// Fold of every movement at or before `as_of`
    pub async fn balance_as_of(&self, holder: HolderRef, as_of: DateTime<Utc>) -> Result<Money, AppError> {
        self.ensure_exists(holder).await?;
        let history = self.store.movements(holder, &MovementFilter::until(as_of)).await?;
        fold_balance(&history).map_err(|e| DomainError::invariant(holder.to_string(), e.to_string()).into())
    }

    // =========================================================================
    // History
    // =========================================================================

    /// A page of movements in `(timestamp, sequence)` order. Passing the
    /// returned cursor back continues the scan where it stopped.
    pub async fn history(&self, holder: HolderRef, filter: MovementFilter) -> Result<MovementPage, AppError> {
        self.ensure_exists(holder).await?;
        let limit = filter.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let filter = MovementFilter {
            limit: Some(limit),
            ..filter
        };

        let movements = self.store.movements(holder, &filter).await?;
        let next_after_sequence = if movements.len() as i64 == limit {
            movements.last().map(|m| m.sequence)
        } else {
            None
        };

        Ok(MovementPage {
            holder,
            movements,
            next_after_sequence,
        })
    }

    pub async fn period_totals(
        &self,
        holder: HolderRef,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<PeriodTotals, AppError> {
        self.ensure_exists(holder).await?;
        let history = self.store.movements(holder, &MovementFilter::between(from, to)).await?;

        let mut by_kind: BTreeMap<&'static str, KindTotal> = BTreeMap::new();
        let mut credits = Decimal::ZERO;
        let mut debits = Decimal::ZERO;
        for movement in &history {
            let entry = by_kind.entry(movement.kind.as_str()).or_insert(KindTotal {
                kind: movement.kind,
                count: 0,
                total: Decimal::ZERO,
            });
            entry.count += 1;
            entry.total += movement.amount.value();

            match movement.kind.effect() {
                Effect::Credit => credits += movement.amount.value(),
                Effect::Debit => debits += movement.amount.value(),
            }
        }

        Ok(PeriodTotals {
            holder,
            from,
            to,
            by_kind: by_kind.into_values().collect(),
            credits,
            debits,
            net: credits - debits,
        })
    }

    /// Ordered movements with actor, time and the other side of each linked
    /// pair.
    pub async fn audit_trail(
        &self,
        holder: HolderRef,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<AuditTrail, AppError> {
        self.ensure_exists(holder).await?;
        let history = self.store.movements(holder, &MovementFilter::between(from, to)).await?;

        let mut entries = Vec::with_capacity(history.len());
        for movement in history {
            let counterpart = match movement.linked_movement_id {
                Some(link_id) => self
                    .store
                    .linked_movements(link_id)
                    .await?
                    .into_iter()
                    .find(|m| m.id != movement.id)
                    .map(|m| m.holder),
                None => None,
            };
            entries.push(AuditEntry { movement, counterpart });
        }

        let reconciliations = match holder.holder_type {
            HolderType::Session => self
                .store
                .reconciliations_for_session(holder.holder_id)
                .await?
                .into_iter()
                .filter(|r| from.map_or(true, |f| r.timestamp >= f) && to.map_or(true, |t| r.timestamp <= t))
                .collect(),
            HolderType::Vault => Vec::new(),
        };

        Ok(AuditTrail {
            holder,
            entries,
            reconciliations,
        })
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Open or closed, who holds the register and since when
    pub async fn session_status(&self, register_id: Uuid) -> Result<SessionStatus, AppError> {
        let register = self
            .store
            .register(register_id)
            .await?
            .ok_or_else(|| DomainError::HolderNotFound(format!("register {}", register_id)))?;

        let session = match register.current_session_id {
            Some(id) => self.store.session(id).await?,
            None => self.store.sessions_for_register(register_id).await?.into_iter().next(),
        };

        let current_balance = session
            .as_ref()
            .filter(|s| s.is_open())
            .map(|s| s.current_balance)
            .unwrap_or(Money::ZERO);

        Ok(SessionStatus {
            register_id,
            register_state: register.state,
            active: register.active,
            session_id: session.as_ref().map(|s| s.id),
            session_state: session.as_ref().map(|s| s.state),
            sequence_number: session.as_ref().map(|s| s.sequence_number),
            current_responsible: register.current_responsible,
            opening_time: session.as_ref().map(|s| s.opening_time),
            current_balance,
        })
    }

    /// Every vault and register with their current balances
    pub async fn dashboard(&self) -> Result<Dashboard, AppError> {
        let vaults = self
            .store
            .vaults()
            .await?
            .into_iter()
            .map(|v| VaultBalance {
                id: v.id,
                code: v.code,
                name: v.name,
                total_balance: v.total_balance,
                available_balance: v.available_balance,
                allocated_balance: v.allocated_balance,
            })
            .collect();

        let mut registers = Vec::new();
        for register in self.store.registers().await? {
            let current_balance = match register.current_session_id {
                Some(id) => self
                    .store
                    .session(id)
                    .await?
                    .filter(|s| s.is_open())
                    .map(|s| s.current_balance)
                    .unwrap_or(Money::ZERO),
                None => Money::ZERO,
            };
            registers.push(RegisterBalance {
                id: register.id,
                code: register.code,
                name: register.name,
                state: register.state,
                active: register.active,
                current_responsible: register.current_responsible,
                session_id: register.current_session_id,
                current_balance,
            });
        }

        Ok(Dashboard {
            vaults,
            registers,
            generated_at: Utc::now(),
        })
    }

    async fn ensure_exists(&self, holder: HolderRef) -> Result<(), AppError> {
        let exists = match holder.holder_type {
            HolderType::Vault => self.store.vault(holder.holder_id).await?.is_some(),
            HolderType::Session => self.store.session(holder.holder_id).await?.is_some(),
        };
        if !exists {
            return Err(DomainError::HolderNotFound(holder.to_string()).into());
        }
        Ok(())
    }
}
