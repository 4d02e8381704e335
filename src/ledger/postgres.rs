//! Postgres ledger store
//!
//! Holder rows are locked with `SELECT ... FOR UPDATE` for the life of the
//! transaction. Callers take locks in the order vault, register, sessions
//! (ascending id). Movements and reconciliations are protected by
//! append-only triggers in the schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::aggregate::{Register, Session, Vault};
use crate::domain::{DenominationBreakdown, HolderRef, Money, Movement, Reconciliation};
use crate::idempotency::IdempotencyRecord;

use super::{LedgerError, LedgerStore, LedgerTx, MovementFilter};

const VAULT_COLUMNS: &str = r#"
    id, code, name, total_balance, available_balance, allocated_balance,
    per_allocation_limit, total_allocations_limit, movement_count,
    last_movement_at, created_at, updated_at
"#;

const REGISTER_COLUMNS: &str = r#"
    id, code, name, location, active, state, current_responsible,
    current_session_id, last_opened_at, last_closed_at, created_at, updated_at
"#;

const SESSION_COLUMNS: &str = r#"
    id, register_id, sequence_number, state, opening_time, opening_amount,
    opening_breakdown, opening_notes, opened_by, current_balance,
    running_income_total, running_expense_total, movement_count, last_movement_at,
    closing_time, closing_amount, closing_breakdown, closing_notes,
    variance_justification, closed_by, variance, variance_status, requires_review
"#;

const MOVEMENT_COLUMNS: &str = r#"
    id, sequence, holder_type, holder_id, kind, amount, balance_before, balance_after,
    concept, description, external_reference, linked_movement_id, actor_id, timestamp
"#;

const RECONCILIATION_COLUMNS: &str = r#"
    id, session_id, register_id, kind, system_amount, counted_amount, variance,
    status, denomination_breakdown, notes, performed_by, timestamp
"#;

/// Postgres-backed ledger store
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, LedgerError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgLedgerTx { tx }))
    }

    async fn vault(&self, id: Uuid) -> Result<Option<Vault>, LedgerError> {
        let row: Option<VaultRow> = sqlx::query_as(&format!("SELECT {} FROM vaults WHERE id = $1", VAULT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Vault::try_from).transpose()
    }

    async fn vaults(&self) -> Result<Vec<Vault>, LedgerError> {
        let rows: Vec<VaultRow> = sqlx::query_as(&format!("SELECT {} FROM vaults ORDER BY code", VAULT_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Vault::try_from).collect()
    }

    async fn register(&self, id: Uuid) -> Result<Option<Register>, LedgerError> {
        let row: Option<RegisterRow> =
            sqlx::query_as(&format!("SELECT {} FROM registers WHERE id = $1", REGISTER_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Register::try_from).transpose()
    }

    async fn registers(&self) -> Result<Vec<Register>, LedgerError> {
        let rows: Vec<RegisterRow> =
            sqlx::query_as(&format!("SELECT {} FROM registers ORDER BY code", REGISTER_COLUMNS))
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Register::try_from).collect()
    }

    async fn session(&self, id: Uuid) -> Result<Option<Session>, LedgerError> {
        let row: Option<SessionRow> =
            sqlx::query_as(&format!("SELECT {} FROM register_sessions WHERE id = $1", SESSION_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Session::try_from).transpose()
    }

    async fn sessions_for_register(&self, register_id: Uuid) -> Result<Vec<Session>, LedgerError> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM register_sessions WHERE register_id = $1 ORDER BY sequence_number DESC",
            SESSION_COLUMNS
        ))
        .bind(register_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Session::try_from).collect()
    }

    async fn movements(&self, holder: HolderRef, filter: &MovementFilter) -> Result<Vec<Movement>, LedgerError> {
        let rows: Vec<MovementRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM movements
            WHERE holder_type = $1 AND holder_id = $2
              AND ($3::timestamptz IS NULL OR timestamp >= $3)
              AND ($4::timestamptz IS NULL OR timestamp <= $4)
              AND ($5::bigint IS NULL OR sequence > $5)
            ORDER BY timestamp ASC, sequence ASC
            LIMIT $6
            "#,
            MOVEMENT_COLUMNS
        ))
        .bind(holder.holder_type.as_str())
        .bind(holder.holder_id)
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.after_sequence)
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Movement::try_from).collect()
    }

    async fn linked_movements(&self, link_id: Uuid) -> Result<Vec<Movement>, LedgerError> {
        let rows: Vec<MovementRow> = sqlx::query_as(&format!(
            "SELECT {} FROM movements WHERE linked_movement_id = $1 ORDER BY sequence",
            MOVEMENT_COLUMNS
        ))
        .bind(link_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Movement::try_from).collect()
    }

    async fn reconciliations_for_session(&self, session_id: Uuid) -> Result<Vec<Reconciliation>, LedgerError> {
        let rows: Vec<ReconciliationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM reconciliations WHERE session_id = $1 ORDER BY timestamp",
            RECONCILIATION_COLUMNS
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Reconciliation::try_from).collect()
    }

    async fn purge_expired_idempotency(&self, now: DateTime<Utc>) -> Result<u64, LedgerError> {
        let rows = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows)
    }
}

struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_vault(&mut self, id: Uuid) -> Result<Option<Vault>, LedgerError> {
        let row: Option<VaultRow> =
            sqlx::query_as(&format!("SELECT {} FROM vaults WHERE id = $1 FOR UPDATE", VAULT_COLUMNS))
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
        row.map(Vault::try_from).transpose()
    }

    async fn lock_register(&mut self, id: Uuid) -> Result<Option<Register>, LedgerError> {
        let row: Option<RegisterRow> =
            sqlx::query_as(&format!("SELECT {} FROM registers WHERE id = $1 FOR UPDATE", REGISTER_COLUMNS))
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
        row.map(Register::try_from).transpose()
    }

    async fn lock_session(&mut self, id: Uuid) -> Result<Option<Session>, LedgerError> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM register_sessions WHERE id = $1 FOR UPDATE",
            SESSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Session::try_from).transpose()
    }

    async fn session(&mut self, id: Uuid) -> Result<Option<Session>, LedgerError> {
        let row: Option<SessionRow> =
            sqlx::query_as(&format!("SELECT {} FROM register_sessions WHERE id = $1", SESSION_COLUMNS))
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
        row.map(Session::try_from).transpose()
    }

    async fn vault_by_code(&mut self, code: &str) -> Result<Option<Vault>, LedgerError> {
        let row: Option<VaultRow> = sqlx::query_as(&format!("SELECT {} FROM vaults WHERE code = $1", VAULT_COLUMNS))
            .bind(code)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Vault::try_from).transpose()
    }

    async fn register_by_code(&mut self, code: &str) -> Result<Option<Register>, LedgerError> {
        let row: Option<RegisterRow> =
            sqlx::query_as(&format!("SELECT {} FROM registers WHERE code = $1", REGISTER_COLUMNS))
                .bind(code)
                .fetch_optional(&mut *self.tx)
                .await?;
        row.map(Register::try_from).transpose()
    }

    async fn last_session_number(&mut self, register_id: Uuid) -> Result<i64, LedgerError> {
        let last: Option<i64> =
            sqlx::query_scalar("SELECT MAX(sequence_number) FROM register_sessions WHERE register_id = $1")
                .bind(register_id)
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(last.unwrap_or(0))
    }

    async fn insert_vault(&mut self, vault: &Vault) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO vaults (
                id, code, name, total_balance, available_balance, allocated_balance,
                per_allocation_limit, total_allocations_limit, movement_count,
                last_movement_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(vault.id)
        .bind(&vault.code)
        .bind(&vault.name)
        .bind(vault.total_balance.value())
        .bind(vault.available_balance.value())
        .bind(vault.allocated_balance.value())
        .bind(vault.per_allocation_limit.value())
        .bind(vault.total_allocations_limit.value())
        .bind(vault.movement_count)
        .bind(vault.last_movement_at)
        .bind(vault.created_at)
        .bind(vault.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_vault(&mut self, vault: &Vault) -> Result<(), LedgerError> {
        let rows = sqlx::query(
            r#"
            UPDATE vaults SET
                name = $2,
                total_balance = $3,
                available_balance = $4,
                allocated_balance = $5,
                per_allocation_limit = $6,
                total_allocations_limit = $7,
                movement_count = $8,
                last_movement_at = $9,
                updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(vault.id)
        .bind(&vault.name)
        .bind(vault.total_balance.value())
        .bind(vault.available_balance.value())
        .bind(vault.allocated_balance.value())
        .bind(vault.per_allocation_limit.value())
        .bind(vault.total_allocations_limit.value())
        .bind(vault.movement_count)
        .bind(vault.last_movement_at)
        .bind(vault.updated_at)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(LedgerError::Corrupt(format!("update of unknown vault {}", vault.id)));
        }
        Ok(())
    }

    async fn insert_register(&mut self, register: &Register) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO registers (
                id, code, name, location, active, state, current_responsible,
                current_session_id, last_opened_at, last_closed_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(register.id)
        .bind(&register.code)
        .bind(&register.name)
        .bind(&register.location)
        .bind(register.active)
        .bind(register.state.as_str())
        .bind(register.current_responsible)
        .bind(register.current_session_id)
        .bind(register.last_opened_at)
        .bind(register.last_closed_at)
        .bind(register.created_at)
        .bind(register.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_register(&mut self, register: &Register) -> Result<(), LedgerError> {
        let rows = sqlx::query(
            r#"
            UPDATE registers SET
                name = $2,
                location = $3,
                active = $4,
                state = $5,
                current_responsible = $6,
                current_session_id = $7,
                last_opened_at = $8,
                last_closed_at = $9,
                updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(register.id)
        .bind(&register.name)
        .bind(&register.location)
        .bind(register.active)
        .bind(register.state.as_str())
        .bind(register.current_responsible)
        .bind(register.current_session_id)
        .bind(register.last_opened_at)
        .bind(register.last_closed_at)
        .bind(register.updated_at)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(LedgerError::Corrupt(format!("update of unknown register {}", register.id)));
        }
        Ok(())
    }

    async fn insert_session(&mut self, session: &Session) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO register_sessions (
                id, register_id, sequence_number, state, opening_time, opening_amount,
                opening_breakdown, opening_notes, opened_by, current_balance,
                running_income_total, running_expense_total, movement_count, last_movement_at,
                requires_review
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(session.id)
        .bind(session.register_id)
        .bind(session.sequence_number)
        .bind(session.state.as_str())
        .bind(session.opening_time)
        .bind(session.opening_amount.value())
        .bind(serde_json::to_value(&session.opening_breakdown)?)
        .bind(&session.opening_notes)
        .bind(session.opened_by)
        .bind(session.current_balance.value())
        .bind(session.running_income_total.value())
        .bind(session.running_expense_total.value())
        .bind(session.movement_count)
        .bind(session.last_movement_at)
        .bind(session.requires_review)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_session(&mut self, session: &Session) -> Result<(), LedgerError> {
        let closing_breakdown = session
            .closing_breakdown
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let rows = sqlx::query(
            r#"
            UPDATE register_sessions SET
                state = $2,
                current_balance = $3,
                running_income_total = $4,
                running_expense_total = $5,
                movement_count = $6,
                last_movement_at = $7,
                closing_time = $8,
                closing_amount = $9,
                closing_breakdown = $10,
                closing_notes = $11,
                variance_justification = $12,
                closed_by = $13,
                variance = $14,
                variance_status = $15,
                requires_review = $16
            WHERE id = $1
            "#,
        )
        .bind(session.id)
        .bind(session.state.as_str())
        .bind(session.current_balance.value())
        .bind(session.running_income_total.value())
        .bind(session.running_expense_total.value())
        .bind(session.movement_count)
        .bind(session.last_movement_at)
        .bind(session.closing_time)
        .bind(session.closing_amount.map(|m| m.value()))
        .bind(closing_breakdown)
        .bind(&session.closing_notes)
        .bind(&session.variance_justification)
        .bind(session.closed_by)
        .bind(session.variance)
        .bind(session.variance_status.map(|s| s.as_str()))
        .bind(session.requires_review)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(LedgerError::Corrupt(format!("update of unknown session {}", session.id)));
        }
        Ok(())
    }

    async fn append_movement(&mut self, movement: &Movement) -> Result<Movement, LedgerError> {
        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO movements (
                id, holder_type, holder_id, kind, amount, balance_before, balance_after,
                concept, description, external_reference, linked_movement_id, actor_id, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING sequence
            "#,
        )
        .bind(movement.id)
        .bind(movement.holder.holder_type.as_str())
        .bind(movement.holder.holder_id)
        .bind(movement.kind.as_str())
        .bind(movement.amount.value())
        .bind(movement.balance_before.value())
        .bind(movement.balance_after.value())
        .bind(&movement.concept)
        .bind(&movement.description)
        .bind(&movement.external_reference)
        .bind(movement.linked_movement_id)
        .bind(movement.actor_id)
        .bind(movement.timestamp)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(Movement {
            sequence,
            ..movement.clone()
        })
    }

    async fn insert_reconciliation(&mut self, reconciliation: &Reconciliation) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO reconciliations (
                id, session_id, register_id, kind, system_amount, counted_amount, variance,
                status, denomination_breakdown, notes, performed_by, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(reconciliation.id)
        .bind(reconciliation.session_id)
        .bind(reconciliation.register_id)
        .bind(reconciliation.kind.as_str())
        .bind(reconciliation.system_amount.value())
        .bind(reconciliation.counted_amount.value())
        .bind(reconciliation.variance)
        .bind(reconciliation.status.as_str())
        .bind(serde_json::to_value(&reconciliation.denomination_breakdown)?)
        .bind(&reconciliation.notes)
        .bind(reconciliation.performed_by)
        .bind(reconciliation.timestamp)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn idempotency_record(&mut self, key: &str) -> Result<Option<IdempotencyRecord>, LedgerError> {
        let row: Option<(String, String, String, serde_json::Value, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT key, operation, request_hash, response, created_at, expires_at
            FROM idempotency_keys
            WHERE key = $1
            FOR UPDATE
            "#,
        )
        .bind(key)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(|(key, operation, request_hash, response, created_at, expires_at)| IdempotencyRecord {
            key,
            operation,
            request_hash,
            response,
            created_at,
            expires_at,
        }))
    }

    async fn save_idempotency_record(&mut self, record: &IdempotencyRecord) -> Result<(), LedgerError> {
        // An expired record under the same key is replaced.
        let rows = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, operation, request_hash, response, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (key) DO UPDATE SET
                operation = EXCLUDED.operation,
                request_hash = EXCLUDED.request_hash,
                response = EXCLUDED.response,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
            WHERE idempotency_keys.expires_at <= EXCLUDED.created_at
            "#,
        )
        .bind(&record.key)
        .bind(&record.operation)
        .bind(&record.request_hash)
        .bind(&record.response)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        // A live record written by a concurrent request under the same key;
        // the retry replays it.
        if rows == 0 {
            return Err(LedgerError::Conflict(format!("idempotency key {} in use", record.key)));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let PgLedgerTx { tx } = *self;
        tx.commit().await?;
        Ok(())
    }
}

// =========================================================================
// Row types
// =========================================================================

fn money(column: &str, value: Decimal) -> Result<Money, LedgerError> {
    Money::new(value).map_err(|e| LedgerError::Corrupt(format!("{}: {}", column, e)))
}

fn parse<T: std::str::FromStr<Err = String>>(value: &str) -> Result<T, LedgerError> {
    value.parse().map_err(LedgerError::Corrupt)
}

fn breakdown(value: serde_json::Value) -> Result<DenominationBreakdown, LedgerError> {
    Ok(serde_json::from_value(value)?)
}

#[derive(sqlx::FromRow)]
struct VaultRow {
    id: Uuid,
    code: String,
    name: String,
    total_balance: Decimal,
    available_balance: Decimal,
    allocated_balance: Decimal,
    per_allocation_limit: Decimal,
    total_allocations_limit: Decimal,
    movement_count: i64,
    last_movement_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<VaultRow> for Vault {
    type Error = LedgerError;

    fn try_from(row: VaultRow) -> Result<Self, Self::Error> {
        Ok(Vault {
            id: row.id,
            code: row.code,
            name: row.name,
            total_balance: money("total_balance", row.total_balance)?,
            available_balance: money("available_balance", row.available_balance)?,
            allocated_balance: money("allocated_balance", row.allocated_balance)?,
            per_allocation_limit: money("per_allocation_limit", row.per_allocation_limit)?,
            total_allocations_limit: money("total_allocations_limit", row.total_allocations_limit)?,
            movement_count: row.movement_count,
            last_movement_at: row.last_movement_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RegisterRow {
    id: Uuid,
    code: String,
    name: String,
    location: Option<String>,
    active: bool,
    state: String,
    current_responsible: Option<Uuid>,
    current_session_id: Option<Uuid>,
    last_opened_at: Option<DateTime<Utc>>,
    last_closed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RegisterRow> for Register {
    type Error = LedgerError;

    fn try_from(row: RegisterRow) -> Result<Self, Self::Error> {
        Ok(Register {
            id: row.id,
            code: row.code,
            name: row.name,
            location: row.location,
            active: row.active,
            state: parse(&row.state)?,
            current_responsible: row.current_responsible,
            current_session_id: row.current_session_id,
            last_opened_at: row.last_opened_at,
            last_closed_at: row.last_closed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    register_id: Uuid,
    sequence_number: i64,
    state: String,
    opening_time: DateTime<Utc>,
    opening_amount: Decimal,
    opening_breakdown: serde_json::Value,
    opening_notes: Option<String>,
    opened_by: Uuid,
    current_balance: Decimal,
    running_income_total: Decimal,
    running_expense_total: Decimal,
    movement_count: i64,
    last_movement_at: Option<DateTime<Utc>>,
    closing_time: Option<DateTime<Utc>>,
    closing_amount: Option<Decimal>,
    closing_breakdown: Option<serde_json::Value>,
    closing_notes: Option<String>,
    variance_justification: Option<String>,
    closed_by: Option<Uuid>,
    variance: Option<Decimal>,
    variance_status: Option<String>,
    requires_review: bool,
}

impl TryFrom<SessionRow> for Session {
    type Error = LedgerError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(Session {
            id: row.id,
            register_id: row.register_id,
            sequence_number: row.sequence_number,
            state: parse(&row.state)?,
            opening_time: row.opening_time,
            opening_amount: money("opening_amount", row.opening_amount)?,
            opening_breakdown: breakdown(row.opening_breakdown)?,
            opening_notes: row.opening_notes,
            opened_by: row.opened_by,
            current_balance: money("current_balance", row.current_balance)?,
            running_income_total: money("running_income_total", row.running_income_total)?,
            running_expense_total: money("running_expense_total", row.running_expense_total)?,
            movement_count: row.movement_count,
            last_movement_at: row.last_movement_at,
            closing_time: row.closing_time,
            closing_amount: row.closing_amount.map(|v| money("closing_amount", v)).transpose()?,
            closing_breakdown: row.closing_breakdown.map(breakdown).transpose()?,
            closing_notes: row.closing_notes,
            variance_justification: row.variance_justification,
            closed_by: row.closed_by,
            variance: row.variance,
            variance_status: row.variance_status.as_deref().map(parse).transpose()?,
            requires_review: row.requires_review,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MovementRow {
    id: Uuid,
    sequence: i64,
    holder_type: String,
    holder_id: Uuid,
    kind: String,
    amount: Decimal,
    balance_before: Decimal,
    balance_after: Decimal,
    concept: String,
    description: Option<String>,
    external_reference: Option<String>,
    linked_movement_id: Option<Uuid>,
    actor_id: Uuid,
    timestamp: DateTime<Utc>,
}

impl TryFrom<MovementRow> for Movement {
    type Error = LedgerError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        Ok(Movement {
            id: row.id,
            sequence: row.sequence,
            holder: HolderRef {
                holder_type: parse(&row.holder_type)?,
                holder_id: row.holder_id,
            },
            kind: parse(&row.kind)?,
            amount: money("amount", row.amount)?,
            balance_before: money("balance_before", row.balance_before)?,
            balance_after: money("balance_after", row.balance_after)?,
            concept: row.concept,
            description: row.description,
            external_reference: row.external_reference,
            linked_movement_id: row.linked_movement_id,
            actor_id: row.actor_id,
            timestamp: row.timestamp,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReconciliationRow {
    id: Uuid,
    session_id: Uuid,
    register_id: Uuid,
    kind: String,
    system_amount: Decimal,
    counted_amount: Decimal,
    variance: Decimal,
    status: String,
    denomination_breakdown: serde_json::Value,
    notes: Option<String>,
    performed_by: Uuid,
    timestamp: DateTime<Utc>,
}

impl TryFrom<ReconciliationRow> for Reconciliation {
    type Error = LedgerError;

    fn try_from(row: ReconciliationRow) -> Result<Self, Self::Error> {
        Ok(Reconciliation {
            id: row.id,
            session_id: row.session_id,
            register_id: row.register_id,
            kind: parse(&row.kind)?,
            system_amount: money("system_amount", row.system_amount)?,
            counted_amount: money("counted_amount", row.counted_amount)?,
            variance: row.variance,
            status: parse(&row.status)?,
            denomination_breakdown: breakdown(row.denomination_breakdown)?,
            notes: row.notes,
            performed_by: row.performed_by,
            timestamp: row.timestamp,
        })
    }
}
