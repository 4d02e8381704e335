//! Session Handler
//!
//! Opens and closes register sessions and records counts against them.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::aggregate::{BalanceHolder, Register, Session};
use crate::config::LedgerSettings;
use crate::domain::{validate_breakdown, DomainError, OperationContext, Reconciliation, ReconciliationKind};
use crate::error::AppError;
use crate::idempotency::IdempotentRequest;
use crate::ledger::{LedgerStore, LedgerTx};

use super::unit_of_work::{finish, idempotent, not_found, replayed, with_retry};
use super::{
    BeginCountCommand, CloseSessionCommand, CloseSessionResult, OpenSessionCommand, OpenSessionResult,
    SpotCheckCommand,
};

/// Handler for the session lifecycle
pub struct SessionHandler {
    store: Arc<dyn LedgerStore>,
    settings: Arc<LedgerSettings>,
}

impl SessionHandler {
    pub fn new(store: Arc<dyn LedgerStore>, settings: Arc<LedgerSettings>) -> Self {
        Self { store, settings }
    }

    // =========================================================================
    // Open
    // =========================================================================

    /// Open a session on a closed register.
    ///
    /// The opening count is checked before any transaction starts, so a bad
    /// breakdown never creates a session.
    pub async fn open(
        &self,
        command: OpenSessionCommand,
        idempotency_key: Option<&str>,
        context: &OperationContext,
    ) -> Result<OpenSessionResult, AppError> {
        let actor = context.require_actor()?;
        validate_breakdown(
            &self.settings.denominations,
            &command.denomination_breakdown,
            command.opening_amount,
        )?;
        let request = idempotent(idempotency_key, "open_session", &command)?;

        with_retry("open_session", || self.try_open(&command, request.as_ref(), actor)).await
    }

    async fn try_open(
        &self,
        command: &OpenSessionCommand,
        request: Option<&IdempotentRequest>,
        actor: Uuid,
    ) -> Result<OpenSessionResult, AppError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        if let Some(previous) = replayed(request, tx.as_mut(), now).await? {
            return Ok(previous);
        }

        let mut register = tx
            .lock_register(command.register_id)
            .await?
            .ok_or_else(|| not_found("register", command.register_id))?;
        register.ensure_can_open()?;

        let sequence_number = tx.last_session_number(register.id).await? + 1;
        let mut session = Session::open(
            Uuid::new_v4(),
            register.id,
            sequence_number,
            command.opening_amount,
            command.denomination_breakdown.clone(),
            command.notes.clone(),
            actor,
            now,
        );
        let opening = session.post(session.opening_draft(), now)?;
        register.mark_opened(session.id, actor, now)?;

        // Counted and expected are both the float; recorded so every session
        // has an opening count to compare the closing one with.
        let reconciliation = Reconciliation::record(
            session.id,
            register.id,
            ReconciliationKind::Opening,
            command.opening_amount,
            command.opening_amount,
            command.denomination_breakdown.clone(),
            command.notes.clone(),
            actor,
            now,
        );

        tx.insert_session(&session).await?;
        let opening_movement = tx.append_movement(&opening).await?;
        tx.update_register(&register).await?;
        tx.insert_reconciliation(&reconciliation).await?;

        let result = OpenSessionResult {
            session,
            opening_movement,
            reconciliation,
        };
        finish(tx, request, &result, now, self.settings.idempotency_ttl).await?;

        tracing::info!(
            register_id = %register.id,
            session_id = %result.session.id,
            sequence_number,
            opening_amount = %command.opening_amount,
            actor_id = %actor,
            "Session opened"
        );

        Ok(result)
    }

    // =========================================================================
    // Close
    // =========================================================================

    /// Close a session against a physical count. A variance is recorded and
    /// flagged, never refused.
    pub async fn close(
        &self,
        command: CloseSessionCommand,
        idempotency_key: Option<&str>,
        context: &OperationContext,
    ) -> Result<CloseSessionResult, AppError> {
        let actor = context.require_actor()?;
        validate_breakdown(
            &self.settings.denominations,
            &command.denomination_breakdown,
            command.counted_amount,
        )?;
        let request = idempotent(idempotency_key, "close_session", &command)?;

        with_retry("close_session", || self.try_close(&command, request.as_ref(), actor)).await
    }

    async fn try_close(
        &self,
        command: &CloseSessionCommand,
        request: Option<&IdempotentRequest>,
        actor: Uuid,
    ) -> Result<CloseSessionResult, AppError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        if let Some(previous) = replayed(request, tx.as_mut(), now).await? {
            return Ok(previous);
        }

        let (mut register, mut session) = lock_session_and_register(tx.as_mut(), command.session_id).await?;
        if !session.is_open() {
            return Err(DomainError::SessionAlreadyClosed(session.id).into());
        }

        let reconciliation = Reconciliation::record(
            session.id,
            register.id,
            ReconciliationKind::Closing,
            session.current_balance,
            command.counted_amount,
            command.denomination_breakdown.clone(),
            command.notes.clone(),
            actor,
            now,
        );
        let requires_review = reconciliation.exceeds(self.settings.variance_alert_threshold);

        session.close(
            &reconciliation,
            requires_review,
            actor,
            command.notes.clone(),
            command.variance_justification.clone(),
            now,
        )?;
        register.mark_closed(now)?;

        tx.insert_reconciliation(&reconciliation).await?;
        tx.update_session(&session).await?;
        tx.update_register(&register).await?;

        let result = CloseSessionResult {
            session,
            register,
            reconciliation,
            requires_review,
        };
        finish(tx, request, &result, now, self.settings.idempotency_ttl).await?;

        log_variance(&result.reconciliation, requires_review);
        tracing::info!(
            register_id = %result.register.id,
            session_id = %result.session.id,
            counted_amount = %command.counted_amount,
            variance = %result.reconciliation.variance,
            actor_id = %actor,
            "Session closed"
        );

        Ok(result)
    }

    // =========================================================================
    // Counts
    // =========================================================================

    /// Record an intermediate count. The session stays open and a count in
    /// progress on the register ends.
    pub async fn spot_check(
        &self,
        command: SpotCheckCommand,
        idempotency_key: Option<&str>,
        context: &OperationContext,
    ) -> Result<Reconciliation, AppError> {
        let actor = context.require_actor()?;
        validate_breakdown(
            &self.settings.denominations,
            &command.denomination_breakdown,
            command.counted_amount,
        )?;
        let request = idempotent(idempotency_key, "spot_check", &command)?;

        with_retry("spot_check", || self.try_spot_check(&command, request.as_ref(), actor)).await
    }

    async fn try_spot_check(
        &self,
        command: &SpotCheckCommand,
        request: Option<&IdempotentRequest>,
        actor: Uuid,
    ) -> Result<Reconciliation, AppError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        if let Some(previous) = replayed(request, tx.as_mut(), now).await? {
            return Ok(previous);
        }

        let (mut register, session) = lock_session_and_register(tx.as_mut(), command.session_id).await?;
        session.ensure_open()?;

        let reconciliation = Reconciliation::record(
            session.id,
            register.id,
            ReconciliationKind::SpotCheck,
            session.current_balance,
            command.counted_amount,
            command.denomination_breakdown.clone(),
            command.notes.clone(),
            actor,
            now,
        );
        register.end_count(now);

        tx.insert_reconciliation(&reconciliation).await?;
        tx.update_register(&register).await?;
        finish(tx, request, &reconciliation, now, self.settings.idempotency_ttl).await?;

        let requires_review = reconciliation.exceeds(self.settings.variance_alert_threshold);
        log_variance(&reconciliation, requires_review);
        tracing::info!(
            session_id = %session.id,
            counted_amount = %command.counted_amount,
            variance = %reconciliation.variance,
            actor_id = %actor,
            "Spot check recorded"
        );

        Ok(reconciliation)
    }

    /// Put the session's register into the counting state
    pub async fn begin_count(
        &self,
        command: BeginCountCommand,
        idempotency_key: Option<&str>,
        context: &OperationContext,
    ) -> Result<Register, AppError> {
        let actor = context.require_actor()?;
        let request = idempotent(idempotency_key, "begin_count", &command)?;

        with_retry("begin_count", || self.try_begin_count(&command, request.as_ref(), actor)).await
    }

    async fn try_begin_count(
        &self,
        command: &BeginCountCommand,
        request: Option<&IdempotentRequest>,
        actor: Uuid,
    ) -> Result<Register, AppError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        if let Some(previous) = replayed(request, tx.as_mut(), now).await? {
            return Ok(previous);
        }

        let (mut register, session) = lock_session_and_register(tx.as_mut(), command.session_id).await?;
        session.ensure_open()?;
        register.begin_count(now)?;

        tx.update_register(&register).await?;
        finish(tx, request, &register, now, self.settings.idempotency_ttl).await?;

        tracing::info!(register_id = %register.id, session_id = %session.id, actor_id = %actor, "Count started");
        Ok(register)
    }
}

/// Lock a session and its register, register first
pub(crate) async fn lock_session_and_register(
    tx: &mut dyn LedgerTx,
    session_id: Uuid,
) -> Result<(Register, Session), AppError> {
    let register_id = tx
        .session(session_id)
        .await?
        .ok_or_else(|| not_found("session", session_id))?
        .register_id;

    let register = tx
        .lock_register(register_id)
        .await?
        .ok_or_else(|| DomainError::invariant(format!("session {}", session_id), "register row missing"))?;
    let session = tx
        .lock_session(session_id)
        .await?
        .ok_or_else(|| not_found("session", session_id))?;

    Ok((register, session))
}

fn log_variance(reconciliation: &Reconciliation, requires_review: bool) {
    if requires_review {
        tracing::warn!(
            session_id = %reconciliation.session_id,
            kind = %reconciliation.kind,
            variance = %reconciliation.variance,
            status = reconciliation.status.as_str(),
            alert = true,
            "Count variance above alert threshold"
        );
    } else if !reconciliation.variance.is_zero() {
        tracing::warn!(
            session_id = %reconciliation.session_id,
            kind = %reconciliation.kind,
            variance = %reconciliation.variance,
            status = reconciliation.status.as_str(),
            "Count variance"
        );
    }
}
