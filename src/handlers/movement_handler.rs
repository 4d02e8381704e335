//! Movement Handler
//!
//! The recording call used by loan disbursement, collections and the vault
//! operators. Only cash-flow kinds are accepted here; openings, allocations
//! and transfers are written by their own handlers.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::aggregate::BalanceHolder;
use crate::config::LedgerSettings;
use crate::domain::{DomainError, HolderType, Movement, MovementDraft, OperationContext};
use crate::error::AppError;
use crate::idempotency::IdempotentRequest;
use crate::ledger::LedgerStore;

use super::session_handler::lock_session_and_register;
use super::unit_of_work::{finish, idempotent, not_found, replayed, with_retry};
use super::RecordMovementCommand;

/// Handler for single movements
pub struct MovementHandler {
    store: Arc<dyn LedgerStore>,
    settings: Arc<LedgerSettings>,
}

impl MovementHandler {
    pub fn new(store: Arc<dyn LedgerStore>, settings: Arc<LedgerSettings>) -> Self {
        Self { store, settings }
    }

    /// Record a movement against a vault or an open session
    pub async fn record(
        &self,
        command: RecordMovementCommand,
        idempotency_key: Option<&str>,
        context: &OperationContext,
    ) -> Result<Movement, AppError> {
        let actor = context.require_actor()?;
        if !command.kind.is_directly_recordable() {
            return Err(DomainError::InvalidMovementKind {
                kind: command.kind.to_string(),
                holder: command.holder.holder_type.to_string(),
            }
            .into());
        }
        let request = idempotent(idempotency_key, "record_movement", &command)?;

        with_retry("record_movement", || self.try_record(&command, request.as_ref(), actor)).await
    }

    async fn try_record(
        &self,
        command: &RecordMovementCommand,
        request: Option<&IdempotentRequest>,
        actor: Uuid,
    ) -> Result<Movement, AppError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        if let Some(previous) = replayed(request, tx.as_mut(), now).await? {
            return Ok(previous);
        }

        let draft = MovementDraft::new(command.kind, command.amount.as_money(), command.concept.clone(), actor)
            .with_description(command.description.clone())
            .with_external_reference(command.external_reference.clone());

        let holder_id = command.holder.holder_id;
        let movement = match command.holder.holder_type {
            HolderType::Vault => {
                let mut vault = tx
                    .lock_vault(holder_id)
                    .await?
                    .ok_or_else(|| not_found("vault", holder_id))?;
                let movement = vault.post(draft, now)?;
                let movement = tx.append_movement(&movement).await?;
                tx.update_vault(&vault).await?;
                movement
            }
            HolderType::Session => {
                let (register, mut session) = lock_session_and_register(tx.as_mut(), holder_id).await?;
                session.ensure_open()?;
                register.ensure_operable()?;
                let movement = session.post(draft, now)?;
                let movement = tx.append_movement(&movement).await?;
                tx.update_session(&session).await?;
                movement
            }
        };

        finish(tx, request, &movement, now, self.settings.idempotency_ttl).await?;

        tracing::info!(
            holder = %movement.holder,
            movement_id = %movement.id,
            kind = %movement.kind,
            amount = %movement.amount,
            balance_after = %movement.balance_after,
            actor_id = %actor,
            "Movement recorded"
        );

        Ok(movement)
    }
}
