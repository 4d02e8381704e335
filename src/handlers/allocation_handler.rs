//! Allocation Handler
//!
//! Moves cash between the vault and register sessions, and between two
//! sessions. Each operation writes two movements sharing one link id in a
//! single transaction.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::aggregate::{BalanceHolder, Register};
use crate::config::LedgerSettings;
use crate::domain::{Amount, DomainError, MovementDraft, MovementKind, OperationContext};
use crate::error::AppError;
use crate::idempotency::IdempotentRequest;
use crate::ledger::LedgerStore;

use super::session_handler::lock_session_and_register;
use super::unit_of_work::{finish, idempotent, not_found, replayed, with_retry};
use super::{AllocateCommand, LinkedMovements, ReturnToVaultCommand, TransferCommand};

/// Handler for vault allocations, returns and session transfers
pub struct AllocationHandler {
    store: Arc<dyn LedgerStore>,
    settings: Arc<LedgerSettings>,
}

impl AllocationHandler {
    pub fn new(store: Arc<dyn LedgerStore>, settings: Arc<LedgerSettings>) -> Self {
        Self { store, settings }
    }

    // =========================================================================
    // Vault -> session
    // =========================================================================

    /// Hand vault cash to an open session
    pub async fn allocate(
        &self,
        command: AllocateCommand,
        idempotency_key: Option<&str>,
        context: &OperationContext,
    ) -> Result<LinkedMovements, AppError> {
        let actor = context.require_actor()?;
        let request = idempotent(idempotency_key, "allocate", &command)?;

        with_retry("allocate", || self.try_allocate(&command, request.as_ref(), actor)).await
    }

    async fn try_allocate(
        &self,
        command: &AllocateCommand,
        request: Option<&IdempotentRequest>,
        actor: Uuid,
    ) -> Result<LinkedMovements, AppError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        if let Some(previous) = replayed(request, tx.as_mut(), now).await? {
            return Ok(previous);
        }

        let mut vault = tx
            .lock_vault(command.vault_id)
            .await?
            .ok_or_else(|| not_found("vault", command.vault_id))?;
        let (register, mut session) = lock_session_and_register(tx.as_mut(), command.session_id).await?;

        if !session.is_open() {
            return Err(DomainError::DestinationNotOpen(session.id).into());
        }
        register.ensure_operable()?;
        vault.check_allocation(command.amount)?;

        let link_id = Uuid::new_v4();
        let concept = concept_or(&command.concept, || format!("Allocation to register {}", register.code));
        let source = vault.post(draft(MovementKind::AllocationOut, command.amount, &concept, actor, link_id), now)?;
        let destination =
            session.post(draft(MovementKind::AllocationIn, command.amount, &concept, actor, link_id), now)?;

        let source = tx.append_movement(&source).await?;
        let destination = tx.append_movement(&destination).await?;
        tx.update_vault(&vault).await?;
        tx.update_session(&session).await?;

        let result = LinkedMovements {
            link_id,
            source,
            destination,
        };
        finish(tx, request, &result, now, self.settings.idempotency_ttl).await?;

        tracing::info!(
            vault_id = %vault.id,
            session_id = %session.id,
            link_id = %link_id,
            amount = %command.amount,
            available = %vault.available_balance,
            allocated = %vault.allocated_balance,
            actor_id = %actor,
            "Cash allocated"
        );

        Ok(result)
    }

    // =========================================================================
    // Session -> vault
    // =========================================================================

    /// Send session cash back to the vault
    pub async fn return_to_vault(
        &self,
        command: ReturnToVaultCommand,
        idempotency_key: Option<&str>,
        context: &OperationContext,
    ) -> Result<LinkedMovements, AppError> {
        let actor = context.require_actor()?;
        let request = idempotent(idempotency_key, "return_to_vault", &command)?;

        with_retry("return_to_vault", || self.try_return(&command, request.as_ref(), actor)).await
    }

    async fn try_return(
        &self,
        command: &ReturnToVaultCommand,
        request: Option<&IdempotentRequest>,
        actor: Uuid,
    ) -> Result<LinkedMovements, AppError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        if let Some(previous) = replayed(request, tx.as_mut(), now).await? {
            return Ok(previous);
        }

        let mut vault = tx
            .lock_vault(command.vault_id)
            .await?
            .ok_or_else(|| not_found("vault", command.vault_id))?;
        let (register, mut session) = lock_session_and_register(tx.as_mut(), command.session_id).await?;

        session.ensure_open()?;
        register.ensure_operable()?;

        let link_id = Uuid::new_v4();
        let concept = concept_or(&command.concept, || format!("Return from register {}", register.code));
        let source = session.post(draft(MovementKind::AllocationOut, command.amount, &concept, actor, link_id), now)?;
        let destination = vault.post(draft(MovementKind::AllocationIn, command.amount, &concept, actor, link_id), now)?;

        let source = tx.append_movement(&source).await?;
        let destination = tx.append_movement(&destination).await?;
        tx.update_vault(&vault).await?;
        tx.update_session(&session).await?;

        let result = LinkedMovements {
            link_id,
            source,
            destination,
        };
        finish(tx, request, &result, now, self.settings.idempotency_ttl).await?;

        tracing::info!(
            vault_id = %vault.id,
            session_id = %session.id,
            link_id = %link_id,
            amount = %command.amount,
            available = %vault.available_balance,
            allocated = %vault.allocated_balance,
            actor_id = %actor,
            "Cash returned to vault"
        );

        Ok(result)
    }

    // =========================================================================
    // Session -> session
    // =========================================================================

    /// Move cash between two open sessions
    pub async fn transfer(
        &self,
        command: TransferCommand,
        idempotency_key: Option<&str>,
        context: &OperationContext,
    ) -> Result<LinkedMovements, AppError> {
        let actor = context.require_actor()?;
        if command.from_session_id == command.to_session_id {
            return Err(DomainError::SameSessionTransfer.into());
        }
        let request = idempotent(idempotency_key, "transfer", &command)?;

        with_retry("transfer", || self.try_transfer(&command, request.as_ref(), actor)).await
    }

    async fn try_transfer(
        &self,
        command: &TransferCommand,
        request: Option<&IdempotentRequest>,
        actor: Uuid,
    ) -> Result<LinkedMovements, AppError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        if let Some(previous) = replayed(request, tx.as_mut(), now).await? {
            return Ok(previous);
        }

        let from_id = command.from_session_id;
        let to_id = command.to_session_id;
        let from_register = tx
            .session(from_id)
            .await?
            .ok_or_else(|| not_found("session", from_id))?
            .register_id;
        let to_register = tx
            .session(to_id)
            .await?
            .ok_or_else(|| not_found("session", to_id))?
            .register_id;

        // Registers, then sessions, each in ascending id order.
        let mut register_ids = vec![from_register, to_register];
        register_ids.sort();
        register_ids.dedup();
        let mut registers: Vec<Register> = Vec::with_capacity(register_ids.len());
        for id in register_ids {
            let register = tx
                .lock_register(id)
                .await?
                .ok_or_else(|| DomainError::invariant(format!("register {}", id), "register row missing"))?;
            registers.push(register);
        }

        let (first, second) = if from_id < to_id { (from_id, to_id) } else { (to_id, from_id) };
        let first_session = tx.lock_session(first).await?.ok_or_else(|| not_found("session", first))?;
        let second_session = tx.lock_session(second).await?.ok_or_else(|| not_found("session", second))?;
        let (mut source, mut destination) = if first == from_id {
            (first_session, second_session)
        } else {
            (second_session, first_session)
        };

        source.ensure_open()?;
        if !destination.is_open() {
            return Err(DomainError::DestinationNotOpen(destination.id).into());
        }
        for register in &registers {
            register.ensure_operable()?;
        }

        let link_id = Uuid::new_v4();
        let concept = concept_or(&command.concept, || "Transfer between registers".to_string());
        let out = source.post(draft(MovementKind::TransferOut, command.amount, &concept, actor, link_id), now)?;
        let inn = destination.post(draft(MovementKind::TransferIn, command.amount, &concept, actor, link_id), now)?;

        let out = tx.append_movement(&out).await?;
        let inn = tx.append_movement(&inn).await?;
        tx.update_session(&source).await?;
        tx.update_session(&destination).await?;

        let result = LinkedMovements {
            link_id,
            source: out,
            destination: inn,
        };
        finish(tx, request, &result, now, self.settings.idempotency_ttl).await?;

        tracing::info!(
            from_session_id = %from_id,
            to_session_id = %to_id,
            link_id = %link_id,
            amount = %command.amount,
            actor_id = %actor,
            "Cash transferred between sessions"
        );

        Ok(result)
    }
}

fn draft(kind: MovementKind, amount: Amount, concept: &str, actor: Uuid, link_id: Uuid) -> MovementDraft {
    MovementDraft::new(kind, amount.as_money(), concept, actor).linked_to(link_id)
}

fn concept_or(concept: &Option<String>, default: impl FnOnce() -> String) -> String {
    concept.clone().filter(|c| !c.trim().is_empty()).unwrap_or_else(default)
}
