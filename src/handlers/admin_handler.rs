//! Admin Handler
//!
//! Vault provisioning and limits, the vault invariant check, and register
//! administration.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::aggregate::{replay, BalanceHolder, Register, Vault};
use crate::config::LedgerSettings;
use crate::domain::{
    sort_for_replay, DomainError, HolderRef, MovementDraft, MovementKind, OperationContext,
};
use crate::error::AppError;
use crate::idempotency::IdempotentRequest;
use crate::ledger::{LedgerStore, MovementFilter};

use super::unit_of_work::{finish, idempotent, not_found, replayed, with_retry};
use super::{
    CreateRegisterCommand, InvariantReport, ProvisionVaultCommand, ProvisionVaultResult, RegisterAdminAction,
    RegisterAdminCommand, UpdateVaultLimitsCommand,
};

/// Handler for configuration-level operations
pub struct AdminHandler {
    store: Arc<dyn LedgerStore>,
    settings: Arc<LedgerSettings>,
}

impl AdminHandler {
    pub fn new(store: Arc<dyn LedgerStore>, settings: Arc<LedgerSettings>) -> Self {
        Self { store, settings }
    }

    // =========================================================================
    // Vaults
    // =========================================================================

    /// Create a vault and put its initial cash on the books
    pub async fn provision_vault(
        &self,
        command: ProvisionVaultCommand,
        idempotency_key: Option<&str>,
        context: &OperationContext,
    ) -> Result<ProvisionVaultResult, AppError> {
        let actor = context.require_actor()?;
        if command.code.trim().is_empty() || command.name.trim().is_empty() {
            return Err(AppError::InvalidRequest("vault code and name are required".to_string()));
        }
        let request = idempotent(idempotency_key, "provision_vault", &command)?;

        with_retry("provision_vault", || self.try_provision(&command, request.as_ref(), actor)).await
    }

    async fn try_provision(
        &self,
        command: &ProvisionVaultCommand,
        request: Option<&IdempotentRequest>,
        actor: Uuid,
    ) -> Result<ProvisionVaultResult, AppError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        if let Some(previous) = replayed(request, tx.as_mut(), now).await? {
            return Ok(previous);
        }

        let code = command.code.trim();
        if tx.vault_by_code(code).await?.is_some() {
            return Err(DomainError::DuplicateVaultCode(code.to_string()).into());
        }

        let mut vault = Vault::provision(
            Uuid::new_v4(),
            code,
            command.name.trim(),
            command.per_allocation_limit,
            command.total_allocations_limit,
            now,
        );
        let opening = vault.post(
            MovementDraft::new(MovementKind::Opening, command.initial_balance, "Vault provisioning", actor),
            now,
        )?;

        tx.insert_vault(&vault).await?;
        let opening_movement = tx.append_movement(&opening).await?;

        let result = ProvisionVaultResult { vault, opening_movement };
        finish(tx, request, &result, now, self.settings.idempotency_ttl).await?;

        tracing::info!(
            vault_id = %result.vault.id,
            code = %result.vault.code,
            initial_balance = %command.initial_balance,
            actor_id = %actor,
            "Vault provisioned"
        );

        Ok(result)
    }

    pub async fn update_vault_limits(
        &self,
        command: UpdateVaultLimitsCommand,
        idempotency_key: Option<&str>,
        context: &OperationContext,
    ) -> Result<Vault, AppError> {
        let actor = context.require_actor()?;
        let request = idempotent(idempotency_key, "update_vault_limits", &command)?;

        with_retry("update_vault_limits", || self.try_update_limits(&command, request.as_ref(), actor)).await
    }

    async fn try_update_limits(
        &self,
        command: &UpdateVaultLimitsCommand,
        request: Option<&IdempotentRequest>,
        actor: Uuid,
    ) -> Result<Vault, AppError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        if let Some(previous) = replayed(request, tx.as_mut(), now).await? {
            return Ok(previous);
        }

        let mut vault = tx
            .lock_vault(command.vault_id)
            .await?
            .ok_or_else(|| not_found("vault", command.vault_id))?;
        vault.set_limits(command.per_allocation_limit, command.total_allocations_limit, now);
        tx.update_vault(&vault).await?;
        finish(tx, request, &vault, now, self.settings.idempotency_ttl).await?;

        tracing::info!(
            vault_id = %vault.id,
            per_allocation_limit = %vault.per_allocation_limit,
            total_allocations_limit = %vault.total_allocations_limit,
            actor_id = %actor,
            "Vault limits updated"
        );

        Ok(vault)
    }

    /// Check `total == available + allocated` and that the cached balances
    /// match a replay of the vault's movement log.
    ///
    /// A violation is never corrected here; it is returned for an operator.
    pub async fn verify_invariant(&self, vault_id: Uuid) -> Result<InvariantReport, AppError> {
        let vault = self
            .store
            .vault(vault_id)
            .await?
            .ok_or_else(|| not_found("vault", vault_id))?;
        vault.check_invariant()?;

        let mut history = self.store.movements(HolderRef::vault(vault_id), &MovementFilter::all()).await?;
        sort_for_replay(&mut history);
        // Movements appended after the vault row was read are not in its cache.
        history.truncate(usize::try_from(vault.movement_count).unwrap_or(0));

        let rebuilt = replay(vault.emptied(), &history)?;
        if rebuilt.total_balance != vault.total_balance
            || rebuilt.available_balance != vault.available_balance
            || rebuilt.allocated_balance != vault.allocated_balance
            || rebuilt.movement_count != vault.movement_count
        {
            return Err(DomainError::invariant(
                format!("vault {}", vault_id),
                format!(
                    "cached total/available/allocated {}/{}/{} ({} movements), log replays to {}/{}/{} ({} movements)",
                    vault.total_balance,
                    vault.available_balance,
                    vault.allocated_balance,
                    vault.movement_count,
                    rebuilt.total_balance,
                    rebuilt.available_balance,
                    rebuilt.allocated_balance,
                    rebuilt.movement_count
                ),
            )
            .into());
        }

        Ok(InvariantReport {
            vault_id,
            total_balance: vault.total_balance,
            available_balance: vault.available_balance,
            allocated_balance: vault.allocated_balance,
            movements_replayed: history.len(),
            checked_at: Utc::now(),
        })
    }

    // =========================================================================
    // Registers
    // =========================================================================

    pub async fn create_register(
        &self,
        command: CreateRegisterCommand,
        idempotency_key: Option<&str>,
        context: &OperationContext,
    ) -> Result<Register, AppError> {
        let actor = context.require_actor()?;
        if command.code.trim().is_empty() || command.name.trim().is_empty() {
            return Err(AppError::InvalidRequest("register code and name are required".to_string()));
        }
        let request = idempotent(idempotency_key, "create_register", &command)?;

        with_retry("create_register", || self.try_create_register(&command, request.as_ref(), actor)).await
    }

    async fn try_create_register(
        &self,
        command: &CreateRegisterCommand,
        request: Option<&IdempotentRequest>,
        actor: Uuid,
    ) -> Result<Register, AppError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        if let Some(previous) = replayed(request, tx.as_mut(), now).await? {
            return Ok(previous);
        }

        let code = command.code.trim();
        if tx.register_by_code(code).await?.is_some() {
            return Err(DomainError::DuplicateRegisterCode(code.to_string()).into());
        }

        let register = Register::create(Uuid::new_v4(), code, command.name.trim(), command.location.clone(), now);
        tx.insert_register(&register).await?;
        finish(tx, request, &register, now, self.settings.idempotency_ttl).await?;

        tracing::info!(register_id = %register.id, code = %register.code, actor_id = %actor, "Register created");
        Ok(register)
    }

    pub async fn set_register_active(
        &self,
        register_id: Uuid,
        active: bool,
        idempotency_key: Option<&str>,
        context: &OperationContext,
    ) -> Result<Register, AppError> {
        let action = if active {
            RegisterAdminAction::Activate
        } else {
            RegisterAdminAction::Deactivate
        };
        self.administer_register(RegisterAdminCommand { register_id, action }, idempotency_key, context)
            .await
    }

    pub async fn block_register(
        &self,
        register_id: Uuid,
        idempotency_key: Option<&str>,
        context: &OperationContext,
    ) -> Result<Register, AppError> {
        let command = RegisterAdminCommand {
            register_id,
            action: RegisterAdminAction::Block,
        };
        self.administer_register(command, idempotency_key, context).await
    }

    pub async fn unblock_register(
        &self,
        register_id: Uuid,
        idempotency_key: Option<&str>,
        context: &OperationContext,
    ) -> Result<Register, AppError> {
        let command = RegisterAdminCommand {
            register_id,
            action: RegisterAdminAction::Unblock,
        };
        self.administer_register(command, idempotency_key, context).await
    }

    async fn administer_register(
        &self,
        command: RegisterAdminCommand,
        idempotency_key: Option<&str>,
        context: &OperationContext,
    ) -> Result<Register, AppError> {
        let actor = context.require_actor()?;
        let request = idempotent(idempotency_key, "administer_register", &command)?;

        with_retry("administer_register", || self.try_administer(&command, request.as_ref(), actor)).await
    }

    async fn try_administer(
        &self,
        command: &RegisterAdminCommand,
        request: Option<&IdempotentRequest>,
        actor: Uuid,
    ) -> Result<Register, AppError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        if let Some(previous) = replayed(request, tx.as_mut(), now).await? {
            return Ok(previous);
        }

        let mut register = tx
            .lock_register(command.register_id)
            .await?
            .ok_or_else(|| not_found("register", command.register_id))?;
        match command.action {
            RegisterAdminAction::Activate => register.set_active(true, now)?,
            RegisterAdminAction::Deactivate => register.set_active(false, now)?,
            RegisterAdminAction::Block => register.block(now)?,
            RegisterAdminAction::Unblock => register.unblock(now)?,
        }

        tx.update_register(&register).await?;
        finish(tx, request, &register, now, self.settings.idempotency_ttl).await?;

        tracing::info!(
            register_id = %register.id,
            action = command.action.as_str(),
            state = %register.state,
            active = register.active,
            actor_id = %actor,
            "Register updated"
        );

        Ok(register)
    }
}
