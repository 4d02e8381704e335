//! API Routes
//!
//! HTTP endpoint definitions.

use axum::{
    extract::{Extension, Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{Register, Vault};
use crate::domain::{
    Amount, DenominationBreakdown, DomainError, HolderRef, HolderType, Money, Movement, MovementKind,
    OperationContext, Reconciliation,
};
use crate::error::AppError;
use crate::handlers::{
    AllocateCommand, BeginCountCommand, CloseSessionCommand, CloseSessionResult, CreateRegisterCommand, InvariantReport,
    LinkedMovements, OpenSessionCommand, OpenSessionResult, ProvisionVaultCommand, ProvisionVaultResult,
    RecordMovementCommand, ReturnToVaultCommand, SpotCheckCommand, TransferCommand, UpdateVaultLimitsCommand,
};
use crate::ledger::MovementFilter;
use crate::query::{AuditTrail, Dashboard, MovementPage, PeriodTotals, SessionStatus};

use super::middleware::idempotency_key;
use super::AppState;

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct VaultLimitsRequest {
    pub per_allocation_limit: Money,
    pub total_allocations_limit: Money,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordMovementRequest {
    pub kind: MovementKind,
    pub amount: Amount,
    pub concept: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub external_reference: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub session_id: Uuid,
    pub amount: Amount,
    #[serde(default)]
    pub concept: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetActiveRequest {
    pub active: bool,
}

/// A physical cash count: opening, spot check or closing
#[derive(Debug, Serialize, Deserialize)]
pub struct CashCountRequest {
    pub amount: Money,
    #[serde(default)]
    pub denomination_breakdown: DenominationBreakdown,
    #[serde(default)]
    pub notes: Option<String>,
    /// Only read on close
    #[serde(default)]
    pub variance_justification: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReturnRequest {
    pub vault_id: Uuid,
    pub amount: Amount,
    #[serde(default)]
    pub concept: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransferRequest {
    pub to_session_id: Uuid,
    pub amount: Amount,
    #[serde(default)]
    pub concept: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub holder: HolderRef,
    pub balance: Money,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub after_sequence: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

impl PeriodQuery {
    fn validate(&self) -> Result<(), AppError> {
        match (self.from, self.to) {
            (Some(from), Some(to)) if from > to => {
                Err(AppError::InvalidRequest("`from` must not be after `to`".to_string()))
            }
            _ => Ok(()),
        }
    }
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        // Vaults
        .route("/vaults", post(provision_vault))
        .route("/vaults/:vault_id", get(get_vault))
        .route("/vaults/:vault_id/limits", patch(update_vault_limits))
        .route("/vaults/:vault_id/movements", post(record_vault_movement))
        .route("/vaults/:vault_id/invariant", get(verify_invariant))
        .route("/vaults/:vault_id/allocations", post(allocate))
        // Registers
        .route("/registers", post(create_register))
        .route("/registers/:register_id/status", get(register_status))
        .route("/registers/:register_id/active", post(set_register_active))
        .route("/registers/:register_id/block", post(block_register))
        .route("/registers/:register_id/unblock", post(unblock_register))
        .route("/registers/:register_id/sessions", post(open_session))
        // Sessions
        .route("/sessions/:session_id/close", post(close_session))
        .route("/sessions/:session_id/spot-checks", post(spot_check))
        .route("/sessions/:session_id/count", post(begin_count))
        .route("/sessions/:session_id/movements", post(record_session_movement))
        .route("/sessions/:session_id/returns", post(return_to_vault))
        .route("/sessions/:session_id/transfers", post(transfer))
        // Queries
        .route("/holders/:holder_type/:holder_id/balance", get(holder_balance))
        .route("/holders/:holder_type/:holder_id/movements", get(holder_history))
        .route("/holders/:holder_type/:holder_id/totals", get(holder_totals))
        .route("/holders/:holder_type/:holder_id/audit", get(holder_audit))
        .route("/dashboard", get(dashboard))
}

fn holder(holder_type: &str, holder_id: Uuid) -> Result<HolderRef, AppError> {
    let holder_type: HolderType = holder_type.parse().map_err(AppError::InvalidRequest)?;
    Ok(HolderRef {
        holder_type,
        holder_id,
    })
}

// =========================================================================
// Vaults
// =========================================================================

async fn provision_vault(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    headers: HeaderMap,
    Json(command): Json<ProvisionVaultCommand>,
) -> Result<(StatusCode, Json<ProvisionVaultResult>), AppError> {
    let key = idempotency_key(&headers)?;
    let result = state.admin().provision_vault(command, key.as_deref(), &context).await?;

    Ok((StatusCode::CREATED, Json(result)))
}

async fn get_vault(State(state): State<AppState>, Path(vault_id): Path<Uuid>) -> Result<Json<Vault>, AppError> {
    let vault = state
        .store
        .vault(vault_id)
        .await?
        .ok_or_else(|| DomainError::HolderNotFound(format!("vault {}", vault_id)))?;

    Ok(Json(vault))
}

async fn update_vault_limits(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(vault_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<VaultLimitsRequest>,
) -> Result<Json<Vault>, AppError> {
    let key = idempotency_key(&headers)?;
    let command = UpdateVaultLimitsCommand {
        vault_id,
        per_allocation_limit: request.per_allocation_limit,
        total_allocations_limit: request.total_allocations_limit,
    };
    let vault = state.admin().update_vault_limits(command, key.as_deref(), &context).await?;

    Ok(Json(vault))
}

async fn record_vault_movement(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(vault_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<RecordMovementRequest>,
) -> Result<(StatusCode, Json<Movement>), AppError> {
    record_movement(state, context, HolderRef::vault(vault_id), headers, request).await
}

async fn verify_invariant(
    State(state): State<AppState>,
    Path(vault_id): Path<Uuid>,
) -> Result<Json<InvariantReport>, AppError> {
    let report = state.admin().verify_invariant(vault_id).await?;
    Ok(Json(report))
}

async fn allocate(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(vault_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<AllocationRequest>,
) -> Result<(StatusCode, Json<LinkedMovements>), AppError> {
    let key = idempotency_key(&headers)?;
    let command = AllocateCommand {
        vault_id,
        session_id: request.session_id,
        amount: request.amount,
        concept: request.concept,
    };
    let result = state.allocations().allocate(command, key.as_deref(), &context).await?;

    Ok((StatusCode::CREATED, Json(result)))
}

// =========================================================================
// Registers
// =========================================================================

async fn create_register(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    headers: HeaderMap,
    Json(command): Json<CreateRegisterCommand>,
) -> Result<(StatusCode, Json<Register>), AppError> {
    let key = idempotency_key(&headers)?;
    let register = state.admin().create_register(command, key.as_deref(), &context).await?;

    Ok((StatusCode::CREATED, Json(register)))
}

async fn register_status(
    State(state): State<AppState>,
    Path(register_id): Path<Uuid>,
) -> Result<Json<SessionStatus>, AppError> {
    let status = state.queries().session_status(register_id).await?;
    Ok(Json(status))
}

async fn set_register_active(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(register_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<SetActiveRequest>,
) -> Result<Json<Register>, AppError> {
    let key = idempotency_key(&headers)?;
    let register = state
        .admin()
        .set_register_active(register_id, request.active, key.as_deref(), &context)
        .await?;

    Ok(Json(register))
}

async fn block_register(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(register_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Register>, AppError> {
    let key = idempotency_key(&headers)?;
    let register = state.admin().block_register(register_id, key.as_deref(), &context).await?;
    Ok(Json(register))
}

async fn unblock_register(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(register_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Register>, AppError> {
    let key = idempotency_key(&headers)?;
    let register = state.admin().unblock_register(register_id, key.as_deref(), &context).await?;
    Ok(Json(register))
}

async fn open_session(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(register_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<CashCountRequest>,
) -> Result<(StatusCode, Json<OpenSessionResult>), AppError> {
    let key = idempotency_key(&headers)?;
    let command = OpenSessionCommand {
        register_id,
        opening_amount: request.amount,
        denomination_breakdown: request.denomination_breakdown,
        notes: request.notes,
    };
    let result = state.sessions().open(command, key.as_deref(), &context).await?;

    Ok((StatusCode::CREATED, Json(result)))
}

// =========================================================================
// Sessions
// =========================================================================

async fn close_session(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<CashCountRequest>,
) -> Result<Json<CloseSessionResult>, AppError> {
    let key = idempotency_key(&headers)?;
    let command = CloseSessionCommand {
        session_id,
        counted_amount: request.amount,
        denomination_breakdown: request.denomination_breakdown,
        notes: request.notes,
        variance_justification: request.variance_justification,
    };
    let result = state.sessions().close(command, key.as_deref(), &context).await?;

    Ok(Json(result))
}

async fn spot_check(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<CashCountRequest>,
) -> Result<(StatusCode, Json<Reconciliation>), AppError> {
    let key = idempotency_key(&headers)?;
    let command = SpotCheckCommand {
        session_id,
        counted_amount: request.amount,
        denomination_breakdown: request.denomination_breakdown,
        notes: request.notes,
    };
    let reconciliation = state.sessions().spot_check(command, key.as_deref(), &context).await?;

    Ok((StatusCode::CREATED, Json(reconciliation)))
}

async fn begin_count(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Register>, AppError> {
    let key = idempotency_key(&headers)?;
    let register = state
        .sessions()
        .begin_count(BeginCountCommand { session_id }, key.as_deref(), &context)
        .await?;

    Ok(Json(register))
}

async fn record_session_movement(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<RecordMovementRequest>,
) -> Result<(StatusCode, Json<Movement>), AppError> {
    record_movement(state, context, HolderRef::session(session_id), headers, request).await
}

async fn record_movement(
    state: AppState,
    context: OperationContext,
    holder: HolderRef,
    headers: HeaderMap,
    request: RecordMovementRequest,
) -> Result<(StatusCode, Json<Movement>), AppError> {
    let key = idempotency_key(&headers)?;
    let command = RecordMovementCommand {
        holder,
        kind: request.kind,
        amount: request.amount,
        concept: request.concept,
        description: request.description,
        external_reference: request.external_reference,
    };
    let movement = state.movements().record(command, key.as_deref(), &context).await?;

    Ok((StatusCode::CREATED, Json(movement)))
}

async fn return_to_vault(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<ReturnRequest>,
) -> Result<(StatusCode, Json<LinkedMovements>), AppError> {
    let key = idempotency_key(&headers)?;
    let command = ReturnToVaultCommand {
        session_id,
        vault_id: request.vault_id,
        amount: request.amount,
        concept: request.concept,
    };
    let result = state.allocations().return_to_vault(command, key.as_deref(), &context).await?;

    Ok((StatusCode::CREATED, Json(result)))
}

async fn transfer(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<TransferRequest>,
) -> Result<(StatusCode, Json<LinkedMovements>), AppError> {
    let key = idempotency_key(&headers)?;
    let command = TransferCommand {
        from_session_id: session_id,
        to_session_id: request.to_session_id,
        amount: request.amount,
        concept: request.concept,
    };
    let result = state.allocations().transfer(command, key.as_deref(), &context).await?;

    Ok((StatusCode::CREATED, Json(result)))
}

// =========================================================================
// Queries
// =========================================================================

async fn holder_balance(
    State(state): State<AppState>,
    Path((holder_type, holder_id)): Path<(String, Uuid)>,
    Query(query): Query<BalanceQuery>,
) -> Result<Json<BalanceResponse>, AppError> {
    let holder = holder(&holder_type, holder_id)?;
    let balance = match query.as_of {
        Some(as_of) => state.queries().balance_as_of(holder, as_of).await?,
        None => state.queries().current_balance(holder).await?,
    };

    Ok(Json(BalanceResponse {
        holder,
        balance,
        as_of: query.as_of,
    }))
}

async fn holder_history(
    State(state): State<AppState>,
    Path((holder_type, holder_id)): Path<(String, Uuid)>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<MovementPage>, AppError> {
    let holder = holder(&holder_type, holder_id)?;
    let filter = MovementFilter {
        from: query.from,
        to: query.to,
        after_sequence: query.after_sequence,
        limit: query.limit,
    };
    let page = state.queries().history(holder, filter).await?;

    Ok(Json(page))
}

async fn holder_totals(
    State(state): State<AppState>,
    Path((holder_type, holder_id)): Path<(String, Uuid)>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<PeriodTotals>, AppError> {
    let holder = holder(&holder_type, holder_id)?;
    query.validate()?;
    let totals = state.queries().period_totals(holder, query.from, query.to).await?;

    Ok(Json(totals))
}

async fn holder_audit(
    State(state): State<AppState>,
    Path((holder_type, holder_id)): Path<(String, Uuid)>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<AuditTrail>, AppError> {
    let holder = holder(&holder_type, holder_id)?;
    query.validate()?;
    let trail = state.queries().audit_trail(holder, query.from, query.to).await?;

    Ok(Json(trail))
}

async fn dashboard(State(state): State<AppState>) -> Result<Json<Dashboard>, AppError> {
    let dashboard = state.queries().dashboard().await?;
    Ok(Json(dashboard))
}
