//! Command definitions
//!
//! Commands represent intentions to change the ledger. Their serialized form
//! is what an idempotency key is bound to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{Register, Session, Vault};
use crate::domain::{Amount, DenominationBreakdown, HolderRef, Money, Movement, MovementKind, Reconciliation};

// =========================================================================
// Vault and register administration
// =========================================================================

/// Command to provision a vault with its initial cash
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionVaultCommand {
    pub code: String,
    pub name: String,
    pub initial_balance: Money,
    pub per_allocation_limit: Money,
    pub total_allocations_limit: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateVaultLimitsCommand {
    pub vault_id: Uuid,
    pub per_allocation_limit: Money,
    pub total_allocations_limit: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRegisterCommand {
    pub code: String,
    pub name: String,
    pub location: Option<String>,
}

impl CreateRegisterCommand {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterAdminAction {
    Activate,
    Deactivate,
    Block,
    Unblock,
}

impl RegisterAdminAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterAdminAction::Activate => "activate",
            RegisterAdminAction::Deactivate => "deactivate",
            RegisterAdminAction::Block => "block",
            RegisterAdminAction::Unblock => "unblock",
        }
    }
}

/// Command to change a register's availability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAdminCommand {
    pub register_id: Uuid,
    pub action: RegisterAdminAction,
}

/// Result of provisioning a vault
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionVaultResult {
    pub vault: Vault,
    pub opening_movement: Movement,
}

/// Outcome of a vault invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantReport {
    pub vault_id: Uuid,
    pub total_balance: Money,
    pub available_balance: Money,
    pub allocated_balance: Money,
    /// Movements replayed to confirm the cached balances
    pub movements_replayed: usize,
    pub checked_at: DateTime<Utc>,
}

// =========================================================================
// Session lifecycle
// =========================================================================

/// Command to open a session on a register
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenSessionCommand {
    pub register_id: Uuid,
    pub opening_amount: Money,
    pub denomination_breakdown: DenominationBreakdown,
    pub notes: Option<String>,
}

impl OpenSessionCommand {
    pub fn new(register_id: Uuid, opening_amount: Money, denomination_breakdown: DenominationBreakdown) -> Self {
        Self {
            register_id,
            opening_amount,
            denomination_breakdown,
            notes: None,
        }
    }
}

/// Command to close a session against a physical count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseSessionCommand {
    pub session_id: Uuid,
    pub counted_amount: Money,
    pub denomination_breakdown: DenominationBreakdown,
    pub notes: Option<String>,
    pub variance_justification: Option<String>,
}

impl CloseSessionCommand {
    pub fn new(session_id: Uuid, counted_amount: Money, denomination_breakdown: DenominationBreakdown) -> Self {
        Self {
            session_id,
            counted_amount,
            denomination_breakdown,
            notes: None,
            variance_justification: None,
        }
    }

    pub fn with_justification(mut self, justification: impl Into<String>) -> Self {
        self.variance_justification = Some(justification.into());
        self
    }
}

/// Command for an intermediate count that leaves the session open
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotCheckCommand {
    pub session_id: Uuid,
    pub counted_amount: Money,
    pub denomination_breakdown: DenominationBreakdown,
    pub notes: Option<String>,
}

/// Command to put a register into the counting state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeginCountCommand {
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenSessionResult {
    pub session: Session,
    pub opening_movement: Movement,
    pub reconciliation: Reconciliation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseSessionResult {
    pub session: Session,
    pub register: Register,
    pub reconciliation: Reconciliation,
    /// Variance above the alert threshold
    pub requires_review: bool,
}

// =========================================================================
// Movements
// =========================================================================

/// Command to record a cash flow against a vault or an open session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMovementCommand {
    pub holder: HolderRef,
    pub kind: MovementKind,
    pub amount: Amount,
    pub concept: String,
    pub description: Option<String>,
    pub external_reference: Option<String>,
}

impl RecordMovementCommand {
    pub fn new(holder: HolderRef, kind: MovementKind, amount: Amount, concept: impl Into<String>) -> Self {
        Self {
            holder,
            kind,
            amount,
            concept: concept.into(),
            description: None,
            external_reference: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_external_reference(mut self, reference: impl Into<String>) -> Self {
        self.external_reference = Some(reference.into());
        self
    }
}

// =========================================================================
// Allocations and transfers
// =========================================================================

/// Command to hand vault cash to an open session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocateCommand {
    pub vault_id: Uuid,
    pub session_id: Uuid,
    pub amount: Amount,
    pub concept: Option<String>,
}

/// Command to send session cash back to the vault
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnToVaultCommand {
    pub session_id: Uuid,
    pub vault_id: Uuid,
    pub amount: Amount,
    pub concept: Option<String>,
}

/// Command to move cash between two open sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferCommand {
    pub from_session_id: Uuid,
    pub to_session_id: Uuid,
    pub amount: Amount,
    pub concept: Option<String>,
}

/// Two linked movements written together
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedMovements {
    pub link_id: Uuid,
    /// Debit side
    pub source: Movement,
    /// Credit side
    pub destination: Movement,
}
