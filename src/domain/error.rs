//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// How a failure should be treated by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input, rejected without any state change
    Validation,
    /// Referenced entity does not exist
    NotFound,
    /// Entity is in the wrong state; caller must re-fetch and decide
    State,
    /// Business limit exceeded; overriding needs a privileged operation
    Limit,
    /// Balance equation broken; never retried, never committed
    Invariant,
}

/// Domain-specific errors
///
/// These errors represent business rule violations and domain invariant failures.
/// They are independent of the web/infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    // Validation
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Denomination breakdown sums to {counted}, stated amount is {stated}")]
    DenominationMismatch { stated: Decimal, counted: Decimal },

    #[error("Unknown denomination: {0}")]
    UnknownDenomination(Decimal),

    #[error("Movement kind {kind} cannot be recorded directly against a {holder}")]
    InvalidMovementKind { kind: String, holder: String },

    #[error("Cannot transfer to the same session")]
    SameSessionTransfer,

    #[error("Register code already in use: {0}")]
    DuplicateRegisterCode(String),

    #[error("Vault code already in use: {0}")]
    DuplicateVaultCode(String),

    #[error("Operation requires an actor id")]
    MissingActor,

    // Not found
    #[error("{0} not found")]
    HolderNotFound(String),

    // State
    #[error("Session {0} is not open")]
    HolderClosed(Uuid),

    #[error("Register {register_id} already has an open session")]
    SessionAlreadyOpen { register_id: Uuid },

    #[error("Session {0} is already closed")]
    SessionAlreadyClosed(Uuid),

    #[error("Destination session {0} is not open")]
    DestinationNotOpen(Uuid),

    #[error("Register {0} is blocked")]
    RegisterBlocked(Uuid),

    #[error("Register {0} is inactive")]
    RegisterInactive(Uuid),

    #[error("Register {0} is being counted")]
    RegisterBusy(Uuid),

    #[error("Register {0} has an open session")]
    RegisterHasOpenSession(Uuid),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    // Limits
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    #[error("Insufficient vault available balance: required {required}, available {available}")]
    InsufficientAvailableBalance { required: Decimal, available: Decimal },

    #[error("Amount {requested} exceeds per-allocation limit of {limit}")]
    AllocationLimitExceeded { requested: Decimal, limit: Decimal },

    #[error("Allocation of {requested} would exceed total allocations limit of {limit} ({allocated} already allocated)")]
    TotalAllocationLimitExceeded {
        requested: Decimal,
        allocated: Decimal,
        limit: Decimal,
    },

    // Invariant
    #[error("Balance invariant violated for {holder}: {detail}")]
    BalanceInvariantViolation { holder: String, detail: String },
}

impl DomainError {
    /// Create an insufficient balance error
    pub fn insufficient_balance(required: Decimal, available: Decimal) -> Self {
        Self::InsufficientBalance { required, available }
    }

    pub fn invariant(holder: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::BalanceInvariantViolation {
            holder: holder.into(),
            detail: detail.into(),
        }
    }

    /// Classify the error per the ledger's failure taxonomy
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidAmount(_)
            | Self::DenominationMismatch { .. }
            | Self::UnknownDenomination(_)
            | Self::InvalidMovementKind { .. }
            | Self::SameSessionTransfer
            | Self::MissingActor => ErrorClass::Validation,

            Self::HolderNotFound(_) => ErrorClass::NotFound,

            Self::HolderClosed(_)
            | Self::DuplicateRegisterCode(_)
            | Self::DuplicateVaultCode(_)
            | Self::SessionAlreadyOpen { .. }
            | Self::SessionAlreadyClosed(_)
            | Self::DestinationNotOpen(_)
            | Self::RegisterBlocked(_)
            | Self::RegisterInactive(_)
            | Self::RegisterBusy(_)
            | Self::RegisterHasOpenSession(_)
            | Self::InvalidTransition(_) => ErrorClass::State,

            Self::InsufficientBalance { .. }
            | Self::InsufficientAvailableBalance { .. }
            | Self::AllocationLimitExceeded { .. }
            | Self::TotalAllocationLimitExceeded { .. } => ErrorClass::Limit,

            Self::BalanceInvariantViolation { .. } => ErrorClass::Invariant,
        }
    }

    /// Check if this is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        self.class() != ErrorClass::Invariant
    }
}

impl From<super::AmountError> for DomainError {
    fn from(err: super::AmountError) -> Self {
        DomainError::InvalidAmount(err.to_string())
    }
}
