//! Domain module
//!
//! Core domain types and business logic.

pub mod amount;
pub mod context;
pub mod denomination;
pub mod error;
pub mod movement;
pub mod reconciliation;

pub use amount::{Amount, AmountError, Money};
pub use context::OperationContext;
pub use denomination::{validate_breakdown, DenominationBreakdown, DenominationCount, DenominationTable};
pub use error::{DomainError, ErrorClass};
pub use movement::{fold_balance, sort_for_replay, Effect, HolderRef, HolderType, Movement, MovementDraft, MovementKind};
pub use reconciliation::{compute_variance, Reconciliation, ReconciliationKind, VarianceStatus};
