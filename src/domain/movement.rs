//! Movements
//!
//! A movement is one immutable, signed change to a holder's balance.
//! The sign of every kind lives in exactly one table: [`MovementKind::effect`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{AmountError, Money};

/// What kind of entity owns a balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HolderType {
    Vault,
    Session,
}

impl HolderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HolderType::Vault => "vault",
            HolderType::Session => "session",
        }
    }
}

impl fmt::Display for HolderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HolderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vault" => Ok(HolderType::Vault),
            "session" => Ok(HolderType::Session),
            other => Err(format!("unknown holder type: {}", other)),
        }
    }
}

/// Reference to a balance holder (a vault or a register session)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HolderRef {
    pub holder_type: HolderType,
    pub holder_id: Uuid,
}

impl HolderRef {
    pub fn vault(id: Uuid) -> Self {
        Self {
            holder_type: HolderType::Vault,
            holder_id: id,
        }
    }

    pub fn session(id: Uuid) -> Self {
        Self {
            holder_type: HolderType::Session,
            holder_id: id,
        }
    }
}

impl fmt::Display for HolderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.holder_type, self.holder_id)
    }
}

/// Direction of a movement on its holder's balance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Credit,
    Debit,
}

impl Effect {
    /// Apply the effect, failing if a debit would go below zero
    pub fn apply(&self, balance: Money, amount: Money) -> Result<Money, AmountError> {
        match self {
            Effect::Credit => balance.checked_add(amount),
            Effect::Debit => balance.checked_sub(amount),
        }
    }
}

/// Closed set of movement kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Opening,
    Income,
    Expense,
    AllocationOut,
    AllocationIn,
    TransferOut,
    TransferIn,
    AdjustmentIn,
    AdjustmentOut,
}

impl MovementKind {
    pub const ALL: [MovementKind; 9] = [
        MovementKind::Opening,
        MovementKind::Income,
        MovementKind::Expense,
        MovementKind::AllocationOut,
        MovementKind::AllocationIn,
        MovementKind::TransferOut,
        MovementKind::TransferIn,
        MovementKind::AdjustmentIn,
        MovementKind::AdjustmentOut,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Opening => "opening",
            MovementKind::Income => "income",
            MovementKind::Expense => "expense",
            MovementKind::AllocationOut => "allocation_out",
            MovementKind::AllocationIn => "allocation_in",
            MovementKind::TransferOut => "transfer_out",
            MovementKind::TransferIn => "transfer_in",
            MovementKind::AdjustmentIn => "adjustment_in",
            MovementKind::AdjustmentOut => "adjustment_out",
        }
    }

    /// Sign table
    pub fn effect(&self) -> Effect {
        match self {
            MovementKind::Opening
            | MovementKind::Income
            | MovementKind::AllocationIn
            | MovementKind::TransferIn
            | MovementKind::AdjustmentIn => Effect::Credit,
            MovementKind::Expense
            | MovementKind::AllocationOut
            | MovementKind::TransferOut
            | MovementKind::AdjustmentOut => Effect::Debit,
        }
    }

    /// Signed value of `amount` under this kind
    pub fn signed(&self, amount: Money) -> Decimal {
        match self.effect() {
            Effect::Credit => amount.value(),
            Effect::Debit => -amount.value(),
        }
    }

    /// Kinds a caller may record on their own; the rest are written by the
    /// session manager and the allocation coordinator.
    pub fn is_directly_recordable(&self) -> bool {
        matches!(
            self,
            MovementKind::Income
                | MovementKind::Expense
                | MovementKind::AdjustmentIn
                | MovementKind::AdjustmentOut
        )
    }

    /// Kinds that come in linked pairs
    pub fn is_linked(&self) -> bool {
        matches!(
            self,
            MovementKind::AllocationOut
                | MovementKind::AllocationIn
                | MovementKind::TransferOut
                | MovementKind::TransferIn
        )
    }
}

impl fmt::Display for MovementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown movement kind: {}", s))
    }
}

/// A movement the caller wants written; balances are filled in by the holder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementDraft {
    pub kind: MovementKind,
    pub amount: Money,
    pub concept: String,
    pub description: Option<String>,
    pub external_reference: Option<String>,
    pub linked_movement_id: Option<Uuid>,
    pub actor_id: Uuid,
}

impl MovementDraft {
    pub fn new(kind: MovementKind, amount: Money, concept: impl Into<String>, actor_id: Uuid) -> Self {
        Self {
            kind,
            amount,
            concept: concept.into(),
            description: None,
            external_reference: None,
            linked_movement_id: None,
            actor_id,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_external_reference(mut self, reference: Option<String>) -> Self {
        self.external_reference = reference;
        self
    }

    pub fn linked_to(mut self, link_id: Uuid) -> Self {
        self.linked_movement_id = Some(link_id);
        self
    }
}

/// A written movement. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    pub id: Uuid,
    /// Insertion sequence assigned by the store; 0 until appended
    pub sequence: i64,
    pub holder: HolderRef,
    pub kind: MovementKind,
    pub amount: Money,
    pub balance_before: Money,
    pub balance_after: Money,
    pub concept: String,
    pub description: Option<String>,
    pub external_reference: Option<String>,
    pub linked_movement_id: Option<Uuid>,
    pub actor_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl Movement {
    pub fn signed_amount(&self) -> Decimal {
        self.kind.signed(self.amount)
    }

    /// `balance_after = balance_before + signed(amount, kind)`
    pub fn is_consistent(&self) -> bool {
        self.balance_before.value() + self.signed_amount() == self.balance_after.value()
    }
}

/// Sort movements into replay order: timestamp, then insertion sequence.
pub fn sort_for_replay(movements: &mut [Movement]) {
    movements.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.sequence.cmp(&b.sequence))
    });
}

/// Fold a holder's movement history into its balance, starting from zero.
pub fn fold_balance<'a, I>(movements: I) -> Result<Money, AmountError>
where
    I: IntoIterator<Item = &'a Movement>,
{
    movements
        .into_iter()
        .try_fold(Money::ZERO, |balance, m| m.kind.effect().apply(balance, m.amount))
}
