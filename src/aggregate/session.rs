//! Session Aggregate
//!
//! One operator's shift on a register. A session is the balance holder for
//! cash in a register; once closed it never reopens.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::{
    DenominationBreakdown, DomainError, Effect, HolderRef, Money, Movement, MovementDraft, MovementKind,
    Reconciliation, VarianceStatus,
};

use super::{check_continuity, BalanceHolder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Open,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Open => "open",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(SessionState::Open),
            "closed" => Ok(SessionState::Closed),
            other => Err(format!("unknown session state: {}", other)),
        }
    }
}

/// Session Aggregate
///
/// While open: `opening_amount + running_income_total - running_expense_total
/// == current_balance`. Income counts every credit after the opening movement,
/// expense every debit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub register_id: Uuid,
    /// Per-register counter, starting at 1
    pub sequence_number: i64,
    pub state: SessionState,

    pub opening_time: DateTime<Utc>,
    pub opening_amount: Money,
    pub opening_breakdown: DenominationBreakdown,
    pub opening_notes: Option<String>,
    pub opened_by: Uuid,

    pub current_balance: Money,
    pub running_income_total: Money,
    pub running_expense_total: Money,
    pub movement_count: i64,
    pub last_movement_at: Option<DateTime<Utc>>,

    pub closing_time: Option<DateTime<Utc>>,
    pub closing_amount: Option<Money>,
    pub closing_breakdown: Option<DenominationBreakdown>,
    pub closing_notes: Option<String>,
    /// Operator's explanation for a closing variance
    pub variance_justification: Option<String>,
    pub closed_by: Option<Uuid>,
    pub variance: Option<Decimal>,
    pub variance_status: Option<VarianceStatus>,
    pub requires_review: bool,
}

impl Session {
    /// A fresh session with nothing applied. The caller posts
    /// [`Session::opening_draft`] right after.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        id: Uuid,
        register_id: Uuid,
        sequence_number: i64,
        opening_amount: Money,
        opening_breakdown: DenominationBreakdown,
        opening_notes: Option<String>,
        opened_by: Uuid,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            register_id,
            sequence_number,
            state: SessionState::Open,
            opening_time: now,
            opening_amount,
            opening_breakdown,
            opening_notes,
            opened_by,
            current_balance: Money::ZERO,
            running_income_total: Money::ZERO,
            running_expense_total: Money::ZERO,
            movement_count: 0,
            last_movement_at: None,
            closing_time: None,
            closing_amount: None,
            closing_breakdown: None,
            closing_notes: None,
            variance_justification: None,
            closed_by: None,
            variance: None,
            variance_status: None,
            requires_review: false,
        }
    }

    /// The movement that puts the opening float on the books. Written even
    /// when the float is zero so every session history starts the same way.
    pub fn opening_draft(&self) -> MovementDraft {
        MovementDraft::new(
            MovementKind::Opening,
            self.opening_amount,
            format!("Opening float, session {}", self.sequence_number),
            self.opened_by,
        )
    }

    /// Same session before any movement, ready for replay
    pub fn emptied(&self) -> Self {
        Self {
            state: SessionState::Open,
            current_balance: Money::ZERO,
            running_income_total: Money::ZERO,
            running_expense_total: Money::ZERO,
            movement_count: 0,
            last_movement_at: None,
            ..self.clone()
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn ensure_open(&self) -> Result<(), DomainError> {
        if !self.is_open() {
            return Err(DomainError::HolderClosed(self.id));
        }
        Ok(())
    }

    /// Close against a closing count. The count is already recorded; a
    /// variance never blocks the close.
    #[allow(clippy::too_many_arguments)]
    pub fn close(
        &mut self,
        count: &Reconciliation,
        requires_review: bool,
        closed_by: Uuid,
        notes: Option<String>,
        variance_justification: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.is_open() {
            return Err(DomainError::SessionAlreadyClosed(self.id));
        }
        self.state = SessionState::Closed;
        self.closing_time = Some(now);
        self.closing_amount = Some(count.counted_amount);
        self.closing_breakdown = Some(count.denomination_breakdown.clone());
        self.closing_notes = notes;
        self.variance_justification = variance_justification;
        self.closed_by = Some(closed_by);
        self.variance = Some(count.variance);
        self.variance_status = Some(count.status);
        self.requires_review = requires_review;
        Ok(())
    }

    pub fn check_invariant(&self) -> Result<(), DomainError> {
        let expected = self.opening_amount.value() + self.running_income_total.value()
            - self.running_expense_total.value();
        if expected != self.current_balance.value() {
            return Err(DomainError::invariant(
                format!("session {}", self.id),
                format!(
                    "opening {} + income {} - expense {} != balance {}",
                    self.opening_amount, self.running_income_total, self.running_expense_total, self.current_balance
                ),
            ));
        }
        Ok(())
    }
}

impl BalanceHolder for Session {
    fn holder_ref(&self) -> HolderRef {
        HolderRef::session(self.id)
    }

    fn current_balance(&self) -> Money {
        self.current_balance
    }

    fn movement_count(&self) -> i64 {
        self.movement_count
    }

    fn last_movement_at(&self) -> Option<DateTime<Utc>> {
        self.last_movement_at
    }

    fn accepts(&self, kind: MovementKind) -> Result<(), DomainError> {
        self.ensure_open()?;
        let first = self.movement_count == 0;
        match (kind, first) {
            (MovementKind::Opening, true) => Ok(()),
            (MovementKind::Opening, false) => Err(DomainError::InvalidTransition(format!(
                "session {} already has its opening movement",
                self.id
            ))),
            (_, true) => Err(DomainError::InvalidTransition(format!(
                "session {} has no opening movement",
                self.id
            ))),
            _ => Ok(()),
        }
    }

    fn apply(&mut self, movement: &Movement) -> Result<(), DomainError> {
        check_continuity(self, movement)?;

        match (movement.kind, movement.kind.effect()) {
            (MovementKind::Opening, _) => {
                if movement.amount != self.opening_amount {
                    return Err(DomainError::invariant(
                        format!("session {}", self.id),
                        format!(
                            "opening movement of {} but opening amount {}",
                            movement.amount, self.opening_amount
                        ),
                    ));
                }
            }
            (_, Effect::Credit) => {
                self.running_income_total = self.running_income_total.checked_add(movement.amount)?;
            }
            (_, Effect::Debit) => {
                self.running_expense_total = self.running_expense_total.checked_add(movement.amount)?;
            }
        }

        self.current_balance = movement.balance_after;
        self.movement_count += 1;
        self.last_movement_at = Some(movement.timestamp);

        self.check_invariant()
    }
}
