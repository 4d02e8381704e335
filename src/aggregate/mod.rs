//! Aggregate module
//!
//! Balance holders and the register state machine. A holder's balance is the
//! fold of its movement history; the cached fields on each holder are only a
//! performance cache kept in step with every appended movement.

pub mod register;
pub mod session;
pub mod vault;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{AmountError, DomainError, HolderRef, Money, Movement, MovementDraft, MovementKind};

pub use register::{Register, RegisterState};
pub use session::{Session, SessionState};
pub use vault::Vault;

/// Trait implemented by everything that owns a cash balance
pub trait BalanceHolder: Sized {
    /// Reference used on the holder's movements
    fn holder_ref(&self) -> HolderRef;

    /// Balance carried in `balance_before` / `balance_after`
    fn current_balance(&self) -> Money;

    /// Number of movements applied
    fn movement_count(&self) -> i64;

    fn last_movement_at(&self) -> Option<DateTime<Utc>>;

    /// Reject kinds the holder cannot take in its current state
    fn accepts(&self, kind: MovementKind) -> Result<(), DomainError>;

    /// Fold one already-written movement into the cached aggregates
    fn apply(&mut self, movement: &Movement) -> Result<(), DomainError>;

    /// Turn a draft into a movement against this holder.
    ///
    /// `balance_before` is the holder's balance at this instant and
    /// `balance_after` is computed here, never taken from the caller. The
    /// movement is applied to `self` before it is returned.
    fn post(&mut self, draft: MovementDraft, now: DateTime<Utc>) -> Result<Movement, DomainError> {
        self.accepts(draft.kind)?;

        let before = self.current_balance();
        let after = draft
            .kind
            .effect()
            .apply(before, draft.amount)
            .map_err(|e| match e {
                AmountError::Negative(_) => {
                    DomainError::insufficient_balance(draft.amount.value(), before.value())
                }
                other => DomainError::from(other),
            })?;

        // Keep per-holder timestamps monotonic even if the clock steps back.
        let timestamp = match self.last_movement_at() {
            Some(last) if last > now => last,
            _ => now,
        };

        let movement = Movement {
            id: Uuid::new_v4(),
            sequence: 0,
            holder: self.holder_ref(),
            kind: draft.kind,
            amount: draft.amount,
            balance_before: before,
            balance_after: after,
            concept: draft.concept,
            description: draft.description,
            external_reference: draft.external_reference,
            linked_movement_id: draft.linked_movement_id,
            actor_id: draft.actor_id,
            timestamp,
        };

        self.apply(&movement)?;
        Ok(movement)
    }
}

/// Check that a movement continues the holder's chain of balances
pub(crate) fn check_continuity<H: BalanceHolder>(holder: &H, movement: &Movement) -> Result<(), DomainError> {
    if movement.holder != holder.holder_ref() {
        return Err(DomainError::invariant(
            holder.holder_ref().to_string(),
            format!("movement {} belongs to {}", movement.id, movement.holder),
        ));
    }
    if movement.balance_before != holder.current_balance() {
        return Err(DomainError::invariant(
            holder.holder_ref().to_string(),
            format!(
                "movement {} starts at {}, holder is at {}",
                movement.id,
                movement.balance_before,
                holder.current_balance()
            ),
        ));
    }
    if !movement.is_consistent() {
        return Err(DomainError::invariant(
            holder.holder_ref().to_string(),
            format!("movement {} has inconsistent balances", movement.id),
        ));
    }
    Ok(())
}

/// Rebuild a holder by replaying its history in `(timestamp, sequence)` order.
///
/// `empty` must be the holder as it was before its first movement.
pub fn replay<'a, H, I>(empty: H, movements: I) -> Result<H, DomainError>
where
    H: BalanceHolder,
    I: IntoIterator<Item = &'a Movement>,
{
    let mut holder = empty;
    for movement in movements {
        holder.apply(movement)?;
    }
    Ok(holder)
}
