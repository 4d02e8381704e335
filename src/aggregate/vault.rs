//! Vault Aggregate
//!
//! The central cash store (bóveda). Cash it hands to register sessions stays
//! on its books as `allocated` until it comes back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Amount, DomainError, HolderRef, Money, Movement, MovementKind};

use super::{check_continuity, BalanceHolder};

/// Vault Aggregate
///
/// Invariant: `total_balance == available_balance + allocated_balance`, all
/// three non-negative. `available_balance` is the balance carried on the
/// vault's movements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vault {
    pub id: Uuid,
    pub code: String,
    pub name: String,

    pub total_balance: Money,
    pub available_balance: Money,
    pub allocated_balance: Money,

    /// Largest single allocation
    pub per_allocation_limit: Money,

    /// Ceiling on `allocated_balance`
    pub total_allocations_limit: Money,

    pub movement_count: i64,
    pub last_movement_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Vault {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// A new vault with no cash. Initial funds arrive as an opening movement.
    pub fn provision(
        id: Uuid,
        code: impl Into<String>,
        name: impl Into<String>,
        per_allocation_limit: Money,
        total_allocations_limit: Money,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            code: code.into(),
            name: name.into(),
            total_balance: Money::ZERO,
            available_balance: Money::ZERO,
            allocated_balance: Money::ZERO,
            per_allocation_limit,
            total_allocations_limit,
            movement_count: 0,
            last_movement_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Same vault with its balances zeroed, ready for replay
    pub fn emptied(&self) -> Self {
        Self {
            total_balance: Money::ZERO,
            available_balance: Money::ZERO,
            allocated_balance: Money::ZERO,
            movement_count: 0,
            last_movement_at: None,
            ..self.clone()
        }
    }

    pub fn set_limits(&mut self, per_allocation_limit: Money, total_allocations_limit: Money, now: DateTime<Utc>) {
        self.per_allocation_limit = per_allocation_limit;
        self.total_allocations_limit = total_allocations_limit;
        self.updated_at = now;
    }

    // =========================================================================
    // Checks
    // =========================================================================

    /// `total == available + allocated`
    pub fn check_invariant(&self) -> Result<(), DomainError> {
        let sum = self.available_balance.value() + self.allocated_balance.value();
        if self.total_balance.value() != sum {
            return Err(DomainError::invariant(
                format!("vault {}", self.id),
                format!(
                    "total {} != available {} + allocated {}",
                    self.total_balance, self.available_balance, self.allocated_balance
                ),
            ));
        }
        Ok(())
    }

    /// Check an allocation against available cash and both limits.
    ///
    /// Available cash is checked first so the operator sees the most
    /// fundamental problem.
    pub fn check_allocation(&self, amount: Amount) -> Result<(), DomainError> {
        if !self.available_balance.is_sufficient_for(&amount) {
            return Err(DomainError::InsufficientAvailableBalance {
                required: amount.value(),
                available: self.available_balance.value(),
            });
        }

        if amount.value() > self.per_allocation_limit.value() {
            return Err(DomainError::AllocationLimitExceeded {
                requested: amount.value(),
                limit: self.per_allocation_limit.value(),
            });
        }

        if self.allocated_balance.value() + amount.value() > self.total_allocations_limit.value() {
            return Err(DomainError::TotalAllocationLimitExceeded {
                requested: amount.value(),
                allocated: self.allocated_balance.value(),
                limit: self.total_allocations_limit.value(),
            });
        }

        Ok(())
    }
}

impl BalanceHolder for Vault {
    fn holder_ref(&self) -> HolderRef {
        HolderRef::vault(self.id)
    }

    fn current_balance(&self) -> Money {
        self.available_balance
    }

    fn movement_count(&self) -> i64 {
        self.movement_count
    }

    fn last_movement_at(&self) -> Option<DateTime<Utc>> {
        self.last_movement_at
    }

    fn accepts(&self, kind: MovementKind) -> Result<(), DomainError> {
        match kind {
            MovementKind::TransferIn | MovementKind::TransferOut => Err(DomainError::InvalidMovementKind {
                kind: kind.to_string(),
                holder: "vault".to_string(),
            }),
            MovementKind::Opening if self.movement_count > 0 => Err(DomainError::InvalidTransition(
                format!("vault {} is already provisioned", self.id),
            )),
            _ => Ok(()),
        }
    }

    fn apply(&mut self, movement: &Movement) -> Result<(), DomainError> {
        check_continuity(self, movement)?;

        let amount = movement.amount;
        match movement.kind {
            MovementKind::Opening | MovementKind::Income | MovementKind::AdjustmentIn => {
                self.total_balance = self.total_balance.checked_add(amount)?;
            }
            MovementKind::Expense | MovementKind::AdjustmentOut => {
                self.total_balance = self.total_balance.checked_sub(amount).map_err(|_| {
                    DomainError::invariant(format!("vault {}", self.id), "total balance below zero")
                })?;
            }
            MovementKind::AllocationOut => {
                self.allocated_balance = self.allocated_balance.checked_add(amount)?;
            }
            MovementKind::AllocationIn => {
                // Cash coming back settles what is allocated; anything beyond
                // that was earned by the register and grows the vault.
                let settled = amount.min(self.allocated_balance);
                self.allocated_balance = self.allocated_balance.saturating_sub(settled);
                let excess = amount.saturating_sub(settled);
                self.total_balance = self.total_balance.checked_add(excess)?;
            }
            MovementKind::TransferIn | MovementKind::TransferOut => {
                return Err(DomainError::invariant(
                    format!("vault {}", self.id),
                    format!("{} movement on a vault", movement.kind),
                ));
            }
        }

        self.available_balance = movement.balance_after;
        self.movement_count += 1;
        self.last_movement_at = Some(movement.timestamp);
        self.updated_at = movement.timestamp;

        self.check_invariant()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MovementDraft;

    fn money(units: i64) -> Money {
        Money::from_units(units).unwrap()
    }

    fn amount(units: i64) -> Amount {
        Amount::from_units(units).unwrap()
    }

    fn funded_vault(units: i64) -> Vault {
        let mut vault = Vault::provision(Uuid::new_v4(), "BOV-01", "Main vault", money(5000), money(20000), Utc::now());
        vault
            .post(MovementDraft::new(MovementKind::Opening, money(units), "Opening", Uuid::nil()), Utc::now())
            .unwrap();
        vault
    }

    #[test]
    fn test_opening_funds_the_vault() {
        let vault = funded_vault(10000);
        assert_eq!(vault.total_balance, money(10000));
        assert_eq!(vault.available_balance, money(10000));
        assert_eq!(vault.allocated_balance, Money::ZERO);
        assert_eq!(vault.movement_count, 1);
    }

    #[test]
    fn test_vault_json_shape() {
        let json = serde_json::to_value(funded_vault(10000)).unwrap();
        assert_eq!(json["total_balance"], "10000.00");
        assert_eq!(json["available_balance"], "10000.00");
        assert_eq!(json["allocated_balance"], "0.00");
        assert_eq!(json["per_allocation_limit"], "5000.00");
        assert!(json.get("active").is_none());
    }

    #[test]
    fn test_allocation_moves_available_to_allocated() {
        let mut vault = funded_vault(10000);
        let movement = vault
            .post(MovementDraft::new(MovementKind::AllocationOut, money(1000), "Allocation", Uuid::nil()), Utc::now())
            .unwrap();

        assert_eq!(movement.balance_before, money(10000));
        assert_eq!(movement.balance_after, money(9000));
        assert_eq!(vault.total_balance, money(10000));
        assert_eq!(vault.available_balance, money(9000));
        assert_eq!(vault.allocated_balance, money(1000));
    }

    #[test]
    fn test_return_beyond_allocated_grows_total() {
        let mut vault = funded_vault(10000);
        vault
            .post(MovementDraft::new(MovementKind::AllocationOut, money(500), "Allocation", Uuid::nil()), Utc::now())
            .unwrap();
        vault
            .post(MovementDraft::new(MovementKind::AllocationIn, money(700), "Return", Uuid::nil()), Utc::now())
            .unwrap();

        assert_eq!(vault.allocated_balance, Money::ZERO);
        assert_eq!(vault.available_balance, money(10200));
        assert_eq!(vault.total_balance, money(10200));
        vault.check_invariant().unwrap();
    }

    #[test]
    fn test_check_allocation_order() {
        let vault = funded_vault(5000);

        assert!(matches!(
            vault.check_allocation(amount(6000)),
            Err(DomainError::InsufficientAvailableBalance { .. })
        ));

        let mut tight = funded_vault(10000);
        tight.per_allocation_limit = money(1000);
        assert!(matches!(
            tight.check_allocation(amount(1500)),
            Err(DomainError::AllocationLimitExceeded { .. })
        ));

        tight.per_allocation_limit = money(5000);
        tight.total_allocations_limit = money(1000);
        assert!(matches!(
            tight.check_allocation(amount(1500)),
            Err(DomainError::TotalAllocationLimitExceeded { .. })
        ));
    }

    #[test]
    fn test_debit_below_zero_rejected() {
        let mut vault = funded_vault(100);
        let err = vault
            .post(MovementDraft::new(MovementKind::Expense, money(150), "Expense", Uuid::nil()), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::InsufficientBalance { .. }));
        assert_eq!(vault.available_balance, money(100));
        assert_eq!(vault.movement_count, 1);
    }

    #[test]
    fn test_vault_rejects_transfers() {
        let mut vault = funded_vault(100);
        let err = vault
            .post(MovementDraft::new(MovementKind::TransferIn, money(10), "Transfer", Uuid::nil()), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidMovementKind { .. }));
    }

    #[test]
    fn test_replay_matches_live_state() {
        let mut vault = funded_vault(10000);
        let mut history = Vec::new();
        for (kind, units) in [
            (MovementKind::AllocationOut, 2000),
            (MovementKind::Income, 300),
            (MovementKind::AllocationIn, 2500),
            (MovementKind::Expense, 100),
        ] {
            history.push(vault.post(MovementDraft::new(kind, money(units), "op", Uuid::nil()), Utc::now()).unwrap());
        }

        let mut base = vault.emptied();
        let opening = base
            .post(MovementDraft::new(MovementKind::Opening, money(10000), "Opening", Uuid::nil()), Utc::now())
            .unwrap();
        let mut full = vec![opening];
        full.extend(history);

        let rebuilt = super::super::replay(vault.emptied(), &full).unwrap();
        assert_eq!(rebuilt.total_balance, vault.total_balance);
        assert_eq!(rebuilt.available_balance, vault.available_balance);
        assert_eq!(rebuilt.allocated_balance, vault.allocated_balance);
    }
}
