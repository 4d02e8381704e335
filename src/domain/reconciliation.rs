//! Reconciliation (arqueo)
//!
//! Compares a physical cash count with the balance the ledger expects.
//! A reconciliation never changes a balance; it only records the variance.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{DenominationBreakdown, Money};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationKind {
    Opening,
    Closing,
    SpotCheck,
}

impl ReconciliationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationKind::Opening => "opening",
            ReconciliationKind::Closing => "closing",
            ReconciliationKind::SpotCheck => "spot_check",
        }
    }
}

impl fmt::Display for ReconciliationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReconciliationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opening" => Ok(ReconciliationKind::Opening),
            "closing" => Ok(ReconciliationKind::Closing),
            "spot_check" => Ok(ReconciliationKind::SpotCheck),
            other => Err(format!("unknown reconciliation kind: {}", other)),
        }
    }
}

/// Outcome of a count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarianceStatus {
    Balanced,
    /// More cash than expected
    Over,
    /// Less cash than expected
    Short,
}

impl VarianceStatus {
    pub fn of(variance: Decimal) -> Self {
        if variance.is_zero() {
            VarianceStatus::Balanced
        } else if variance > Decimal::ZERO {
            VarianceStatus::Over
        } else {
            VarianceStatus::Short
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VarianceStatus::Balanced => "balanced",
            VarianceStatus::Over => "over",
            VarianceStatus::Short => "short",
        }
    }
}

impl FromStr for VarianceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "balanced" => Ok(VarianceStatus::Balanced),
            "over" => Ok(VarianceStatus::Over),
            "short" => Ok(VarianceStatus::Short),
            other => Err(format!("unknown variance status: {}", other)),
        }
    }
}

/// `counted - expected`
pub fn compute_variance(expected: Money, counted: Money) -> Decimal {
    counted.value() - expected.value()
}

/// A recorded count. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub id: Uuid,
    pub session_id: Uuid,
    pub register_id: Uuid,
    pub kind: ReconciliationKind,
    pub system_amount: Money,
    pub counted_amount: Money,
    pub variance: Decimal,
    pub status: VarianceStatus,
    pub denomination_breakdown: DenominationBreakdown,
    pub notes: Option<String>,
    pub performed_by: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl Reconciliation {
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        session_id: Uuid,
        register_id: Uuid,
        kind: ReconciliationKind,
        expected: Money,
        counted: Money,
        breakdown: DenominationBreakdown,
        notes: Option<String>,
        actor_id: Uuid,
        now: DateTime<Utc>,
    ) -> Self {
        let variance = compute_variance(expected, counted);
        Self {
            id: Uuid::new_v4(),
            session_id,
            register_id,
            kind,
            system_amount: expected,
            counted_amount: counted,
            variance,
            status: VarianceStatus::of(variance),
            denomination_breakdown: breakdown,
            notes,
            performed_by: actor_id,
            timestamp: now,
        }
    }

    /// Whether the variance is large enough to need review by a supervisor
    pub fn exceeds(&self, threshold: Money) -> bool {
        self.variance.abs() > threshold.value()
    }
}
