//! Cash denominations
//!
//! A physical count is a list of (face value, count) pairs. The face values a
//! deployment accepts come from static configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

use super::{DomainError, Money};

/// Default table: Peruvian sol banknotes and coins
pub const DEFAULT_DENOMINATIONS: &str = "200,100,50,20,10,5,2,1,0.50,0.20,0.10";

/// Accepted face values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenominationTable {
    face_values: BTreeSet<Decimal>,
}

impl DenominationTable {
    pub fn new<I: IntoIterator<Item = Decimal>>(face_values: I) -> Self {
        Self {
            face_values: face_values.into_iter().map(|v| v.normalize()).collect(),
        }
    }

    /// Parse a comma separated list such as `"200,100,0.50"`
    pub fn parse(list: &str) -> Result<Self, String> {
        let mut values = Vec::new();
        for raw in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let value = Decimal::from_str(raw).map_err(|e| format!("{}: {}", raw, e))?;
            if value <= Decimal::ZERO {
                return Err(format!("{}: face value must be positive", raw));
            }
            values.push(value);
        }
        if values.is_empty() {
            return Err("denomination table is empty".to_string());
        }
        Ok(Self::new(values))
    }

    pub fn contains(&self, face_value: Decimal) -> bool {
        self.face_values.contains(&face_value.normalize())
    }

    /// Face values, largest first
    pub fn face_values(&self) -> impl Iterator<Item = &Decimal> {
        self.face_values.iter().rev()
    }
}

impl Default for DenominationTable {
    fn default() -> Self {
        Self::parse(DEFAULT_DENOMINATIONS).unwrap_or_else(|_| Self::new(Vec::new()))
    }
}

/// One line of a cash count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenominationCount {
    pub face_value: Decimal,
    pub count: u32,
}

/// Counts per banknote/coin face value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DenominationBreakdown(Vec<DenominationCount>);

impl DenominationBreakdown {
    pub fn new(lines: Vec<DenominationCount>) -> Self {
        Self(lines)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Convenience builder used by callers and tests
    pub fn from_pairs<I: IntoIterator<Item = (Decimal, u32)>>(pairs: I) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(face_value, count)| DenominationCount { face_value, count })
                .collect(),
        )
    }

    pub fn lines(&self) -> &[DenominationCount] {
        &self.0
    }

    /// Sum of face value times count
    pub fn total(&self) -> Decimal {
        self.0
            .iter()
            .map(|line| line.face_value * Decimal::from(line.count))
            .sum()
    }
}

/// Check a physical count against the amount the operator stated.
///
/// Every face value must be in the table and the breakdown must sum exactly to
/// `stated`. Returns the counted total.
pub fn validate_breakdown(
    table: &DenominationTable,
    breakdown: &DenominationBreakdown,
    stated: Money,
) -> Result<Money, DomainError> {
    if let Some(unknown) = breakdown
        .lines()
        .iter()
        .find(|line| !table.contains(line.face_value))
    {
        return Err(DomainError::UnknownDenomination(unknown.face_value));
    }

    let counted = breakdown.total();
    if counted != stated.value() {
        return Err(DomainError::DenominationMismatch {
            stated: stated.value(),
            counted,
        });
    }

    Ok(Money::new(counted)?)
}
