//! Money types
//!
//! Domain primitives for cash amounts held in vaults and registers.
//! Every value is fixed-point with at most two decimal places, validated at
//! construction time so invalid values cannot exist in the system.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum allowed value (1 trillion)
const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

/// Maximum decimal places (cents)
const MAX_SCALE: u32 = 2;

/// Errors that can occur when creating money values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Amount must be positive (got {0})")]
    NotPositive(Decimal),

    #[error("Amount must not be negative (got {0})")]
    Negative(Decimal),

    #[error("Amount has too many decimal places (max {MAX_SCALE}, got {0})")]
    TooManyDecimals(u32),

    #[error("Amount exceeds maximum allowed value ({MAX_AMOUNT})")]
    Overflow,

    #[error("Invalid amount format: {0}")]
    ParseError(String),
}

fn check_bounds(value: Decimal) -> Result<Decimal, AmountError> {
    if value < Decimal::ZERO {
        return Err(AmountError::Negative(value));
    }

    // Trailing zeros ("10.500") are fine, real sub-cent digits are not.
    let normalized = value.normalize();
    if normalized.scale() > MAX_SCALE {
        return Err(AmountError::TooManyDecimals(normalized.scale()));
    }

    if value > MAX_AMOUNT {
        return Err(AmountError::Overflow);
    }

    let mut cents = value;
    cents.rescale(MAX_SCALE);
    Ok(cents)
}

/// Money is a non-negative cash value with cent precision.
///
/// Used for balances, counted cash and anything that may legitimately be zero.
///
/// # Example
/// ```
/// use rust_decimal::Decimal;
/// use cash_ledger::domain::Money;
///
/// let money = Money::new(Decimal::new(1050, 2)).unwrap();
/// assert_eq!(money.to_string(), "10.50");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Create a new money value (zero or positive, at most two decimals)
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        check_bounds(value).map(Self)
    }

    /// Create a money value from whole currency units
    pub fn from_units(units: i64) -> Result<Self, AmountError> {
        Self::new(Decimal::from(units))
    }

    pub fn zero() -> Self {
        Self::ZERO
    }

    /// Get the underlying value
    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Add two money values
    pub fn checked_add(&self, other: Money) -> Result<Money, AmountError> {
        Money::new(self.0 + other.0)
    }

    /// Subtract, failing when the result would go below zero
    pub fn checked_sub(&self, other: Money) -> Result<Money, AmountError> {
        Money::new(self.0 - other.0)
    }

    /// Subtract, flooring at zero
    pub fn saturating_sub(&self, other: Money) -> Money {
        if other.0 >= self.0 {
            Money::ZERO
        } else {
            Money(self.0 - other.0)
        }
    }

    pub fn min(self, other: Money) -> Money {
        if self.0 <= other.0 {
            self
        } else {
            other
        }
    }

    /// Check if this value covers the given amount
    pub fn is_sufficient_for(&self, amount: &Amount) -> bool {
        self.0 >= amount.value()
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Money {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal = Decimal::from_str(s.trim()).map_err(|e| AmountError::ParseError(e.to_string()))?;
        Money::new(decimal)
    }
}

impl TryFrom<String> for Money {
    type Error = AmountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Money::from_str(&value)
    }
}

impl TryFrom<Decimal> for Money {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Money::new(value)
    }
}

impl From<Money> for String {
    fn from(money: Money) -> Self {
        money.to_string()
    }
}

impl From<Amount> for Money {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

/// Amount is a strictly positive money value.
///
/// # Invariants
/// - Value is always positive (> 0)
/// - Maximum 2 decimal places
/// - Maximum value is 1 trillion
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(Money);

impl Amount {
    /// Create a new Amount with validation.
    ///
    /// # Errors
    /// - `AmountError::NotPositive` if value <= 0
    /// - `AmountError::TooManyDecimals` if more than 2 decimal places
    /// - `AmountError::Overflow` if value > 1 trillion
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value <= Decimal::ZERO {
            return Err(AmountError::NotPositive(value));
        }
        Money::new(value).map(Self)
    }

    pub fn from_units(units: i64) -> Result<Self, AmountError> {
        Self::new(Decimal::from(units))
    }

    pub fn value(&self) -> Decimal {
        self.0.value()
    }

    pub fn as_money(&self) -> Money {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal = Decimal::from_str(s.trim()).map_err(|e| AmountError::ParseError(e.to_string()))?;
        Amount::new(decimal)
    }
}

impl TryFrom<String> for Amount {
    type Error = AmountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Amount::from_str(&value)
    }
}

impl TryFrom<Money> for Amount {
    type Error = AmountError;

    fn try_from(value: Money) -> Result<Self, Self::Error> {
        Amount::new(value.value())
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        amount.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_positive() {
        let amount = Amount::new(Decimal::new(100, 0)).unwrap();
        assert_eq!(amount.value(), Decimal::new(100, 0));
    }

    #[test]
    fn test_amount_zero_rejected() {
        let amount = Amount::new(Decimal::ZERO);
        assert!(matches!(amount, Err(AmountError::NotPositive(_))));
    }

    #[test]
    fn test_amount_negative_rejected() {
        let amount = Amount::new(Decimal::new(-100, 0));
        assert!(matches!(amount, Err(AmountError::NotPositive(_))));
    }

    #[test]
    fn test_sub_cent_rejected() {
        let amount = Amount::new(Decimal::new(1001, 3));
        assert!(matches!(amount, Err(AmountError::TooManyDecimals(3))));
    }

    #[test]
    fn test_trailing_zeros_accepted() {
        let money: Money = "10.500".parse().unwrap();
        assert_eq!(money.to_string(), "10.50");
    }

    #[test]
    fn test_overflow() {
        let value = Decimal::from_str("1000000000000.01").unwrap();
        assert!(matches!(Money::new(value), Err(AmountError::Overflow)));
        assert!(Money::new(Decimal::from_str("1000000000000").unwrap()).is_ok());
    }

    #[test]
    fn test_money_zero_allowed_negative_rejected() {
        assert!(Money::new(Decimal::ZERO).is_ok());
        assert!(matches!(
            Money::new(Decimal::new(-1, 2)),
            Err(AmountError::Negative(_))
        ));
    }

    #[test]
    fn test_money_arithmetic() {
        let a = Money::from_units(100).unwrap();
        let b = Money::from_units(30).unwrap();
        assert_eq!(a.checked_sub(b).unwrap(), Money::from_units(70).unwrap());
        assert!(b.checked_sub(a).is_err());
        assert_eq!(b.saturating_sub(a), Money::ZERO);
        assert_eq!(a.checked_add(b).unwrap(), Money::from_units(130).unwrap());
    }

    #[test]
    fn test_serde_as_string() {
        let amount = Amount::from_units(25).unwrap();
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, r#""25.00""#);

        let parsed: Amount = serde_json::from_str(r#""0.10""#).unwrap();
        assert_eq!(parsed.value(), Decimal::new(10, 2));

        assert!(serde_json::from_str::<Amount>(r#""0""#).is_err());
    }
}
