//! Monetary amount type
//!
//! Domain primitive for wallet amounts with business rule validation.
//! All amounts are validated at construction time, ensuring invalid values
//! cannot exist in the system. Represented as integer minor units (cents)
//! rather than a floating/decimal type so no layer boundary carries an
//! ambiguous scale.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;
use std::str::FromStr;

/// Maximum allowed amount, in minor units (1 trillion wallet-units).
const MAX_MINOR_UNITS: i64 = 100_000_000_000_000;

/// `MinorUnits` represents a validated positive monetary amount used as the
/// operand of a credit or debit command.
///
/// # Invariants
/// - Value is always positive (> 0)
/// - Maximum value is `MAX_MINOR_UNITS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct MinorUnits(i64);

/// Errors that can occur when creating a `MinorUnits` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("amount must be positive (got {0})")]
    NotPositive(i64),

    #[error("amount exceeds maximum allowed value ({MAX_MINOR_UNITS})")]
    Overflow,
}

impl MinorUnits {
    /// Create a new amount with validation.
    pub fn new(value: i64) -> Result<Self, AmountError> {
        if value <= 0 {
            return Err(AmountError::NotPositive(value));
        }
        if value > MAX_MINOR_UNITS {
            return Err(AmountError::Overflow);
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn try_add(&self, other: &MinorUnits) -> Result<MinorUnits, AmountError> {
        let sum = self.0.checked_add(other.0).ok_or(AmountError::Overflow)?;
        MinorUnits::new(sum)
    }

    pub fn is_sufficient_for(&self, other: &MinorUnits) -> bool {
        self.0 >= other.0
    }
}

impl fmt::Display for MinorUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, (self.0 % 100).abs())
    }
}

impl FromStr for MinorUnits {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i64 = s.parse().map_err(|_| AmountError::NotPositive(0))?;
        MinorUnits::new(value)
    }
}

impl TryFrom<i64> for MinorUnits {
    type Error = AmountError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        MinorUnits::new(value)
    }
}

impl From<MinorUnits> for i64 {
    fn from(amount: MinorUnits) -> Self {
        amount.0
    }
}

impl Add for MinorUnits {
    type Output = Result<MinorUnits, AmountError>;

    fn add(self, rhs: Self) -> Self::Output {
        self.try_add(&rhs)
    }
}

/// `Balance` represents a wallet balance (zero or positive).
/// Unlike `MinorUnits`, a `Balance` may be zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Balance(i64);

impl Balance {
    pub fn new(value: i64) -> Result<Self, AmountError> {
        if value < 0 {
            return Err(AmountError::NotPositive(value));
        }
        if value > MAX_MINOR_UNITS {
            return Err(AmountError::Overflow);
        }
        Ok(Self(value))
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn is_sufficient_for(&self, amount: &MinorUnits) -> bool {
        self.0 >= amount.value()
    }

    pub fn credit(&self, amount: &MinorUnits) -> Result<Balance, AmountError> {
        let new_value = self.0.checked_add(amount.value()).ok_or(AmountError::Overflow)?;
        Balance::new(new_value)
    }

    pub fn debit(&self, amount: &MinorUnits) -> Result<Balance, AmountError> {
        let new_value = self.0 - amount.value();
        Balance::new(new_value)
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl TryFrom<i64> for Balance {
    type Error = AmountError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Balance::new(value)
    }
}

impl From<Balance> for i64 {
    fn from(balance: Balance) -> Self {
        balance.0
    }
}

impl Default for Balance {
    fn default() -> Self {
        Self::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_positive() {
        let amount = MinorUnits::new(100);
        assert!(amount.is_ok());
        assert_eq!(amount.unwrap().value(), 100);
    }

    #[test]
    fn amount_zero_rejected() {
        let amount = MinorUnits::new(0);
        assert!(matches!(amount, Err(AmountError::NotPositive(_))));
    }

    #[test]
    fn amount_negative_rejected() {
        let amount = MinorUnits::new(-100);
        assert!(matches!(amount, Err(AmountError::NotPositive(_))));
    }

    #[test]
    fn amount_overflow() {
        let amount = MinorUnits::new(MAX_MINOR_UNITS + 1);
        assert!(matches!(amount, Err(AmountError::Overflow)));
    }

    #[test]
    fn amount_max_value_ok() {
        assert!(MinorUnits::new(MAX_MINOR_UNITS).is_ok());
    }

    #[test]
    fn amount_try_add() {
        let a = MinorUnits::new(100).unwrap();
        let b = MinorUnits::new(50).unwrap();
        let sum = a.try_add(&b).unwrap();
        assert_eq!(sum.value(), 150);
    }

    #[test]
    fn balance_credit_debit() {
        let balance = Balance::zero();
        let amount = MinorUnits::new(100).unwrap();

        let balance = balance.credit(&amount).unwrap();
        assert_eq!(balance.value(), 100);

        let withdraw = MinorUnits::new(30).unwrap();
        let balance = balance.debit(&withdraw).unwrap();
        assert_eq!(balance.value(), 70);
    }

    #[test]
    fn balance_insufficient() {
        let balance = Balance::new(50).unwrap();
        let amount = MinorUnits::new(100).unwrap();

        assert!(!balance.is_sufficient_for(&amount));

        let result = balance.debit(&amount);
        assert!(matches!(result, Err(AmountError::NotPositive(_))));
    }

    #[test]
    fn display_formats_two_decimals() {
        let balance = Balance::new(12345).unwrap();
        assert_eq!(balance.to_string(), "123.45");
    }
}
