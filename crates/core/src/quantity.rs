//! Decimal quantity used for ledger entries and required amounts.
//!
//! Ledger quantities arrive as decimal strings ("0.5", "12.25") and must sum
//! without float drift, so everything is carried as a `rust_decimal::Decimal`.

use core::fmt;
use core::iter::Sum;
use core::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Signed decimal quantity (positive = restock, negative = consumption).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(Decimal);

impl Quantity {
    pub const ZERO: Quantity = Quantity(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(value.normalize())
    }

    pub fn units(value: i64) -> Self {
        Self(Decimal::from(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }
}

impl From<i64> for Quantity {
    fn from(value: i64) -> Self {
        Self::units(value)
    }
}

impl From<Decimal> for Quantity {
    fn from(value: Decimal) -> Self {
        Self::new(value)
    }
}

impl FromStr for Quantity {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim())
            .map_err(|e| DomainError::validation(format!("quantity {s:?}: {e}")))?;
        Ok(Self::new(value))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.normalize(), f)
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Self) -> Self::Output {
        Quantity(self.0 + rhs.0)
    }
}

impl AddAssign for Quantity {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Quantity {
    type Output = Quantity;

    fn sub(self, rhs: Self) -> Self::Output {
        Quantity(self.0 - rhs.0)
    }
}

impl SubAssign for Quantity {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Neg for Quantity {
    type Output = Quantity;

    fn neg(self) -> Self::Output {
        Quantity(-self.0)
    }
}

impl Sum for Quantity {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Quantity::ZERO, |acc, q| acc + q)
    }
}

impl<'a> Sum<&'a Quantity> for Quantity {
    fn sum<I: Iterator<Item = &'a Quantity>>(iter: I) -> Self {
        iter.fold(Quantity::ZERO, |acc, q| acc + *q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_strings_sum_exactly() {
        let total: Quantity = ["0.1", "0.2", "0.7"]
            .iter()
            .map(|s| s.parse::<Quantity>().unwrap())
            .sum();
        assert_eq!(total, Quantity::units(1));
    }

    #[test]
    fn rejects_non_numeric_input() {
        assert!(matches!("abc".parse::<Quantity>(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn display_drops_trailing_zeros() {
        let q: Quantity = "2.500".parse().unwrap();
        assert_eq!(q.to_string(), "2.5");
    }

    #[test]
    fn serializes_transparently() {
        let q: Quantity = "1.25".parse().unwrap();
        let json = serde_json::to_string(&q).unwrap();
        let back: Quantity = serde_json::from_str(&json).unwrap();
        assert_eq!(q, back);
    }
}
