use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use crate::error::CoreError;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Money(Decimal::new(cents, 2))
    }

    pub fn checked_cents(self) -> Option<i64> {
        self.0.round_dp(2).checked_mul(Decimal::ONE_HUNDRED)?.to_i64()
    }

    /// Every constructor keeps the amount within `i64` cents; only sums of
    /// extreme amounts can leave that range, and those saturate.
    pub fn to_cents(self) -> i64 {
        self.checked_cents().unwrap_or(if self.0.is_sign_negative() {
            i64::MIN
        } else {
            i64::MAX
        })
    }

    /// Rounds to cents; rejects amounts that do not fit in `i64` cents.
    pub fn from_decimal(decimal: Decimal) -> Result<Self, CoreError> {
        let money = Money(decimal.round_dp(2));
        match money.checked_cents() {
            Some(_) => Ok(money),
            None => Err(CoreError::InvalidAmount(decimal.to_string())),
        }
    }

    pub fn as_decimal(self) -> Decimal {
        self.0
    }

    pub fn to_f64(self) -> f64 {
        self.0.to_f64().unwrap_or_default()
    }

    pub fn zero() -> Self {
        Money(Decimal::ZERO)
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn abs(self) -> Self {
        Money(self.0.abs())
    }

    /// Absolute difference between two amounts.
    pub fn distance(self, other: Money) -> Money {
        (self - other).abs()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.2}", self.0)
    }
}

/// Accepts `172.40`, `$172.40` and `1,172.40`.
impl FromStr for Money {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '$' | ',') && !c.is_whitespace())
            .collect();
        Decimal::from_str(&cleaned)
            .map_err(|_| CoreError::InvalidAmount(s.to_string()))
            .and_then(Money::from_decimal)
    }
}

impl TryFrom<Decimal> for Money {
    type Error = CoreError;

    fn try_from(decimal: Decimal) -> Result<Self, Self::Error> {
        Money::from_decimal(decimal)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Money(self.0 - rhs.0)
    }
}
