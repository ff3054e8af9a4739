//! Integer money in centavos
//!
//! All monetary values inside the system are signed integer centavos
//! (1/100 of the display currency unit). Conversions to and from the
//! display representation happen only at serialization boundaries.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use std::str::FromStr;
use thiserror::Error;

/// Largest magnitude representable without loss when the value round-trips
/// through a JSON number (2^53).
const MAX_SAFE_CENTAVOS: i64 = 9_007_199_254_740_992;

/// Errors produced when converting external amounts into centavos
#[derive(Debug, Error, PartialEq)]
pub enum MoneyError {
    #[error("amount is not a finite number: {0}")]
    NotFinite(String),

    #[error("amount is not a number: {0}")]
    NotNumeric(String),

    #[error("amount {0} is outside the safe integer range (±2^53 centavos)")]
    OutOfRange(String),

    #[error("amount {0} is not a whole number of centavos")]
    FractionalCentavos(String),
}

/// A signed amount of money in centavos.
///
/// Opaque on purpose: once money leaves a serialization boundary it is
/// `Centavos`, and arithmetic on it stays exact. Serializes as a bare
/// integer, which is also the persisted document representation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Centavos(i64);

impl Centavos {
    pub const ZERO: Centavos = Centavos(0);

    pub fn new(raw: i64) -> Self {
        Centavos(raw)
    }

    /// The raw centavo count. For logging and arithmetic at seams only.
    pub fn raw(self) -> i64 {
        self.0
    }

    pub fn abs(self) -> Self {
        Centavos(self.0.abs())
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn min(self, other: Self) -> Self {
        Centavos(self.0.min(other.0))
    }

    pub fn max(self, other: Self) -> Self {
        Centavos(self.0.max(other.0))
    }

    /// Convert a display-unit (peso) amount to centavos, rounding
    /// half-away-from-zero at the 0.01 boundary.
    pub fn from_pesos(pesos: Decimal) -> Result<Self, MoneyError> {
        let scaled = (pesos * Decimal::from(100))
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        let raw = scaled
            .to_i64()
            .ok_or_else(|| MoneyError::OutOfRange(pesos.to_string()))?;
        Self::checked(raw, || pesos.to_string())
    }

    /// Convert a floating-point peso amount. Rejects NaN and infinities
    /// before any rounding happens.
    pub fn from_pesos_f64(pesos: f64) -> Result<Self, MoneyError> {
        if !pesos.is_finite() {
            return Err(MoneyError::NotFinite(pesos.to_string()));
        }
        let decimal =
            Decimal::from_f64_retain(pesos).ok_or_else(|| MoneyError::OutOfRange(pesos.to_string()))?;
        Self::from_pesos(decimal)
    }

    /// Parse a peso amount from its string form (e.g. `"4600.00"`).
    pub fn parse_pesos(text: &str) -> Result<Self, MoneyError> {
        let decimal =
            Decimal::from_str(text.trim()).map_err(|_| MoneyError::NotNumeric(text.to_string()))?;
        Self::from_pesos(decimal)
    }

    /// Validate a JSON number that is already denominated in centavos.
    ///
    /// Rejects non-integer values, NaN/Inf leakage, and magnitudes beyond
    /// ±2^53: the cases where a document would silently lose precision.
    pub fn from_json_number(value: &serde_json::Number) -> Result<Self, MoneyError> {
        if let Some(raw) = value.as_i64() {
            return Self::checked(raw, || value.to_string());
        }
        if let Some(float) = value.as_f64() {
            if !float.is_finite() {
                return Err(MoneyError::NotFinite(value.to_string()));
            }
            if float.fract() != 0.0 {
                return Err(MoneyError::FractionalCentavos(value.to_string()));
            }
            if float.abs() > MAX_SAFE_CENTAVOS as f64 {
                return Err(MoneyError::OutOfRange(value.to_string()));
            }
            return Ok(Centavos(float as i64));
        }
        Err(MoneyError::OutOfRange(value.to_string()))
    }

    /// Display-unit value. For serialization boundaries and logs only.
    pub fn to_pesos(self) -> Decimal {
        Decimal::new(self.0, 2)
    }

    fn checked(raw: i64, source: impl Fn() -> String) -> Result<Self, MoneyError> {
        if raw.abs() > MAX_SAFE_CENTAVOS {
            return Err(MoneyError::OutOfRange(source()));
        }
        Ok(Centavos(raw))
    }
}

impl fmt::Display for Centavos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_pesos())
    }
}

impl Add for Centavos {
    type Output = Centavos;
    fn add(self, rhs: Self) -> Self::Output {
        Centavos(self.0 + rhs.0)
    }
}

impl AddAssign for Centavos {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Centavos {
    type Output = Centavos;
    fn sub(self, rhs: Self) -> Self::Output {
        Centavos(self.0 - rhs.0)
    }
}

impl SubAssign for Centavos {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Neg for Centavos {
    type Output = Centavos;
    fn neg(self) -> Self::Output {
        Centavos(-self.0)
    }
}

impl Mul<i64> for Centavos {
    type Output = Centavos;
    fn mul(self, rhs: i64) -> Self::Output {
        Centavos(self.0 * rhs)
    }
}

impl Sum for Centavos {
    fn sum<I: Iterator<Item = Centavos>>(iter: I) -> Self {
        Centavos(iter.map(|c| c.0).sum())
    }
}

impl<'a> Sum<&'a Centavos> for Centavos {
    fn sum<I: Iterator<Item = &'a Centavos>>(iter: I) -> Self {
        Centavos(iter.map(|c| c.0).sum())
    }
}
