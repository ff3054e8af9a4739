//! Money on the wire
//!
//! API payloads exchange money in pesos (display units) as JSON numbers;
//! storage and every module boundary use integer centavos. The conversion
//! lives here, at the serialization seam, and nowhere else. Wire values
//! with more than two decimal digits are rejected rather than rounded.

use fiscal_core::{Centavos, MoneyError};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum WireMoneyError {
    #[error("wire amount {0} has more than two decimal digits")]
    TooManyDecimals(Decimal),

    #[error(transparent)]
    Money(#[from] MoneyError),
}

/// Parse an inbound wire amount (pesos) into centavos.
pub fn pesos_to_centavos(pesos: Decimal) -> Result<Centavos, WireMoneyError> {
    if pesos.round_dp(2) != pesos {
        return Err(WireMoneyError::TooManyDecimals(pesos));
    }
    Ok(Centavos::from_pesos(pesos)?)
}

/// Render an outbound amount as pesos for a response payload.
pub fn centavos_to_pesos(amount: Centavos) -> Decimal {
    amount.to_pesos()
}

/// Serde adapter for fields that are centavos internally and pesos on the
/// wire: annotate with `#[serde(with = "platform_contracts::wire::pesos")]`.
pub mod pesos {
    use super::*;
    use serde::{de::Error as _, ser::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(amount: &Centavos, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let display = centavos_to_pesos(*amount)
            .to_f64()
            .ok_or_else(|| S::Error::custom("amount not representable as a JSON number"))?;
        serializer.serialize_f64(display)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Centavos, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Deserialize::deserialize(deserializer)?;
        pesos_to_centavos(raw).map_err(D::Error::custom)
    }
}
