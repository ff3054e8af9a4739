//! # Platform Contracts
//!
//! Canonical cross-module conventions: the error-kind taxonomy every module
//! error maps onto, the `{success, data | error}` envelope returned by the
//! long-running services, money-on-the-wire serialization, and the narrow
//! ports behind which external HTTP services live.

pub mod outcome;
pub mod rates;
pub mod wire;

pub use outcome::{Outcome, ServiceFailure};
pub use rates::{ExchangeRateProvider, FixedRateProvider, RateError};

use serde::{Deserialize, Serialize};

/// Protocol-agnostic classification of failures.
///
/// Modules attach one of these to every error so a boundary layer can map
/// kinds to protocol codes without string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Bad amount, date, or missing parameter: 400
    InvalidInput,
    /// Document absent: 404
    NotFound,
    /// Principal lacks property access: 403
    Forbidden,
    /// Optimistic-concurrency loser after retries: 409
    Conflict,
    /// Missing or invalid tenant configuration: 400 with kind tag
    ConfigError,
    /// Invariant violated; logged and reported: 500
    Integrity,
    /// Store timeout or other retriable backend failure: 503
    Transient,
    /// Pre-flight safety check refused the operation: 400, loud
    SafetyCheckFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_serializes_camel_case() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::SafetyCheckFailed).unwrap(),
            "\"safetyCheckFailed\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorKind::ConfigError).unwrap(),
            "\"configError\""
        );
    }
}
