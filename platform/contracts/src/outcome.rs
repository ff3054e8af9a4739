//! Structured success/error envelope
//!
//! The payment distributor, penalty recalculator, and import orchestrator
//! return this envelope so callers can branch on the kind tag and the
//! boundary can serialize it as `{success, data | error}` directly.

use crate::ErrorKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A failure with enough structure for protocol mapping and operator logs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceFailure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ServiceFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ServiceFailure {}

/// `{success: bool, data? | error?}` result envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ServiceFailure>,
}

impl<T> Outcome<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(failure: ServiceFailure) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(failure),
        }
    }

    pub fn into_result(self) -> Result<T, ServiceFailure> {
        match (self.data, self.error) {
            (Some(data), None) if self.success => Ok(data),
            (_, Some(failure)) => Err(failure),
            _ => Err(ServiceFailure::new(
                ErrorKind::Integrity,
                "outcome carried neither data nor error",
            )),
        }
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T>
where
    E: Into<ServiceFailure>,
{
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => Outcome::ok(data),
            Err(err) => Outcome::err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_envelope_shape() {
        let outcome = Outcome::ok(json!({ "updated": 3 }));
        let rendered = serde_json::to_value(&outcome).unwrap();
        assert_eq!(rendered, json!({ "success": true, "data": { "updated": 3 } }));
    }

    #[test]
    fn test_error_envelope_shape() {
        let outcome: Outcome<Value> = Outcome::err(
            ServiceFailure::new(ErrorKind::ConfigError, "penaltyRate missing")
                .with_details(json!({ "clientId": "AVII" })),
        );
        let rendered = serde_json::to_value(&outcome).unwrap();
        assert_eq!(rendered["success"], json!(false));
        assert_eq!(rendered["error"]["kind"], json!("configError"));
        assert_eq!(rendered["error"]["details"]["clientId"], json!("AVII"));
    }

    #[test]
    fn test_into_result() {
        let ok: Outcome<i32> = Outcome::ok(5);
        assert_eq!(ok.into_result().unwrap(), 5);
        let err: Outcome<i32> =
            Outcome::err(ServiceFailure::new(ErrorKind::NotFound, "missing"));
        assert_eq!(err.into_result().unwrap_err().kind, ErrorKind::NotFound);
    }
}
