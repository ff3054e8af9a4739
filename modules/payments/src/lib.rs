//! Payment distributor
//!
//! Given a tendered amount, the unit's credit balance, and the ordered list
//! of open obligations, compute an allocation plan (penalty first, FIFO by
//! due date, overflow to credit) and, on confirmation, persist it as one
//! store transaction: the financial transaction, the water bill and dues
//! slot updates, the credit movement, and the audit record commit together
//! or not at all.

pub mod obligations;
pub mod plan;
pub mod service;

pub use obligations::{Obligation, ObligationTarget};
pub use plan::{build_plan, PaymentPlan, PlanPolicy, PlannedAllocation};
pub use service::{PaymentRecorded, PaymentService};

use credit_rs::CreditError;
use doc_store::StoreError;
use dues_rs::DuesError;
use fiscal_core::CalendarError;
use platform_contracts::{ErrorKind, ServiceFailure};
use security::AccessError;
use tenants::TenantError;
use thiserror::Error;
use transactions_rs::ValidationError;
use waterbills_rs::WaterError;

/// Errors from planning and committing payments
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment state changed since preview; re-run the preview")]
    Stale,

    #[error("no open obligations for unit {unit_id} and credit additions are disabled")]
    InsufficientObligations { unit_id: String },

    #[error("tendered amount must not be negative, got {0}")]
    NegativeAmount(fiscal_core::Centavos),

    #[error("transaction {0} is not a payment transaction")]
    NotAPayment(String),

    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Tenant(#[from] TenantError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Credit(#[from] CreditError),

    #[error(transparent)]
    Dues(#[from] DuesError),

    #[error(transparent)]
    Water(#[from] WaterError),

    #[error(transparent)]
    Calendar(#[from] CalendarError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("payment document malformed: {0}")]
    Malformed(String),
}

impl PaymentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PaymentError::Stale => ErrorKind::Conflict,
            PaymentError::InsufficientObligations { .. } => ErrorKind::InvalidInput,
            PaymentError::NegativeAmount(_) => ErrorKind::InvalidInput,
            PaymentError::NotAPayment(_) => ErrorKind::InvalidInput,
            PaymentError::TransactionNotFound(_) => ErrorKind::NotFound,
            PaymentError::Access(_) => ErrorKind::Forbidden,
            PaymentError::Tenant(TenantError::NotFound(_)) => ErrorKind::NotFound,
            PaymentError::Tenant(_) => ErrorKind::ConfigError,
            PaymentError::Validation(_) => ErrorKind::InvalidInput,
            PaymentError::Credit(err) => err.kind(),
            PaymentError::Dues(err) => err.kind(),
            PaymentError::Water(err) => err.kind(),
            PaymentError::Calendar(_) => ErrorKind::InvalidInput,
            PaymentError::Store(err) if err.is_transient() => ErrorKind::Transient,
            PaymentError::Store(_) => ErrorKind::Integrity,
            PaymentError::Malformed(_) => ErrorKind::Integrity,
        }
    }
}

impl From<PaymentError> for ServiceFailure {
    fn from(err: PaymentError) -> Self {
        ServiceFailure::new(err.kind(), err.to_string())
    }
}

pub type PaymentResult<T> = Result<T, PaymentError>;
