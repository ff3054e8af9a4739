//! Report aggregation
//!
//! Read-only derivations over the ledgers the other modules maintain: the
//! per-unit statement of account (chronological charges and payments with a
//! running balance) and the fiscal-year budget-vs-actual comparison with
//! sign-aware variance.

pub mod budget;
pub mod statement;

pub use budget::{BudgetLine, BudgetReport, BudgetReportService, CategoryKind, SpecialAssessments};
pub use statement::{RowKind, Statement, StatementRow, StatementService};

use doc_store::StoreError;
use fiscal_core::CalendarError;
use platform_contracts::ErrorKind;
use security::AccessError;
use tenants::TenantError;
use thiserror::Error;

/// Errors from report builders
#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Tenant(#[from] TenantError),

    #[error(transparent)]
    Calendar(#[from] CalendarError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Dues(#[from] dues_rs::DuesError),

    #[error(transparent)]
    Water(#[from] waterbills_rs::WaterError),

    #[error(transparent)]
    Credit(#[from] credit_rs::CreditError),

    #[error("report source document malformed: {0}")]
    Malformed(String),
}

impl ReportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReportError::Access(_) => ErrorKind::Forbidden,
            ReportError::Tenant(TenantError::NotFound(_)) => ErrorKind::NotFound,
            ReportError::Tenant(_) => ErrorKind::ConfigError,
            ReportError::Calendar(_) => ErrorKind::InvalidInput,
            ReportError::Dues(err) => err.kind(),
            ReportError::Water(err) => err.kind(),
            ReportError::Credit(err) => err.kind(),
            ReportError::Store(err) if err.is_transient() => ErrorKind::Transient,
            ReportError::Store(_) => ErrorKind::Integrity,
            ReportError::Malformed(_) => ErrorKind::Integrity,
        }
    }
}

pub type ReportResult<T> = Result<T, ReportError>;
