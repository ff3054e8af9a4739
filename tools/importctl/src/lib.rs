//! Import/purge orchestration
//!
//! Two operator workflows over one client association:
//!
//! - **Purge**: depth-first recursive deletion of every subcollection,
//!   with an exclusion list honored during the data pass and purged as a
//!   terminal step. Ghost documents are detected and accounted for.
//!   Dry-run by default; `--execute` mutates.
//! - **Import**: a fixed step sequence that rebuilds a client from
//!   exported JSON. The transactions step builds an in-memory
//!   cross-reference from legacy payment sequence tags to freshly minted
//!   transaction ids; the dues and water steps consume it.
//!
//! Audit writes are fatal in both workflows: an unaccounted mutation is
//! worse than a halted run.

pub mod crossref;
pub mod import;
pub mod progress;
pub mod purge;

pub use crossref::{CrossRef, CrossRefEntry};
pub use import::{ImportDataset, ImportOrchestrator, ImportSummary, StepReport};
pub use progress::{CancelFlag, ProgressEvent};
pub use purge::{PurgeOptions, PurgeOrchestrator, PurgeSummary};

use doc_store::StoreError;
use platform_contracts::ErrorKind;
use security::AccessError;
use thiserror::Error;

/// Errors from the orchestrators
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("client id mismatch: dataset is for '{found}', target is '{expected}'")]
    ClientIdMismatch { expected: String, found: String },

    #[error("dataset section missing or malformed: {0}")]
    BadDataset(String),

    #[error("operation cancelled at a step boundary")]
    Cancelled,

    #[error("transactions step failed; later steps depend on it: {0}")]
    TransactionsStepFailed(String),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Audit(#[from] audit::AuditError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Tenant(#[from] tenants::TenantError),

    #[error(transparent)]
    Transaction(#[from] transactions_rs::TransactionError),

    #[error(transparent)]
    Dues(#[from] dues_rs::DuesError),

    #[error(transparent)]
    Water(#[from] waterbills_rs::WaterError),
}

impl ImportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImportError::ClientIdMismatch { .. } => ErrorKind::SafetyCheckFailed,
            ImportError::BadDataset(_) => ErrorKind::InvalidInput,
            ImportError::Cancelled => ErrorKind::InvalidInput,
            ImportError::TransactionsStepFailed(_) => ErrorKind::Integrity,
            ImportError::Access(_) => ErrorKind::Forbidden,
            ImportError::Audit(_) => ErrorKind::Integrity,
            ImportError::Store(err) if err.is_transient() => ErrorKind::Transient,
            ImportError::Store(_) => ErrorKind::Integrity,
            ImportError::Tenant(err) => match err {
                tenants::TenantError::NotFound(_) => ErrorKind::NotFound,
                _ => ErrorKind::ConfigError,
            },
            ImportError::Transaction(err) => err.kind(),
            ImportError::Dues(err) => err.kind(),
            ImportError::Water(err) => err.kind(),
        }
    }
}

pub type ImportResult<T> = Result<T, ImportError>;
