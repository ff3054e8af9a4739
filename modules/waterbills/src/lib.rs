//! Metered water billing
//!
//! The quarterly pipeline: meter readings per fiscal month → consumption
//! derivation → bill generation with a configuration snapshot → compounding
//! penalty recalculation → payment application through the distributor.
//!
//! Bills are keyed `{fiscalYear}-Q{n}` and owned per quarter; a bill may
//! only be generated once all three composing months have readings, and is
//! never generated twice.

pub mod config;
pub mod generator;
pub mod models;
pub mod penalty;
pub mod readings;

pub use config::{water_config_doc, WaterConfig};
pub use generator::{bill_doc, bills_collection, WaterBillService};
pub use models::{BillPayment, BillStatus, UnitBill, WaterBill};
pub use penalty::{PenaltyRecalculator, PenaltySummary};
pub use readings::{readings_doc, WashCounts, WaterReadings, WaterReadingsService};

use doc_store::StoreError;
use fiscal_core::CalendarError;
use platform_contracts::{ErrorKind, ServiceFailure};
use thiserror::Error;

/// Errors across the water billing pipeline
#[derive(Debug, Error)]
pub enum WaterError {
    #[error("water configuration invalid for {client_id}: {reason}")]
    Config { client_id: String, reason: String },

    #[error("cannot generate {quarter}: readings missing for fiscal months {missing:?}")]
    MissingReadings { quarter: String, missing: Vec<u32> },

    #[error("bill already exists: {0}")]
    BillAlreadyExists(String),

    #[error("bill not found: {0}")]
    BillNotFound(String),

    #[error("unit {unit_id} has no entry on bill {bill_id}")]
    UnitNotBilled { bill_id: String, unit_id: String },

    #[error("payment of {amount} exceeds outstanding {outstanding} on bill {bill_id} unit {unit_id}")]
    Overpayment {
        bill_id: String,
        unit_id: String,
        amount: fiscal_core::Centavos,
        outstanding: fiscal_core::Centavos,
    },

    #[error("water document malformed: {0}")]
    Malformed(String),

    #[error(transparent)]
    Calendar(#[from] CalendarError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WaterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WaterError::Config { .. } => ErrorKind::ConfigError,
            WaterError::MissingReadings { .. } => ErrorKind::InvalidInput,
            WaterError::BillAlreadyExists(_) => ErrorKind::Conflict,
            WaterError::BillNotFound(_) | WaterError::UnitNotBilled { .. } => ErrorKind::NotFound,
            WaterError::Overpayment { .. } => ErrorKind::Integrity,
            WaterError::Malformed(_) => ErrorKind::Integrity,
            WaterError::Calendar(_) => ErrorKind::InvalidInput,
            WaterError::Store(err) if err.is_transient() => ErrorKind::Transient,
            WaterError::Store(_) => ErrorKind::Integrity,
        }
    }
}

impl From<WaterError> for ServiceFailure {
    fn from(err: WaterError) -> Self {
        ServiceFailure::new(err.kind(), err.to_string())
    }
}

pub type WaterResult<T> = Result<T, WaterError>;
