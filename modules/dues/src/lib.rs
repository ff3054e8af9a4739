//! HOA dues ledger
//!
//! One record per (unit, fiscal year) with a fixed 12-slot payments array;
//! slot `i` is fiscal month `i + 1`, 1-based. Records are created lazily and
//! idempotently with due dates seeded from the tenant's fiscal calendar,
//! filled by the payment distributor, and cleared by reversals.

pub mod models;
pub mod service;

pub use models::{DuesPayment, DuesRecord, MONTHS_PER_YEAR};
pub use service::{dues_doc, DuesError, DuesService, SlotFill};
