//! Transaction engine
//!
//! Immutable-by-convention financial transactions with optional split
//! allocations that distribute one transfer across multiple receivable
//! categories. Creation validates the split invariant, assigns a sortable
//! document id, and audits; deletion is admin-gated and refuses payment
//! transactions outright; those reverse through the payments module so the
//! compensating ledger updates land in the same store transaction.

pub mod models;
pub mod service;
pub mod validation;

pub use models::{Allocation, AllocationType, Transaction, TransactionDraft, SPLIT_CATEGORY};
pub use service::{TransactionError, TransactionFilters, TransactionService};
pub use validation::{revalidate, validate_draft, ValidationError};
