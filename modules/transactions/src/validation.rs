//! Transaction draft validation
//!
//! A transaction either carries a real category, or it is a split: category
//! `"-split-"` with an allocation array whose signed sum matches the amount
//! within one centavo. Legacy records that claim to be splits but carry no
//! allocations are malformed and are rejected rather than repaired.

use crate::models::{Transaction, TransactionDraft, SPLIT_CATEGORY};
use fiscal_core::{calendar, Centavos};
use thiserror::Error;

/// Tolerance for split-sum comparison, in centavos
pub const SPLIT_SUM_TOLERANCE: i64 = 1;

/// Validation errors for transaction drafts and persisted records
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("categoryId must be set")]
    MissingCategory,

    #[error("invalid transaction date: {0}")]
    InvalidDate(String),

    #[error("categoryId is '-split-' but no allocations are present (corrupt split)")]
    SplitWithoutAllocations,

    #[error("allocations present but categoryId is '{0}', expected '-split-'")]
    AllocationsWithScalarCategory(String),

    #[error("split transaction has an empty allocation array")]
    EmptyAllocations,

    #[error("allocation sum {sum} does not match amount {amount}")]
    SplitSumMismatch { amount: Centavos, sum: Centavos },
}

fn validate_parts(
    date: &str,
    amount: Centavos,
    category_id: &str,
    allocations: Option<&[crate::models::Allocation]>,
) -> Result<(), ValidationError> {
    if category_id.is_empty() {
        return Err(ValidationError::MissingCategory);
    }
    calendar::parse_civil_date(date)
        .map_err(|_| ValidationError::InvalidDate(date.to_string()))?;

    let has_allocations = allocations.map(|a| !a.is_empty()).unwrap_or(false);
    if category_id == SPLIT_CATEGORY {
        if allocations.is_none() {
            return Err(ValidationError::SplitWithoutAllocations);
        }
        if !has_allocations {
            return Err(ValidationError::EmptyAllocations);
        }
        let sum: Centavos = allocations
            .unwrap_or(&[])
            .iter()
            .map(|allocation| allocation.amount)
            .sum();
        if (sum - amount).abs().raw() > SPLIT_SUM_TOLERANCE {
            return Err(ValidationError::SplitSumMismatch { amount, sum });
        }
    } else if has_allocations {
        return Err(ValidationError::AllocationsWithScalarCategory(
            category_id.to_string(),
        ));
    }
    Ok(())
}

/// Validate a draft before it is written
pub fn validate_draft(draft: &TransactionDraft) -> Result<(), ValidationError> {
    validate_parts(
        &draft.date,
        draft.amount,
        &draft.category_id,
        draft.allocations.as_deref(),
    )
}

/// Re-validate a persisted record (integrity checks, import screening)
pub fn revalidate(txn: &Transaction) -> Result<(), ValidationError> {
    validate_parts(
        &txn.date,
        txn.amount,
        &txn.category_id,
        txn.allocations.as_deref(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Allocation, AllocationType};

    fn allocation(category: &str, amount: i64) -> Allocation {
        Allocation {
            target_id: category.to_string(),
            target_name: category.to_string(),
            kind: AllocationType::Other,
            category_id: category.to_string(),
            amount: Centavos::new(amount),
            metadata: None,
        }
    }

    fn split_draft(amount: i64, allocations: Vec<Allocation>) -> TransactionDraft {
        TransactionDraft {
            date: "2026-03-15".into(),
            amount: Centavos::new(amount),
            category_id: SPLIT_CATEGORY.into(),
            category_name: None,
            allocations: Some(allocations),
            payment_method: None,
            account_id: None,
            vendor_id: None,
            unit_id: None,
            notes: None,
            pay_seq: None,
        }
    }

    #[test]
    fn test_balanced_split_accepted() {
        let draft = split_draft(
            -50000,
            vec![allocation("maintenance", -30000), allocation("utilities", -20000)],
        );
        assert!(validate_draft(&draft).is_ok());
    }

    #[test]
    fn test_mutated_split_rejected_on_revalidation() {
        // Accepted at creation, then one allocation shrinks by 5000
        let draft = split_draft(
            -50000,
            vec![allocation("maintenance", -30000), allocation("utilities", -20000)],
        );
        assert!(validate_draft(&draft).is_ok());

        let mut txn = draft.into_transaction("2026-03-15_100000_000".into());
        txn.allocations.as_mut().unwrap()[1].amount = Centavos::new(-15000);
        assert_eq!(
            revalidate(&txn),
            Err(ValidationError::SplitSumMismatch {
                amount: Centavos::new(-50000),
                sum: Centavos::new(-45000),
            })
        );
    }

    #[test]
    fn test_one_centavo_tolerance() {
        let draft = split_draft(
            10000,
            vec![allocation("a", 3333), allocation("b", 3333), allocation("c", 3333)],
        );
        // Sum 9999 is within one centavo of 10000
        assert!(validate_draft(&draft).is_ok());

        let off_by_two = split_draft(
            10000,
            vec![allocation("a", 3333), allocation("b", 3333), allocation("c", 3332)],
        );
        assert!(matches!(
            validate_draft(&off_by_two),
            Err(ValidationError::SplitSumMismatch { .. })
        ));
    }

    #[test]
    fn test_corrupt_legacy_split_rejected() {
        let mut draft = split_draft(-50000, vec![]);
        draft.allocations = None;
        assert_eq!(
            validate_draft(&draft),
            Err(ValidationError::SplitWithoutAllocations)
        );

        draft.allocations = Some(vec![]);
        assert_eq!(validate_draft(&draft), Err(ValidationError::EmptyAllocations));
    }

    #[test]
    fn test_scalar_category_with_allocations_rejected() {
        let mut draft = split_draft(-50000, vec![allocation("maintenance", -50000)]);
        draft.category_id = "maintenance".into();
        assert_eq!(
            validate_draft(&draft),
            Err(ValidationError::AllocationsWithScalarCategory("maintenance".into()))
        );
    }

    #[test]
    fn test_scalar_transaction_accepted() {
        let mut draft = split_draft(-50000, vec![]);
        draft.category_id = "maintenance".into();
        draft.allocations = None;
        assert!(validate_draft(&draft).is_ok());
    }

    #[test]
    fn test_bad_date_rejected() {
        let mut draft = split_draft(-50000, vec![allocation("maintenance", -50000)]);
        draft.date = "15/03/2026".into();
        assert_eq!(
            validate_draft(&draft),
            Err(ValidationError::InvalidDate("15/03/2026".into()))
        );
    }
}
