//! Distribution planning
//!
//! Pure arithmetic over a snapshot: no I/O, no suspension. The plan walks
//! the ordered obligation list with a pool of tendered money plus credit,
//! records an allocation per obligation it can touch, and turns any
//! remaining tender into new credit. A one-centavo remainder is absorbed by
//! the split tolerance instead of leaking into the credit ledger.

use crate::obligations::Obligation;
use crate::{PaymentError, PaymentResult};
use fiscal_core::Centavos;
use serde::{Deserialize, Serialize};
use transactions_rs::validation::SPLIT_SUM_TOLERANCE;

/// Whether a payment with nothing open may become pure credit
#[derive(Debug, Clone, Copy)]
pub struct PlanPolicy {
    pub allow_pure_credit: bool,
}

impl Default for PlanPolicy {
    fn default() -> Self {
        Self { allow_pure_credit: true }
    }
}

/// One obligation's share of the plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedAllocation {
    pub obligation: Obligation,
    pub amount: Centavos,
}

/// The proposed distribution, with the derived fields previews display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPlan {
    pub allocations: Vec<PlannedAllocation>,
    /// Applied to water principal and HOA months
    pub applied_to_bills: Centavos,
    pub applied_to_penalties: Centavos,
    pub credit_used: Centavos,
    pub credit_added: Centavos,
    pub new_credit_balance: Centavos,
    pub unpaid_remaining: Centavos,
    /// Fingerprint of the snapshot the plan was computed against
    pub signature: String,
}

/// Compute the distribution of `amount` (plus available credit) across the
/// ordered obligations.
pub fn build_plan(
    unit_id: &str,
    amount: Centavos,
    credit_balance: Centavos,
    obligations: &[Obligation],
    policy: PlanPolicy,
) -> PaymentResult<PaymentPlan> {
    if amount.is_negative() {
        return Err(PaymentError::NegativeAmount(amount));
    }
    if obligations.is_empty() && amount > Centavos::ZERO && !policy.allow_pure_credit {
        return Err(PaymentError::InsufficientObligations { unit_id: unit_id.to_string() });
    }

    let mut pool = amount + credit_balance;
    let mut allocations = Vec::new();
    let mut applied_to_bills = Centavos::ZERO;
    let mut applied_to_penalties = Centavos::ZERO;
    let mut unpaid_remaining = Centavos::ZERO;

    for obligation in obligations {
        let pay = pool.min(obligation.outstanding);
        if pay > Centavos::ZERO {
            if obligation.target.priority() == 3 {
                applied_to_penalties += pay;
            } else {
                applied_to_bills += pay;
            }
            allocations.push(PlannedAllocation {
                obligation: obligation.clone(),
                amount: pay,
            });
            pool -= pay;
        }
        unpaid_remaining += obligation.outstanding - pay;
    }

    let applied = applied_to_bills + applied_to_penalties;
    let credit_used = (applied - amount).max(Centavos::ZERO);
    let leftover_tender = (amount - applied).max(Centavos::ZERO);
    // A single-centavo overshoot is rounding, not credit
    let credit_added = if leftover_tender.raw() > SPLIT_SUM_TOLERANCE {
        leftover_tender
    } else {
        Centavos::ZERO
    };
    let new_credit_balance = credit_balance - credit_used + credit_added;

    Ok(PaymentPlan {
        signature: snapshot_signature(credit_balance, obligations),
        allocations,
        applied_to_bills,
        applied_to_penalties,
        credit_used,
        credit_added,
        new_credit_balance,
        unpaid_remaining,
    })
}

/// Deterministic fingerprint of the obligations snapshot a plan saw.
///
/// The commit path recomputes this inside its store transaction and rejects
/// the payment as stale when it differs.
pub fn snapshot_signature(credit_balance: Centavos, obligations: &[Obligation]) -> String {
    let mut parts = vec![format!("credit={}", credit_balance.raw())];
    for obligation in obligations {
        parts.push(format!(
            "{}={}",
            obligation.target.target_id(),
            obligation.outstanding.raw()
        ));
    }
    parts.join(";")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obligations::ObligationTarget;
    use fiscal_core::calendar;

    fn obligation(target: ObligationTarget, due: &str, outstanding: i64) -> Obligation {
        Obligation {
            target,
            due_date: calendar::parse_civil_date(due).unwrap(),
            outstanding: Centavos::new(outstanding),
        }
    }

    fn hoa(month: u32, due: &str, outstanding: i64) -> Obligation {
        obligation(
            ObligationTarget::HoaMonth { fiscal_year: 2025, month },
            due,
            outstanding,
        )
    }

    #[test]
    fn test_hoa_payment_with_credit_rollover() {
        // Scheduled 4600.00/month, tender 15000.00 covers three months and
        // rolls 1200.00 into credit
        let obligations = vec![
            hoa(1, "2025-01-01", 460000),
            hoa(2, "2025-02-01", 460000),
            hoa(3, "2025-03-01", 460000),
        ];
        let plan = build_plan(
            "1C",
            Centavos::new(1500000),
            Centavos::ZERO,
            &obligations,
            PlanPolicy::default(),
        )
        .unwrap();

        assert_eq!(plan.allocations.len(), 3);
        assert!(plan
            .allocations
            .iter()
            .all(|a| a.amount == Centavos::new(460000)));
        assert_eq!(plan.applied_to_bills, Centavos::new(1380000));
        assert_eq!(plan.applied_to_penalties, Centavos::ZERO);
        assert_eq!(plan.credit_used, Centavos::ZERO);
        assert_eq!(plan.credit_added, Centavos::new(120000));
        assert_eq!(plan.new_credit_balance, Centavos::new(120000));
        assert_eq!(plan.unpaid_remaining, Centavos::ZERO);
    }

    #[test]
    fn test_water_payment_consumes_penalty_first() {
        let obligations = vec![
            obligation(
                ObligationTarget::WaterPenalty { bill_id: "2026-Q1".into() },
                "2025-07-10",
                15887,
            ),
            obligation(
                ObligationTarget::WaterBase { bill_id: "2026-Q1".into() },
                "2025-07-10",
                155000,
            ),
        ];
        let plan = build_plan(
            "101",
            Centavos::new(100000),
            Centavos::ZERO,
            &obligations,
            PlanPolicy::default(),
        )
        .unwrap();

        assert_eq!(plan.allocations.len(), 2);
        assert_eq!(plan.allocations[0].amount, Centavos::new(15887));
        assert_eq!(
            plan.allocations[0].obligation.target,
            ObligationTarget::WaterPenalty { bill_id: "2026-Q1".into() }
        );
        assert_eq!(plan.allocations[1].amount, Centavos::new(84113));
        assert_eq!(plan.applied_to_penalties, Centavos::new(15887));
        assert_eq!(plan.applied_to_bills, Centavos::new(84113));
        assert_eq!(plan.unpaid_remaining, Centavos::new(70887));
        assert_eq!(plan.credit_added, Centavos::ZERO);
    }

    #[test]
    fn test_credit_pool_tops_up_tender() {
        let obligations = vec![hoa(1, "2025-01-01", 460000)];
        let plan = build_plan(
            "1C",
            Centavos::new(400000),
            Centavos::new(100000),
            &obligations,
            PlanPolicy::default(),
        )
        .unwrap();

        assert_eq!(plan.allocations[0].amount, Centavos::new(460000));
        assert_eq!(plan.credit_used, Centavos::new(60000));
        assert_eq!(plan.credit_added, Centavos::ZERO);
        assert_eq!(plan.new_credit_balance, Centavos::new(40000));
    }

    #[test]
    fn test_zero_tender_spends_credit_only() {
        let obligations = vec![hoa(1, "2025-01-01", 460000)];
        let plan = build_plan(
            "1C",
            Centavos::ZERO,
            Centavos::new(500000),
            &obligations,
            PlanPolicy::default(),
        )
        .unwrap();

        assert_eq!(plan.allocations[0].amount, Centavos::new(460000));
        assert_eq!(plan.credit_used, Centavos::new(460000));
        assert_eq!(plan.credit_added, Centavos::ZERO);
        assert_eq!(plan.new_credit_balance, Centavos::new(40000));
    }

    #[test]
    fn test_one_centavo_overshoot_is_absorbed() {
        let obligations = vec![hoa(1, "2025-01-01", 460000)];
        let plan = build_plan(
            "1C",
            Centavos::new(460001),
            Centavos::ZERO,
            &obligations,
            PlanPolicy::default(),
        )
        .unwrap();
        assert_eq!(plan.credit_added, Centavos::ZERO);
        assert_eq!(plan.new_credit_balance, Centavos::ZERO);

        // Two centavos is real money again
        let plan = build_plan(
            "1C",
            Centavos::new(460002),
            Centavos::ZERO,
            &obligations,
            PlanPolicy::default(),
        )
        .unwrap();
        assert_eq!(plan.credit_added, Centavos::new(2));
    }

    #[test]
    fn test_pure_credit_policy() {
        let plan = build_plan(
            "1C",
            Centavos::new(250000),
            Centavos::ZERO,
            &[],
            PlanPolicy::default(),
        )
        .unwrap();
        assert!(plan.allocations.is_empty());
        assert_eq!(plan.credit_added, Centavos::new(250000));

        let err = build_plan(
            "1C",
            Centavos::new(250000),
            Centavos::ZERO,
            &[],
            PlanPolicy { allow_pure_credit: false },
        )
        .unwrap_err();
        assert!(matches!(err, PaymentError::InsufficientObligations { .. }));
    }

    #[test]
    fn test_pool_exhausts_into_a_partial_month() {
        let obligations = vec![
            hoa(1, "2025-01-01", 460000),
            hoa(2, "2025-02-01", 460000),
        ];
        let plan = build_plan(
            "1C",
            Centavos::new(500000),
            Centavos::ZERO,
            &obligations,
            PlanPolicy::default(),
        )
        .unwrap();

        // January in full, the rest of the pool into February
        assert_eq!(plan.allocations.len(), 2);
        assert_eq!(plan.allocations[0].amount, Centavos::new(460000));
        assert_eq!(plan.allocations[1].amount, Centavos::new(40000));
        assert_eq!(plan.unpaid_remaining, Centavos::new(420000));
        assert_eq!(plan.credit_added, Centavos::ZERO);
        assert_eq!(plan.new_credit_balance, Centavos::ZERO);
    }

    #[test]
    fn test_water_principal_accepts_partial_payment() {
        let obligations = vec![obligation(
            ObligationTarget::WaterBase { bill_id: "2026-Q1".into() },
            "2025-07-10",
            155000,
        )];
        let plan = build_plan(
            "101",
            Centavos::new(50000),
            Centavos::ZERO,
            &obligations,
            PlanPolicy::default(),
        )
        .unwrap();
        assert_eq!(plan.allocations[0].amount, Centavos::new(50000));
        assert_eq!(plan.unpaid_remaining, Centavos::new(105000));
    }

    #[test]
    fn test_signature_tracks_snapshot() {
        let obligations = vec![hoa(1, "2025-01-01", 460000)];
        let a = snapshot_signature(Centavos::ZERO, &obligations);
        let b = snapshot_signature(Centavos::new(1), &obligations);
        assert_ne!(a, b);

        let drained = vec![hoa(1, "2025-01-01", 0)];
        assert_ne!(a, snapshot_signature(Centavos::ZERO, &drained));
    }

    #[test]
    fn test_negative_amount_rejected() {
        let err = build_plan(
            "1C",
            Centavos::new(-1),
            Centavos::ZERO,
            &[],
            PlanPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PaymentError::NegativeAmount(_)));
    }
}
