//! Open obligations and their ordering
//!
//! An obligation is any outstanding payable: accrued water penalty, water
//! bill principal, or an HOA month slot. The candidate list orders by
//! `(dueDate asc, priority desc)` with priority
//! `water_penalty > water_consumption > hoa_month`, so penalties of a bill
//! are consumed before that same bill's principal.

use chrono::NaiveDate;
use fiscal_core::{calendar, Centavos};
use serde::{Deserialize, Serialize};
use transactions_rs::AllocationType;
use waterbills_rs::penalty::expected_penalty;
use waterbills_rs::{BillStatus, WaterBill};

/// What an obligation settles against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ObligationTarget {
    WaterPenalty { bill_id: String },
    WaterBase { bill_id: String },
    HoaMonth { fiscal_year: i32, month: u32 },
}

impl ObligationTarget {
    /// Higher consumes earlier at equal due dates
    pub fn priority(&self) -> u8 {
        match self {
            ObligationTarget::WaterPenalty { .. } => 3,
            ObligationTarget::WaterBase { .. } => 2,
            ObligationTarget::HoaMonth { .. } => 1,
        }
    }

    pub fn allocation_type(&self) -> AllocationType {
        match self {
            ObligationTarget::WaterPenalty { .. } => AllocationType::WaterPenalty,
            ObligationTarget::WaterBase { .. } => AllocationType::WaterConsumption,
            ObligationTarget::HoaMonth { .. } => AllocationType::HoaMonth,
        }
    }

    pub fn category_id(&self) -> &'static str {
        match self {
            ObligationTarget::WaterPenalty { .. } => "waterPenalties",
            ObligationTarget::WaterBase { .. } => "waterConsumption",
            ObligationTarget::HoaMonth { .. } => "hoaDues",
        }
    }

    pub fn target_id(&self) -> String {
        match self {
            ObligationTarget::WaterPenalty { bill_id } => format!("{bill_id}:penalty"),
            ObligationTarget::WaterBase { bill_id } => bill_id.clone(),
            ObligationTarget::HoaMonth { fiscal_year, month } => {
                format!("{fiscal_year}:{month:02}")
            }
        }
    }

    pub fn target_name(&self) -> String {
        match self {
            ObligationTarget::WaterPenalty { bill_id } => format!("Water penalty {bill_id}"),
            ObligationTarget::WaterBase { bill_id } => format!("Water consumption {bill_id}"),
            ObligationTarget::HoaMonth { fiscal_year, month } => {
                format!("HOA dues {fiscal_year} month {month}")
            }
        }
    }
}

/// One outstanding payable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Obligation {
    pub target: ObligationTarget,
    pub due_date: NaiveDate,
    pub outstanding: Centavos,
}

/// Sort into consumption order: due date first, then priority
pub fn sort_obligations(obligations: &mut [Obligation]) {
    obligations.sort_by(|a, b| {
        a.due_date
            .cmp(&b.due_date)
            .then(b.target.priority().cmp(&a.target.priority()))
            .then(a.target.target_id().cmp(&b.target.target_id()))
    });
}

/// Build the candidate list from loaded documents.
///
/// `penalty_as_of` switches penalties to a temporary recalculation for
/// backdated previews; commits pass `None` and settle against the stored
/// (live) penalty figures. `cutoff` drops obligations due after the
/// caller's selected month.
pub fn collect_obligations(
    unit_id: &str,
    bills: &[WaterBill],
    dues_years: &[(i32, dues_rs::DuesRecord)],
    penalty_as_of: Option<NaiveDate>,
    cutoff: Option<NaiveDate>,
) -> Vec<Obligation> {
    let mut obligations = Vec::new();

    for bill in bills {
        let Some(unit) = bill.bills.units.get(unit_id) else {
            continue;
        };
        if unit.status == BillStatus::Paid {
            continue;
        }
        let Ok(due_date) = calendar::parse_civil_date(&bill.due_date) else {
            continue;
        };
        if cutoff.map(|cut| due_date > cut).unwrap_or(false) {
            continue;
        }

        let penalty_outstanding = match penalty_as_of {
            Some(at) => {
                let expected = expected_penalty(unit, &bill.config_snapshot, due_date, at);
                (expected - unit.penalty_paid).max(Centavos::ZERO)
            }
            None => unit.outstanding_penalty(),
        };
        if penalty_outstanding > Centavos::ZERO {
            obligations.push(Obligation {
                target: ObligationTarget::WaterPenalty { bill_id: bill.doc_id() },
                due_date,
                outstanding: penalty_outstanding,
            });
        }
        if unit.outstanding_base() > Centavos::ZERO {
            obligations.push(Obligation {
                target: ObligationTarget::WaterBase { bill_id: bill.doc_id() },
                due_date,
                outstanding: unit.outstanding_base(),
            });
        }
    }

    // Every unpaid slot of the year is a candidate: owners prepay future
    // months; the display-side visibility policy does not narrow this list
    for (fiscal_year, record) in dues_years {
        for month in 1..=12u32 {
            let outstanding = record.outstanding(month);
            if outstanding <= Centavos::ZERO {
                continue;
            }
            let Some(due_date) = slot_due_date(record, month) else {
                continue;
            };
            if cutoff.map(|cut| due_date > cut).unwrap_or(false) {
                continue;
            }
            obligations.push(Obligation {
                target: ObligationTarget::HoaMonth { fiscal_year: *fiscal_year, month },
                due_date,
                outstanding,
            });
        }
    }

    sort_obligations(&mut obligations);
    obligations
}

/// A slot's effective due date; quarterly slots derive from the first slot
/// of their quarter
fn slot_due_date(record: &dues_rs::DuesRecord, month: u32) -> Option<NaiveDate> {
    let index = (month - 1) as usize;
    let quarter_start = index - index % 3;
    let own = record
        .payments
        .get(index)
        .and_then(|slot| slot.due_date.as_deref())
        .and_then(|d| calendar::parse_civil_date(d).ok());
    own.or_else(|| {
        record
            .payments
            .get(quarter_start)
            .and_then(|slot| slot.due_date.as_deref())
            .and_then(|d| calendar::parse_civil_date(d).ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obligation(target: ObligationTarget, due: &str, outstanding: i64) -> Obligation {
        Obligation {
            target,
            due_date: calendar::parse_civil_date(due).unwrap(),
            outstanding: Centavos::new(outstanding),
        }
    }

    #[test]
    fn test_ordering_is_due_date_then_priority() {
        let mut obligations = vec![
            obligation(
                ObligationTarget::HoaMonth { fiscal_year: 2026, month: 1 },
                "2025-07-01",
                460000,
            ),
            obligation(
                ObligationTarget::WaterBase { bill_id: "2026-Q1".into() },
                "2025-07-10",
                155000,
            ),
            obligation(
                ObligationTarget::WaterPenalty { bill_id: "2026-Q1".into() },
                "2025-07-10",
                15887,
            ),
            obligation(
                ObligationTarget::HoaMonth { fiscal_year: 2026, month: 2 },
                "2025-08-01",
                460000,
            ),
        ];
        sort_obligations(&mut obligations);

        let order: Vec<String> = obligations.iter().map(|o| o.target.target_id()).collect();
        assert_eq!(
            order,
            vec!["2026:01", "2026-Q1:penalty", "2026-Q1", "2026:02"]
        );
    }

    #[test]
    fn test_penalty_outranks_principal_on_same_bill() {
        let penalty = ObligationTarget::WaterPenalty { bill_id: "2026-Q1".into() };
        let base = ObligationTarget::WaterBase { bill_id: "2026-Q1".into() };
        assert!(penalty.priority() > base.priority());
        assert!(base.priority() > ObligationTarget::HoaMonth { fiscal_year: 2026, month: 1 }.priority());
    }

    #[test]
    fn test_allocation_type_mapping() {
        assert_eq!(
            ObligationTarget::WaterPenalty { bill_id: "b".into() }.allocation_type(),
            AllocationType::WaterPenalty
        );
        assert_eq!(
            ObligationTarget::HoaMonth { fiscal_year: 2026, month: 3 }.allocation_type(),
            AllocationType::HoaMonth
        );
    }
}
