//! Dues record and payment-slot models

use chrono::NaiveDate;
use fiscal_core::Centavos;
use serde::{Deserialize, Serialize};
use tenants::DuesFrequency;

/// Payment slots per dues record
pub const MONTHS_PER_YEAR: usize = 12;

/// One payment slot; overwritten on payment and reversal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuesPayment {
    /// Fiscal month, 1-based (slot index + 1)
    pub month: u32,
    /// Total paid into this slot
    pub amount: Centavos,
    #[serde(default)]
    pub base_paid: Centavos,
    #[serde(default)]
    pub penalty_paid: Centavos,
    /// Civil date of the most recent payment into this slot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    pub paid: bool,
    /// Authoritative due date. For quarterly billing only the first slot of
    /// each quarter carries one; the other two derive from it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl DuesPayment {
    pub fn empty(month: u32, due_date: Option<NaiveDate>) -> Self {
        Self {
            month,
            amount: Centavos::ZERO,
            base_paid: Centavos::ZERO,
            penalty_paid: Centavos::ZERO,
            date: None,
            paid: false,
            due_date: due_date.map(|d| d.format("%Y-%m-%d").to_string()),
            transaction_id: None,
            notes: None,
            payment_method: None,
            reference: None,
        }
    }

    /// Reset to unpaid, keeping the seeded due date
    pub fn clear(&mut self) {
        self.amount = Centavos::ZERO;
        self.base_paid = Centavos::ZERO;
        self.penalty_paid = Centavos::ZERO;
        self.date = None;
        self.paid = false;
        self.transaction_id = None;
        self.notes = None;
        self.payment_method = None;
        self.reference = None;
    }
}

/// Per-unit per-fiscal-year dues record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuesRecord {
    pub scheduled_amount: Centavos,
    pub total_paid: Centavos,
    pub payments: Vec<DuesPayment>,
}

impl DuesRecord {
    /// Recompute `total_paid` from the slots; the stored field is a rollup
    pub fn recompute_total(&mut self) {
        self.total_paid = self.payments.iter().map(|slot| slot.amount).sum();
    }

    pub fn slot(&self, month: u32) -> Option<&DuesPayment> {
        self.payments.get(month.checked_sub(1)? as usize)
    }

    pub fn slot_mut(&mut self, month: u32) -> Option<&mut DuesPayment> {
        self.payments.get_mut(month.checked_sub(1)? as usize)
    }

    /// Outstanding amount on one month slot
    pub fn outstanding(&self, month: u32) -> Centavos {
        self.slot(month)
            .map(|slot| (self.scheduled_amount - slot.amount).max(Centavos::ZERO))
            .unwrap_or(Centavos::ZERO)
    }

    /// Months visible for display as of `today`: a slot shows once its due
    /// date has arrived or it is already paid. For quarterly billing a
    /// quarter is all-or-nothing: one past-due month exposes all three.
    pub fn visible_months(&self, today: NaiveDate, frequency: DuesFrequency) -> Vec<u32> {
        let due_passed: Vec<bool> = self
            .payments
            .iter()
            .map(|slot| {
                slot.due_date
                    .as_deref()
                    .and_then(|d| fiscal_core::calendar::parse_civil_date(d).ok())
                    .map(|due| due <= today)
                    .unwrap_or(false)
            })
            .collect();

        self.payments
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let visible = match frequency {
                    DuesFrequency::Monthly => due_passed[index] || slot.paid,
                    DuesFrequency::Quarterly => {
                        let quarter_start = index - index % 3;
                        let quarter_due = (quarter_start..quarter_start + 3)
                            .any(|i| due_passed.get(i).copied().unwrap_or(false));
                        quarter_due || slot.paid
                    }
                };
                visible.then_some(slot.month)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_due_dates(months_with_due: &[(u32, &str)]) -> DuesRecord {
        let mut payments: Vec<DuesPayment> =
            (1..=12).map(|m| DuesPayment::empty(m, None)).collect();
        for (month, due) in months_with_due {
            payments[(*month - 1) as usize].due_date = Some((*due).to_string());
        }
        DuesRecord {
            scheduled_amount: Centavos::new(460000),
            total_paid: Centavos::ZERO,
            payments,
        }
    }

    fn date(text: &str) -> NaiveDate {
        fiscal_core::calendar::parse_civil_date(text).unwrap()
    }

    #[test]
    fn test_total_recompute_matches_slot_sum() {
        let mut record = record_with_due_dates(&[]);
        record.slot_mut(1).unwrap().amount = Centavos::new(460000);
        record.slot_mut(3).unwrap().amount = Centavos::new(230000);
        record.recompute_total();
        assert_eq!(record.total_paid, Centavos::new(690000));
    }

    #[test]
    fn test_outstanding_clamps_at_zero() {
        let mut record = record_with_due_dates(&[]);
        record.slot_mut(2).unwrap().amount = Centavos::new(500000);
        assert_eq!(record.outstanding(2), Centavos::ZERO);
        assert_eq!(record.outstanding(3), Centavos::new(460000));
    }

    #[test]
    fn test_monthly_visibility_by_due_date_or_paid() {
        let mut record = record_with_due_dates(&[
            (1, "2025-07-01"),
            (2, "2025-08-01"),
            (3, "2025-09-01"),
        ]);
        record.slot_mut(9).unwrap().paid = true;

        let visible = record.visible_months(date("2025-08-15"), DuesFrequency::Monthly);
        assert_eq!(visible, vec![1, 2, 9]);
    }

    #[test]
    fn test_quarterly_visibility_is_all_or_nothing() {
        // Only the first slot of each quarter carries a due date
        let record = record_with_due_dates(&[(1, "2025-07-01"), (4, "2025-10-01")]);

        let visible = record.visible_months(date("2025-07-02"), DuesFrequency::Quarterly);
        assert_eq!(visible, vec![1, 2, 3]);

        let later = record.visible_months(date("2025-10-01"), DuesFrequency::Quarterly);
        assert_eq!(later, vec![1, 2, 3, 4, 5, 6]);
    }
}
