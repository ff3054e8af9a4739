//! Water bill document models

use crate::config::WaterConfig;
use fiscal_core::Centavos;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Paid iff `paid_amount >= total_amount`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillStatus {
    Unpaid,
    Paid,
}

/// One payment applied to a unit's bill entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillPayment {
    pub transaction_id: String,
    pub amount: Centavos,
    pub base_charge_paid: Centavos,
    pub penalty_paid: Centavos,
    /// Civil payment date
    pub date: String,
}

/// A unit's slice of a quarterly bill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitBill {
    /// Last meter value before the quarter
    pub prior_reading: i64,
    /// Meter value at the quarter's final month
    pub current_reading: i64,
    /// `current - prior`; negative only when the meter reset
    pub consumption: i64,
    #[serde(default)]
    pub car_wash_count: u32,
    #[serde(default)]
    pub boat_wash_count: u32,
    pub current_charge: Centavos,
    pub penalty_amount: Centavos,
    /// Invariant: `current_charge + penalty_amount`
    pub total_amount: Centavos,
    pub paid_amount: Centavos,
    #[serde(default)]
    pub base_paid: Centavos,
    #[serde(default)]
    pub penalty_paid: Centavos,
    pub status: BillStatus,
    #[serde(default)]
    pub payments: Vec<BillPayment>,
    /// Meter went backwards; consumption kept raw, charge floored
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub meter_reset: bool,
    /// First bill for this unit, no reading history before the quarter
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_prior_baseline: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_penalty_update: Option<String>,
}

impl UnitBill {
    pub fn outstanding(&self) -> Centavos {
        (self.total_amount - self.paid_amount).max(Centavos::ZERO)
    }

    pub fn outstanding_penalty(&self) -> Centavos {
        (self.penalty_amount - self.penalty_paid).max(Centavos::ZERO)
    }

    pub fn outstanding_base(&self) -> Centavos {
        (self.current_charge - self.base_paid).max(Centavos::ZERO)
    }

    /// Recompute the rollups that derive from other fields
    pub fn refresh(&mut self) {
        self.total_amount = self.current_charge + self.penalty_amount;
        self.paid_amount = self.base_paid + self.penalty_paid;
        self.status = if self.paid_amount >= self.total_amount {
            BillStatus::Paid
        } else {
            BillStatus::Unpaid
        };
    }
}

/// Per-unit entries nested under the `bills` field of the document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillsNode {
    #[serde(default)]
    pub units: BTreeMap<String, UnitBill>,
}

/// Rollup over all units of a bill
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillSummary {
    pub unit_count: usize,
    pub total_charged: Centavos,
    pub total_penalties: Centavos,
    pub total_paid: Centavos,
}

/// One quarterly bill document, keyed `{fiscalYear}-Q{n}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaterBill {
    pub fiscal_year: i32,
    pub quarter: u8,
    /// Generation instant, server-assigned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bill_date: Option<Value>,
    /// Civil due date
    pub due_date: String,
    /// Inputs frozen at generation time
    pub config_snapshot: WaterConfig,
    pub bills: BillsNode,
    pub summary: BillSummary,
}

impl WaterBill {
    pub fn doc_id(&self) -> String {
        format!("{}-Q{}", self.fiscal_year, self.quarter)
    }

    pub fn recompute_summary(&mut self) {
        let units = &self.bills.units;
        self.summary = BillSummary {
            unit_count: units.len(),
            total_charged: units.values().map(|u| u.current_charge).sum(),
            total_penalties: units.values().map(|u| u.penalty_amount).sum(),
            total_paid: units.values().map(|u| u.paid_amount).sum(),
        };
    }

    pub fn has_unpaid_units(&self) -> bool {
        self.bills
            .units
            .values()
            .any(|unit| unit.status != BillStatus::Paid)
    }
}
