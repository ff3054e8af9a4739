//! Transaction and allocation models
//!
//! Field names follow the persisted camelCase document layout, which is
//! compatibility-critical: existing exports and the import tooling agree on
//! these exact keys.

use fiscal_core::Centavos;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category marker for transactions whose breakdown lives in `allocations`
pub const SPLIT_CATEGORY: &str = "-split-";

/// Closed set of allocation target kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationType {
    HoaMonth,
    WaterConsumption,
    WaterPenalty,
    CreditUsed,
    CreditAdded,
    AccountTransfer,
    Other,
}

impl AllocationType {
    /// Kinds whose deletion must be compensated in the dues/water/credit
    /// ledgers and therefore cannot go through the plain delete path
    pub fn is_payment_kind(self) -> bool {
        matches!(
            self,
            AllocationType::HoaMonth
                | AllocationType::WaterConsumption
                | AllocationType::WaterPenalty
                | AllocationType::CreditUsed
                | AllocationType::CreditAdded
        )
    }
}

/// One entry of a split transaction.
///
/// Sign convention: expense outflows are negative, income inflows positive;
/// the signed sum of a transaction's allocations equals its amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    /// Target the money lands on (dues slot, bill entry, credit ledger)
    pub target_id: String,
    #[serde(default)]
    pub target_name: String,
    #[serde(rename = "type")]
    pub kind: AllocationType,
    pub category_id: String,
    pub amount: Centavos,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// A persisted transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Document id, also stored in the payload for export friendliness
    #[serde(default)]
    pub id: String,
    /// Civil date `YYYY-MM-DD` in the tenant zone
    pub date: String,
    /// Signed centavos; equals the allocation sum for split transactions
    pub amount: Centavos,
    pub category_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocations: Option<Vec<Allocation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Legacy payment-sequence tag carried through import for cross-reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pay_seq: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Value>,
}

/// Input to `TransactionService::create`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDraft {
    pub date: String,
    pub amount: Centavos,
    pub category_id: String,
    #[serde(default)]
    pub category_name: Option<String>,
    #[serde(default)]
    pub allocations: Option<Vec<Allocation>>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub vendor_id: Option<String>,
    #[serde(default)]
    pub unit_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub pay_seq: Option<String>,
}

impl TransactionDraft {
    pub fn into_transaction(self, id: String) -> Transaction {
        Transaction {
            id,
            date: self.date,
            amount: self.amount,
            category_id: self.category_id,
            category_name: self.category_name,
            allocations: self.allocations,
            payment_method: self.payment_method,
            account_id: self.account_id,
            vendor_id: self.vendor_id,
            unit_id: self.unit_id,
            notes: self.notes,
            pay_seq: self.pay_seq,
            created_at: None,
        }
    }
}

impl Transaction {
    /// Allocations slice, empty when the transaction is not split
    pub fn allocations(&self) -> &[Allocation] {
        self.allocations.as_deref().unwrap_or(&[])
    }

    pub fn is_split(&self) -> bool {
        self.category_id == SPLIT_CATEGORY
    }

    /// Whether deleting this transaction requires compensating reversals
    pub fn has_payment_allocations(&self) -> bool {
        self.allocations().iter().any(|a| a.kind.is_payment_kind())
    }
}
