//! Cross-reference between legacy payment sequences and new transactions
//!
//! Built while the transactions step imports records carrying a legacy
//! `paySeq` tag, consumed by the dues and water steps to stamp payment
//! slots with the freshly minted transaction ids. Lives for one import run
//! and is owned exclusively by the orchestrator; only its entry count
//! survives into the import summary.

use fiscal_core::Centavos;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct CrossRefEntry {
    pub transaction_id: String,
    pub unit_id: Option<String>,
    pub amount: Centavos,
    /// Civil date of the source transaction
    pub date: String,
}

/// paySeq -> newly assigned transaction
#[derive(Debug, Default)]
pub struct CrossRef {
    entries: HashMap<String, CrossRefEntry>,
}

impl CrossRef {
    pub fn new() -> Self {
        CrossRef::default()
    }

    /// Record one imported transaction. A duplicate sequence keeps the
    /// first entry and is reported back for the import summary.
    pub fn insert(&mut self, pay_seq: &str, entry: CrossRefEntry) -> bool {
        if self.entries.contains_key(pay_seq) {
            tracing::warn!(pay_seq = %pay_seq, "duplicate payment sequence in import data");
            return false;
        }
        self.entries.insert(pay_seq.to_string(), entry);
        true
    }

    pub fn resolve(&self, pay_seq: &str) -> Option<&CrossRefEntry> {
        self.entries.get(pay_seq)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(txn: &str) -> CrossRefEntry {
        CrossRefEntry {
            transaction_id: txn.to_string(),
            unit_id: Some("1C".to_string()),
            amount: Centavos::new(460000),
            date: "2025-01-05".to_string(),
        }
    }

    #[test]
    fn test_insert_and_resolve() {
        let mut crossref = CrossRef::new();
        assert!(crossref.insert("PAY-001", entry("2025-01-05_100000_000")));
        assert_eq!(
            crossref.resolve("PAY-001").unwrap().transaction_id,
            "2025-01-05_100000_000"
        );
        assert!(crossref.resolve("PAY-002").is_none());
        assert_eq!(crossref.len(), 1);
    }

    #[test]
    fn test_duplicate_sequence_keeps_first() {
        let mut crossref = CrossRef::new();
        assert!(crossref.insert("PAY-001", entry("first")));
        assert!(!crossref.insert("PAY-001", entry("second")));
        assert_eq!(crossref.resolve("PAY-001").unwrap().transaction_id, "first");
    }
}
