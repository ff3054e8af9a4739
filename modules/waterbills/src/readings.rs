//! Meter readings per fiscal month
//!
//! One document per (client, fiscal year, fiscal month) keyed `YYYY-MM`
//! where `MM` is the zero-padded fiscal-month index 00..11. The document is
//! a plain map of unit readings plus the common-area meter and the wash
//! counts captured on the same round. Upserts merge per key; no business
//! logic lives here.

use crate::{WaterError, WaterResult};
use audit::{AuditEntry, AuditLogger};
use doc_store::{server_timestamp, DocPath, SharedStore, Store, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Car/boat wash events captured with a unit's meter reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WashCounts {
    #[serde(default)]
    pub car_washes: u32,
    #[serde(default)]
    pub boat_washes: u32,
}

/// One fiscal month's meter round
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaterReadings {
    /// unitId -> cumulative meter value (non-negative)
    #[serde(default)]
    pub readings: BTreeMap<String, i64>,
    /// Captured but never billed to a unit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_area: Option<i64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub washes: BTreeMap<String, WashCounts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
}

/// Document id for a fiscal month's readings: `YYYY-MM`, MM = fiscal index
pub fn readings_doc_id(fiscal_year: i32, fiscal_month: u32) -> String {
    format!("{fiscal_year:04}-{fiscal_month:02}")
}

pub fn readings_doc(
    client_id: &str,
    fiscal_year: i32,
    fiscal_month: u32,
) -> Result<DocPath, StoreError> {
    DocPath::parse(format!(
        "clients/{client_id}/projects/waterBills/readings/{}",
        readings_doc_id(fiscal_year, fiscal_month)
    ))
}

/// Capture and retrieval of monthly meter rounds
#[derive(Clone)]
pub struct WaterReadingsService {
    store: SharedStore,
    audit: AuditLogger,
}

impl WaterReadingsService {
    pub fn new(store: SharedStore, audit: AuditLogger) -> Self {
        Self { store, audit }
    }

    pub async fn get(
        &self,
        client_id: &str,
        fiscal_year: i32,
        fiscal_month: u32,
    ) -> WaterResult<Option<WaterReadings>> {
        let path = readings_doc(client_id, fiscal_year, fiscal_month)?;
        match self.store.get(&path).await? {
            Some(doc) => Ok(Some(
                serde_json::from_value(doc.data)
                    .map_err(|err| WaterError::Malformed(err.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    /// Merge a batch of readings into the month's document.
    ///
    /// Incoming unit keys overwrite existing ones; units absent from the
    /// batch keep their previous values. Negative meter values are
    /// rejected here so derivation never sees them.
    pub async fn upsert(
        &self,
        client_id: &str,
        fiscal_year: i32,
        fiscal_month: u32,
        incoming: WaterReadings,
    ) -> WaterResult<WaterReadings> {
        if fiscal_month > 11 {
            return Err(WaterError::Calendar(
                fiscal_core::CalendarError::InvalidFiscalMonth(fiscal_month),
            ));
        }
        if let Some((unit_id, value)) = incoming.readings.iter().find(|(_, v)| **v < 0) {
            return Err(WaterError::Malformed(format!(
                "negative meter reading {value} for unit {unit_id}"
            )));
        }

        let path = readings_doc(client_id, fiscal_year, fiscal_month)?;
        let mut merged = self
            .get(client_id, fiscal_year, fiscal_month)
            .await?
            .unwrap_or_default();
        merged.readings.extend(incoming.readings.clone());
        merged.washes.extend(incoming.washes.clone());
        if incoming.common_area.is_some() {
            merged.common_area = incoming.common_area;
        }
        merged.timestamp = Some(server_timestamp());

        let payload = serde_json::to_value(&merged)
            .map_err(|err| WaterError::Malformed(err.to_string()))?;
        self.store.set(&path, payload).await?;

        tracing::info!(
            client_id = %client_id,
            fiscal_year,
            fiscal_month,
            units = merged.readings.len(),
            "water readings upserted"
        );
        self.audit
            .record_best_effort(
                client_id,
                AuditEntry::new("waterbills", "upsertReadings", path.as_str(), "system")
                    .doc_id(readings_doc_id(fiscal_year, fiscal_month))
                    .metadata(serde_json::json!({ "units": incoming.readings.len() })),
            )
            .await;
        Ok(merged)
    }
}
