//! Unit directory
//!
//! Units are created at import time and live at `clients/{c}/units/{u}`.
//! The scheduled dues amount configured here seeds each fiscal year's dues
//! record.

use crate::{TenantError, TenantResult};
use doc_store::{CollectionPath, DocPath, SharedStore, Store, StoreError};
use fiscal_core::Centavos;
use serde::{Deserialize, Serialize};

/// One residential unit of a client association
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    #[serde(default)]
    pub unit_id: String,
    #[serde(default)]
    pub unit_number: String,
    #[serde(default)]
    pub owners: Vec<String>,
    #[serde(default)]
    pub managers: Vec<String>,
    /// Monthly HOA dues amount, in centavos
    #[serde(default)]
    pub scheduled_dues_amount: Centavos,
}

pub fn unit_doc(client_id: &str, unit_id: &str) -> Result<DocPath, StoreError> {
    DocPath::parse(format!("clients/{client_id}/units/{unit_id}"))
}

pub fn units_collection(client_id: &str) -> Result<CollectionPath, StoreError> {
    CollectionPath::parse(format!("clients/{client_id}/units"))
}

/// Reads the unit directory of one client
#[derive(Clone)]
pub struct UnitsDirectory {
    store: SharedStore,
}

impl UnitsDirectory {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn get(&self, client_id: &str, unit_id: &str) -> TenantResult<Unit> {
        let path = unit_doc(client_id, unit_id)?;
        let doc = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| TenantError::NotFound(format!("{client_id}/units/{unit_id}")))?;
        let mut unit: Unit = serde_json::from_value(doc.data).map_err(|err| {
            TenantError::Config {
                client_id: client_id.to_string(),
                reason: format!("unit {unit_id} malformed: {err}"),
            }
        })?;
        unit.unit_id = unit_id.to_string();
        Ok(unit)
    }

    /// All units of a client, ordered by unit id
    pub async fn list(&self, client_id: &str) -> TenantResult<Vec<Unit>> {
        let collection = units_collection(client_id)?;
        let mut units = Vec::new();
        for path in self.store.list_docs(&collection).await? {
            if let Some(doc) = self.store.get(&path).await? {
                let mut unit: Unit =
                    serde_json::from_value(doc.data).map_err(|err| TenantError::Config {
                        client_id: client_id.to_string(),
                        reason: format!("unit {} malformed: {err}", path.id()),
                    })?;
                unit.unit_id = path.id().to_string();
                units.push(unit);
            }
        }
        Ok(units)
    }
}
