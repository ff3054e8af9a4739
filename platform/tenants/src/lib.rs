//! # Tenants
//!
//! Loading and validating per-client association configuration.
//!
//! Every client association ("tenant") defines its fiscal-year convention,
//! display currency, dues billing frequency, and penalty grace days. The
//! rest of the system refuses to guess: a client without a fiscal-year
//! start month is a configuration error, not a default.

pub mod units;

pub use units::{Unit, UnitsDirectory};

use chrono::FixedOffset;
use doc_store::{DocPath, SharedStore, Store, StoreError};
use fiscal_core::calendar;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading client configuration
#[derive(Debug, Error)]
pub enum TenantError {
    #[error("client not found: {0}")]
    NotFound(String),

    #[error("client {client_id} configuration invalid: {reason}")]
    Config { client_id: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type TenantResult<T> = Result<T, TenantError>;

/// HOA dues billing cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DuesFrequency {
    Monthly,
    Quarterly,
}

/// Validated configuration of one client association
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    pub client_id: String,
    #[serde(default)]
    pub display_name: String,
    pub fiscal_year_start_month: u32,
    pub display_currency: String,
    pub dues_frequency: DuesFrequency,
    /// Days past a due date before penalties start accruing
    #[serde(default = "default_grace_days")]
    pub dues_grace_days: u32,
    /// Fixed tenant-level UTC offset, whole hours (reference: −5)
    #[serde(default = "default_offset_hours")]
    pub timezone_offset_hours: i32,
}

fn default_grace_days() -> u32 {
    10
}

fn default_offset_hours() -> i32 {
    -5
}

impl ClientConfig {
    /// The tenant's fixed civil-time offset
    pub fn timezone(&self) -> FixedOffset {
        calendar::offset_from_hours(self.timezone_offset_hours)
            .unwrap_or_else(|_| calendar::default_offset())
    }

    fn validate(self) -> TenantResult<Self> {
        if !(1..=12).contains(&self.fiscal_year_start_month) {
            return Err(TenantError::Config {
                client_id: self.client_id.clone(),
                reason: format!(
                    "fiscalYearStartMonth must be 1..=12, got {}",
                    self.fiscal_year_start_month
                ),
            });
        }
        if self.display_currency.len() != 3 {
            return Err(TenantError::Config {
                client_id: self.client_id.clone(),
                reason: format!("displayCurrency must be a 3-letter code, got '{}'", self.display_currency),
            });
        }
        Ok(self)
    }
}

/// Path of the client root document
pub fn client_doc(client_id: &str) -> Result<DocPath, StoreError> {
    DocPath::parse(format!("clients/{client_id}"))
}

/// Registry of client associations, read through the store port
pub struct TenantRegistry {
    store: SharedStore,
}

impl TenantRegistry {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Load and validate one client's configuration.
    ///
    /// The configuration block lives on the client root document; a missing
    /// document is `NotFound`, a missing or invalid block is `Config`.
    pub async fn load(&self, client_id: &str) -> TenantResult<ClientConfig> {
        let path = client_doc(client_id)?;
        let doc = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| TenantError::NotFound(client_id.to_string()))?;

        let block = doc.data.get("configuration").cloned().ok_or_else(|| {
            TenantError::Config {
                client_id: client_id.to_string(),
                reason: "configuration block missing".to_string(),
            }
        })?;

        let mut raw = block;
        if let Some(map) = raw.as_object_mut() {
            map.insert("clientId".to_string(), serde_json::json!(client_id));
            if !map.contains_key("displayName") {
                if let Some(name) = doc.data.get("displayName") {
                    map.insert("displayName".to_string(), name.clone());
                }
            }
        }
        let config: ClientConfig =
            serde_json::from_value(raw).map_err(|err| TenantError::Config {
                client_id: client_id.to_string(),
                reason: err.to_string(),
            })?;
        config.validate()
    }

    /// Whether the client root document exists
    pub async fn exists(&self, client_id: &str) -> TenantResult<bool> {
        let path = client_doc(client_id)?;
        Ok(self.store.get(&path).await?.is_some())
    }
}
