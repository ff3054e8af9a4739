//! Water billing configuration
//!
//! One document per client at
//! `clients/{c}/projects/waterBills/config/current`, snapshotted into every
//! generated bill so historical bills keep the rates they were computed
//! with. Penalty fields are mandatory: a client without them cannot run
//! penalty recalculation, and that is a configuration error, not a zero.

use crate::{WaterError, WaterResult};
use doc_store::{DocPath, SharedStore, Store, StoreError};
use fiscal_core::Centavos;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-client water billing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaterConfig {
    /// Centavos per cubic meter
    pub rate_per_m3: Centavos,
    /// Floor for a quarter's charge, applied after consumption pricing
    #[serde(default)]
    pub minimum_charge: Centavos,
    /// Monthly penalty rate on the unpaid balance (e.g. 0.05)
    pub penalty_rate: Decimal,
    /// Grace days past the due date before penalties accrue
    pub penalty_days: i64,
    /// Compound monthly (true) or simple linear (false)
    #[serde(default = "default_compound")]
    pub compound_penalty: bool,
    #[serde(default)]
    pub car_wash_rate: Centavos,
    #[serde(default)]
    pub boat_wash_rate: Centavos,
    /// Civil day-of-month bills fall due in the quarter's first month
    #[serde(default = "default_due_day")]
    pub due_day: u32,
}

fn default_compound() -> bool {
    true
}

fn default_due_day() -> u32 {
    10
}

pub fn water_config_doc(client_id: &str) -> Result<DocPath, StoreError> {
    DocPath::parse(format!(
        "clients/{client_id}/projects/waterBills/config/current"
    ))
}

impl WaterConfig {
    fn validate(self, client_id: &str) -> WaterResult<Self> {
        if self.penalty_rate <= Decimal::ZERO || self.penalty_rate >= Decimal::ONE {
            return Err(WaterError::Config {
                client_id: client_id.to_string(),
                reason: format!("penaltyRate must be in (0, 1), got {}", self.penalty_rate),
            });
        }
        if self.penalty_days < 0 {
            return Err(WaterError::Config {
                client_id: client_id.to_string(),
                reason: format!("penaltyDays must be >= 0, got {}", self.penalty_days),
            });
        }
        if self.rate_per_m3.is_negative() || self.minimum_charge.is_negative() {
            return Err(WaterError::Config {
                client_id: client_id.to_string(),
                reason: "rates must be non-negative".to_string(),
            });
        }
        if !(1..=28).contains(&self.due_day) {
            return Err(WaterError::Config {
                client_id: client_id.to_string(),
                reason: format!("dueDay must be 1..=28, got {}", self.due_day),
            });
        }
        Ok(self)
    }

    /// Load and validate a client's water configuration
    pub async fn load(store: &SharedStore, client_id: &str) -> WaterResult<Self> {
        let path = water_config_doc(client_id)?;
        let doc = store.get(&path).await?.ok_or_else(|| WaterError::Config {
            client_id: client_id.to_string(),
            reason: "water config document missing".to_string(),
        })?;
        let config: WaterConfig =
            serde_json::from_value(doc.data).map_err(|err| WaterError::Config {
                client_id: client_id.to_string(),
                reason: err.to_string(),
            })?;
        config.validate(client_id)
    }
}
