//! Exchange-rate provider port
//!
//! The core stores a single display currency per client and fetches rates
//! for reference only. Fetching, business-day handling, and gap-fill all
//! belong to the provider implementation behind this port; the core has no
//! opinions about any of it.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RateError {
    #[error("no rate available for {base}/{quote} on {date}")]
    Unavailable {
        base: String,
        quote: String,
        date: NaiveDate,
    },

    #[error("rate provider failure: {0}")]
    Provider(String),
}

/// Narrow port to an external exchange-rate source
#[async_trait]
pub trait ExchangeRateProvider: Send + Sync {
    /// Units of `quote` per one unit of `base` on the given civil date
    async fn rate(&self, base: &str, quote: &str, date: NaiveDate) -> Result<Decimal, RateError>;
}

/// Table-backed provider for tests and offline runs
#[derive(Default)]
pub struct FixedRateProvider {
    rates: HashMap<(String, String), Decimal>,
}

impl FixedRateProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(mut self, base: &str, quote: &str, rate: Decimal) -> Self {
        self.rates.insert((base.to_string(), quote.to_string()), rate);
        self
    }
}

#[async_trait]
impl ExchangeRateProvider for FixedRateProvider {
    async fn rate(&self, base: &str, quote: &str, date: NaiveDate) -> Result<Decimal, RateError> {
        self.rates
            .get(&(base.to_string(), quote.to_string()))
            .copied()
            .ok_or_else(|| RateError::Unavailable {
                base: base.to_string(),
                quote: quote.to_string(),
                date,
            })
    }
}
