//! Fixed in-memory price source for single-site development and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::RwLock;

use crate::domain::{FeePeriod, Price};
use crate::util::hour_floor;

use super::{PriceFeedError, PriceSource};

pub struct FixedFeed {
    provider: String,
    zone: Tz,
    fees: Vec<FeePeriod>,
    prices: RwLock<Vec<Price>>,
}

impl FixedFeed {
    pub fn new(provider: impl Into<String>, zone: Tz, prices: Vec<Price>) -> Self {
        let mut prices = prices;
        prices.sort_by_key(|p| p.ts_start);
        Self {
            provider: provider.into(),
            zone,
            fees: Vec::new(),
            prices: RwLock::new(prices),
        }
    }

    pub fn with_fees(mut self, fees: Vec<FeePeriod>) -> Self {
        self.fees = fees;
        self
    }

    pub fn set_prices(&self, prices: Vec<Price>) {
        let mut sorted = prices;
        sorted.sort_by_key(|p| p.ts_start);
        *self.prices.write() = sorted;
    }
}

#[async_trait]
impl PriceSource for FixedFeed {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn zone(&self) -> Tz {
        self.zone
    }

    fn default_fees(&self) -> &[FeePeriod] {
        &self.fees
    }

    async fn current(&self, now: DateTime<Utc>) -> Result<Price, PriceFeedError> {
        self.prices
            .read()
            .iter()
            .find(|p| p.ts_start <= now && now < p.ts_end)
            .cloned()
            .ok_or_else(|| PriceFeedError::NoCurrentPrice {
                provider: self.provider.clone(),
                hour: hour_floor(now),
            })
    }

    async fn future(&self, now: DateTime<Utc>) -> Result<Vec<Price>, PriceFeedError> {
        let cutoff = hour_floor(now);
        Ok(self
            .prices
            .read()
            .iter()
            .filter(|p| p.ts_start > cutoff)
            .cloned()
            .collect())
    }

    async fn confirmed(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Price>, PriceFeedError> {
        Ok(self
            .prices
            .read()
            .iter()
            .filter(|p| p.ts_start >= start && p.ts_end <= end && p.ts_end <= now)
            .cloned()
            .collect())
    }
}
