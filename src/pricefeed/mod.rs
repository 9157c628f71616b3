//! Utility price feeds.
//!
//! A `PriceSource` is one per provider, owns the process-local caches,
//! and returns raw tariff prices. A `SiteFeed` is the per-site view on
//! top: it applies the fee schedule (the provider default, or the site's
//! override) so returned prices carry the energy/grid-adder split the
//! controller reasons over. Provider dispatch is a static table keyed by
//! the `utility_provider` settings string.

pub mod cache;
pub mod dayahead;
pub mod fees;
pub mod fixed;
pub mod realtime;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use crate::domain::{FeePeriod, Price, Settings};

use fees::FeeSchedule;

/// HTTP timeout for price providers.
pub const PRICE_HTTP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum PriceFeedError {
    /// The provider has not published the current clock hour.
    #[error("no current price for {provider} at {hour}")]
    NoCurrentPrice {
        provider: String,
        hour: DateTime<Utc>,
    },
    #[error("unknown utility provider: {0}")]
    UnknownProvider(String),
    #[error("price fetch failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed price payload: {0}")]
    Malformed(String),
}

/// One utility provider's raw price surface.
///
/// Implementations own their caches and never apply site fee overrides;
/// `now` is passed in so the sweeper's tick time governs what "current"
/// means.
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn provider(&self) -> &str;
    /// Billing zone for clock-hour arithmetic.
    fn zone(&self) -> Tz;
    /// The tariff's default fee schedule.
    fn default_fees(&self) -> &[FeePeriod];

    /// Price for the clock hour containing `now` in the billing zone.
    async fn current(&self, now: DateTime<Utc>) -> Result<Price, PriceFeedError>;
    /// Published hourly prices strictly after the current clock hour,
    /// ascending by `ts_start`. May be empty.
    async fn future(&self, now: DateTime<Utc>) -> Result<Vec<Price>, PriceFeedError>;
    /// Hourly prices wholly inside `[start, end)` and wholly before
    /// `now`, with completeness checks applied.
    async fn confirmed(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Price>, PriceFeedError>;
}

/// Per-site fee-applying view over a shared `PriceSource`.
pub struct SiteFeed {
    source: Arc<dyn PriceSource>,
    fees: FeeSchedule,
}

impl SiteFeed {
    pub fn new(source: Arc<dyn PriceSource>) -> Self {
        let fees = FeeSchedule::new(source.zone(), source.default_fees().to_vec());
        Self { source, fees }
    }

    /// Install the site's fee schedule: the settings override when
    /// present, the provider default otherwise.
    pub fn apply_settings(&mut self, settings: &Settings) {
        if !settings.additional_fees_periods.is_empty() {
            self.fees = FeeSchedule::new(
                self.source.zone(),
                settings.additional_fees_periods.clone(),
            );
        }
    }

    pub fn provider(&self) -> &str {
        self.source.provider()
    }

    pub fn source(&self) -> &Arc<dyn PriceSource> {
        &self.source
    }

    /// Apply this site's fees to a raw price (used when the raw price
    /// came out of the sweep's per-tick cache).
    pub fn with_fees(&self, raw: &Price) -> Price {
        let mut price = raw.clone();
        self.fees.apply(&mut price);
        price
    }

    pub async fn current(&self, now: DateTime<Utc>) -> Result<Price, PriceFeedError> {
        let mut price = self.source.current(now).await?;
        self.fees.apply(&mut price);
        Ok(price)
    }

    pub async fn future(&self, now: DateTime<Utc>) -> Result<Vec<Price>, PriceFeedError> {
        let mut prices = self.source.future(now).await?;
        self.fees.apply_all(&mut prices);
        Ok(prices)
    }

    pub async fn confirmed(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Price>, PriceFeedError> {
        let mut prices = self.source.confirmed(start, end, now).await?;
        self.fees.apply_all(&mut prices);
        Ok(prices)
    }
}

/// Static provider dispatch table.
pub struct FeedRegistry {
    sources: HashMap<String, Arc<dyn PriceSource>>,
}

impl FeedRegistry {
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
        }
    }

    /// The built-in provider table. Tariff specifics live behind the
    /// generic day-ahead and real-time feeds.
    pub fn with_defaults() -> Result<Self, PriceFeedError> {
        let mut registry = Self::new();
        registry.register(Arc::new(realtime::RealtimeFeed::new(
            "comed",
            chrono_tz::America::Chicago,
            "https://hourlypricing.comed.com/api",
            vec![FeePeriod {
                start: None,
                end: None,
                hour_start: 0,
                hour_end: 24,
                dollars_per_kwh: 0.047,
                grid_additional: true,
                location: None,
            }],
        )?));
        registry.register(Arc::new(dayahead::DayAheadFeed::new(
            "miso",
            chrono_tz::America::New_York,
            "https://api.misoenergy.org/day-ahead",
            Vec::new(),
        )?));
        Ok(registry)
    }

    pub fn register(&mut self, source: Arc<dyn PriceSource>) {
        self.sources
            .insert(source.provider().to_owned(), source);
    }

    pub fn source(&self, provider: &str) -> Result<Arc<dyn PriceSource>, PriceFeedError> {
        self.sources
            .get(provider)
            .cloned()
            .ok_or_else(|| PriceFeedError::UnknownProvider(provider.to_owned()))
    }

    /// Build the per-site view for a provider.
    pub fn site_feed(&self, provider: &str) -> Result<SiteFeed, PriceFeedError> {
        Ok(SiteFeed::new(self.source(provider)?))
    }
}

impl Default for FeedRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::America::Chicago;

    #[test]
    fn unknown_provider_is_an_error() {
        let registry = FeedRegistry::new();
        assert!(matches!(
            registry.site_feed("pg&e"),
            Err(PriceFeedError::UnknownProvider(_))
        ));
    }

    #[tokio::test]
    async fn site_feed_applies_settings_override() {
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 20, 30, 0).unwrap();
        let base = Utc.with_ymd_and_hms(2026, 1, 15, 20, 0, 0).unwrap();
        let source = Arc::new(fixed::FixedFeed::new(
            "fixed",
            Chicago,
            vec![Price::hourly("fixed", base, 0.10)],
        ));

        let mut registry = FeedRegistry::new();
        registry.register(source);
        let mut feed = registry.site_feed("fixed").unwrap();

        let settings = Settings {
            additional_fees_periods: vec![FeePeriod {
                start: None,
                end: None,
                hour_start: 0,
                hour_end: 24,
                dollars_per_kwh: 0.03,
                grid_additional: true,
                location: None,
            }],
            ..Settings::default()
        };
        feed.apply_settings(&settings);

        let price = feed.current(now).await.unwrap();
        assert!((price.dollars_per_kwh - 0.10).abs() < 1e-12);
        assert!((price.grid_adder_dollars_per_kwh - 0.03).abs() < 1e-12);
    }
}
