//! Generic real-time 5-minute feed.
//!
//! Real-time tariffs publish a price every five minutes. The hourly view
//! the rest of the system wants is the mean of the hour's samples: a
//! confirmed hour needs all 12, while the current hour averages whatever
//! has arrived so far and carries its sample count.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::debug;

use crate::domain::{FeePeriod, Price};
use crate::util::{five_min_floor, hour_floor, local_date};

use super::cache::BucketCache;
use super::{PriceFeedError, PriceSource, PRICE_HTTP_TIMEOUT};

/// A complete hour of a 5-minute feed.
pub const SAMPLES_PER_HOUR: usize = 12;

pub struct RealtimeFeed {
    provider: String,
    zone: Tz,
    base_url: String,
    client: reqwest::Client,
    fees: Vec<FeePeriod>,
    cache: BucketCache,
}

#[derive(Debug, Deserialize)]
struct RawSample {
    ts: DateTime<Utc>,
    dollars_per_kwh: f64,
}

impl RealtimeFeed {
    pub fn new(
        provider: impl Into<String>,
        zone: Tz,
        base_url: impl Into<String>,
        fees: Vec<FeePeriod>,
    ) -> Result<Self, PriceFeedError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("esspilot/0.3"));
        let client = reqwest::Client::builder()
            .timeout(PRICE_HTTP_TIMEOUT)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            provider: provider.into(),
            zone,
            base_url: base_url.into(),
            client,
            fees,
            cache: BucketCache::new(),
        })
    }

    async fn ensure_date(&self, date: NaiveDate, now: DateTime<Utc>) -> Result<(), PriceFeedError> {
        let today = local_date(now, self.zone);
        let current_bucket = (date == today).then(|| five_min_floor(now));
        if !self.cache.needs_fetch(date, current_bucket) {
            return Ok(());
        }
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), date);
        debug!(provider = %self.provider, %url, "fetching five-minute samples");
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(PriceFeedError::Malformed(format!(
                "{}: HTTP {}",
                url,
                resp.status()
            )));
        }
        let raw: Vec<RawSample> = resp.json().await?;
        let samples = raw
            .into_iter()
            .map(|s| (five_min_floor(s.ts), s.dollars_per_kwh));
        self.cache.insert_samples(date, samples, date < today);
        Ok(())
    }

    fn mean_price(&self, hour: DateTime<Utc>, samples: &[(DateTime<Utc>, f64)]) -> Price {
        let sum: f64 = samples.iter().map(|(_, v)| v).sum();
        Price {
            provider: self.provider.clone(),
            ts_start: hour,
            ts_end: hour + chrono::Duration::hours(1),
            dollars_per_kwh: sum / samples.len() as f64,
            grid_adder_dollars_per_kwh: 0.0,
            sample_count: Some(samples.len() as u32),
        }
    }
}

#[async_trait]
impl PriceSource for RealtimeFeed {
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
        self.ensure_date(local_date(now, self.zone), now).await?;
        let hour = hour_floor(now);
        let samples = self
            .cache
            .samples_in(hour, five_min_floor(now) + chrono::Duration::minutes(5));
        if samples.is_empty() {
            return Err(PriceFeedError::NoCurrentPrice {
                provider: self.provider.clone(),
                hour,
            });
        }
        Ok(self.mean_price(hour, &samples))
    }

    /// Real-time tariffs publish nothing ahead of the clock.
    async fn future(&self, _now: DateTime<Utc>) -> Result<Vec<Price>, PriceFeedError> {
        Ok(Vec::new())
    }

    async fn confirmed(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Price>, PriceFeedError> {
        let end = end.min(hour_floor(now));
        let mut date = local_date(start, self.zone);
        let last = local_date(end, self.zone);
        while date <= last {
            self.ensure_date(date, now).await?;
            date += chrono::Duration::days(1);
        }

        let mut out = Vec::new();
        let mut hour = hour_floor(start);
        if hour < start {
            hour += chrono::Duration::hours(1);
        }
        while hour + chrono::Duration::hours(1) <= end {
            let samples = self
                .cache
                .samples_in(hour, hour + chrono::Duration::hours(1));
            if samples.len() >= SAMPLES_PER_HOUR {
                out.push(self.mean_price(hour, &samples));
            }
            hour += chrono::Duration::hours(1);
        }
        Ok(out)
    }
}
