//! Generic day-ahead hourly feed.
//!
//! Day-ahead tariffs publish a full calendar day of hourly prices at a
//! time, typically through end-of-tomorrow after the daily auction. The
//! feed fetches one local date per request and caches the batch for the
//! life of the process.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::domain::{FeePeriod, Price};
use crate::util::{hour_floor, local_date};

use super::cache::DayCache;
use super::{PriceFeedError, PriceSource, PRICE_HTTP_TIMEOUT};

pub struct DayAheadFeed {
    provider: String,
    zone: Tz,
    base_url: String,
    client: reqwest::Client,
    fees: Vec<FeePeriod>,
    days: DayCache<Vec<Price>>,
}

#[derive(Debug, Deserialize)]
struct RawHour {
    ts_start: DateTime<Utc>,
    ts_end: DateTime<Utc>,
    dollars_per_kwh: f64,
}

impl DayAheadFeed {
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
            days: DayCache::new(),
        })
    }

    async fn day(&self, date: NaiveDate) -> Result<Arc<Vec<Price>>, PriceFeedError> {
        if let Some(batch) = self.days.get(date) {
            return Ok(batch);
        }
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), date);
        debug!(provider = %self.provider, %url, "fetching day-ahead batch");
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(PriceFeedError::Malformed(format!(
                "{}: HTTP {}",
                url,
                resp.status()
            )));
        }
        let raw: Vec<RawHour> = resp.json().await?;
        let mut batch: Vec<Price> = raw
            .into_iter()
            .map(|r| Price {
                provider: self.provider.clone(),
                ts_start: r.ts_start,
                ts_end: r.ts_end,
                dollars_per_kwh: r.dollars_per_kwh,
                grid_adder_dollars_per_kwh: 0.0,
                sample_count: None,
            })
            .filter(Price::is_valid)
            .collect();
        batch.sort_by_key(|p| p.ts_start);
        Ok(self.days.put(date, batch))
    }
}

#[async_trait]
impl PriceSource for DayAheadFeed {
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
        let batch = self.day(local_date(now, self.zone)).await?;
        batch
            .iter()
            .find(|p| p.ts_start <= now && now < p.ts_end)
            .cloned()
            .ok_or_else(|| PriceFeedError::NoCurrentPrice {
                provider: self.provider.clone(),
                hour: hour_floor(now),
            })
    }

    async fn future(&self, now: DateTime<Utc>) -> Result<Vec<Price>, PriceFeedError> {
        let today = local_date(now, self.zone);
        let mut out: Vec<Price> = self.day(today).await?.as_ref().clone();
        // Tomorrow's auction may not have cleared yet; missing is normal.
        match self.day(today + chrono::Duration::days(1)).await {
            Ok(batch) => out.extend(batch.iter().cloned()),
            Err(e) => debug!(provider = %self.provider, error = %e, "no day-ahead batch for tomorrow"),
        }
        let cutoff = hour_floor(now);
        out.retain(|p| p.ts_start > cutoff);
        out.sort_by_key(|p| p.ts_start);
        Ok(out)
    }

    async fn confirmed(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Price>, PriceFeedError> {
        let mut out = Vec::new();
        let mut date = local_date(start, self.zone);
        let last = local_date(end, self.zone);
        while date <= last {
            let batch = self.day(date).await?;
            out.extend(
                batch
                    .iter()
                    .filter(|p| p.ts_start >= start && p.ts_end <= end && p.ts_end <= now)
                    .cloned(),
            );
            date += chrono::Duration::days(1);
        }
        out.sort_by_key(|p| p.ts_start);
        out.dedup_by_key(|p| p.ts_start);
        Ok(out)
    }
}
