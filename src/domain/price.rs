use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Schema version for persisted price records.
pub const PRICE_VERSION: u32 = 2;

/// One hourly price as published by a utility provider, with the fee
/// schedule already folded in.
///
/// `dollars_per_kwh` carries the energy price plus any non-grid fees;
/// `grid_adder_dollars_per_kwh` carries fees that apply only to energy
/// imported from the grid. The split matters to the controller: battery
/// discharge avoids the adder, grid charging pays it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub provider: String,
    pub ts_start: DateTime<Utc>,
    pub ts_end: DateTime<Utc>,
    pub dollars_per_kwh: f64,
    #[serde(default)]
    pub grid_adder_dollars_per_kwh: f64,
    /// Number of sub-hourly samples this hour aggregates, for feeds that
    /// publish more often than hourly. Consumers reject incomplete hours.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_count: Option<u32>,
}

impl Price {
    pub fn hourly(
        provider: impl Into<String>,
        ts_start: DateTime<Utc>,
        dollars_per_kwh: f64,
    ) -> Self {
        Self {
            provider: provider.into(),
            ts_start,
            ts_end: ts_start + chrono::Duration::hours(1),
            dollars_per_kwh,
            grid_adder_dollars_per_kwh: 0.0,
            sample_count: None,
        }
    }

    /// All-in import price: energy plus grid adder.
    pub fn all_in(&self) -> f64 {
        self.dollars_per_kwh + self.grid_adder_dollars_per_kwh
    }

    /// Well-formedness check: a price spans a positive interval.
    pub fn is_valid(&self) -> bool {
        self.ts_end > self.ts_start
    }

    /// Store key for the hour this price covers.
    pub fn hour_key(&self) -> String {
        self.ts_start.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, h, 0, 0).unwrap()
    }

    #[test]
    fn hourly_constructor_spans_one_hour() {
        let p = Price::hourly("comed", t(14), 0.081);
        assert!(p.is_valid());
        assert_eq!(p.ts_end - p.ts_start, chrono::Duration::hours(1));
        assert_eq!(p.hour_key(), "2026-03-10T14:00:00Z");
    }

    #[test]
    fn all_in_includes_grid_adder() {
        let mut p = Price::hourly("miso", t(9), 0.10);
        p.grid_adder_dollars_per_kwh = 0.035;
        assert!((p.all_in() - 0.135).abs() < 1e-12);
    }

    #[test]
    fn round_trip_preserves_all_fields() {
        let p = Price {
            provider: "comed".into(),
            ts_start: t(3),
            ts_end: t(4),
            dollars_per_kwh: -0.012,
            grid_adder_dollars_per_kwh: 0.04,
            sample_count: Some(12),
        };
        let json = serde_json::to_string(&p).unwrap();
        let back: Price = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn inverted_interval_is_invalid() {
        let mut p = Price::hourly("comed", t(5), 0.1);
        p.ts_end = p.ts_start;
        assert!(!p.is_valid());
    }
}
