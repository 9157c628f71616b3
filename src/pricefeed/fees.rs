//! Fee schedule application.
//!
//! A tariff's raw price gets adjusted by fee periods: time-windowed,
//! hour-of-day-gated amounts that accumulate either into the energy price
//! or into the grid adder. Matching happens on the price's start instant
//! in the period's (or provider's) IANA zone, with exclusive upper bounds
//! throughout.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::domain::{FeePeriod, Price};
use crate::util::local_hour;

#[derive(Debug, Clone)]
pub struct FeeSchedule {
    zone: Tz,
    periods: Vec<FeePeriod>,
}

impl FeeSchedule {
    pub fn new(zone: Tz, periods: Vec<FeePeriod>) -> Self {
        Self { zone, periods }
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    /// Fold every matching period into the price.
    pub fn apply(&self, price: &mut Price) {
        for period in &self.periods {
            if self.matches(period, price.ts_start) {
                if period.grid_additional {
                    price.grid_adder_dollars_per_kwh += period.dollars_per_kwh;
                } else {
                    price.dollars_per_kwh += period.dollars_per_kwh;
                }
            }
        }
    }

    /// Convenience for feed implementations: apply to an owned batch.
    pub fn apply_all(&self, prices: &mut [Price]) {
        for price in prices {
            self.apply(price);
        }
    }

    fn matches(&self, period: &FeePeriod, ts_start: DateTime<Utc>) -> bool {
        if let Some(start) = period.start {
            if ts_start < start {
                return false;
            }
        }
        if let Some(end) = period.end {
            if ts_start >= end {
                return false;
            }
        }
        let zone = period
            .location
            .as_deref()
            .and_then(|name| name.parse::<Tz>().ok())
            .unwrap_or(self.zone);
        let hour = local_hour(ts_start, zone);
        period.hour_start <= hour && hour < period.hour_end
    }
}
