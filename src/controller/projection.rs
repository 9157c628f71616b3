//! 24-hour energy projection.
//!
//! Walks the battery forward hour by hour under the load/solar model to
//! find the first projected deficit (energy dipping under the SOC floor)
//! and the first projected capacity overflow (solar-only charging topping
//! the battery out), then derives the price landmarks the decision rules
//! compare against.

use chrono::{DateTime, FixedOffset, Timelike, Utc};

use crate::domain::{Price, Settings, SystemStatus};
use crate::util::hour_floor;

use super::model::LoadSolarModel;

/// Hours projected ahead of `now`.
pub const HORIZON_HOURS: usize = 24;

#[derive(Debug, Clone, Default)]
pub struct Projection {
    /// Start of the hour by which stored energy has dipped below the
    /// `min_battery_soc` floor; unset when the battery survives the
    /// horizon.
    pub deficit_at: Option<DateTime<Utc>>,
    /// Start of the hour in which solar-only charging would overflow the
    /// battery; unset when it never fills.
    pub capacity_at: Option<DateTime<Utc>>,
    /// Most expensive future hour (all-in) at or before the deficit, or
    /// over the whole window without one. Earliest wins a tie.
    pub peak_future: Option<Price>,
    /// Most expensive hour over the whole window, deficit or not.
    pub peak_overall: Option<Price>,
    /// Earliest future hour priced (base) below the current hour.
    pub next_lower_at: Option<DateTime<Utc>>,
    /// Projected stored energy at the start of the peak hour, in kWh.
    pub energy_at_peak_kwh: f64,
}

pub fn project(
    now: DateTime<FixedOffset>,
    status: &SystemStatus,
    current_price: &Price,
    future_prices: &[Price],
    model: &LoadSolarModel,
    shaped_solar: &[f64; 24],
    settings: &Settings,
) -> Projection {
    let capacity = status.battery_capacity_kwh;
    let floor = settings.min_battery_soc / 100.0 * capacity;
    let start = hour_floor(now.with_timezone(&Utc));

    let mut energy = status.battery_energy_kwh();
    let mut solar_level = energy;
    let mut deficit_at = None;
    let mut capacity_at = None;
    let mut net_demand = [0.0f64; HORIZON_HOURS];

    for (i, net) in net_demand.iter_mut().enumerate() {
        let hour_start = start + chrono::Duration::hours(i as i64);
        let h = hour_start.with_timezone(now.offset()).hour() as usize;
        let load = model.avg_home_load[h];
        let solar = shaped_solar[h];
        *net = (load - solar).max(0.0);
        let surplus = (solar - load).max(0.0);

        energy = (energy - *net + surplus).clamp(0.0, capacity);
        if deficit_at.is_none() && energy < floor {
            deficit_at = Some(hour_start + chrono::Duration::hours(1));
        }

        solar_level += surplus;
        if capacity_at.is_none() && solar_level > capacity {
            capacity_at = Some(hour_start);
        }
    }

    // Price landmarks. The peak window includes the hour containing the
    // deficit: that is the hour whose import price the site would pay.
    let mut peak: Option<&Price> = None;
    let mut peak_overall: Option<&Price> = None;
    for price in future_prices {
        if peak_overall.map_or(true, |p| price.all_in() > p.all_in()) {
            peak_overall = Some(price);
        }
        if let Some(deficit) = deficit_at {
            if price.ts_start > deficit {
                continue;
            }
        }
        if peak.map_or(true, |p| price.all_in() > p.all_in()) {
            peak = Some(price);
        }
    }

    let next_lower_at = future_prices
        .iter()
        .find(|p| p.dollars_per_kwh < current_price.dollars_per_kwh)
        .map(|p| p.ts_start);

    // Re-walk stored energy up to the peak hour to know the headroom an
    // arbitrage charge would still have once it gets there.
    let mut energy_at_peak = status.battery_energy_kwh();
    if let Some(peak_price) = peak {
        for (i, net) in net_demand.iter().enumerate() {
            let hour_start = start + chrono::Duration::hours(i as i64);
            if hour_start >= peak_price.ts_start {
                break;
            }
            let h = hour_start.with_timezone(now.offset()).hour() as usize;
            let surplus = (shaped_solar[h] - model.avg_home_load[h]).max(0.0);
            energy_at_peak = (energy_at_peak - net + surplus).clamp(0.0, capacity);
        }
    }

    Projection {
        deficit_at,
        capacity_at,
        peak_future: peak.cloned(),
        peak_overall: peak_overall.cloned(),
        next_lower_at,
        energy_at_peak_kwh: energy_at_peak,
    }
}
