use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Schema version for persisted hourly energy records.
pub const ENERGY_STATS_VERSION: u32 = 4;

/// One hour of metered energy flow at a site.
///
/// Gross totals (`solar_kwh`, `home_kwh`, battery charged/used, grid
/// import/export) are metered; the `*_to_*` sub-flows are attributed
/// splits and must never sum past their gross source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyStats {
    pub ts_hour_start: DateTime<Utc>,
    pub min_battery_soc: f64,
    pub max_battery_soc: f64,
    pub battery_charged_kwh: f64,
    pub battery_used_kwh: f64,
    pub solar_kwh: f64,
    pub home_kwh: f64,
    pub grid_import_kwh: f64,
    pub grid_export_kwh: f64,
    pub solar_to_home_kwh: f64,
    pub solar_to_battery_kwh: f64,
    pub solar_to_grid_kwh: f64,
    pub battery_to_home_kwh: f64,
    pub battery_to_grid_kwh: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alarms: Vec<String>,
}

impl EnergyStats {
    /// Store key for the hour this record covers.
    pub fn hour_key(&self) -> String {
        self.ts_hour_start.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Flow-conservation check: sub-flows within gross totals, nothing
    /// negative. Slack of 1 Wh absorbs meter rounding.
    pub fn flows_consistent(&self) -> bool {
        const SLACK: f64 = 0.001;
        let non_negative = [
            self.battery_charged_kwh,
            self.battery_used_kwh,
            self.solar_kwh,
            self.home_kwh,
            self.grid_import_kwh,
            self.grid_export_kwh,
            self.solar_to_home_kwh,
            self.solar_to_battery_kwh,
            self.solar_to_grid_kwh,
            self.battery_to_home_kwh,
            self.battery_to_grid_kwh,
        ]
        .iter()
        .all(|v| *v >= -SLACK);

        let solar_split =
            self.solar_to_home_kwh + self.solar_to_battery_kwh + self.solar_to_grid_kwh;
        let battery_split = self.battery_to_home_kwh + self.battery_to_grid_kwh;

        non_negative
            && solar_split <= self.solar_kwh + SLACK
            && battery_split <= self.battery_used_kwh + SLACK
    }
}
