use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current schema version for persisted site settings.
///
/// Read-path code migrates older versions in memory and writes back only
/// when something actually changed. Unknown (newer) versions are left
/// untouched.
pub const SETTINGS_VERSION: u32 = 3;

/// A fee window that adjusts the raw tariff price to an all-in price.
///
/// `end` and `hour_end` are exclusive. `location` overrides the
/// provider's billing zone for local-hour matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeePeriod {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    pub hour_start: u32,
    pub hour_end: u32,
    pub dollars_per_kwh: f64,
    #[serde(default)]
    pub grid_additional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Per-site operating options. Zero-value settings are the sentinel for a
/// site that has never been configured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Compute and record decisions but never command the ESS.
    pub dry_run: bool,
    /// Backfill proceeds, the decision is skipped entirely.
    pub pause: bool,
    /// Hard SOC floor in percent; dropping below it forces a charge.
    pub min_battery_soc: f64,
    /// Charge from grid unconditionally below this price.
    pub always_charge_under_dollars_per_kwh: f64,
    /// Minimum (peak future − now) spread to charge for later use/export.
    pub min_arbitrage_difference_dollars_per_kwh: f64,
    /// Minimum (peak future − now) spread to charge against a predicted
    /// deficit.
    pub min_deficit_price_difference_dollars_per_kwh: f64,
    /// Outlier filter multiplier for the load model; 0 disables.
    pub ignore_hour_usage_over_multiple: f64,
    /// Cap on the same-day solar trend ratio; 1 disables trend shaping.
    pub solar_trend_ratio_max: f64,
    /// Weight of the bell-curve smoothing applied to the solar trend.
    pub solar_bell_curve_multiplier: f64,
    pub grid_charge_batteries: bool,
    pub grid_export_solar: bool,
    pub grid_export_batteries: bool,
    pub utility_provider: String,
    pub utility_rate: String,
    pub utility_rate_options: String,
    /// Overrides the tariff's default fee schedule when non-empty.
    pub additional_fees_periods: Vec<FeePeriod>,
    /// Opaque to the core; decrypted by the credential collaborator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_credentials: Option<String>,
}

/// Settings together with the schema version they were persisted under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedSettings {
    pub version: u32,
    pub settings: Settings,
}

impl VersionedSettings {
    pub fn current(settings: Settings) -> Self {
        Self {
            version: SETTINGS_VERSION,
            settings,
        }
    }

    /// Migrate older settings in memory. Returns true when anything
    /// changed, which is the caller's cue to persist.
    pub fn migrate(&mut self) -> bool {
        if self.version >= SETTINGS_VERSION {
            return false;
        }
        let s = &mut self.settings;
        s.min_battery_soc = s.min_battery_soc.clamp(0.0, 100.0);
        if s.ignore_hour_usage_over_multiple < 0.0 {
            s.ignore_hour_usage_over_multiple = 0.0;
        }
        if s.solar_trend_ratio_max < 1.0 {
            s.solar_trend_ratio_max = 1.0;
        }
        if s.solar_bell_curve_multiplier < 0.0 {
            s.solar_bell_curve_multiplier = 0.0;
        }
        self.version = SETTINGS_VERSION;
        true
    }
}
