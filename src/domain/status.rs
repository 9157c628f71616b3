use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Live snapshot read from the ESS.
///
/// `timestamp` is in the device's local zone and is what the controller
/// treats as "now". Power sign conventions: `battery_kw` positive on
/// discharge, negative on charge; `grid_kw` positive on import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub timestamp: DateTime<FixedOffset>,
    pub battery_soc: f64,
    pub battery_kw: f64,
    pub battery_capacity_kwh: f64,
    pub max_battery_charge_kw: f64,
    pub max_battery_discharge_kw: f64,
    pub solar_kw: f64,
    pub grid_kw: f64,
    pub home_kw: f64,
    pub can_export_solar: bool,
    pub can_export_battery: bool,
    pub can_import_battery: bool,
    /// Device is holding an elevated minimum SOC (forced-charge state).
    pub elevated_min_battery_soc: bool,
    pub battery_above_min_soc: bool,
    pub emergency_mode: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alarms: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub storms: Vec<String>,
}

/// Dead band below which the battery counts as idle, in kW. Inverters
/// report a few watts of float even at rest.
pub const IDLE_BAND_KW: f64 = 0.05;

impl SystemStatus {
    pub fn battery_present(&self) -> bool {
        self.battery_capacity_kwh > 0.0
    }

    pub fn battery_charging(&self) -> bool {
        self.battery_kw < -IDLE_BAND_KW
    }

    pub fn battery_discharging(&self) -> bool {
        self.battery_kw > IDLE_BAND_KW
    }

    pub fn has_alarms(&self) -> bool {
        !self.alarms.is_empty()
    }

    pub fn has_storms(&self) -> bool {
        !self.storms.is_empty()
    }

    /// Stored battery energy right now, in kWh.
    pub fn battery_energy_kwh(&self) -> f64 {
        self.battery_soc / 100.0 * self.battery_capacity_kwh
    }
}
