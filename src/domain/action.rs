use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::modes::{ActionReason, BatteryMode, SolarMode};
use super::price::Price;
use super::status::SystemStatus;

fn is_false(b: &bool) -> bool {
    !*b
}

/// The justified outcome of one decision tick for one site.
///
/// `target_*` is what the controller wanted; `effective_*` is what the
/// pipeline actually issues (`NoChange` when the device is already
/// there). `system_status` is absent only when the status read itself
/// failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub timestamp: DateTime<Utc>,
    pub target_battery_mode: BatteryMode,
    pub target_solar_mode: SolarMode,
    pub effective_battery_mode: BatteryMode,
    pub effective_solar_mode: SolarMode,
    pub reason: ActionReason,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_price: Option<Price>,
    /// Peak future all-in price the decision was weighed against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub future_price: Option<Price>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_status: Option<SystemStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deficit_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub fault: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub failed: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Action {
    /// A no-op action skeleton; the controller and pipeline fill in the
    /// fields they own.
    pub fn new(timestamp: DateTime<Utc>, reason: ActionReason) -> Self {
        Self {
            timestamp,
            target_battery_mode: BatteryMode::NoChange,
            target_solar_mode: SolarMode::NoChange,
            effective_battery_mode: BatteryMode::NoChange,
            effective_solar_mode: SolarMode::NoChange,
            reason,
            description: String::new(),
            current_price: None,
            future_price: None,
            system_status: None,
            deficit_at: None,
            capacity_at: None,
            dry_run: false,
            fault: false,
            failed: false,
            paused: false,
            error: None,
        }
    }

    /// Lexicographically ordered store key: RFC3339 UTC at nanosecond
    /// resolution so per-site action streams sort in tick order.
    pub fn key(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }
}
