//! The decision controller.
//!
//! `decide` is a pure function from observed state to one justified
//! `Action`. It never does I/O and never reads a clock: "now" is the
//! device timestamp handed in by the pipeline. Phases run in order and
//! the first definite decision wins: safety gates, then the load/solar
//! model, then the 24-hour projection, then the price rules, then
//! finalization against the device's current state.

pub mod model;
pub mod projection;

use chrono::{DateTime, FixedOffset, Utc};

use crate::domain::{
    Action, ActionReason, BatteryMode, EnergyStats, Price, Settings, SolarMode, SystemStatus,
};

use model::{build_model, shaped_solar};
use projection::{project, Projection};

struct Intent {
    battery: BatteryMode,
    solar: SolarMode,
    /// Forced solar modes skip the already-there optimization.
    solar_forced: bool,
    reason: ActionReason,
    description: String,
    fault: bool,
}

impl Intent {
    fn new(battery: BatteryMode, reason: ActionReason, description: String) -> Self {
        Self {
            battery,
            solar: SolarMode::NoChange,
            solar_forced: false,
            reason,
            description,
            fault: false,
        }
    }

    fn solar(mut self, solar: SolarMode, forced: bool) -> Self {
        self.solar = solar;
        self.solar_forced = forced;
        self
    }

    fn fault(mut self) -> Self {
        self.fault = true;
        self
    }
}

pub fn decide(
    now: DateTime<FixedOffset>,
    status: &SystemStatus,
    current_price: &Price,
    future_prices: &[Price],
    history: &[EnergyStats],
    settings: &Settings,
) -> Action {
    let ts = now.with_timezone(&Utc);
    let negative_price = current_price.dollars_per_kwh < 0.0;

    // Phase A: safety gates.
    if !status.battery_present() {
        let mut action = Action::new(ts, ActionReason::MissingBattery);
        action.target_battery_mode = BatteryMode::Standby;
        action.effective_battery_mode = BatteryMode::Standby;
        if negative_price {
            action.target_solar_mode = SolarMode::NoExport;
            action.effective_solar_mode = SolarMode::NoExport;
        }
        action.description = "no usable battery capacity reported; standing by".into();
        action.current_price = Some(current_price.clone());
        action.system_status = Some(status.clone());
        return action;
    }

    if current_price.dollars_per_kwh < settings.always_charge_under_dollars_per_kwh
        && settings.grid_charge_batteries
        && status.battery_soc < 100.0
    {
        let intent = Intent::new(
            BatteryMode::ChargeAny,
            ActionReason::AlwaysChargeBelowThreshold,
            format!(
                "price ${:.3}/kWh under always-charge threshold ${:.3}/kWh",
                current_price.dollars_per_kwh, settings.always_charge_under_dollars_per_kwh
            ),
        );
        return finalize(ts, intent, status, current_price, None, false, negative_price);
    }

    if status.battery_soc < settings.min_battery_soc {
        let intent = Intent::new(
            BatteryMode::ChargeAny,
            ActionReason::AlwaysChargeBelowThreshold,
            format!(
                "battery at {:.0}% below the {:.0}% floor; forcing charge",
                status.battery_soc, settings.min_battery_soc
            ),
        )
        .solar(SolarMode::NoExport, true);
        return finalize(ts, intent, status, current_price, None, false, negative_price);
    }

    // Phase B: load/solar model. Phase C: projection.
    let offset = *now.offset();
    let loadsolar = build_model(history, offset, settings);
    let shaped = shaped_solar(&loadsolar, history, now, settings);
    let proj = project(
        now,
        status,
        current_price,
        future_prices,
        &loadsolar,
        &shaped,
        settings,
    );

    // Phase D: price rules, first match wins.
    let intent = phase_d(status, current_price, &proj, settings);
    finalize(
        ts,
        intent,
        status,
        current_price,
        Some(&proj),
        loadsolar.degraded,
        negative_price,
    )
}

fn phase_d(
    status: &SystemStatus,
    current_price: &Price,
    proj: &Projection,
    settings: &Settings,
) -> Intent {
    let soc = status.battery_soc;
    let grid_charge = settings.grid_charge_batteries;
    let current = current_price.dollars_per_kwh;
    let spread = proj.peak_future.as_ref().map(|p| p.all_in() - current);

    // Deficit charge: a deficit is coming and the spread covers it.
    if let (Some(deficit), Some(spread_val)) = (proj.deficit_at, spread) {
        if grid_charge
            && spread_val >= settings.min_deficit_price_difference_dollars_per_kwh
            && soc < 100.0
        {
            return Intent::new(
                BatteryMode::ChargeAny,
                ActionReason::DeficitCharge,
                format!(
                    "deficit projected by {}; charging at ${:.3}/kWh against a ${:.3}/kWh peak",
                    deficit.format("%H:%M"),
                    current,
                    proj.peak_future.as_ref().map(Price::all_in).unwrap_or(0.0),
                ),
            );
        }
    }

    // Arbitrage charge: spread alone justifies filling the battery.
    if let Some(spread_val) = spread {
        let headroom = status.battery_capacity_kwh - proj.energy_at_peak_kwh;
        if grid_charge
            && spread_val > 0.0
            && spread_val >= settings.min_arbitrage_difference_dollars_per_kwh
            && soc < 100.0
            && headroom > 0.01
        {
            return Intent::new(
                BatteryMode::ChargeAny,
                ActionReason::ArbitrageCharge,
                format!(
                    "${:.3}/kWh spread to the coming peak clears the arbitrage threshold",
                    spread_val
                ),
            );
        }
    }

    // Survive-to-peak: the battery dies before the window's expensive
    // hour even arrives, so neither spread rule fired. Waiting cannot
    // help (no cheaper hour comes first); charge now to bridge the gap.
    if let (Some(deficit), Some(peak)) = (proj.deficit_at, proj.peak_overall.as_ref()) {
        let cheaper_first = proj.next_lower_at.map_or(false, |at| at <= deficit);
        if grid_charge && soc < 100.0 && deficit < peak.ts_start && !cheaper_first {
            return Intent::new(
                BatteryMode::ChargeAny,
                ActionReason::ChargeSurvivePeak,
                format!(
                    "projected deficit at {} precedes the {} peak; charging to bridge it",
                    deficit.format("%H:%M"),
                    peak.ts_start.format("%H:%M"),
                ),
            );
        }
    }

    // Grid charging disabled: a deficit degrades to holding what we have.
    if proj.deficit_at.is_some() && !grid_charge {
        return Intent::new(
            BatteryMode::Standby,
            ActionReason::WaitingToCharge,
            "deficit projected but grid charging is disabled; holding charge".into(),
        );
    }

    if let Some(deficit) = proj.deficit_at {
        let cheaper_before = proj
            .next_lower_at
            .map_or(false, |at| at <= deficit);
        if !cheaper_before {
            match proj.peak_future.as_ref() {
                Some(peak) if current_price.all_in() >= peak.all_in() => {
                    let mut intent = Intent::new(
                        BatteryMode::Load,
                        ActionReason::ArbitrageSave,
                        "this is the expensive hour; serving loads from the battery".into(),
                    );
                    if !settings.grid_export_batteries {
                        intent = intent.solar(SolarMode::NoExport, false);
                    }
                    return intent;
                }
                _ => {
                    return Intent::new(
                        BatteryMode::Standby,
                        ActionReason::DeficitSaveForPeak,
                        "no cheaper hour before the deficit; saving the battery for the peak"
                            .into(),
                    );
                }
            }
        }
        return Intent::new(
            BatteryMode::Standby,
            ActionReason::WaitingToCharge,
            format!(
                "cheaper power at {} before the deficit; waiting to charge",
                proj.next_lower_at
                    .map(|at| at.format("%H:%M").to_string())
                    .unwrap_or_default()
            ),
        );
    }

    // Capacity rules only matter once no deficit is in play. With solar
    // export available the battery just makes room; without it the same
    // discharge is what keeps the array from curtailing.
    if let Some(capacity_at) = proj.capacity_at {
        if status.battery_above_min_soc {
            if settings.grid_export_solar && proj.deficit_at.map_or(true, |d| capacity_at < d) {
                return Intent::new(
                    BatteryMode::Load,
                    ActionReason::DischargeBeforeCapacity,
                    format!(
                        "battery fills by {}; discharging now to make room for solar",
                        capacity_at.format("%H:%M")
                    ),
                );
            }
            if !settings.grid_export_solar {
                return Intent::new(
                    BatteryMode::Load,
                    ActionReason::PreventSolarCurtailment,
                    "battery will fill and solar export is off; discharging to avoid curtailment"
                        .into(),
                )
                .solar(SolarMode::NoExport, false);
            }
        }
    }

    if status.has_alarms() {
        return Intent::new(
            BatteryMode::NoChange,
            ActionReason::HasAlarms,
            format!("device alarms active: {}", status.alarms.join(", ")),
        )
        .fault();
    }
    if status.emergency_mode || status.has_storms() {
        return Intent::new(
            BatteryMode::NoChange,
            ActionReason::EmergencyMode,
            "device in emergency or storm-preparation mode; leaving it alone".into(),
        )
        .fault();
    }

    // Sufficient battery for the window.
    if status.battery_discharging() {
        Intent::new(
            BatteryMode::Load,
            ActionReason::SufficientBattery,
            "battery sufficient; continuing to serve loads".into(),
        )
    } else if soc <= settings.min_battery_soc + 0.5 && !status.battery_charging() {
        Intent::new(
            BatteryMode::Standby,
            ActionReason::SufficientBattery,
            "battery at its floor; standing by".into(),
        )
    } else {
        Intent::new(
            BatteryMode::NoChange,
            ActionReason::SufficientBattery,
            "battery sufficient for the projected window".into(),
        )
    }
}

fn device_battery_mode(status: &SystemStatus) -> BatteryMode {
    if status.battery_charging() {
        BatteryMode::ChargeAny
    } else if status.battery_discharging() {
        BatteryMode::Load
    } else {
        BatteryMode::Standby
    }
}

/// Phase E: map intent onto the device's current state, apply the
/// negative-price export override, and attach the evidence.
fn finalize(
    ts: DateTime<Utc>,
    intent: Intent,
    status: &SystemStatus,
    current_price: &Price,
    proj: Option<&Projection>,
    degraded_model: bool,
    negative_price: bool,
) -> Action {
    let mut action = Action::new(ts, intent.reason);
    action.fault = intent.fault;
    action.target_battery_mode = intent.battery;

    let (solar_target, solar_forced) = if negative_price {
        (SolarMode::NoExport, true)
    } else {
        (intent.solar, intent.solar_forced)
    };
    action.target_solar_mode = solar_target;

    let elevation_matches = match intent.battery {
        BatteryMode::ChargeAny => status.elevated_min_battery_soc,
        BatteryMode::ChargeSolar | BatteryMode::Standby | BatteryMode::Load => {
            !status.elevated_min_battery_soc
        }
        BatteryMode::NoChange => true,
    };
    action.effective_battery_mode = if intent.battery == BatteryMode::NoChange
        || (intent.battery == device_battery_mode(status) && elevation_matches)
    {
        BatteryMode::NoChange
    } else {
        intent.battery
    };

    let device_solar = if status.can_export_solar {
        SolarMode::Any
    } else {
        SolarMode::NoExport
    };
    action.effective_solar_mode = if solar_forced {
        solar_target
    } else if solar_target == SolarMode::NoChange || solar_target == device_solar {
        SolarMode::NoChange
    } else {
        solar_target
    };

    action.current_price = Some(current_price.clone());
    if let Some(proj) = proj {
        action.future_price = proj.peak_future.clone();
        action.deficit_at = proj.deficit_at;
        action.capacity_at = proj.capacity_at;
    }
    action.system_status = Some(status.clone());

    let mut description = intent.description;
    if degraded_model {
        description.push_str("; no usable energy history, assuming 1 kW load and no solar");
    }
    action.description = description;
    action
}

#[cfg(test)]
mod tests;
