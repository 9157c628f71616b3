use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use proptest::prelude::*;
use rstest::rstest;

use super::decide;
use crate::domain::{
    ActionReason, BatteryMode, EnergyStats, Price, Settings, SolarMode, SystemStatus,
};

fn offset() -> FixedOffset {
    FixedOffset::west_opt(0).unwrap()
}

fn now() -> DateTime<FixedOffset> {
    Utc.with_ymd_and_hms(2026, 3, 10, 9, 30, 0)
        .unwrap()
        .with_timezone(&offset())
}

fn status(soc: f64, capacity: f64) -> SystemStatus {
    SystemStatus {
        timestamp: now(),
        battery_soc: soc,
        battery_kw: 0.0,
        battery_capacity_kwh: capacity,
        max_battery_charge_kw: 5.0,
        max_battery_discharge_kw: 5.0,
        solar_kw: 0.0,
        grid_kw: 1.0,
        home_kw: 1.0,
        can_export_solar: true,
        can_export_battery: false,
        can_import_battery: true,
        elevated_min_battery_soc: false,
        battery_above_min_soc: true,
        emergency_mode: false,
        alarms: vec![],
        storms: vec![],
    }
}

fn arbitrage_settings() -> Settings {
    Settings {
        min_battery_soc: 20.0,
        grid_charge_batteries: true,
        min_deficit_price_difference_dollars_per_kwh: 0.05,
        min_arbitrage_difference_dollars_per_kwh: 0.10,
        ..Settings::default()
    }
}

fn current(price: f64) -> Price {
    Price::hourly(
        "fixed",
        Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap(),
        price,
    )
}

fn futures(count: i64, price: f64) -> Vec<Price> {
    (0..count)
        .map(|i| {
            Price::hourly(
                "fixed",
                Utc.with_ymd_and_hms(2026, 3, 10, 10, 0, 0).unwrap()
                    + chrono::Duration::hours(i),
                price,
            )
        })
        .collect()
}

fn constant_load_history(load_kwh: f64) -> Vec<EnergyStats> {
    let mut rows = Vec::new();
    for d in 7..10 {
        for h in 0..24 {
            rows.push(EnergyStats {
                ts_hour_start: Utc.with_ymd_and_hms(2026, 3, d, h, 0, 0).unwrap(),
                home_kwh: load_kwh,
                solar_kwh: 0.0,
                ..EnergyStats::default()
            });
        }
    }
    rows
}

#[test]
fn high_price_now_cheap_later_deficit_saves_for_peak() {
    // The 0.02 spread sits under the 0.05 deficit threshold.
    let mut st = status(20.0, 10.0);
    st.battery_kw = -1.0;
    let action = decide(
        now(),
        &st,
        &current(0.10),
        &futures(24, 0.12),
        &constant_load_history(1.0),
        &arbitrage_settings(),
    );
    assert_eq!(action.reason, ActionReason::DeficitSaveForPeak);
    assert_eq!(action.effective_battery_mode, BatteryMode::Standby);
    assert!(action.deficit_at.is_some());
    assert!(action.future_price.is_some());
}

#[test]
fn deficit_with_large_spread_charges() {
    // The 0.40 spread clears the 0.05 deficit threshold.
    let mut st = status(20.0, 10.0);
    st.battery_kw = -1.0;
    let action = decide(
        now(),
        &st,
        &current(0.10),
        &futures(24, 0.50),
        &constant_load_history(1.0),
        &arbitrage_settings(),
    );
    assert_eq!(action.reason, ActionReason::DeficitCharge);
    assert_eq!(action.effective_battery_mode, BatteryMode::ChargeAny);
}

#[test]
fn negative_price_charges_and_blocks_export() {
    let st = status(60.0, 10.0);
    let action = decide(
        now(),
        &st,
        &current(-0.01),
        &futures(24, 0.05),
        &constant_load_history(1.0),
        &arbitrage_settings(),
    );
    assert_eq!(action.reason, ActionReason::AlwaysChargeBelowThreshold);
    assert_eq!(action.effective_battery_mode, BatteryMode::ChargeAny);
    assert_eq!(action.effective_solar_mode, SolarMode::NoExport);
}

#[test]
fn zero_capacity_stands_by() {
    let st = status(0.0, 0.0);
    let action = decide(
        now(),
        &st,
        &current(0.10),
        &futures(24, 0.12),
        &constant_load_history(1.0),
        &arbitrage_settings(),
    );
    assert_eq!(action.reason, ActionReason::MissingBattery);
    assert_eq!(action.effective_battery_mode, BatteryMode::Standby);
}

#[test]
fn already_charging_elevated_becomes_no_change() {
    // Cheap hour, device already force-charging.
    let mut st = status(45.0, 10.0);
    st.battery_kw = -5.0;
    st.elevated_min_battery_soc = true;
    let settings = Settings {
        always_charge_under_dollars_per_kwh: 0.05,
        ..arbitrage_settings()
    };
    let action = decide(
        now(),
        &st,
        &current(0.03),
        &futures(24, 0.12),
        &constant_load_history(1.0),
        &settings,
    );
    assert_eq!(action.reason, ActionReason::AlwaysChargeBelowThreshold);
    assert_eq!(action.target_battery_mode, BatteryMode::ChargeAny);
    assert_eq!(action.effective_battery_mode, BatteryMode::NoChange);
}

#[test]
fn emergency_with_storm_is_a_fault() {
    // Nothing else fires, the fault row does.
    let mut st = status(80.0, 10.0);
    st.emergency_mode = true;
    st.storms = vec!["tornado watch".into()];
    let action = decide(
        now(),
        &st,
        &current(0.10),
        &futures(24, 0.10),
        &constant_load_history(0.1),
        &arbitrage_settings(),
    );
    assert_eq!(action.reason, ActionReason::EmergencyMode);
    assert!(action.fault);
    assert_eq!(action.effective_battery_mode, BatteryMode::NoChange);
    assert_eq!(action.effective_solar_mode, SolarMode::NoChange);
}

#[rstest]
#[case(0.03, BatteryMode::ChargeAny)]
#[case(0.05, BatteryMode::NoChange)] // at the threshold: strict less-than
#[case(0.08, BatteryMode::NoChange)]
fn always_charge_threshold_is_strict(#[case] price: f64, #[case] expected: BatteryMode) {
    let st = status(80.0, 20.0);
    let settings = Settings {
        always_charge_under_dollars_per_kwh: 0.05,
        ..arbitrage_settings()
    };
    let action = decide(
        now(),
        &st,
        &current(price),
        &futures(24, price),
        &constant_load_history(0.1),
        &settings,
    );
    assert_eq!(action.effective_battery_mode, expected);
}

#[test]
fn cheaper_hour_before_deficit_waits_to_charge() {
    let st = status(20.0, 10.0);
    let mut fut = futures(24, 0.12);
    fut[0].dollars_per_kwh = 0.05;
    let action = decide(
        now(),
        &st,
        &current(0.10),
        &fut,
        &constant_load_history(1.0),
        &arbitrage_settings(),
    );
    assert_eq!(action.reason, ActionReason::WaitingToCharge);
    assert_eq!(action.target_battery_mode, BatteryMode::Standby);
}

#[test]
fn grid_charge_disabled_degrades_deficit_to_holding() {
    // No arbitrage- or deficit-driven grid charge without the flag.
    let st = status(20.0, 10.0);
    let settings = Settings {
        grid_charge_batteries: false,
        ..arbitrage_settings()
    };
    let action = decide(
        now(),
        &st,
        &current(0.10),
        &futures(24, 0.50),
        &constant_load_history(1.0),
        &settings,
    );
    assert_eq!(action.reason, ActionReason::WaitingToCharge);
    assert_eq!(action.target_battery_mode, BatteryMode::Standby);
}

#[test]
fn below_floor_forces_charge_even_without_grid_charge_flag() {
    let st = status(5.0, 10.0);
    let settings = Settings {
        grid_charge_batteries: false,
        ..arbitrage_settings()
    };
    let action = decide(
        now(),
        &st,
        &current(0.10),
        &futures(24, 0.10),
        &constant_load_history(0.1),
        &settings,
    );
    assert_eq!(action.reason, ActionReason::AlwaysChargeBelowThreshold);
    assert_eq!(action.effective_battery_mode, BatteryMode::ChargeAny);
    assert_eq!(action.effective_solar_mode, SolarMode::NoExport);
}

#[test]
fn pure_arbitrage_spread_charges_without_deficit() {
    let st = status(50.0, 20.0);
    let settings = Settings {
        min_battery_soc: 10.0,
        ..arbitrage_settings()
    };
    let action = decide(
        now(),
        &st,
        &current(0.10),
        &futures(24, 0.50),
        &constant_load_history(0.2),
        &settings,
    );
    assert_eq!(action.reason, ActionReason::ArbitrageCharge);
    assert_eq!(action.effective_battery_mode, BatteryMode::ChargeAny);
    assert!(action.deficit_at.is_none());
}

#[test]
fn at_the_peak_with_a_deficit_serves_loads_from_battery() {
    let st = status(20.0, 10.0);
    let settings = Settings {
        grid_export_batteries: false,
        ..arbitrage_settings()
    };
    let action = decide(
        now(),
        &st,
        &current(0.12),
        &futures(24, 0.12),
        &constant_load_history(1.0),
        &settings,
    );
    assert_eq!(action.reason, ActionReason::ArbitrageSave);
    assert_eq!(action.effective_battery_mode, BatteryMode::Load);
    // Batteries may not export: solar is pinned to the house.
    assert_eq!(action.effective_solar_mode, SolarMode::NoExport);
}

fn midday_solar_history() -> Vec<EnergyStats> {
    let mut rows = Vec::new();
    for d in 8..10 {
        for h in 0..24 {
            let solar = if (10..16).contains(&h) { 3.0 } else { 0.0 };
            rows.push(EnergyStats {
                ts_hour_start: Utc.with_ymd_and_hms(2026, 3, d, h, 0, 0).unwrap(),
                home_kwh: 0.5,
                solar_kwh: solar,
                ..EnergyStats::default()
            });
        }
    }
    rows
}

#[test]
fn imminent_overflow_discharges_to_make_room() {
    let st = status(80.0, 10.0);
    let settings = Settings {
        min_battery_soc: 10.0,
        grid_export_solar: true,
        ..Settings::default()
    };
    let action = decide(
        now(),
        &st,
        &current(0.10),
        &futures(24, 0.10),
        &midday_solar_history(),
        &settings,
    );
    assert_eq!(action.reason, ActionReason::DischargeBeforeCapacity);
    assert_eq!(action.effective_battery_mode, BatteryMode::Load);
    assert!(action.capacity_at.is_some());
}

#[test]
fn overflow_without_export_prevents_curtailment() {
    let st = status(80.0, 10.0);
    let settings = Settings {
        min_battery_soc: 10.0,
        grid_export_solar: false,
        ..Settings::default()
    };
    let action = decide(
        now(),
        &st,
        &current(0.10),
        &futures(24, 0.10),
        &midday_solar_history(),
        &settings,
    );
    assert_eq!(action.reason, ActionReason::PreventSolarCurtailment);
    assert_eq!(action.effective_battery_mode, BatteryMode::Load);
}

#[test]
fn survive_peak_charges_when_battery_dies_first() {
    // Deficit in two hours, peak priced hour later in the evening.
    let st = status(25.0, 10.0);
    let mut fut = futures(24, 0.11);
    fut[8].dollars_per_kwh = 0.13; // 18:00 peak
    let action = decide(
        now(),
        &st,
        &current(0.10),
        &fut,
        &constant_load_history(1.0),
        &arbitrage_settings(),
    );
    assert_eq!(action.reason, ActionReason::ChargeSurvivePeak);
    assert_eq!(action.effective_battery_mode, BatteryMode::ChargeAny);
}

#[test]
fn empty_history_degrades_and_annotates() {
    let st = status(80.0, 10.0);
    let action = decide(
        now(),
        &st,
        &current(0.10),
        &futures(24, 0.10),
        &[],
        &arbitrage_settings(),
    );
    assert!(action.description.contains("no usable energy history"));
}

#[test]
fn sufficient_battery_keeps_discharging() {
    let mut st = status(90.0, 20.0);
    st.battery_kw = 2.0;
    let action = decide(
        now(),
        &st,
        &current(0.10),
        &futures(24, 0.10),
        &constant_load_history(0.2),
        &arbitrage_settings(),
    );
    assert_eq!(action.reason, ActionReason::SufficientBattery);
    assert_eq!(action.target_battery_mode, BatteryMode::Load);
    // Device is already in Load: no command needed.
    assert_eq!(action.effective_battery_mode, BatteryMode::NoChange);
}

proptest! {
    #[test]
    fn decide_is_total_and_honors_hard_rules(
        soc in 0.0f64..100.0,
        capacity in 0.0f64..30.0,
        battery_kw in -5.0f64..5.0,
        elevated in any::<bool>(),
        emergency in any::<bool>(),
        price in -0.2f64..0.6,
        future_price in -0.2f64..0.6,
        future_count in 0i64..30,
        grid_charge in any::<bool>(),
        grid_export_solar in any::<bool>(),
        min_soc in 0.0f64..100.0,
        load in 0.0f64..4.0,
    ) {
        let mut st = status(soc, capacity);
        st.battery_kw = battery_kw;
        st.elevated_min_battery_soc = elevated;
        st.emergency_mode = emergency;
        st.battery_above_min_soc = soc > min_soc;
        let settings = Settings {
            min_battery_soc: min_soc,
            grid_charge_batteries: grid_charge,
            grid_export_solar,
            min_deficit_price_difference_dollars_per_kwh: 0.05,
            min_arbitrage_difference_dollars_per_kwh: 0.10,
            ..Settings::default()
        };
        let action = decide(
            now(),
            &st,
            &current(price),
            &futures(future_count, future_price),
            &constant_load_history(load),
            &settings,
        );

        // Exactly one action, always carrying its evidence.
        prop_assert!(action.system_status.is_some());
        prop_assert!(action.current_price.is_some());

        // Negative prices always pin solar to no-export.
        if price < 0.0 {
            prop_assert_eq!(action.effective_solar_mode, SolarMode::NoExport);
        }

        // Grid charging disabled: only the SOC floor may force a charge.
        if !grid_charge && soc >= min_soc {
            prop_assert_ne!(action.target_battery_mode, BatteryMode::ChargeAny);
        }
    }
}
