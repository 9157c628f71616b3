//! Deterministic simulated ESS for single-site development mode.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Timelike, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::domain::{BatteryMode, EnergyStats, Settings, SolarMode, SystemStatus};
use crate::util::hour_floor;

use super::{AuthOutcome, Credentials, EssAdapter, EssConnector, EssError};

#[derive(Debug, Clone)]
struct SimState {
    soc: f64,
    battery_kw: f64,
    battery_mode: BatteryMode,
    solar_mode: SolarMode,
    elevated_min_soc: bool,
    min_soc: f64,
}

pub struct SimulatedEss {
    capacity_kwh: f64,
    max_charge_kw: f64,
    max_discharge_kw: f64,
    offset: FixedOffset,
    state: RwLock<SimState>,
}

impl SimulatedEss {
    pub fn new(capacity_kwh: f64, initial_soc: f64, offset: FixedOffset) -> Self {
        Self {
            capacity_kwh,
            max_charge_kw: 5.0,
            max_discharge_kw: 5.0,
            offset,
            state: RwLock::new(SimState {
                soc: initial_soc.clamp(0.0, 100.0),
                battery_kw: 0.0,
                battery_mode: BatteryMode::Standby,
                solar_mode: SolarMode::Any,
                elevated_min_soc: false,
                min_soc: 10.0,
            }),
        }
    }
}

/// Gaussian bump used for the simulated daily load and solar shapes.
fn bump(x: f64, mu: f64, sigma: f64) -> f64 {
    let z = (x - mu) / sigma.max(0.01);
    (-0.5 * z * z).exp()
}

fn sim_home_kw(hour: f64) -> f64 {
    let base = 0.6;
    let morning = bump(hour, 7.5, 1.5);
    let evening = bump(hour, 18.5, 2.0) * 1.6;
    (base + morning + evening).max(0.2)
}

fn sim_solar_kw(hour: f64) -> f64 {
    bump(hour, 12.5, 2.5) * 4.0
}

#[async_trait]
impl EssAdapter for SimulatedEss {
    async fn apply_settings(&self, settings: &Settings) -> Result<(), EssError> {
        let mut state = self.state.write().await;
        state.min_soc = settings.min_battery_soc;
        Ok(())
    }

    async fn authenticate(&self, credentials: Credentials) -> Result<AuthOutcome, EssError> {
        // First login mints a session token; later logins reuse it.
        let has_session = credentials
            .as_object()
            .is_some_and(|o| o.contains_key("session"));
        if has_session {
            return Ok(AuthOutcome {
                credentials,
                updated: false,
            });
        }
        let mut rotated = credentials;
        if let Some(obj) = rotated.as_object_mut() {
            obj.insert("session".into(), serde_json::json!("sim-session"));
        }
        Ok(AuthOutcome {
            credentials: rotated,
            updated: true,
        })
    }

    async fn get_status(&self) -> Result<SystemStatus, EssError> {
        let state = self.state.read().await;
        let now = Utc::now().with_timezone(&self.offset);
        let hour = now.hour() as f64 + now.minute() as f64 / 60.0;
        let solar_kw = sim_solar_kw(hour);
        let home_kw = sim_home_kw(hour);
        Ok(SystemStatus {
            timestamp: now,
            battery_soc: state.soc,
            battery_kw: state.battery_kw,
            battery_capacity_kwh: self.capacity_kwh,
            max_battery_charge_kw: self.max_charge_kw,
            max_battery_discharge_kw: self.max_discharge_kw,
            solar_kw,
            grid_kw: (home_kw - solar_kw - state.battery_kw).max(0.0),
            home_kw,
            can_export_solar: state.solar_mode != SolarMode::NoExport,
            can_export_battery: false,
            can_import_battery: true,
            elevated_min_battery_soc: state.elevated_min_soc,
            battery_above_min_soc: state.soc > state.min_soc,
            emergency_mode: false,
            alarms: vec![],
            storms: vec![],
        })
    }

    async fn set_modes(&self, battery: BatteryMode, solar: SolarMode) -> Result<(), EssError> {
        let mut state = self.state.write().await;
        if battery != BatteryMode::NoChange {
            state.battery_mode = battery;
            state.elevated_min_soc = battery == BatteryMode::ChargeAny;
            state.battery_kw = match battery {
                BatteryMode::ChargeAny | BatteryMode::ChargeSolar => -self.max_charge_kw,
                BatteryMode::Load => self.max_discharge_kw.min(1.0),
                BatteryMode::Standby | BatteryMode::NoChange => 0.0,
            };
        }
        if solar != SolarMode::NoChange {
            state.solar_mode = solar;
        }
        Ok(())
    }

    async fn get_energy_history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EnergyStats>, EssError> {
        let state = self.state.read().await;
        let mut out = Vec::new();
        let mut hour = hour_floor(start);
        while hour + chrono::Duration::hours(1) <= end {
            let local = hour.with_timezone(&self.offset).hour() as f64;
            let home = sim_home_kw(local);
            let solar = sim_solar_kw(local);
            let solar_to_home = solar.min(home);
            out.push(EnergyStats {
                ts_hour_start: hour,
                min_battery_soc: state.soc,
                max_battery_soc: state.soc,
                solar_kwh: solar,
                home_kwh: home,
                grid_import_kwh: (home - solar).max(0.0),
                grid_export_kwh: (solar - home).max(0.0),
                solar_to_home_kwh: solar_to_home,
                solar_to_grid_kwh: (solar - solar_to_home).max(0.0),
                ..EnergyStats::default()
            });
            hour += chrono::Duration::hours(1);
        }
        Ok(out)
    }
}

/// Multi-tenant connector handing out one simulated ESS per site.
pub struct SimConnector {
    offset: FixedOffset,
    adapters: Mutex<HashMap<String, Arc<SimulatedEss>>>,
}

impl SimConnector {
    pub fn new(offset: FixedOffset) -> Self {
        Self {
            offset,
            adapters: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl EssConnector for SimConnector {
    async fn connect(
        &self,
        site_id: &str,
        _credentials: &Credentials,
    ) -> Result<Arc<dyn EssAdapter>, EssError> {
        let mut adapters = self.adapters.lock().await;
        let adapter = adapters
            .entry(site_id.to_owned())
            .or_insert_with(|| Arc::new(SimulatedEss::new(13.5, 60.0, self.offset)))
            .clone();
        Ok(adapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn offset() -> FixedOffset {
        FixedOffset::west_opt(6 * 3600).unwrap()
    }

    #[tokio::test]
    async fn authenticate_rotates_once() {
        let ess = SimulatedEss::new(10.0, 50.0, offset());
        let first = ess
            .authenticate(serde_json::json!({"user": "a"}))
            .await
            .unwrap();
        assert!(first.updated);
        let second = ess.authenticate(first.credentials).await.unwrap();
        assert!(!second.updated);
    }

    #[tokio::test]
    async fn set_modes_is_idempotent_and_reflects_in_status() {
        let ess = SimulatedEss::new(10.0, 50.0, offset());
        ess.set_modes(BatteryMode::ChargeAny, SolarMode::NoExport)
            .await
            .unwrap();
        ess.set_modes(BatteryMode::ChargeAny, SolarMode::NoExport)
            .await
            .unwrap();
        let status = ess.get_status().await.unwrap();
        assert!(status.battery_charging());
        assert!(status.elevated_min_battery_soc);
        assert!(!status.can_export_solar);
    }

    #[tokio::test]
    async fn history_covers_whole_hours_only() {
        let ess = SimulatedEss::new(10.0, 50.0, offset());
        let start = Utc.with_ymd_and_hms(2026, 3, 10, 6, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 3, 10, 9, 30, 0).unwrap();
        let rows = ess.get_energy_history(start, end).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.flows_consistent()));
    }

    #[tokio::test]
    async fn connector_is_multi_tenant() {
        let connector = SimConnector::new(offset());
        let creds = serde_json::json!({});
        let a = connector.connect("s1", &creds).await.unwrap();
        let b = connector.connect("s1", &creds).await.unwrap();
        a.set_modes(BatteryMode::Load, SolarMode::NoChange)
            .await
            .unwrap();
        let status = b.get_status().await.unwrap();
        assert!(status.battery_discharging());
    }
}
