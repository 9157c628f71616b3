//! Scripted ESS for tests: queued statuses, recorded commands,
//! injectable failures.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::domain::{BatteryMode, EnergyStats, Settings, SolarMode, SystemStatus};

use super::{AuthOutcome, Credentials, EssAdapter, EssConnector, EssError};

#[derive(Default)]
pub struct ScriptedEss {
    statuses: Mutex<VecDeque<SystemStatus>>,
    last_status: Mutex<Option<SystemStatus>>,
    history: Mutex<Vec<EnergyStats>>,
    commands: Mutex<Vec<(BatteryMode, SolarMode)>>,
    status_calls: AtomicUsize,
    history_calls: AtomicUsize,
    fail_status: AtomicBool,
    fail_set_modes: AtomicBool,
    rotate_credentials: AtomicBool,
}

impl ScriptedEss {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_status(&self, status: SystemStatus) {
        *self.last_status.lock() = Some(status.clone());
        self.statuses.lock().push_back(status);
    }

    pub fn set_history(&self, rows: Vec<EnergyStats>) {
        *self.history.lock() = rows;
    }

    pub fn fail_status(&self, fail: bool) {
        self.fail_status.store(fail, Ordering::SeqCst);
    }

    pub fn fail_set_modes(&self, fail: bool) {
        self.fail_set_modes.store(fail, Ordering::SeqCst);
    }

    pub fn rotate_credentials(&self, rotate: bool) {
        self.rotate_credentials.store(rotate, Ordering::SeqCst);
    }

    pub fn commands(&self) -> Vec<(BatteryMode, SolarMode)> {
        self.commands.lock().clone()
    }

    pub fn status_call_count(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn history_call_count(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EssAdapter for ScriptedEss {
    async fn apply_settings(&self, _settings: &Settings) -> Result<(), EssError> {
        Ok(())
    }

    async fn authenticate(&self, credentials: Credentials) -> Result<AuthOutcome, EssError> {
        if self.rotate_credentials.swap(false, Ordering::SeqCst) {
            let mut rotated = credentials;
            if let Some(obj) = rotated.as_object_mut() {
                obj.insert("session".into(), serde_json::json!("rotated"));
            }
            return Ok(AuthOutcome {
                credentials: rotated,
                updated: true,
            });
        }
        Ok(AuthOutcome {
            credentials,
            updated: false,
        })
    }

    async fn get_status(&self) -> Result<SystemStatus, EssError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(EssError::Communication("status read timed out".into()));
        }
        let queued = self.statuses.lock().pop_front();
        queued
            .or_else(|| self.last_status.lock().clone())
            .ok_or_else(|| EssError::Communication("no scripted status".into()))
    }

    async fn set_modes(&self, battery: BatteryMode, solar: SolarMode) -> Result<(), EssError> {
        if self.fail_set_modes.load(Ordering::SeqCst) {
            return Err(EssError::Rejected("device busy".into()));
        }
        self.commands.lock().push((battery, solar));
        Ok(())
    }

    async fn get_energy_history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EnergyStats>, EssError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .history
            .lock()
            .iter()
            .filter(|r| r.ts_hour_start >= start && r.ts_hour_start < end)
            .cloned()
            .collect())
    }
}

/// Connector that hands back pre-registered scripted adapters.
#[derive(Default)]
pub struct ScriptedConnector {
    adapters: Mutex<HashMap<String, Arc<ScriptedEss>>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, site_id: &str, ess: Arc<ScriptedEss>) {
        self.adapters.lock().insert(site_id.to_owned(), ess);
    }
}

#[async_trait]
impl EssConnector for ScriptedConnector {
    async fn connect(
        &self,
        site_id: &str,
        _credentials: &Credentials,
    ) -> Result<Arc<dyn EssAdapter>, EssError> {
        self.adapters
            .lock()
            .get(site_id)
            .cloned()
            .map(|ess| ess as Arc<dyn EssAdapter>)
            .ok_or_else(|| EssError::Communication(format!("no scripted ESS for {site_id}")))
    }
}
