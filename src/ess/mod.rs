//! Energy-storage-system capability interface.
//!
//! Vendor integrations live behind `EssAdapter`; the core only ever sees
//! this surface. Adapters serialize `set_modes` per site and tolerate
//! redundant commands.

pub mod mock;
pub mod sim;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{BatteryMode, EnergyStats, Settings, SolarMode, SystemStatus};

#[derive(Debug, Error)]
pub enum EssError {
    #[error("ESS authentication failed: {0}")]
    Auth(String),
    #[error("ESS communication failed: {0}")]
    Communication(String),
    #[error("ESS rejected command: {0}")]
    Rejected(String),
}

/// Decrypted credential payload. Opaque to the core; adapters know their
/// own shape.
pub type Credentials = serde_json::Value;

/// Result of `authenticate`: possibly-rotated credentials, and whether
/// they changed (the pipeline persists them re-encrypted when they did).
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub credentials: Credentials,
    pub updated: bool,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EssAdapter: Send + Sync {
    /// Idempotent; propagates site-wide policy (e.g. storm preparation)
    /// to the device.
    async fn apply_settings(&self, settings: &Settings) -> Result<(), EssError>;

    async fn authenticate(&self, credentials: Credentials) -> Result<AuthOutcome, EssError>;

    /// Live snapshot; the returned timestamp is in the device's local
    /// zone and becomes the controller's "now".
    async fn get_status(&self) -> Result<SystemStatus, EssError>;

    /// Idempotent; redundant commands are expected.
    async fn set_modes(&self, battery: BatteryMode, solar: SolarMode) -> Result<(), EssError>;

    /// Hourly buckets inside `[start, end)`; need not be contiguous.
    async fn get_energy_history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EnergyStats>, EssError>;
}

/// Resolves a site to its ESS adapter.
#[async_trait]
pub trait EssConnector: Send + Sync {
    async fn connect(
        &self,
        site_id: &str,
        credentials: &Credentials,
    ) -> Result<Arc<dyn EssAdapter>, EssError>;
}
