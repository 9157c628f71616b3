//! Persistence contract for the control plane.
//!
//! The store is storage and nothing else: versioned, read-your-writes
//! collections addressed by natural keys, with range reads ordered by key
//! ascending. Business logic lives in the pipeline and controller.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Action, EnergyStats, Price, VersionedSettings};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("duplicate key: {0}")]
    Conflict(String),
    /// Retryable by the caller; the core does not retry in-tick.
    #[error("transient store failure: {0}")]
    Transient(String),
}

impl StoreError {
    pub fn site_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "site",
            id: id.into(),
        }
    }

    pub fn user_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "user",
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub site_ids: Vec<String>,
}

/// Storage contract. All methods are safe for concurrent use across
/// distinct keys; concurrent writes to the same key are last-writer-wins.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    /// Missing settings are not an error: a never-configured site reads
    /// as zero-value settings at the current version.
    async fn get_settings(&self, site_id: &str) -> Result<VersionedSettings, StoreError>;
    async fn put_settings(
        &self,
        site_id: &str,
        settings: &VersionedSettings,
    ) -> Result<(), StoreError>;

    async fn insert_action(&self, site_id: &str, action: &Action) -> Result<(), StoreError>;
    /// Actions with `start <= timestamp < end`, ascending.
    async fn actions_in_range(
        &self,
        site_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Action>, StoreError>;

    async fn upsert_energy_stats(
        &self,
        site_id: &str,
        stats: &EnergyStats,
        version: u32,
    ) -> Result<(), StoreError>;
    /// Hourly records with `start <= ts_hour_start < end`, ascending.
    async fn energy_history(
        &self,
        site_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EnergyStats>, StoreError>;
    /// Latest stored hour and the version it was written under.
    async fn latest_energy_hour(
        &self,
        site_id: &str,
    ) -> Result<Option<(DateTime<Utc>, u32)>, StoreError>;

    async fn upsert_price(
        &self,
        provider: &str,
        price: &Price,
        version: u32,
    ) -> Result<(), StoreError>;
    async fn price_history(
        &self,
        provider: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Price>, StoreError>;
    async fn latest_price_hour(
        &self,
        provider: &str,
    ) -> Result<Option<(DateTime<Utc>, u32)>, StoreError>;

    async fn list_sites(&self) -> Result<Vec<Site>, StoreError>;
    async fn get_site(&self, id: &str) -> Result<Site, StoreError>;
    async fn put_site(&self, site: &Site) -> Result<(), StoreError>;

    async fn get_user(&self, id: &str) -> Result<User, StoreError>;
    /// Insert-only; a duplicate id is a `Conflict`.
    async fn create_user(&self, user: &User) -> Result<(), StoreError>;
}
