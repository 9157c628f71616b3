//! In-memory store backend.
//!
//! Keys are RFC3339 UTC strings, so BTreeMap iteration order is
//! chronological. This is the `storage_backend = "memory"` choice and the
//! backend every test runs against.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::RwLock;

use crate::domain::{Action, EnergyStats, Price, Settings, VersionedSettings};

use super::{Site, Store, StoreError, User};

#[derive(Debug, Clone)]
struct Versioned<T> {
    version: u32,
    record: T,
}

#[derive(Default)]
struct Inner {
    settings: HashMap<String, VersionedSettings>,
    actions: HashMap<String, BTreeMap<String, Action>>,
    energy: HashMap<String, BTreeMap<String, Versioned<EnergyStats>>>,
    prices: HashMap<String, BTreeMap<String, Versioned<Price>>>,
    sites: BTreeMap<String, Site>,
    users: BTreeMap<String, User>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn hour_key(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn action_key(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn range_of<'a, T>(
    map: &'a BTreeMap<String, T>,
    start: &str,
    end: &str,
) -> impl Iterator<Item = &'a T> {
    map.range::<str, _>((Bound::Included(start), Bound::Excluded(end)))
        .map(|(_, v)| v)
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_settings(&self, site_id: &str) -> Result<VersionedSettings, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .settings
            .get(site_id)
            .cloned()
            .unwrap_or_else(|| VersionedSettings::current(Settings::default())))
    }

    async fn put_settings(
        &self,
        site_id: &str,
        settings: &VersionedSettings,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.settings.insert(site_id.to_owned(), settings.clone());
        Ok(())
    }

    async fn insert_action(&self, site_id: &str, action: &Action) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner
            .actions
            .entry(site_id.to_owned())
            .or_default()
            .insert(action_key(action.timestamp), action.clone());
        Ok(())
    }

    async fn actions_in_range(
        &self,
        site_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Action>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .actions
            .get(site_id)
            .map(|m| {
                range_of(m, &action_key(start), &action_key(end))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn upsert_energy_stats(
        &self,
        site_id: &str,
        stats: &EnergyStats,
        version: u32,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.energy.entry(site_id.to_owned()).or_default().insert(
            stats.hour_key(),
            Versioned {
                version,
                record: stats.clone(),
            },
        );
        Ok(())
    }

    async fn energy_history(
        &self,
        site_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EnergyStats>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .energy
            .get(site_id)
            .map(|m| {
                range_of(m, &hour_key(start), &hour_key(end))
                    .map(|v| v.record.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest_energy_hour(
        &self,
        site_id: &str,
    ) -> Result<Option<(DateTime<Utc>, u32)>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.energy.get(site_id).and_then(|m| {
            m.last_key_value()
                .map(|(_, v)| (v.record.ts_hour_start, v.version))
        }))
    }

    async fn upsert_price(
        &self,
        provider: &str,
        price: &Price,
        version: u32,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.prices.entry(provider.to_owned()).or_default().insert(
            price.hour_key(),
            Versioned {
                version,
                record: price.clone(),
            },
        );
        Ok(())
    }

    async fn price_history(
        &self,
        provider: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Price>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .prices
            .get(provider)
            .map(|m| {
                range_of(m, &hour_key(start), &hour_key(end))
                    .map(|v| v.record.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest_price_hour(
        &self,
        provider: &str,
    ) -> Result<Option<(DateTime<Utc>, u32)>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.prices.get(provider).and_then(|m| {
            m.last_key_value()
                .map(|(_, v)| (v.record.ts_start, v.version))
        }))
    }

    async fn list_sites(&self) -> Result<Vec<Site>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.sites.values().cloned().collect())
    }

    async fn get_site(&self, id: &str) -> Result<Site, StoreError> {
        let inner = self.inner.read().await;
        inner
            .sites
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::site_not_found(id))
    }

    async fn put_site(&self, site: &Site) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.sites.insert(site.id.clone(), site.clone());
        Ok(())
    }

    async fn get_user(&self, id: &str) -> Result<User, StoreError> {
        let inner = self.inner.read().await;
        inner
            .users
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::user_not_found(id))
    }

    async fn create_user(&self, user: &User) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.users.contains_key(&user.id) {
            return Err(StoreError::Conflict(user.id.clone()));
        }
        inner.users.insert(user.id.clone(), user.clone());
        Ok(())
    }
}
