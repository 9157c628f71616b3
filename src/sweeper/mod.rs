//! Fleet sweeper: one tick over every site.
//!
//! Sites run independently under a bounded worker pool and share a
//! per-tick price cache, so a sweep touches each provider once no matter
//! how many sites ride the same tariff. One site's failure is reported in
//! its slot and never aborts the others.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::pipeline::{TickCache, TickOutcome, TickStatus, UpdatePipeline};
use crate::store::{Store, StoreError};

pub struct FleetSweeper {
    store: Arc<dyn Store>,
    pipeline: Arc<UpdatePipeline>,
    concurrency: usize,
}

#[derive(Debug)]
pub struct SiteResult {
    pub site_id: String,
    pub outcome: TickOutcome,
}

#[derive(Debug)]
pub struct SweepReport {
    pub results: Vec<SiteResult>,
}

impl SweepReport {
    pub fn count(&self, status: TickStatus) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome.status == status)
            .count()
    }
}

impl FleetSweeper {
    pub fn new(store: Arc<dyn Store>, pipeline: Arc<UpdatePipeline>, concurrency: usize) -> Self {
        Self {
            store,
            pipeline,
            concurrency: concurrency.max(1),
        }
    }

    /// One pass over the whole fleet.
    pub async fn sweep(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<SweepReport, StoreError> {
        let sites = self.store.list_sites().await?;
        let cache = Arc::new(TickCache::new());
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        let mut handles = Vec::with_capacity(sites.len());
        for site in sites {
            let semaphore = semaphore.clone();
            let pipeline = self.pipeline.clone();
            let cache = cache.clone();
            let cancel = cancel.clone();
            let site_id = site.id.clone();
            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return TickOutcome {
                            status: TickStatus::Failed,
                            action: None,
                            error: Some("worker pool closed".into()),
                        }
                    }
                };
                pipeline.run_site(&site_id, now, &cache, &cancel).await
            });
            handles.push((site.id, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (site_id, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => TickOutcome {
                    status: TickStatus::Failed,
                    action: None,
                    error: Some(format!("site task panicked: {e}")),
                },
            };
            if let Some(error) = &outcome.error {
                warn!(site = %site_id, %error, "site tick ended with an error");
            }
            results.push(SiteResult { site_id, outcome });
        }

        let report = SweepReport { results };
        info!(
            sites = report.results.len(),
            succeeded = report.count(TickStatus::Success),
            paused = report.count(TickStatus::Paused),
            failed = report.count(TickStatus::Failed),
            "fleet sweep finished"
        );
        Ok(report)
    }

    /// Single-site mode: the same tick, a fleet of one.
    pub async fn sweep_site(
        &self,
        site_id: &str,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> TickOutcome {
        let cache = TickCache::new();
        self.pipeline.run_site(site_id, now, &cache, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::PlainCipher;
    use crate::domain::{Price, Settings, SystemStatus, VersionedSettings};
    use crate::ess::mock::{ScriptedConnector, ScriptedEss};
    use crate::pricefeed::fixed::FixedFeed;
    use crate::pricefeed::FeedRegistry;
    use crate::store::memory::MemoryStore;
    use crate::store::{Site, Store as _};
    use chrono::TimeZone;
    use chrono_tz::Tz;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn status() -> SystemStatus {
        SystemStatus {
            timestamp: now().fixed_offset(),
            battery_soc: 60.0,
            battery_kw: 0.0,
            battery_capacity_kwh: 10.0,
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

    fn prices() -> Vec<Price> {
        let start = Utc.with_ymd_and_hms(2026, 3, 5, 0, 0, 0).unwrap();
        (0..(7 * 24))
            .map(|i| Price::hourly("fixed", start + chrono::Duration::hours(i), 0.10))
            .collect()
    }

    async fn fleet(site_ids: &[&str], registered: &[&str]) -> (Arc<MemoryStore>, FleetSweeper) {
        let store = Arc::new(MemoryStore::new());
        let connector = Arc::new(ScriptedConnector::new());
        for id in site_ids {
            store
                .put_site(&Site {
                    id: (*id).into(),
                    name: format!("site {id}"),
                    hidden: false,
                })
                .await
                .unwrap();
            store
                .put_settings(
                    id,
                    &VersionedSettings::current(Settings {
                        utility_provider: "fixed".into(),
                        min_battery_soc: 10.0,
                        ..Settings::default()
                    }),
                )
                .await
                .unwrap();
        }
        for id in registered {
            let ess = Arc::new(ScriptedEss::new());
            ess.push_status(status());
            connector.register(id, ess);
        }
        let mut registry = FeedRegistry::new();
        registry.register(Arc::new(FixedFeed::new("fixed", Tz::UTC, prices())));
        let pipeline = Arc::new(UpdatePipeline::new(
            store.clone(),
            Arc::new(registry),
            connector,
            Arc::new(PlainCipher),
        ));
        let sweeper = FleetSweeper::new(store.clone(), pipeline, 4);
        (store, sweeper)
    }

    #[tokio::test]
    async fn sweep_reports_every_site() {
        let (_store, sweeper) = fleet(&["a", "b", "c"], &["a", "b", "c"]).await;
        let report = sweeper
            .sweep(now(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.count(TickStatus::Success), 3);
    }

    #[tokio::test]
    async fn one_failing_site_does_not_abort_the_rest() {
        // Site "b" has no ESS registered: its connect fails.
        let (_store, sweeper) = fleet(&["a", "b", "c"], &["a", "c"]).await;
        let report = sweeper
            .sweep(now(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.count(TickStatus::Success), 2);
        assert_eq!(report.count(TickStatus::Failed), 1);
        let failed = report
            .results
            .iter()
            .find(|r| r.outcome.status == TickStatus::Failed)
            .unwrap();
        assert_eq!(failed.site_id, "b");
    }

    #[tokio::test]
    async fn empty_fleet_sweeps_cleanly() {
        let (_store, sweeper) = fleet(&[], &[]).await;
        let report = sweeper
            .sweep(now(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.results.is_empty());
    }
}
