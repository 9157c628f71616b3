//! Per-site update pipeline.
//!
//! One tick for one site runs the twelve steps in order: settings (with
//! in-memory migration), credentials, ESS settings/auth, energy and price
//! backfill, the pause gate, live status, prices, history, the decision,
//! the command, and the action record. Every I/O call runs under a
//! cancellation token and a per-collaborator timeout; cancellation aborts
//! at the next suspension point with no partial Action written.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::controller;
use crate::credentials::{CredentialCipher, CredentialError};
use crate::domain::{
    Action, ActionReason, BatteryMode, Price, ENERGY_STATS_VERSION, PRICE_VERSION,
};
use crate::ess::{EssAdapter, EssConnector, EssError};
use crate::pricefeed::{FeedRegistry, PriceFeedError, PriceSource};
use crate::store::{Store, StoreError};
use crate::util::hour_floor;

pub const ESS_TIMEOUT: Duration = Duration::from_secs(30);
pub const PRICE_TIMEOUT: Duration = Duration::from_secs(15);
pub const STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// How far back a cold (or version-bumped) backfill reaches.
pub const BACKFILL_DAYS: i64 = 5;
/// History window handed to the controller.
pub const HISTORY_HOURS: i64 = 72;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("tick cancelled")]
    Cancelled,
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ess(#[from] EssError),
    #[error(transparent)]
    Price(#[from] PriceFeedError),
    #[error(transparent)]
    Credentials(#[from] CredentialError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    Success,
    Paused,
    Emergency,
    Alarms,
    Failed,
}

/// What a caller observes of one site-tick.
#[derive(Debug)]
pub struct TickOutcome {
    pub status: TickStatus,
    pub action: Option<Action>,
    pub error: Option<String>,
}

impl TickOutcome {
    fn ok(status: TickStatus, action: Option<Action>) -> Self {
        Self {
            status,
            action,
            error: None,
        }
    }
}

/// Shared state for one fleet sweep: raw per-provider prices and the
/// providers whose history is already synced this tick. Born and dies
/// with the tick.
#[derive(Default)]
pub struct TickCache {
    current: Mutex<HashMap<String, Price>>,
    futures: Mutex<HashMap<String, Arc<Vec<Price>>>>,
    synced: Mutex<HashSet<String>>,
}

impl TickCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the price-history sync for a provider. The first site wins;
    /// everyone else skips the backfill this tick.
    pub fn begin_price_sync(&self, provider: &str) -> bool {
        self.synced.lock().insert(provider.to_owned())
    }

    fn cached_current(&self, provider: &str) -> Option<Price> {
        self.current.lock().get(provider).cloned()
    }

    fn put_current(&self, provider: &str, price: Price) {
        self.current.lock().insert(provider.to_owned(), price);
    }

    fn cached_futures(&self, provider: &str) -> Option<Arc<Vec<Price>>> {
        self.futures.lock().get(provider).cloned()
    }

    fn put_futures(&self, provider: &str, prices: Vec<Price>) -> Arc<Vec<Price>> {
        let prices = Arc::new(prices);
        self.futures
            .lock()
            .insert(provider.to_owned(), prices.clone());
        prices
    }
}

/// Run a collaborator call under the tick's cancellation token and the
/// collaborator's timeout.
async fn io<T, E, F>(
    cancel: &CancellationToken,
    limit: Duration,
    step: &'static str,
    fut: F,
) -> Result<T, PipelineError>
where
    E: Into<PipelineError>,
    F: Future<Output = Result<T, E>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        res = tokio::time::timeout(limit, fut) => match res {
            Err(_) => Err(PipelineError::Timeout(step)),
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.into()),
        },
    }
}

pub struct UpdatePipeline {
    store: Arc<dyn Store>,
    registry: Arc<FeedRegistry>,
    connector: Arc<dyn EssConnector>,
    cipher: Arc<dyn CredentialCipher>,
}

impl UpdatePipeline {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<FeedRegistry>,
        connector: Arc<dyn EssConnector>,
        cipher: Arc<dyn CredentialCipher>,
    ) -> Self {
        Self {
            store,
            registry,
            connector,
            cipher,
        }
    }

    /// One tick for one site. Never panics the sweep: every failure maps
    /// onto a `TickOutcome`.
    pub async fn run_site(
        &self,
        site_id: &str,
        now: DateTime<Utc>,
        cache: &TickCache,
        cancel: &CancellationToken,
    ) -> TickOutcome {
        match self.run_site_inner(site_id, now, cache, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(site = %site_id, error = %e, "site tick failed");
                TickOutcome {
                    status: TickStatus::Failed,
                    action: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn run_site_inner(
        &self,
        site_id: &str,
        now: DateTime<Utc>,
        cache: &TickCache,
        cancel: &CancellationToken,
    ) -> Result<TickOutcome, PipelineError> {
        // 1. Settings, migrated in memory and persisted on change.
        let mut versioned = io(
            cancel,
            STORE_TIMEOUT,
            "settings read",
            self.store.get_settings(site_id),
        )
        .await?;
        if versioned.migrate() {
            if let Err(e) = io(
                cancel,
                STORE_TIMEOUT,
                "settings write",
                self.store.put_settings(site_id, &versioned),
            )
            .await
            {
                abort_if_cancelled(&e)?;
                warn!(site = %site_id, error = %e, "persisting migrated settings failed");
            }
        }
        let settings = versioned.settings.clone();

        // 2. Credentials.
        let credentials = match settings.encrypted_credentials.as_deref() {
            Some(blob) => self.cipher.decrypt(blob)?,
            None => serde_json::json!({}),
        };

        // 3. Connect, apply settings, authenticate; persist rotations.
        let ess = io(
            cancel,
            ESS_TIMEOUT,
            "ESS connect",
            self.connector.connect(site_id, &credentials),
        )
        .await?;
        io(
            cancel,
            ESS_TIMEOUT,
            "ESS apply settings",
            ess.apply_settings(&settings),
        )
        .await?;
        let auth = io(
            cancel,
            ESS_TIMEOUT,
            "ESS authenticate",
            ess.authenticate(credentials),
        )
        .await?;
        if auth.updated {
            match self.cipher.encrypt(&auth.credentials) {
                Ok(blob) => {
                    versioned.settings.encrypted_credentials = Some(blob);
                    if let Err(e) = io(
                        cancel,
                        STORE_TIMEOUT,
                        "settings write",
                        self.store.put_settings(site_id, &versioned),
                    )
                    .await
                    {
                        abort_if_cancelled(&e)?;
                        warn!(site = %site_id, error = %e, "persisting rotated credentials failed");
                    }
                }
                Err(e) => warn!(site = %site_id, error = %e, "re-encrypting rotated credentials failed"),
            }
        }

        // 4. Energy history backfill.
        if let Err(e) = self.backfill_energy(site_id, ess.as_ref(), now, cancel).await {
            abort_if_cancelled(&e)?;
            warn!(site = %site_id, error = %e, "energy backfill skipped this tick");
        }

        // 5. Price history backfill, once per provider per tick.
        let provider = settings.utility_provider.clone();
        let mut feed = self.registry.site_feed(&provider)?;
        feed.apply_settings(&settings);
        if cache.begin_price_sync(&provider) {
            if let Err(e) = self.backfill_prices(feed.source(), now, cancel).await {
                abort_if_cancelled(&e)?;
                warn!(provider = %provider, error = %e, "price backfill skipped this tick");
            }
        }

        // 6. Pause gate: decision skipped, backfills already done. The
        // record carries no command, only the fact that we sat out.
        if settings.pause {
            debug!(site = %site_id, "site is paused");
            let mut action = Action::new(now, ActionReason::SufficientBattery);
            action.paused = true;
            action.description = "site is paused; decision skipped".into();
            self.insert_action(site_id, &action, cancel).await?;
            return Ok(TickOutcome::ok(TickStatus::Paused, Some(action)));
        }

        // 7. Live status; emergencies and alarms end the tick here.
        let status = match io(cancel, ESS_TIMEOUT, "ESS status", ess.get_status()).await {
            Ok(status) => status,
            Err(e) => {
                abort_if_cancelled(&e)?;
                let action = failed_action(now, "ESS status unavailable", &e);
                self.insert_action(site_id, &action, cancel).await?;
                return Ok(TickOutcome {
                    status: TickStatus::Failed,
                    action: Some(action),
                    error: Some(e.to_string()),
                });
            }
        };
        if status.has_alarms() {
            let mut action = Action::new(now, ActionReason::HasAlarms);
            action.fault = true;
            action.description = format!("device alarms active: {}", status.alarms.join(", "));
            action.system_status = Some(status.clone());
            self.insert_action(site_id, &action, cancel).await?;
            return Ok(TickOutcome::ok(TickStatus::Alarms, Some(action)));
        }
        if status.emergency_mode {
            let mut action = Action::new(now, ActionReason::EmergencyMode);
            action.fault = true;
            action.description = "device in emergency mode; leaving it alone".into();
            action.system_status = Some(status.clone());
            self.insert_action(site_id, &action, cancel).await?;
            return Ok(TickOutcome::ok(TickStatus::Emergency, Some(action)));
        }

        // 8. Prices: current aborts the tick when missing, futures only
        // degrade it.
        let raw_current = match cache.cached_current(&provider) {
            Some(price) => price,
            None => {
                match io(
                    cancel,
                    PRICE_TIMEOUT,
                    "current price",
                    feed.source().current(now),
                )
                .await
                {
                    Ok(price) => {
                        cache.put_current(&provider, price.clone());
                        price
                    }
                    Err(e) => {
                        abort_if_cancelled(&e)?;
                        let action = failed_action(now, "current price unavailable", &e);
                        self.insert_action(site_id, &action, cancel).await?;
                        return Ok(TickOutcome {
                            status: TickStatus::Failed,
                            action: Some(action),
                            error: Some(e.to_string()),
                        });
                    }
                }
            }
        };
        let current_price = feed.with_fees(&raw_current);

        let raw_futures = match cache.cached_futures(&provider) {
            Some(prices) => prices,
            None => {
                match io(
                    cancel,
                    PRICE_TIMEOUT,
                    "future prices",
                    feed.source().future(now),
                )
                .await
                {
                    Ok(prices) => cache.put_futures(&provider, prices),
                    Err(e) => {
                        abort_if_cancelled(&e)?;
                        warn!(provider = %provider, error = %e, "deciding with empty future prices");
                        Arc::new(Vec::new())
                    }
                }
            }
        };
        let future_prices: Vec<Price> = raw_futures.iter().map(|p| feed.with_fees(p)).collect();

        // 9. 72 hours of history for the load/solar model.
        let history = match io(
            cancel,
            STORE_TIMEOUT,
            "history read",
            self.store.energy_history(
                site_id,
                now - chrono::Duration::hours(HISTORY_HOURS),
                now,
            ),
        )
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                abort_if_cancelled(&e)?;
                warn!(site = %site_id, error = %e, "deciding without energy history");
                Vec::new()
            }
        };

        // 10. Decide.
        let mut action = controller::decide(
            status.timestamp,
            &status,
            &current_price,
            &future_prices,
            &history,
            &settings,
        );
        action.timestamp = now;
        if settings.dry_run {
            action.dry_run = true;
        }

        // 11. Command the device.
        let mut outcome_status = TickStatus::Success;
        if action.effective_battery_mode != BatteryMode::NoChange && !action.dry_run {
            if let Err(e) = io(
                cancel,
                ESS_TIMEOUT,
                "ESS set modes",
                ess.set_modes(action.effective_battery_mode, action.effective_solar_mode),
            )
            .await
            {
                abort_if_cancelled(&e)?;
                warn!(site = %site_id, error = %e, "set modes failed; next tick re-issues");
                action.failed = true;
                action.error = Some(e.to_string());
                action
                    .description
                    .push_str(&format!("; command failed: {e}"));
                outcome_status = TickStatus::Failed;
            }
        }

        // 12. Record the action; a write failure does not undo the tick.
        self.insert_action(site_id, &action, cancel).await?;
        Ok(TickOutcome {
            status: outcome_status,
            action: Some(action),
            error: None,
        })
    }

    async fn insert_action(
        &self,
        site_id: &str,
        action: &Action,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        if let Err(e) = io(
            cancel,
            STORE_TIMEOUT,
            "action write",
            self.store.insert_action(site_id, action),
        )
        .await
        {
            abort_if_cancelled(&e)?;
            error!(site = %site_id, error = %e, "recording action failed");
        }
        Ok(())
    }

    async fn backfill_energy(
        &self,
        site_id: &str,
        ess: &dyn EssAdapter,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let latest = io(
            cancel,
            STORE_TIMEOUT,
            "latest energy hour",
            self.store.latest_energy_hour(site_id),
        )
        .await?;
        let start = match latest {
            // Stored under the current schema: resume at the last hour,
            // which may still have been partial when written.
            Some((hour, version)) if version >= ENERGY_STATS_VERSION => hour,
            // Old schema or empty: rebuild the recent window.
            _ => now - chrono::Duration::days(BACKFILL_DAYS),
        };
        let mut window_start = hour_floor(start);
        while window_start < now {
            let window_end = (window_start + chrono::Duration::hours(24)).min(now);
            let rows = io(
                cancel,
                ESS_TIMEOUT,
                "energy history fetch",
                ess.get_energy_history(window_start, window_end),
            )
            .await?;
            for row in &rows {
                io(
                    cancel,
                    STORE_TIMEOUT,
                    "energy history write",
                    self.store
                        .upsert_energy_stats(site_id, row, ENERGY_STATS_VERSION),
                )
                .await?;
            }
            window_start = window_end;
        }
        Ok(())
    }

    async fn backfill_prices(
        &self,
        source: &Arc<dyn PriceSource>,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let provider = source.provider().to_owned();
        let latest = io(
            cancel,
            STORE_TIMEOUT,
            "latest price hour",
            self.store.latest_price_hour(&provider),
        )
        .await?;
        let start = match latest {
            Some((hour, version)) if version >= PRICE_VERSION => hour,
            _ => now - chrono::Duration::days(BACKFILL_DAYS),
        };
        let mut window_start = hour_floor(start);
        while window_start < now {
            let window_end = (window_start + chrono::Duration::hours(24)).min(now);
            let prices = io(
                cancel,
                PRICE_TIMEOUT,
                "confirmed prices",
                source.confirmed(window_start, window_end, now),
            )
            .await?;
            for price in &prices {
                io(
                    cancel,
                    STORE_TIMEOUT,
                    "price history write",
                    self.store.upsert_price(&provider, price, PRICE_VERSION),
                )
                .await?;
            }
            window_start = window_end;
        }
        Ok(())
    }
}

/// Propagate cancellation; any other error is the caller's to handle.
fn abort_if_cancelled(e: &PipelineError) -> Result<(), PipelineError> {
    if matches!(e, PipelineError::Cancelled) {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

/// A tick that aborted before any decision: nothing commanded, the
/// failure recorded.
fn failed_action(now: DateTime<Utc>, what: &str, error: &PipelineError) -> Action {
    let mut action = Action::new(now, ActionReason::SufficientBattery);
    action.failed = true;
    action.error = Some(error.to_string());
    action.description = format!("{what}: {error}; no decision taken");
    action
}
