use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{FixedOffset, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use esspilot::config::AppConfig;
use esspilot::credentials::PlainCipher;
use esspilot::ess::sim::SimConnector;
use esspilot::ess::EssConnector;
use esspilot::pipeline::UpdatePipeline;
use esspilot::pricefeed::FeedRegistry;
use esspilot::store::memory::MemoryStore;
use esspilot::store::Store;
use esspilot::sweeper::FleetSweeper;
use esspilot::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let cfg = AppConfig::load()?;

    let store: Arc<dyn Store> = match cfg.storage_backend.as_str() {
        "memory" => Arc::new(MemoryStore::new()),
        other => anyhow::bail!("unknown storage backend: {other}"),
    };
    let registry = Arc::new(FeedRegistry::with_defaults()?);
    let offset = FixedOffset::west_opt(6 * 3600).context("device zone offset")?;
    let connector: Arc<dyn EssConnector> = Arc::new(SimConnector::new(offset));
    let pipeline = Arc::new(UpdatePipeline::new(
        store.clone(),
        registry,
        connector,
        Arc::new(PlainCipher),
    ));
    let sweeper = FleetSweeper::new(store, pipeline, cfg.updater.concurrency);

    info!(
        release = %cfg.release,
        listen_addr = %cfg.server.listen_addr,
        tick_minutes = cfg.updater.tick_minutes,
        "starting esspilot updater"
    );

    let cancel = CancellationToken::new();
    let mut ticks = tokio::time::interval(Duration::from_secs(cfg.updater.tick_minutes * 60));
    let shutdown = telemetry::shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                cancel.cancel();
                break;
            }
            _ = ticks.tick() => {
                let now = Utc::now();
                match cfg.updater.single_site.as_deref() {
                    Some(site) => {
                        let outcome = sweeper.sweep_site(site, now, &cancel).await;
                        info!(%site, status = ?outcome.status, "single-site tick finished");
                    }
                    None => {
                        if let Err(e) = sweeper.sweep(now, &cancel).await {
                            error!(error = %e, "fleet sweep failed");
                        }
                    }
                }
            }
        }
    }

    warn!("shutdown complete");
    Ok(())
}
