//! Background reclamation of expired objects and orphaned payloads.
//!
//! Expiry is also enforced on every read, so the sweeper only reclaims space;
//! it is never what makes an expired object unreachable.

use super::{object_store::ObjectStore, registry::MetadataRegistry};
use crate::clock::Clock;
use chrono::Duration;
use std::{sync::Arc, time::Instant};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default sweep interval in seconds (1 hour).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;
/// Payloads younger than this are never treated as orphans.
pub const DEFAULT_ORPHAN_GRACE_SECS: u64 = 3600;
const PAGE_SIZE: i64 = 100;

#[derive(Clone, Debug)]
pub struct SweepConfig {
    pub interval: std::time::Duration,
    pub orphan_grace: Duration,
    pub page_size: i64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: std::time::Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            orphan_grace: Duration::seconds(DEFAULT_ORPHAN_GRACE_SECS as i64),
            page_size: PAGE_SIZE,
        }
    }
}

/// What one sweep did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_found: usize,
    pub expired_removed: usize,
    pub payload_failures: usize,
    pub record_failures: usize,
    pub orphans_removed: usize,
    pub duration_ms: u128,
}

#[derive(Clone)]
pub struct Sweeper {
    registry: Arc<dyn MetadataRegistry>,
    store: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
    config: SweepConfig,
    running: Arc<Mutex<()>>,
}

impl Sweeper {
    pub fn new(
        registry: Arc<dyn MetadataRegistry>,
        store: Arc<dyn ObjectStore>,
        clock: Arc<dyn Clock>,
        config: SweepConfig,
    ) -> Self {
        Self {
            registry,
            store,
            clock,
            config,
            running: Arc::new(Mutex::new(())),
        }
    }

    /// Run one sweep unless another is still in progress, in which case
    /// `None` is returned and nothing is touched.
    pub async fn try_sweep(&self) -> Option<SweepReport> {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("previous sweep still running, skipping this tick");
            return None;
        };
        Some(self.sweep().await)
    }

    async fn sweep(&self) -> SweepReport {
        let started = Instant::now();
        let now = self.clock.now();
        let mut report = SweepReport::default();

        let mut cursor = None;
        loop {
            let page = match self
                .registry
                .list_expired(now, cursor, self.config.page_size)
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    error!(error = %err, "failed to list expired objects; retrying next tick");
                    break;
                }
            };
            let Some(last) = page.last() else { break };
            cursor = Some(last.id);
            report.expired_found += page.len();

            for expired in page {
                // Payload before record: a record must never outlive its bytes.
                if let Err(err) = self.store.delete(&expired.storage_locator).await {
                    report.payload_failures += 1;
                    warn!(
                        id = %expired.id,
                        locator = %expired.storage_locator,
                        error = %err,
                        "failed to delete expired payload"
                    );
                }
                match self.registry.delete(expired.id).await {
                    Ok(_) => {
                        report.expired_removed += 1;
                        debug!(id = %expired.id, "reclaimed expired object");
                    }
                    Err(err) => {
                        report.record_failures += 1;
                        warn!(id = %expired.id, error = %err, "failed to delete expired record");
                    }
                }
            }
        }

        report.orphans_removed = self.reclaim_orphans(now - self.config.orphan_grace).await;
        report.duration_ms = started.elapsed().as_millis();

        info!(
            expired_found = report.expired_found,
            expired_removed = report.expired_removed,
            payload_failures = report.payload_failures,
            record_failures = report.record_failures,
            orphans_removed = report.orphans_removed,
            duration_ms = report.duration_ms as u64,
            "sweep completed"
        );
        report
    }

    /// Delete payloads older than `cutoff` that no record points at.
    async fn reclaim_orphans(&self, cutoff: chrono::DateTime<chrono::Utc>) -> usize {
        let locators = match self.store.list_locators(cutoff).await {
            Ok(locators) => locators,
            Err(err) => {
                warn!(error = %err, "failed to list stored payloads for orphan scan");
                return 0;
            }
        };

        let mut removed = 0;
        for locator in locators {
            match self.registry.locator_in_use(&locator).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(err) => {
                    warn!(%locator, error = %err, "orphan check failed");
                    continue;
                }
            }
            match self.store.delete(&locator).await {
                Ok(()) => {
                    removed += 1;
                    info!(%locator, "removed orphaned payload");
                }
                Err(err) => warn!(%locator, error = %err, "failed to remove orphaned payload"),
            }
        }
        removed
    }

    /// Sweep on a fixed interval until `cancel` fires. The first tick runs
    /// immediately.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "sweeper started (interval: {} seconds)",
                self.config.interval.as_secs()
            );
            let mut timer = interval(self.config.interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("sweeper stopped");
                        break;
                    }
                    _ = timer.tick() => {
                        self.try_sweep().await;
                    }
                }
            }
        })
    }
}
