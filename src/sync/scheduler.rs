//! Periodic background sync.
//!
//! Ticks on a fixed interval, lists every active integration, and syncs the
//! ones whose last run is older than the freshness window. Users within a
//! batch are staggered to avoid bursting every provider API at once. A failed
//! user is logged and the batch moves on.

use crate::config::AppConfig;
use crate::providers::Provider;
use crate::store::IntegrationStore;
use crate::sync::SyncOrchestrator;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    integrations: Arc<IntegrationStore>,
    tick: Duration,
    freshness: Duration,
    stagger: Duration,
}

impl SyncScheduler {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        integrations: Arc<IntegrationStore>,
        config: &AppConfig,
    ) -> Self {
        Self {
            orchestrator,
            integrations,
            tick: config.sync_interval,
            freshness: config.sync_freshness,
            stagger: config.sync_stagger,
        }
    }

    /// Spawns the scheduler loop. The first batch runs one full interval
    /// after startup, not immediately.
    pub fn start(self: Arc<Self>) {
        info!(
            interval_secs = self.tick.as_secs(),
            freshness_secs = self.freshness.as_secs(),
            "Starting sync scheduler"
        );
        tokio::spawn(async move {
            let mut ticker = interval(self.tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval() fires immediately; consume the first tick
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.run_batch().await;
            }
        });
    }

    /// Runs one batch over every active integration. Returns the number of
    /// users actually synced.
    pub async fn run_batch(&self) -> usize {
        let pairs = match self.integrations.list_all_active() {
            Ok(pairs) => pairs,
            Err(err) => {
                warn!(error = %err, "Could not list active integrations, skipping batch");
                return 0;
            }
        };

        debug!(candidates = pairs.len(), "Scheduler batch starting");
        let mut synced = 0;
        for (user_id, provider) in pairs {
            if self.is_fresh(&user_id, provider) {
                debug!(user_id = %user_id, provider = %provider, "Recently synced, skipping");
                continue;
            }

            if synced > 0 && !self.stagger.is_zero() {
                sleep(self.stagger).await;
            }

            match self.orchestrator.sync_user(&user_id, provider).await {
                Ok(report) => {
                    synced += 1;
                    debug!(
                        user_id = %user_id,
                        provider = %provider,
                        accounts = report.accounts_synced,
                        "Scheduled sync complete"
                    );
                }
                Err(err) => {
                    warn!(
                        user_id = %user_id,
                        provider = %provider,
                        error = %err,
                        "Scheduled sync failed, continuing batch"
                    );
                }
            }
        }

        if synced > 0 {
            info!(synced, "Scheduler batch finished");
        }
        synced
    }

    /// True when the integration synced within the freshness window. A store
    /// read failure counts as stale so the sync still gets a chance to run.
    fn is_fresh(&self, user_id: &str, provider: Provider) -> bool {
        let last_sync = match self.integrations.get(user_id, provider) {
            Ok(Some(record)) => record.last_sync_at,
            _ => None,
        };
        match last_sync {
            Some(at) => {
                let age = Utc::now() - at;
                age.to_std()
                    .map(|age| age < self.freshness)
                    .unwrap_or(false)
            }
            None => false,
        }
    }
}
