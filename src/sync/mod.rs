//! Sync orchestration.
//!
//! One sync run pulls accounts, campaigns, and daily metrics for a single
//! (user, provider) pair and upserts them. Account failures are isolated: one
//! bad account never aborts the run, and `last_sync_at` advances whenever a
//! run completes, so a single flaky account cannot pin a user at the front of
//! the scheduler queue forever.

pub mod scheduler;

use crate::error::SyncError;
use crate::providers::{AdsAdapter, DateRange, Provider};
use crate::store::{CampaignStore, IntegrationStore};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Metric lookback window for every sync run, in days.
const METRICS_LOOKBACK_DAYS: i64 = 30;

/// Outcome of one sync run.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub provider: Provider,
    pub accounts_total: usize,
    pub accounts_synced: usize,
    pub accounts_failed: usize,
    pub campaigns_upserted: usize,
    pub metrics_upserted: usize,
}

/// Routes sync runs to the registered platform adapters and persists the
/// normalized results.
pub struct SyncOrchestrator {
    adapters: HashMap<Provider, Arc<dyn AdsAdapter>>,
    integrations: Arc<IntegrationStore>,
    campaigns: Arc<CampaignStore>,
}

impl SyncOrchestrator {
    pub fn new(integrations: Arc<IntegrationStore>, campaigns: Arc<CampaignStore>) -> Self {
        Self {
            adapters: HashMap::new(),
            integrations,
            campaigns,
        }
    }

    /// Registers a platform adapter. Last registration per provider wins.
    pub fn register(&mut self, adapter: Arc<dyn AdsAdapter>) {
        self.adapters.insert(adapter.provider(), adapter);
    }

    /// Looks up the adapter for a provider; a provider without a registered
    /// adapter is a deployment configuration problem.
    pub fn adapter(&self, provider: Provider) -> Result<&Arc<dyn AdsAdapter>, SyncError> {
        self.adapters.get(&provider).ok_or_else(|| {
            SyncError::Configuration(format!(
                "no adapter registered for provider '{}'",
                provider.as_str()
            ))
        })
    }

    /// Runs one full sync for a (user, provider) pair.
    ///
    /// Manager accounts are skipped. Failures inside one account are logged
    /// and counted but do not abort the remaining accounts. Account listing
    /// failure aborts the run before `last_sync_at` is touched.
    pub async fn sync_user(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<SyncReport, SyncError> {
        let adapter = self.adapter(provider)?;
        let started = std::time::Instant::now();

        let accounts = adapter.list_accounts(user_id).await?;
        let range = DateRange::last_days(METRICS_LOOKBACK_DAYS);

        let mut report = SyncReport {
            provider,
            accounts_total: 0,
            accounts_synced: 0,
            accounts_failed: 0,
            campaigns_upserted: 0,
            metrics_upserted: 0,
        };

        for account in &accounts {
            if account.is_manager {
                debug!(
                    account_id = %account.id,
                    "Skipping manager account (holds no billable campaigns)"
                );
                continue;
            }
            report.accounts_total += 1;

            match self
                .sync_account(adapter.as_ref(), user_id, &account.id, &range)
                .await
            {
                Ok((campaigns, metrics)) => {
                    report.accounts_synced += 1;
                    report.campaigns_upserted += campaigns;
                    report.metrics_upserted += metrics;
                }
                Err(err) => {
                    report.accounts_failed += 1;
                    warn!(
                        user_id = %user_id,
                        provider = %provider,
                        account_id = %account.id,
                        error = %err,
                        "Account sync failed, continuing with remaining accounts"
                    );
                }
            }
        }

        self.integrations
            .set_last_sync(user_id, provider, Utc::now())?;

        info!(
            user_id = %user_id,
            provider = %provider,
            accounts_synced = report.accounts_synced,
            accounts_failed = report.accounts_failed,
            campaigns = report.campaigns_upserted,
            metrics = report.metrics_upserted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sync run complete"
        );
        Ok(report)
    }

    /// Pulls and persists one account's campaigns and metrics.
    async fn sync_account(
        &self,
        adapter: &dyn AdsAdapter,
        user_id: &str,
        account_id: &str,
        range: &DateRange,
    ) -> Result<(usize, usize), SyncError> {
        let campaigns = adapter.list_campaigns(user_id, account_id).await?;
        for campaign in &campaigns {
            self.campaigns.upsert_campaign(campaign)?;
        }

        let metrics = adapter.list_metrics(user_id, account_id, range).await?;
        for metric in &metrics {
            self.campaigns.upsert_metric(metric)?;
        }

        Ok((campaigns.len(), metrics.len()))
    }

    /// Fire-and-forget sync, used by webhook dispatch and the manual sync
    /// endpoint's background path. Failures reach the observer; the default
    /// observer logs them.
    pub fn spawn_sync(self: &Arc<Self>, user_id: String, provider: Provider) {
        self.spawn_sync_observed(user_id, provider, |user_id, provider, err| {
            tracing::error!(
                user_id = %user_id,
                provider = %provider,
                error = %err,
                "Background sync failed"
            );
        });
    }

    /// Detached sync with an explicit failure observer (tests hook in here).
    pub fn spawn_sync_observed<F>(self: &Arc<Self>, user_id: String, provider: Provider, on_failure: F)
    where
        F: FnOnce(&str, Provider, SyncError) + Send + 'static,
    {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = orchestrator.sync_user(&user_id, provider).await {
                on_failure(&user_id, provider, err);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{AdAccount, Campaign, MetricRecord};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted adapter: fixed accounts, one optionally failing account id.
    struct ScriptedAdapter {
        accounts: Vec<AdAccount>,
        failing_account: Option<String>,
        campaign_calls: AtomicUsize,
    }

    impl ScriptedAdapter {
        fn new(accounts: Vec<AdAccount>, failing_account: Option<String>) -> Self {
            Self {
                accounts,
                failing_account,
                campaign_calls: AtomicUsize::new(0),
            }
        }
    }

    fn account(id: &str, is_manager: bool) -> AdAccount {
        AdAccount {
            id: id.to_string(),
            name: format!("Account {}", id),
            currency: "USD".to_string(),
            timezone: "UTC".to_string(),
            status: "ACTIVE".to_string(),
            is_manager,
        }
    }

    #[async_trait]
    impl AdsAdapter for ScriptedAdapter {
        fn provider(&self) -> Provider {
            Provider::Meta
        }

        async fn list_accounts(&self, _user_id: &str) -> Result<Vec<AdAccount>, SyncError> {
            Ok(self.accounts.clone())
        }

        async fn list_campaigns(
            &self,
            user_id: &str,
            account_id: &str,
        ) -> Result<Vec<Campaign>, SyncError> {
            self.campaign_calls.fetch_add(1, Ordering::SeqCst);
            if self.failing_account.as_deref() == Some(account_id) {
                return Err(SyncError::Fetch {
                    kind: crate::error::FetchKind::Campaigns,
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            Ok(vec![Campaign {
                external_id: format!("c-{}", account_id),
                platform: Provider::Meta,
                user_id: user_id.to_string(),
                account_id: account_id.to_string(),
                name: "Campaign".to_string(),
                status: "ACTIVE".to_string(),
                campaign_type: None,
                start_date: None,
                end_date: None,
                daily_budget: None,
                lifetime_budget: None,
            }])
        }

        async fn list_metrics(
            &self,
            _user_id: &str,
            account_id: &str,
            _range: &DateRange,
        ) -> Result<Vec<MetricRecord>, SyncError> {
            Ok(vec![MetricRecord {
                campaign_external_id: format!("c-{}", account_id),
                platform: Provider::Meta,
                date: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
                impressions: 100,
                clicks: 10,
                spend: 5.0,
                conversions: 1.0,
                ctr: 10.0,
                cpc: 0.5,
                cpm: 50.0,
                reach: 80,
                frequency: 1.25,
            }])
        }

        fn invalidate(&self, _user_id: &str) {}
    }

    fn orchestrator_with(adapter: ScriptedAdapter) -> SyncOrchestrator {
        let integrations = Arc::new(IntegrationStore::new(":memory:").unwrap());
        integrations
            .upsert(&crate::store::IntegrationRecord {
                user_id: "u1".to_string(),
                provider: Provider::Meta,
                access_token: "enc".to_string(),
                refresh_token: None,
                expires_at: None,
                is_active: true,
                last_sync_at: None,
            })
            .unwrap();
        let campaigns = Arc::new(CampaignStore::new(":memory:").unwrap());
        let mut orchestrator = SyncOrchestrator::new(integrations, campaigns);
        orchestrator.register(Arc::new(adapter));
        orchestrator
    }

    #[tokio::test]
    async fn test_sync_user_happy_path() {
        let orchestrator = orchestrator_with(ScriptedAdapter::new(
            vec![account("a1", false), account("a2", false)],
            None,
        ));
        let report = orchestrator.sync_user("u1", Provider::Meta).await.unwrap();
        assert_eq!(report.accounts_total, 2);
        assert_eq!(report.accounts_synced, 2);
        assert_eq!(report.accounts_failed, 0);
        assert_eq!(report.campaigns_upserted, 2);
        assert_eq!(report.metrics_upserted, 2);
        assert_eq!(orchestrator.campaigns.campaign_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_manager_accounts_are_skipped() {
        let orchestrator = orchestrator_with(ScriptedAdapter::new(
            vec![
                account("client-1", false),
                account("mcc-1", true),
                account("client-2", false),
            ],
            None,
        ));
        let report = orchestrator.sync_user("u1", Provider::Meta).await.unwrap();
        assert_eq!(report.accounts_total, 2);
        assert_eq!(report.accounts_synced, 2);
        // The manager account never reached the campaign fetch
        assert_eq!(orchestrator.campaigns.campaign_count().unwrap(), 2);
        assert!(orchestrator
            .campaigns
            .get_campaign_summary("c-mcc-1", Provider::Meta)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_one_failing_account_does_not_abort_run() {
        let orchestrator = orchestrator_with(ScriptedAdapter::new(
            vec![account("a1", false), account("bad", false), account("a3", false)],
            Some("bad".to_string()),
        ));
        let report = orchestrator.sync_user("u1", Provider::Meta).await.unwrap();
        assert_eq!(report.accounts_synced, 2);
        assert_eq!(report.accounts_failed, 1);
        assert_eq!(orchestrator.campaigns.campaign_count().unwrap(), 2);

        // last_sync_at still advanced despite the failure
        let record = orchestrator
            .integrations
            .get("u1", Provider::Meta)
            .unwrap()
            .unwrap();
        assert!(record.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn test_resync_is_idempotent() {
        let orchestrator = orchestrator_with(ScriptedAdapter::new(
            vec![account("a1", false)],
            None,
        ));
        orchestrator.sync_user("u1", Provider::Meta).await.unwrap();
        orchestrator.sync_user("u1", Provider::Meta).await.unwrap();
        assert_eq!(orchestrator.campaigns.campaign_count().unwrap(), 1);
        assert_eq!(orchestrator.campaigns.metric_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_provider_is_configuration_error() {
        let integrations = Arc::new(IntegrationStore::new(":memory:").unwrap());
        let campaigns = Arc::new(CampaignStore::new(":memory:").unwrap());
        let orchestrator = SyncOrchestrator::new(integrations, campaigns);
        let err = orchestrator
            .sync_user("u1", Provider::GoogleAds)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }
}
