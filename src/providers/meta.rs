//! Meta Marketing API adapter.
//!
//! Talks to the Graph API (`/me/adaccounts`, `/{account}/campaigns`,
//! `/{account}/insights`) and normalizes the responses. Graph returns most
//! numeric fields as strings; budgets are minor-currency units (cents).

use crate::error::{FetchKind, SyncError};
use crate::oauth::OAuthExchange;
use crate::providers::retry::{call_with_retries, RetryPolicy};
use crate::providers::{AdAccount, AdsAdapter, Campaign, DateRange, MetricRecord, Provider};
use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://graph.facebook.com/v19.0";

/// Graph API list envelope.
#[derive(Debug, Deserialize)]
struct GraphList<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct MetaAccount {
    id: String,
    name: Option<String>,
    currency: Option<String>,
    timezone_name: Option<String>,
    account_status: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct MetaCampaign {
    id: String,
    name: Option<String>,
    status: Option<String>,
    objective: Option<String>,
    start_time: Option<String>,
    stop_time: Option<String>,
    daily_budget: Option<String>,
    lifetime_budget: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetaAction {
    action_type: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct MetaInsightRow {
    campaign_id: String,
    date_start: String,
    impressions: Option<String>,
    clicks: Option<String>,
    spend: Option<String>,
    reach: Option<String>,
    frequency: Option<String>,
    ctr: Option<String>,
    cpc: Option<String>,
    cpm: Option<String>,
    actions: Option<Vec<MetaAction>>,
}

/// Adapter for Meta ad accounts. Holds a per-user HTTP client cache; tokens
/// are fetched per call through the exchange module.
pub struct MetaAdsAdapter {
    exchange: Arc<OAuthExchange>,
    base_url: String,
    clients: DashMap<String, reqwest::Client>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl MetaAdsAdapter {
    pub fn new(exchange: Arc<OAuthExchange>, timeout: Duration) -> Self {
        Self::with_base_url(exchange, timeout, DEFAULT_BASE_URL.to_string())
    }

    /// Custom base URL for testing against a mock server.
    pub fn with_base_url(exchange: Arc<OAuthExchange>, timeout: Duration, base_url: String) -> Self {
        Self {
            exchange,
            base_url,
            clients: DashMap::new(),
            retry: RetryPolicy::default(),
            timeout,
        }
    }

    /// Get-or-create the cached client handle for a user.
    fn client_for(&self, user_id: &str) -> reqwest::Client {
        self.clients
            .entry(user_id.to_string())
            .or_insert_with(|| {
                debug!(user_id = %user_id, "Creating Meta client handle");
                reqwest::Client::builder()
                    .timeout(self.timeout)
                    .build()
                    .expect("Failed to build HTTP client")
            })
            .clone()
    }

    /// One authenticated GET against the Graph API, mapped to raw upstream
    /// errors for the retry policy.
    async fn fetch<T: DeserializeOwned>(&self, user_id: &str, url: &str) -> Result<T, SyncError> {
        let token = self
            .exchange
            .get_access_token(user_id, Provider::Meta)
            .await?;
        let client = self.client_for(user_id);

        let response = client
            .get(url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Upstream {
                status: status.as_u16(),
                retry_after,
                message: body,
            });
        }

        response.json::<T>().await.map_err(|e| SyncError::Upstream {
            status: 502,
            retry_after: None,
            message: format!("unparsable Graph response: {}", e),
        })
    }
}

#[async_trait]
impl AdsAdapter for MetaAdsAdapter {
    fn provider(&self) -> Provider {
        Provider::Meta
    }

    async fn list_accounts(&self, user_id: &str) -> Result<Vec<AdAccount>, SyncError> {
        let url = format!(
            "{}/me/adaccounts?fields=id,name,currency,timezone_name,account_status",
            self.base_url
        );
        let list: GraphList<MetaAccount> =
            call_with_retries(self.retry, None, || self.fetch(user_id, &url))
                .await
                .map_err(|e| classify_fetch(FetchKind::Accounts, e))?;

        Ok(list.data.into_iter().map(normalize_account).collect())
    }

    async fn list_campaigns(
        &self,
        user_id: &str,
        account_id: &str,
    ) -> Result<Vec<Campaign>, SyncError> {
        let url = format!(
            "{}/{}/campaigns?fields=id,name,status,objective,start_time,stop_time,daily_budget,lifetime_budget",
            self.base_url, account_id
        );
        let list: GraphList<MetaCampaign> =
            call_with_retries(self.retry, None, || self.fetch(user_id, &url))
                .await
                .map_err(|e| classify_fetch(FetchKind::Campaigns, e))?;

        Ok(list
            .data
            .into_iter()
            .map(|c| normalize_campaign(c, user_id, account_id))
            .collect())
    }

    async fn list_metrics(
        &self,
        user_id: &str,
        account_id: &str,
        range: &DateRange,
    ) -> Result<Vec<MetricRecord>, SyncError> {
        let time_range = format!(
            r#"{{"since":"{}","until":"{}"}}"#,
            range.since, range.until
        );
        let url = format!(
            "{}/{}/insights?level=campaign&time_increment=1&fields=campaign_id,impressions,clicks,spend,reach,frequency,ctr,cpc,cpm,actions&time_range={}",
            self.base_url,
            account_id,
            urlencoding::encode(&time_range)
        );
        let list: GraphList<MetaInsightRow> =
            call_with_retries(self.retry, None, || self.fetch(user_id, &url))
                .await
                .map_err(|e| classify_fetch(FetchKind::Metrics, e))?;

        Ok(list.data.into_iter().filter_map(normalize_insight).collect())
    }

    fn invalidate(&self, user_id: &str) {
        if self.clients.remove(user_id).is_some() {
            debug!(user_id = %user_id, "Evicted Meta client handle");
        }
    }
}

/// Maps reqwest transport failures to retryable upstream errors (timeouts
/// count as transient per the retry contract).
pub(super) fn map_transport_error(e: reqwest::Error) -> SyncError {
    let status = if e.is_timeout() { 408 } else { 503 };
    SyncError::Upstream {
        status,
        retry_after: None,
        message: e.to_string(),
    }
}

/// Reads a `Retry-After: <seconds>` header if present.
pub(super) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Terminal upstream failures become typed fetch errors; credential errors
/// (not-found, expired, decryption) pass through untouched.
pub(super) fn classify_fetch(kind: FetchKind, err: SyncError) -> SyncError {
    match err {
        SyncError::Upstream {
            status, message, ..
        } => SyncError::Fetch {
            kind,
            status,
            message,
        },
        other => other,
    }
}

fn normalize_account(raw: MetaAccount) -> AdAccount {
    AdAccount {
        id: raw.id,
        name: raw.name.unwrap_or_default(),
        currency: raw.currency.unwrap_or_default(),
        timezone: raw.timezone_name.unwrap_or_default(),
        status: match raw.account_status {
            Some(1) => "ACTIVE".to_string(),
            Some(2) => "DISABLED".to_string(),
            Some(3) => "UNSETTLED".to_string(),
            Some(other) => format!("STATUS_{}", other),
            None => "UNKNOWN".to_string(),
        },
        // Meta has no manager/client distinction; every account is billable
        is_manager: false,
    }
}

fn normalize_campaign(raw: MetaCampaign, user_id: &str, account_id: &str) -> Campaign {
    Campaign {
        external_id: raw.id,
        platform: Provider::Meta,
        user_id: user_id.to_string(),
        account_id: account_id.to_string(),
        name: raw.name.unwrap_or_default(),
        status: raw.status.unwrap_or_else(|| "UNKNOWN".to_string()),
        campaign_type: raw.objective,
        start_date: raw.start_time.as_deref().and_then(parse_graph_date),
        end_date: raw.stop_time.as_deref().and_then(parse_graph_date),
        // Budgets arrive as strings of minor units (cents)
        daily_budget: raw.daily_budget.as_deref().and_then(parse_cents),
        lifetime_budget: raw.lifetime_budget.as_deref().and_then(parse_cents),
    }
}

fn normalize_insight(raw: MetaInsightRow) -> Option<MetricRecord> {
    let date = NaiveDate::parse_from_str(&raw.date_start, "%Y-%m-%d").ok()?;
    let conversions = raw
        .actions
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .filter(|a| {
            a.action_type == "lead"
                || a.action_type == "purchase"
                || a.action_type.starts_with("offsite_conversion")
        })
        .filter_map(|a| a.value.parse::<f64>().ok())
        .sum();

    Some(MetricRecord {
        campaign_external_id: raw.campaign_id,
        platform: Provider::Meta,
        date,
        impressions: parse_i64(raw.impressions.as_deref()),
        clicks: parse_i64(raw.clicks.as_deref()),
        spend: parse_f64(raw.spend.as_deref()),
        conversions,
        ctr: parse_f64(raw.ctr.as_deref()),
        cpc: parse_f64(raw.cpc.as_deref()),
        cpm: parse_f64(raw.cpm.as_deref()),
        reach: parse_i64(raw.reach.as_deref()),
        frequency: parse_f64(raw.frequency.as_deref()),
    })
}

/// Graph timestamps are RFC 3339 with offsets; only the date matters here.
fn parse_graph_date(raw: &str) -> Option<NaiveDate> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.date_naive())
        .ok()
        .or_else(|| NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d").ok())
}

fn parse_cents(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().map(|cents| cents / 100.0)
}

fn parse_i64(raw: Option<&str>) -> i64 {
    raw.and_then(|v| v.parse().ok()).unwrap_or(0)
}

fn parse_f64(raw: Option<&str>) -> f64 {
    raw.and_then(|v| v.parse().ok()).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ProviderCredentials};
    use crate::oauth::TokenSet;
    use crate::store::IntegrationStore;
    use crate::vault::Vault;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter_for(server: &MockServer) -> MetaAdsAdapter {
        let config = Arc::new(AppConfig {
            encryption_secret: "meta-test-secret".to_string(),
            webhook_verify_token: "verify".to_string(),
            webhook_signing_secret: "signing".to_string(),
            meta: Some(ProviderCredentials {
                client_id: "meta-app-id".to_string(),
                client_secret: "meta-app-secret".to_string(),
                developer_token: None,
            }),
            google: None,
            callback_base_url: "http://localhost:3000".to_string(),
            frontend_url: "http://localhost:5173/integrations".to_string(),
            db_path: ":memory:".to_string(),
            listen_addr: "127.0.0.1:0".to_string(),
            sync_interval: Duration::from_secs(3600),
            sync_freshness: Duration::from_secs(3300),
            sync_stagger: Duration::from_secs(0),
            http_timeout: Duration::from_secs(5),
        });
        let vault = Arc::new(Vault::new(&config.encryption_secret));
        let integrations = Arc::new(IntegrationStore::new(":memory:").unwrap());
        let exchange = Arc::new(OAuthExchange::new(config, vault, integrations));
        exchange
            .store_tokens(
                "user-1",
                Provider::Meta,
                &TokenSet {
                    access_token: "meta-access".to_string(),
                    refresh_token: None,
                    expires_in: Some(3600),
                },
            )
            .unwrap();
        MetaAdsAdapter::with_base_url(exchange, Duration::from_secs(5), server.uri())
    }

    #[tokio::test]
    async fn test_list_accounts_against_graph_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me/adaccounts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"id": "act_123", "name": "Acme", "currency": "USD",
                     "timezone_name": "America/New_York", "account_status": 1},
                    {"id": "act_456", "name": "Beta", "currency": "EUR",
                     "timezone_name": "Europe/Berlin", "account_status": 2}
                ],
                "paging": {"cursors": {"before": "a", "after": "b"}}
            })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let accounts = adapter.list_accounts("user-1").await.unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].id, "act_123");
        assert_eq!(accounts[0].status, "ACTIVE");
        assert_eq!(accounts[1].status, "DISABLED");
    }

    #[tokio::test]
    async fn test_missing_integration_surfaces_not_found() {
        let server = MockServer::start().await;
        let adapter = adapter_for(&server);
        let err = adapter.list_accounts("stranger").await.unwrap_err();
        assert_eq!(err.code(), "INTEGRATION_NOT_FOUND");
    }

    #[test]
    fn test_account_status_mapping() {
        let account = normalize_account(MetaAccount {
            id: "act_123".to_string(),
            name: Some("Acme".to_string()),
            currency: Some("USD".to_string()),
            timezone_name: Some("America/New_York".to_string()),
            account_status: Some(1),
        });
        assert_eq!(account.status, "ACTIVE");
        assert!(!account.is_manager);
    }

    #[test]
    fn test_campaign_budget_cents_to_decimal() {
        let campaign = normalize_campaign(
            MetaCampaign {
                id: "c1".to_string(),
                name: Some("Launch".to_string()),
                status: Some("ACTIVE".to_string()),
                objective: Some("CONVERSIONS".to_string()),
                start_time: Some("2026-03-01T00:00:00-0800".to_string()),
                stop_time: None,
                daily_budget: Some("5000".to_string()),
                lifetime_budget: None,
            },
            "u1",
            "act_123",
        );
        assert_eq!(campaign.daily_budget, Some(50.0));
        assert_eq!(
            campaign.start_date,
            NaiveDate::from_ymd_opt(2026, 3, 1)
        );
    }

    #[test]
    fn test_insight_normalization_sums_conversion_actions() {
        let record = normalize_insight(MetaInsightRow {
            campaign_id: "c1".to_string(),
            date_start: "2026-03-10".to_string(),
            impressions: Some("1200".to_string()),
            clicks: Some("60".to_string()),
            spend: Some("34.56".to_string()),
            reach: Some("900".to_string()),
            frequency: Some("1.33".to_string()),
            ctr: Some("5.0".to_string()),
            cpc: Some("0.58".to_string()),
            cpm: Some("28.8".to_string()),
            actions: Some(vec![
                MetaAction {
                    action_type: "lead".to_string(),
                    value: "3".to_string(),
                },
                MetaAction {
                    action_type: "offsite_conversion.fb_pixel_purchase".to_string(),
                    value: "2".to_string(),
                },
                MetaAction {
                    action_type: "link_click".to_string(),
                    value: "60".to_string(),
                },
            ]),
        })
        .unwrap();

        assert_eq!(record.impressions, 1200);
        assert_eq!(record.conversions, 5.0);
        assert_eq!(record.spend, 34.56);
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2026, 3, 10).unwrap());
    }

    #[test]
    fn test_unparsable_insight_date_is_skipped() {
        assert!(normalize_insight(MetaInsightRow {
            campaign_id: "c1".to_string(),
            date_start: "not-a-date".to_string(),
            impressions: None,
            clicks: None,
            spend: None,
            reach: None,
            frequency: None,
            ctr: None,
            cpc: None,
            cpm: None,
            actions: None,
        })
        .is_none());
    }
}
