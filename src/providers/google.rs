//! Google Ads API adapter.
//!
//! All reads go through `googleAds:searchStream` with GAQL queries, except
//! account discovery which starts from `customers:listAccessibleCustomers`.
//! Google serializes int64 metrics as JSON strings and monetary values in
//! micros; both are normalized here. Manager (MCC) accounts are surfaced with
//! `is_manager` set so the orchestrator can skip them.

use crate::config::AppConfig;
use crate::error::{FetchKind, SyncError};
use crate::oauth::OAuthExchange;
use crate::providers::meta::{classify_fetch, map_transport_error, parse_retry_after};
use crate::providers::retry::{call_with_retries, RetryPolicy};
use crate::providers::{
    AdAccount, AdsAdapter, Campaign, DateRange, KeywordStat, MetricRecord, Provider,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use futures::FutureExt;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://googleads.googleapis.com/v16";

/// Google encodes int64 fields as JSON strings; doubles stay numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GoogleNum {
    Int(i64),
    Float(f64),
    Text(String),
}

impl GoogleNum {
    fn as_i64(&self) -> i64 {
        match self {
            GoogleNum::Int(v) => *v,
            GoogleNum::Float(v) => *v as i64,
            GoogleNum::Text(v) => v.parse().unwrap_or(0),
        }
    }

    fn as_f64(&self) -> f64 {
        match self {
            GoogleNum::Int(v) => *v as f64,
            GoogleNum::Float(v) => *v,
            GoogleNum::Text(v) => v.parse().unwrap_or(0.0),
        }
    }
}

fn micros_to_units(raw: Option<&GoogleNum>) -> f64 {
    raw.map(|v| v.as_f64() / 1_000_000.0).unwrap_or(0.0)
}

#[derive(Debug, Deserialize)]
struct ListAccessibleResponse {
    #[serde(rename = "resourceNames", default)]
    resource_names: Vec<String>,
}

/// One chunk of a `searchStream` response (the body is an array of these).
#[derive(Debug, Deserialize)]
struct SearchChunk {
    #[serde(default = "Vec::new")]
    results: Vec<GoogleRow>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleRow {
    customer_client: Option<CustomerClient>,
    campaign: Option<GoogleCampaign>,
    campaign_budget: Option<GoogleBudget>,
    metrics: Option<GoogleMetrics>,
    segments: Option<GoogleSegments>,
    ad_group_criterion: Option<AdGroupCriterion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomerClient {
    id: Option<GoogleNum>,
    descriptive_name: Option<String>,
    currency_code: Option<String>,
    time_zone: Option<String>,
    status: Option<String>,
    #[serde(default)]
    manager: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleCampaign {
    id: Option<GoogleNum>,
    name: Option<String>,
    status: Option<String>,
    advertising_channel_type: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleBudget {
    amount_micros: Option<GoogleNum>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleMetrics {
    impressions: Option<GoogleNum>,
    clicks: Option<GoogleNum>,
    cost_micros: Option<GoogleNum>,
    conversions: Option<GoogleNum>,
    ctr: Option<GoogleNum>,
    average_cpc: Option<GoogleNum>,
    average_cpm: Option<GoogleNum>,
}

#[derive(Debug, Deserialize)]
struct GoogleSegments {
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdGroupCriterion {
    keyword: Option<GoogleKeyword>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleKeyword {
    text: Option<String>,
    match_type: Option<String>,
}

/// Adapter for Google Ads accounts.
pub struct GoogleAdsAdapter {
    config: Arc<AppConfig>,
    exchange: Arc<OAuthExchange>,
    base_url: String,
    clients: DashMap<String, reqwest::Client>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl GoogleAdsAdapter {
    pub fn new(config: Arc<AppConfig>, exchange: Arc<OAuthExchange>) -> Self {
        let timeout = config.http_timeout;
        Self::with_base_url(config, exchange, timeout, DEFAULT_BASE_URL.to_string())
    }

    /// Custom base URL for testing against a mock server.
    pub fn with_base_url(
        config: Arc<AppConfig>,
        exchange: Arc<OAuthExchange>,
        timeout: Duration,
        base_url: String,
    ) -> Self {
        Self {
            config,
            exchange,
            base_url,
            clients: DashMap::new(),
            retry: RetryPolicy::default(),
            timeout,
        }
    }

    fn client_for(&self, user_id: &str) -> reqwest::Client {
        self.clients
            .entry(user_id.to_string())
            .or_insert_with(|| {
                debug!(user_id = %user_id, "Creating Google Ads client handle");
                reqwest::Client::builder()
                    .timeout(self.timeout)
                    .build()
                    .expect("Failed to build HTTP client")
            })
            .clone()
    }

    fn developer_token(&self) -> Result<&str, SyncError> {
        self.config
            .credentials_for(Provider::GoogleAds)?
            .developer_token
            .as_deref()
            .ok_or_else(|| {
                SyncError::Configuration("Google Ads developer token is not configured".into())
            })
    }

    /// Runs one authenticated request, wrapping transport and non-2xx
    /// responses for the retry policy.
    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        user_id: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, SyncError> {
        let token = self
            .exchange
            .get_access_token(user_id, Provider::GoogleAds)
            .await?;

        let response = request
            .bearer_auth(&token)
            .header("developer-token", self.developer_token()?)
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
            message: format!("unparsable Google Ads response: {}", e),
        })
    }

    /// One GAQL `searchStream` call, flattened across response chunks.
    async fn search(
        &self,
        user_id: &str,
        customer_id: &str,
        query: &str,
    ) -> Result<Vec<GoogleRow>, SyncError> {
        let url = format!(
            "{}/customers/{}/googleAds:searchStream",
            self.base_url, customer_id
        );
        let request = self
            .client_for(user_id)
            .post(&url)
            .json(&serde_json::json!({ "query": query }));
        let chunks: Vec<SearchChunk> = self.send(user_id, request).await?;
        Ok(chunks.into_iter().flat_map(|c| c.results).collect())
    }

    /// Expired-before-expiry 401s get one forced refresh and a retry.
    fn refresh_hook(&self, user_id: &str) -> impl Fn() -> futures::future::BoxFuture<'static, Result<(), SyncError>> {
        let exchange = Arc::clone(&self.exchange);
        let user_id = user_id.to_string();
        move || {
            let exchange = Arc::clone(&exchange);
            let user_id = user_id.clone();
            async move { exchange.force_refresh(&user_id).await.map(|_| ()) }.boxed()
        }
    }
}

#[async_trait]
impl AdsAdapter for GoogleAdsAdapter {
    fn provider(&self) -> Provider {
        Provider::GoogleAds
    }

    async fn list_accounts(&self, user_id: &str) -> Result<Vec<AdAccount>, SyncError> {
        let refresh = self.refresh_hook(user_id);

        let listed: ListAccessibleResponse =
            call_with_retries(self.retry, Some(&refresh), || {
                let url = format!("{}/customers:listAccessibleCustomers", self.base_url);
                let request = self.client_for(user_id).get(url);
                self.send(user_id, request)
            })
            .await
            .map_err(|e| classify_fetch(FetchKind::Accounts, e))?;

        let mut accounts = Vec::new();
        for resource_name in &listed.resource_names {
            let customer_id = resource_name
                .strip_prefix("customers/")
                .unwrap_or(resource_name);
            let rows = call_with_retries(self.retry, Some(&refresh), || {
                self.search(
                    user_id,
                    customer_id,
                    "SELECT customer_client.id, customer_client.descriptive_name, \
                     customer_client.currency_code, customer_client.time_zone, \
                     customer_client.status, customer_client.manager \
                     FROM customer_client WHERE customer_client.level = 0",
                )
            })
            .await
            .map_err(|e| classify_fetch(FetchKind::Accounts, e))?;

            for row in rows {
                if let Some(client) = row.customer_client {
                    accounts.push(normalize_account(customer_id, client));
                }
            }
        }
        Ok(accounts)
    }

    async fn list_campaigns(
        &self,
        user_id: &str,
        account_id: &str,
    ) -> Result<Vec<Campaign>, SyncError> {
        let refresh = self.refresh_hook(user_id);
        let rows = call_with_retries(self.retry, Some(&refresh), || {
            self.search(
                user_id,
                account_id,
                "SELECT campaign.id, campaign.name, campaign.status, \
                 campaign.advertising_channel_type, campaign.start_date, \
                 campaign.end_date, campaign_budget.amount_micros FROM campaign",
            )
        })
        .await
        .map_err(|e| classify_fetch(FetchKind::Campaigns, e))?;

        Ok(rows
            .into_iter()
            .filter_map(|row| normalize_campaign(row, user_id, account_id))
            .collect())
    }

    async fn list_metrics(
        &self,
        user_id: &str,
        account_id: &str,
        range: &DateRange,
    ) -> Result<Vec<MetricRecord>, SyncError> {
        let refresh = self.refresh_hook(user_id);
        let query = format!(
            "SELECT campaign.id, segments.date, metrics.impressions, metrics.clicks, \
             metrics.cost_micros, metrics.conversions, metrics.ctr, \
             metrics.average_cpc, metrics.average_cpm FROM campaign \
             WHERE segments.date BETWEEN '{}' AND '{}'",
            range.since, range.until
        );
        let rows = call_with_retries(self.retry, Some(&refresh), || {
            self.search(user_id, account_id, &query)
        })
        .await
        .map_err(|e| classify_fetch(FetchKind::Metrics, e))?;

        Ok(rows.into_iter().filter_map(normalize_metric).collect())
    }

    async fn list_keywords(
        &self,
        user_id: &str,
        account_id: &str,
        range: &DateRange,
    ) -> Result<Vec<KeywordStat>, SyncError> {
        let refresh = self.refresh_hook(user_id);
        let query = format!(
            "SELECT campaign.id, ad_group_criterion.keyword.text, \
             ad_group_criterion.keyword.match_type, metrics.impressions, \
             metrics.clicks, metrics.cost_micros FROM keyword_view \
             WHERE segments.date BETWEEN '{}' AND '{}'",
            range.since, range.until
        );
        let rows = call_with_retries(self.retry, Some(&refresh), || {
            self.search(user_id, account_id, &query)
        })
        .await
        .map_err(|e| classify_fetch(FetchKind::Keywords, e))?;

        Ok(rows.into_iter().filter_map(normalize_keyword).collect())
    }

    fn invalidate(&self, user_id: &str) {
        if self.clients.remove(user_id).is_some() {
            debug!(user_id = %user_id, "Evicted Google Ads client handle");
        }
    }
}

fn normalize_account(customer_id: &str, client: CustomerClient) -> AdAccount {
    let id = client
        .id
        .map(|v| v.as_i64().to_string())
        .unwrap_or_else(|| customer_id.to_string());
    AdAccount {
        id,
        name: client.descriptive_name.unwrap_or_default(),
        currency: client.currency_code.unwrap_or_default(),
        timezone: client.time_zone.unwrap_or_default(),
        status: client.status.unwrap_or_else(|| "UNKNOWN".to_string()),
        is_manager: client.manager,
    }
}

fn normalize_campaign(row: GoogleRow, user_id: &str, account_id: &str) -> Option<Campaign> {
    let campaign = row.campaign?;
    let external_id = campaign.id.map(|v| v.as_i64().to_string())?;
    let daily_budget = row
        .campaign_budget
        .and_then(|b| b.amount_micros)
        .map(|m| m.as_f64() / 1_000_000.0);

    Some(Campaign {
        external_id,
        platform: Provider::GoogleAds,
        user_id: user_id.to_string(),
        account_id: account_id.to_string(),
        name: campaign.name.unwrap_or_default(),
        status: campaign.status.unwrap_or_else(|| "UNKNOWN".to_string()),
        campaign_type: campaign.advertising_channel_type,
        start_date: campaign.start_date.as_deref().and_then(parse_gaql_date),
        end_date: campaign.end_date.as_deref().and_then(parse_gaql_date),
        daily_budget,
        lifetime_budget: None,
    })
}

fn normalize_metric(row: GoogleRow) -> Option<MetricRecord> {
    let campaign_id = row
        .campaign
        .as_ref()
        .and_then(|c| c.id.as_ref())
        .map(|v| v.as_i64().to_string())?;
    let date = row
        .segments
        .as_ref()
        .and_then(|s| s.date.as_deref())
        .and_then(parse_gaql_date)?;
    let metrics = row.metrics?;

    Some(MetricRecord {
        campaign_external_id: campaign_id,
        platform: Provider::GoogleAds,
        date,
        impressions: metrics.impressions.map(|v| v.as_i64()).unwrap_or(0),
        clicks: metrics.clicks.map(|v| v.as_i64()).unwrap_or(0),
        spend: micros_to_units(metrics.cost_micros.as_ref()),
        conversions: metrics.conversions.map(|v| v.as_f64()).unwrap_or(0.0),
        // Google reports ctr as a fraction; normalized to a percentage
        ctr: metrics.ctr.map(|v| v.as_f64() * 100.0).unwrap_or(0.0),
        cpc: micros_to_units(metrics.average_cpc.as_ref()),
        cpm: micros_to_units(metrics.average_cpm.as_ref()),
        // Reach and frequency are not exposed per campaign-day
        reach: 0,
        frequency: 0.0,
    })
}

fn normalize_keyword(row: GoogleRow) -> Option<KeywordStat> {
    let campaign_id = row
        .campaign
        .as_ref()
        .and_then(|c| c.id.as_ref())
        .map(|v| v.as_i64().to_string())?;
    let keyword = row.ad_group_criterion.and_then(|c| c.keyword)?;
    let metrics = row.metrics;

    Some(KeywordStat {
        campaign_external_id: campaign_id,
        keyword: keyword.text.unwrap_or_default(),
        match_type: keyword.match_type.unwrap_or_else(|| "UNSPECIFIED".to_string()),
        impressions: metrics
            .as_ref()
            .and_then(|m| m.impressions.as_ref())
            .map(|v| v.as_i64())
            .unwrap_or(0),
        clicks: metrics
            .as_ref()
            .and_then(|m| m.clicks.as_ref())
            .map(|v| v.as_i64())
            .unwrap_or(0),
        cost: micros_to_units(metrics.as_ref().and_then(|m| m.cost_micros.as_ref())),
    })
}

fn parse_gaql_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}
