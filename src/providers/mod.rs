//! Platform adapters: normalized entities and the adapter contract.
//!
//! Each supported advertising platform gets one concrete adapter that maps
//! provider-native shapes into the normalized DTOs below. There is no shared
//! base type; a provider is added by implementing [`AdsAdapter`] and
//! registering it with the orchestrator.

pub mod google;
pub mod meta;
pub mod retry;

use crate::error::SyncError;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Supported advertising platforms. Exactly these two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Meta,
    GoogleAds,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Meta => "meta",
            Provider::GoogleAds => "google",
        }
    }

    /// Parses the path/storage representation ("meta" / "google").
    pub fn parse(raw: &str) -> Option<Provider> {
        match raw {
            "meta" => Some(Provider::Meta),
            "google" => Some(Provider::GoogleAds),
            _ => None,
        }
    }

    /// True when the provider supports refreshing an expired access token.
    /// Meta long-lived tokens have no refresh grant; Google rotates access
    /// tokens against a durable refresh token.
    pub fn supports_refresh(&self) -> bool {
        matches!(self, Provider::GoogleAds)
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider ad account. Transient: fetched per request, never persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdAccount {
    pub id: String,
    pub name: String,
    pub currency: String,
    pub timezone: String,
    pub status: String,
    /// Google manager (MCC) accounts hold no billable campaigns and are
    /// excluded from sync. Always false for Meta.
    pub is_manager: bool,
}

/// A normalized campaign, unique by (external_id, platform).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub external_id: String,
    pub platform: Provider,
    pub user_id: String,
    pub account_id: String,
    pub name: String,
    pub status: String,
    /// Provider objective / channel type.
    pub campaign_type: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub daily_budget: Option<f64>,
    pub lifetime_budget: Option<f64>,
}

/// One day of campaign metrics, unique by (campaign, platform, date).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    pub campaign_external_id: String,
    pub platform: Provider,
    pub date: NaiveDate,
    pub impressions: i64,
    pub clicks: i64,
    pub spend: f64,
    pub conversions: f64,
    pub ctr: f64,
    pub cpc: f64,
    pub cpm: f64,
    pub reach: i64,
    pub frequency: f64,
}

impl MetricRecord {
    /// Derived spend per conversion; zero when there are no conversions.
    pub fn cost_per_conversion(&self) -> f64 {
        if self.conversions > 0.0 {
            self.spend / self.conversions
        } else {
            0.0
        }
    }
}

/// One keyword row from the Google search-term report.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordStat {
    pub campaign_external_id: String,
    pub keyword: String,
    pub match_type: String,
    pub impressions: i64,
    pub clicks: i64,
    pub cost: f64,
}

/// Inclusive date window for metric queries.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DateRange {
    pub since: NaiveDate,
    pub until: NaiveDate,
}

impl DateRange {
    /// The trailing `days`-day window ending today (UTC).
    pub fn last_days(days: i64) -> Self {
        let until = Utc::now().date_naive();
        Self {
            since: until - chrono::Duration::days(days),
            until,
        }
    }
}

/// Capability surface every platform adapter provides.
///
/// Adapters obtain tokens through the OAuth exchange module (refreshing first
/// when their provider supports it), call the provider API, and normalize the
/// response. Provider errors are wrapped into typed fetch errors carrying a
/// stable code and an HTTP-like status.
#[async_trait]
pub trait AdsAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    async fn list_accounts(&self, user_id: &str) -> Result<Vec<AdAccount>, SyncError>;

    async fn list_campaigns(
        &self,
        user_id: &str,
        account_id: &str,
    ) -> Result<Vec<Campaign>, SyncError>;

    async fn list_metrics(
        &self,
        user_id: &str,
        account_id: &str,
        range: &DateRange,
    ) -> Result<Vec<MetricRecord>, SyncError>;

    /// Keyword/search-term report. Only Google implements this; other
    /// providers reject the call.
    async fn list_keywords(
        &self,
        _user_id: &str,
        _account_id: &str,
        _range: &DateRange,
    ) -> Result<Vec<KeywordStat>, SyncError> {
        Err(SyncError::Validation(format!(
            "provider '{}' has no keyword report",
            self.provider().as_str()
        )))
    }

    /// Drops the cached client handle for a user. Called on disconnect.
    fn invalidate(&self, user_id: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_roundtrip() {
        assert_eq!(Provider::parse("meta"), Some(Provider::Meta));
        assert_eq!(Provider::parse("google"), Some(Provider::GoogleAds));
        assert_eq!(Provider::parse("tiktok"), None);
        assert_eq!(Provider::Meta.as_str(), "meta");
        assert_eq!(Provider::GoogleAds.as_str(), "google");
    }

    #[test]
    fn test_refresh_asymmetry() {
        assert!(!Provider::Meta.supports_refresh());
        assert!(Provider::GoogleAds.supports_refresh());
    }

    #[test]
    fn test_cost_per_conversion_zero_safe() {
        let mut m = MetricRecord {
            campaign_external_id: "c1".to_string(),
            platform: Provider::Meta,
            date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            impressions: 0,
            clicks: 0,
            spend: 10.0,
            conversions: 0.0,
            ctr: 0.0,
            cpc: 0.0,
            cpm: 0.0,
            reach: 0,
            frequency: 0.0,
        };
        assert_eq!(m.cost_per_conversion(), 0.0);
        m.conversions = 4.0;
        assert_eq!(m.cost_per_conversion(), 2.5);
    }

    #[test]
    fn test_date_range_window() {
        let range = DateRange::last_days(30);
        assert_eq!((range.until - range.since).num_days(), 30);
    }
}
