//! Environment-based configuration.
//!
//! The sync core consumes configuration, it does not own loading machinery:
//! everything comes from `ADSYNC_*` environment variables with sensible
//! defaults for local development. Provider credentials are optional at
//! startup and fail at call time (a deployment may enable only one provider).

use crate::error::SyncError;
use crate::providers::Provider;
use anyhow::{anyhow, Context, Result};
use std::time::Duration;

/// OAuth application credentials for one provider.
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: String,
    /// Google Ads requires a developer token on every API call.
    pub developer_token: Option<String>,
}

/// Complete application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Secret the vault derives its AES-256 key from.
    pub encryption_secret: String,
    /// Shared secret for the webhook subscription handshake.
    pub webhook_verify_token: String,
    /// Shared secret for webhook payload HMAC signatures.
    pub webhook_signing_secret: String,
    pub meta: Option<ProviderCredentials>,
    pub google: Option<ProviderCredentials>,
    /// Base URL this server is reachable at (OAuth redirect URIs).
    pub callback_base_url: String,
    /// Frontend URL the OAuth callback redirects the browser to.
    pub frontend_url: String,
    /// SQLite database path (":memory:" allowed for tests).
    pub db_path: String,
    pub listen_addr: String,
    /// Scheduler tick interval.
    pub sync_interval: Duration,
    /// Skip users whose last sync is newer than this. Kept slightly shorter
    /// than the interval so consecutive ticks never overlap for one user.
    pub sync_freshness: Duration,
    /// Delay between users within one scheduled batch.
    pub sync_stagger: Duration,
    /// Timeout for every outbound provider call.
    pub http_timeout: Duration,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_duration_secs(name: &str, default: u64) -> Result<Duration> {
    match env_var(name) {
        Some(raw) => {
            let secs: u64 = raw
                .parse()
                .with_context(|| format!("{} must be an integer number of seconds", name))?;
            Ok(Duration::from_secs(secs))
        }
        None => Ok(Duration::from_secs(default)),
    }
}

fn provider_credentials(
    prefix: &str,
    developer_token: Option<String>,
) -> Option<ProviderCredentials> {
    let client_id = env_var(&format!("ADSYNC_{}_CLIENT_ID", prefix))?;
    let client_secret = env_var(&format!("ADSYNC_{}_CLIENT_SECRET", prefix))?;
    Some(ProviderCredentials {
        client_id,
        client_secret,
        developer_token,
    })
}

impl AppConfig {
    /// Loads configuration from the environment.
    ///
    /// Fails fast only on secrets the whole core depends on; per-provider
    /// credentials are checked lazily via [`AppConfig::credentials_for`].
    pub fn from_env() -> Result<Self> {
        let encryption_secret = env_var("ADSYNC_ENCRYPTION_SECRET")
            .ok_or_else(|| anyhow!("ADSYNC_ENCRYPTION_SECRET must be set"))?;
        let webhook_verify_token = env_var("ADSYNC_WEBHOOK_VERIFY_TOKEN")
            .ok_or_else(|| anyhow!("ADSYNC_WEBHOOK_VERIFY_TOKEN must be set"))?;
        let webhook_signing_secret = env_var("ADSYNC_WEBHOOK_SIGNING_SECRET")
            .ok_or_else(|| anyhow!("ADSYNC_WEBHOOK_SIGNING_SECRET must be set"))?;

        let sync_interval = env_duration_secs("ADSYNC_SYNC_INTERVAL_SECS", 3600)?;
        // Default freshness: five minutes shy of the interval.
        let default_freshness = sync_interval.as_secs().saturating_sub(300).max(60);
        let sync_freshness = env_duration_secs("ADSYNC_SYNC_FRESHNESS_SECS", default_freshness)?;

        Ok(Self {
            encryption_secret,
            webhook_verify_token,
            webhook_signing_secret,
            meta: provider_credentials("META", None),
            google: provider_credentials("GOOGLE", env_var("ADSYNC_GOOGLE_DEVELOPER_TOKEN")),
            callback_base_url: env_var("ADSYNC_CALLBACK_BASE_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            frontend_url: env_var("ADSYNC_FRONTEND_URL")
                .unwrap_or_else(|| "http://localhost:5173/integrations".to_string()),
            db_path: env_var("ADSYNC_DB_PATH").unwrap_or_else(|| "adsync.db".to_string()),
            listen_addr: env_var("ADSYNC_LISTEN_ADDR")
                .unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            sync_interval,
            sync_freshness,
            sync_stagger: env_duration_secs("ADSYNC_SYNC_STAGGER_SECS", 2)?,
            http_timeout: env_duration_secs("ADSYNC_HTTP_TIMEOUT_SECS", 30)?,
        })
    }

    /// Returns the OAuth application credentials for a provider, or a
    /// `Configuration` error when that provider is not configured.
    pub fn credentials_for(&self, provider: Provider) -> Result<&ProviderCredentials, SyncError> {
        let creds = match provider {
            Provider::Meta => self.meta.as_ref(),
            Provider::GoogleAds => self.google.as_ref(),
        };
        creds.ok_or_else(|| {
            SyncError::Configuration(format!(
                "provider '{}' is not configured (missing client id/secret)",
                provider.as_str()
            ))
        })
    }
}
