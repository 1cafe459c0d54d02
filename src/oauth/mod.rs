//! OAuth 2.0 authorization flow for provider integrations.
//!
//! Implements the authorization code flow:
//! 1. Frontend asks for an authorization URL (`POST /integrations/:provider/auth`)
//! 2. User authorizes on the provider's site
//! 3. Provider redirects to `/integrations/:provider/callback`
//! 4. Exchange code for tokens (Meta additionally swaps the short-lived token
//!    for a long-lived one), encrypt and store the integration
//!
//! The `state` parameter is a vault-encrypted `{user_id, ts, redirect_uri}`
//! blob, so the callback recovers the caller's identity without server-side
//! session state.
//!
//! Token lifecycle asymmetry, preserved by design: Google access tokens are
//! refreshed transparently against a durable refresh token; Meta long-lived
//! tokens have no refresh grant and expire into `TokenExpired`.

use crate::config::AppConfig;
use crate::error::SyncError;
use crate::providers::Provider;
use crate::store::{IntegrationRecord, IntegrationStore};
use crate::vault::Vault;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Meta OAuth scopes, fixed per provider.
const META_SCOPES: &str = "ads_read,ads_management,business_management";

/// Google Ads OAuth scope.
const GOOGLE_SCOPE: &str = "https://www.googleapis.com/auth/adwords";

/// Encrypted state blobs older than this are rejected.
const STATE_MAX_AGE_SECS: i64 = 600;

/// Tokens returned by a provider token endpoint.
#[derive(Clone, Debug)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Seconds until expiry; absent means non-expiring.
    pub expires_in: Option<i64>,
}

/// Contents of the encrypted `state` parameter.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthState {
    pub user_id: String,
    pub ts: i64,
    pub redirect_uri: String,
}

/// Provider endpoint URLs, overridable for tests against a mock server.
#[derive(Clone, Debug)]
pub struct OAuthEndpoints {
    pub meta_graph_base: String,
    pub meta_dialog_url: String,
    pub google_auth_url: String,
    pub google_token_url: String,
}

impl Default for OAuthEndpoints {
    fn default() -> Self {
        Self {
            meta_graph_base: "https://graph.facebook.com/v19.0".to_string(),
            meta_dialog_url: "https://www.facebook.com/v19.0/dialog/oauth".to_string(),
            google_auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            google_token_url: "https://oauth2.googleapis.com/token".to_string(),
        }
    }
}

/// Standard OAuth token response (Meta and Google both fit).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Builds authorization URLs, exchanges and refreshes tokens, and persists
/// encrypted credentials.
pub struct OAuthExchange {
    config: Arc<AppConfig>,
    vault: Arc<Vault>,
    integrations: Arc<IntegrationStore>,
    http: reqwest::Client,
    endpoints: OAuthEndpoints,
}

impl OAuthExchange {
    pub fn new(
        config: Arc<AppConfig>,
        vault: Arc<Vault>,
        integrations: Arc<IntegrationStore>,
    ) -> Self {
        Self::with_endpoints(config, vault, integrations, OAuthEndpoints::default())
    }

    /// Constructor with custom provider endpoints (mock servers in tests).
    pub fn with_endpoints(
        config: Arc<AppConfig>,
        vault: Arc<Vault>,
        integrations: Arc<IntegrationStore>,
        endpoints: OAuthEndpoints,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            config,
            vault,
            integrations,
            http,
            endpoints,
        }
    }

    /// Builds the provider authorization URL with an encrypted state blob.
    pub fn generate_auth_url(
        &self,
        provider: Provider,
        user_id: &str,
        redirect_uri: &str,
    ) -> Result<String, SyncError> {
        let creds = self.config.credentials_for(provider)?;

        let state = AuthState {
            user_id: user_id.to_string(),
            ts: Utc::now().timestamp(),
            redirect_uri: redirect_uri.to_string(),
        };
        let state_json =
            serde_json::to_string(&state).map_err(|_| SyncError::Validation("bad state".into()))?;
        let state_blob = self.vault.encrypt(&state_json)?;

        let url = match provider {
            Provider::Meta => format!(
                "{}?client_id={}&redirect_uri={}&state={}&scope={}&response_type=code",
                self.endpoints.meta_dialog_url,
                urlencoding::encode(&creds.client_id),
                urlencoding::encode(redirect_uri),
                urlencoding::encode(&state_blob),
                urlencoding::encode(META_SCOPES),
            ),
            Provider::GoogleAds => format!(
                "{}?client_id={}&redirect_uri={}&state={}&scope={}&response_type=code&access_type=offline&prompt=consent",
                self.endpoints.google_auth_url,
                urlencoding::encode(&creds.client_id),
                urlencoding::encode(redirect_uri),
                urlencoding::encode(&state_blob),
                urlencoding::encode(GOOGLE_SCOPE),
            ),
        };

        debug!(provider = %provider, user_id = %user_id, "Built authorization URL");
        Ok(url)
    }

    /// Decrypts and validates the callback `state` parameter.
    pub fn decode_state(&self, state_blob: &str) -> Result<AuthState, SyncError> {
        let state_json = self
            .vault
            .decrypt(state_blob)
            .map_err(|_| SyncError::Validation("invalid or corrupted state parameter".into()))?;
        let state: AuthState = serde_json::from_str(&state_json)
            .map_err(|_| SyncError::Validation("invalid state payload".into()))?;

        let age = Utc::now().timestamp() - state.ts;
        if !(0..=STATE_MAX_AGE_SECS).contains(&age) {
            warn!(age_secs = age, "Rejected stale OAuth state");
            return Err(SyncError::Validation("expired state parameter".into()));
        }
        Ok(state)
    }

    /// Exchanges an authorization code for tokens at the provider endpoint.
    pub async fn exchange_code(
        &self,
        provider: Provider,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, SyncError> {
        let creds = self.config.credentials_for(provider)?;

        debug!(provider = %provider, "Exchanging authorization code for tokens");
        let response = match provider {
            Provider::Meta => {
                let url = format!(
                    "{}/oauth/access_token?client_id={}&client_secret={}&redirect_uri={}&code={}",
                    self.endpoints.meta_graph_base,
                    urlencoding::encode(&creds.client_id),
                    urlencoding::encode(&creds.client_secret),
                    urlencoding::encode(redirect_uri),
                    urlencoding::encode(code),
                );
                self.http.get(&url).send().await
            }
            Provider::GoogleAds => {
                let mut form = HashMap::new();
                form.insert("grant_type", "authorization_code");
                form.insert("code", code);
                form.insert("redirect_uri", redirect_uri);
                form.insert("client_id", creds.client_id.as_str());
                form.insert("client_secret", creds.client_secret.as_str());
                self.http
                    .post(&self.endpoints.google_token_url)
                    .header("Accept", "application/json")
                    .form(&form)
                    .send()
                    .await
            }
        };

        let tokens = parse_token_response(provider, response).await?;
        info!(
            provider = %provider,
            has_refresh_token = tokens.refresh_token.is_some(),
            "Authorization code exchanged"
        );
        Ok(tokens)
    }

    /// Meta only: exchanges a short-lived token for a long-lived one.
    pub async fn extend_token(&self, short_lived_token: &str) -> Result<TokenSet, SyncError> {
        let creds = self.config.credentials_for(Provider::Meta)?;
        let url = format!(
            "{}/oauth/access_token?grant_type=fb_exchange_token&client_id={}&client_secret={}&fb_exchange_token={}",
            self.endpoints.meta_graph_base,
            urlencoding::encode(&creds.client_id),
            urlencoding::encode(&creds.client_secret),
            urlencoding::encode(short_lived_token),
        );

        let response = self.http.get(&url).send().await;
        let tokens = parse_token_response(Provider::Meta, response).await?;
        info!(expires_in = ?tokens.expires_in, "Extended Meta token to long-lived");
        Ok(tokens)
    }

    /// Google only: refresh-token grant. Google does not rotate refresh
    /// tokens, so the original refresh token is preserved in the result.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenSet, SyncError> {
        let creds = self.config.credentials_for(Provider::GoogleAds)?;

        let mut form = HashMap::new();
        form.insert("grant_type", "refresh_token");
        form.insert("refresh_token", refresh_token);
        form.insert("client_id", creds.client_id.as_str());
        form.insert("client_secret", creds.client_secret.as_str());

        let response = self
            .http
            .post(&self.endpoints.google_token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await;

        let mut tokens = parse_token_response(Provider::GoogleAds, response).await?;
        tokens.refresh_token = Some(refresh_token.to_string());
        debug!("Refreshed Google access token");
        Ok(tokens)
    }

    /// Encrypts tokens and upserts the integration row.
    pub fn store_tokens(
        &self,
        user_id: &str,
        provider: Provider,
        tokens: &TokenSet,
    ) -> Result<(), SyncError> {
        let access_token = self.vault.encrypt(&tokens.access_token)?;
        let refresh_token = tokens
            .refresh_token
            .as_deref()
            .map(|t| self.vault.encrypt(t))
            .transpose()?;
        let expires_at = tokens
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs));

        self.integrations.upsert(&IntegrationRecord {
            user_id: user_id.to_string(),
            provider,
            access_token,
            refresh_token,
            expires_at,
            is_active: true,
            last_sync_at: Some(Utc::now()),
        })?;

        info!(
            user_id = %user_id,
            provider = %provider,
            has_refresh_token = tokens.refresh_token.is_some(),
            "Stored encrypted integration tokens"
        );
        Ok(())
    }

    /// Returns a usable plaintext access token for the user.
    ///
    /// Expired Google tokens are refreshed and re-persisted transparently;
    /// expired Meta tokens fail with `TokenExpired` (no refresh path).
    pub async fn get_access_token(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<String, SyncError> {
        let record = self
            .integrations
            .get(user_id, provider)?
            .filter(|r| r.is_active)
            .ok_or(SyncError::IntegrationNotFound)?;

        let expired = record
            .expires_at
            .map(|at| at <= Utc::now())
            .unwrap_or(false);

        if !expired {
            return self.vault.decrypt(&record.access_token);
        }

        if !provider.supports_refresh() {
            warn!(user_id = %user_id, provider = %provider, "Access token expired, no refresh path");
            return Err(SyncError::TokenExpired);
        }

        self.refresh_and_persist(user_id, &record).await
    }

    /// Google only: refresh regardless of the stored expiry. Used by the
    /// retry policy when a call comes back 401 before `expires_at`.
    pub async fn force_refresh(&self, user_id: &str) -> Result<String, SyncError> {
        let record = self
            .integrations
            .get(user_id, Provider::GoogleAds)?
            .filter(|r| r.is_active)
            .ok_or(SyncError::IntegrationNotFound)?;
        self.refresh_and_persist(user_id, &record).await
    }

    async fn refresh_and_persist(
        &self,
        user_id: &str,
        record: &IntegrationRecord,
    ) -> Result<String, SyncError> {
        let encrypted_refresh = record
            .refresh_token
            .as_deref()
            .ok_or(SyncError::TokenExpired)?;
        let refresh_token = self.vault.decrypt(encrypted_refresh)?;

        let tokens = self.refresh_access_token(&refresh_token).await?;
        self.store_tokens(user_id, record.provider, &tokens)?;

        info!(user_id = %user_id, "Transparently refreshed expired Google token");
        Ok(tokens.access_token)
    }
}

/// Maps a token endpoint response into a `TokenSet`, logging the raw body
/// on failure but surfacing only a provider-agnostic message.
async fn parse_token_response(
    provider: Provider,
    response: Result<reqwest::Response, reqwest::Error>,
) -> Result<TokenSet, SyncError> {
    let response = response.map_err(|e| {
        error!(provider = %provider, error = %e, "Token endpoint unreachable");
        SyncError::TokenExchange("token endpoint unreachable".into())
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        error!(
            provider = %provider,
            status = %status,
            body = %body,
            "Token endpoint rejected request"
        );
        return Err(SyncError::TokenExchange(format!(
            "token endpoint returned status {}",
            status.as_u16()
        )));
    }

    let parsed: TokenResponse = response.json().await.map_err(|e| {
        error!(provider = %provider, error = %e, "Unparsable token response");
        SyncError::TokenExchange("unparsable token response".into())
    })?;

    Ok(TokenSet {
        access_token: parsed.access_token,
        refresh_token: parsed.refresh_token,
        expires_in: parsed.expires_in,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderCredentials;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> AppConfig {
        AppConfig {
            encryption_secret: "oauth-test-secret".to_string(),
            webhook_verify_token: "verify".to_string(),
            webhook_signing_secret: "signing".to_string(),
            meta: Some(ProviderCredentials {
                client_id: "meta-app-id".to_string(),
                client_secret: "meta-app-secret".to_string(),
                developer_token: None,
            }),
            google: Some(ProviderCredentials {
                client_id: "google-client-id".to_string(),
                client_secret: "google-client-secret".to_string(),
                developer_token: Some("dev-token".to_string()),
            }),
            callback_base_url: "http://localhost:3000".to_string(),
            frontend_url: "http://localhost:5173/integrations".to_string(),
            db_path: ":memory:".to_string(),
            listen_addr: "127.0.0.1:0".to_string(),
            sync_interval: std::time::Duration::from_secs(3600),
            sync_freshness: std::time::Duration::from_secs(3300),
            sync_stagger: std::time::Duration::from_secs(0),
            http_timeout: std::time::Duration::from_secs(5),
        }
    }

    fn exchange_with(endpoints: OAuthEndpoints) -> OAuthExchange {
        let config = Arc::new(test_config());
        let vault = Arc::new(Vault::new(&config.encryption_secret));
        let integrations = Arc::new(IntegrationStore::new(":memory:").unwrap());
        OAuthExchange::with_endpoints(config, vault, integrations, endpoints)
    }

    fn exchange() -> OAuthExchange {
        exchange_with(OAuthEndpoints::default())
    }

    #[test]
    fn test_auth_url_contains_encrypted_state() {
        let ex = exchange();
        let url = ex
            .generate_auth_url(Provider::Meta, "user-1", "http://localhost:3000/cb")
            .unwrap();
        assert!(url.contains("client_id=meta-app-id"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("scope=ads_read"));
        // The raw user id must not leak into the URL
        assert!(!url.contains("user-1"));

        let google = ex
            .generate_auth_url(Provider::GoogleAds, "user-1", "http://localhost:3000/cb")
            .unwrap();
        assert!(google.contains("access_type=offline"));
        assert!(google.contains("prompt=consent"));
    }

    #[test]
    fn test_state_roundtrip() {
        let ex = exchange();
        let url = ex
            .generate_auth_url(Provider::Meta, "user-42", "http://localhost:3000/cb")
            .unwrap();
        let state_param = url
            .split("state=")
            .nth(1)
            .unwrap()
            .split('&')
            .next()
            .unwrap();
        let blob = urlencoding::decode(state_param).unwrap();

        let state = ex.decode_state(&blob).unwrap();
        assert_eq!(state.user_id, "user-42");
        assert_eq!(state.redirect_uri, "http://localhost:3000/cb");
    }

    #[test]
    fn test_stale_state_rejected() {
        let ex = exchange();
        let stale = AuthState {
            user_id: "user-1".to_string(),
            ts: Utc::now().timestamp() - STATE_MAX_AGE_SECS - 5,
            redirect_uri: "http://localhost:3000/cb".to_string(),
        };
        let blob = ex
            .vault
            .encrypt(&serde_json::to_string(&stale).unwrap())
            .unwrap();
        let err = ex.decode_state(&blob).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_garbage_state_rejected() {
        let ex = exchange();
        assert!(ex.decode_state("not-a-valid-blob").is_err());
    }

    #[tokio::test]
    async fn test_meta_code_exchange_and_extend() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth/access_token"))
            .and(query_param("code", "auth-code-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "short-lived-token",
                "token_type": "bearer",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/oauth/access_token"))
            .and(query_param("grant_type", "fb_exchange_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "long-lived-token",
                "token_type": "bearer",
                "expires_in": 5_184_000
            })))
            .mount(&server)
            .await;

        let ex = exchange_with(OAuthEndpoints {
            meta_graph_base: server.uri(),
            ..OAuthEndpoints::default()
        });

        let short = ex
            .exchange_code(Provider::Meta, "auth-code-1", "http://localhost:3000/cb")
            .await
            .unwrap();
        assert_eq!(short.access_token, "short-lived-token");
        assert!(short.refresh_token.is_none());

        let long = ex.extend_token(&short.access_token).await.unwrap();
        assert_eq!(long.access_token, "long-lived-token");
        assert_eq!(long.expires_in, Some(5_184_000));
    }

    #[tokio::test]
    async fn test_failed_exchange_is_token_exchange_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"message": "Invalid verification code"}
            })))
            .mount(&server)
            .await;

        let ex = exchange_with(OAuthEndpoints {
            meta_graph_base: server.uri(),
            ..OAuthEndpoints::default()
        });
        let err = ex
            .exchange_code(Provider::Meta, "bad-code", "http://localhost:3000/cb")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TOKEN_EXCHANGE_ERROR");
        // Raw provider detail stays in the log, not the error
        assert!(!err.to_string().contains("Invalid verification code"));
    }

    #[tokio::test]
    async fn test_google_refresh_preserves_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh-access",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .mount(&server)
            .await;

        let ex = exchange_with(OAuthEndpoints {
            google_token_url: format!("{}/token", server.uri()),
            ..OAuthEndpoints::default()
        });
        let tokens = ex.refresh_access_token("durable-refresh").await.unwrap();
        assert_eq!(tokens.access_token, "fresh-access");
        assert_eq!(tokens.refresh_token.as_deref(), Some("durable-refresh"));
    }

    #[tokio::test]
    async fn test_store_then_get_access_token() {
        let ex = exchange();
        let tokens = TokenSet {
            access_token: "plain-access".to_string(),
            refresh_token: Some("plain-refresh".to_string()),
            expires_in: Some(3600),
        };
        ex.store_tokens("user-1", Provider::GoogleAds, &tokens).unwrap();

        // Stored blobs are ciphertext
        let record = ex
            .integrations
            .get("user-1", Provider::GoogleAds)
            .unwrap()
            .unwrap();
        assert_ne!(record.access_token, "plain-access");
        assert!(record.is_active);
        assert!(record.last_sync_at.is_some());

        let token = ex
            .get_access_token("user-1", Provider::GoogleAds)
            .await
            .unwrap();
        assert_eq!(token, "plain-access");
    }

    #[tokio::test]
    async fn test_missing_integration_not_found() {
        let ex = exchange();
        let err = ex
            .get_access_token("nobody", Provider::Meta)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INTEGRATION_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_disconnected_integration_not_found() {
        let ex = exchange();
        let tokens = TokenSet {
            access_token: "tok".to_string(),
            refresh_token: None,
            expires_in: None,
        };
        ex.store_tokens("user-1", Provider::Meta, &tokens).unwrap();
        ex.integrations.deactivate("user-1", Provider::Meta).unwrap();

        let err = ex
            .get_access_token("user-1", Provider::Meta)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INTEGRATION_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_expired_meta_token_has_no_refresh_path() {
        let ex = exchange();
        let tokens = TokenSet {
            access_token: "meta-access".to_string(),
            refresh_token: None,
            expires_in: Some(-60),
        };
        ex.store_tokens("user-1", Provider::Meta, &tokens).unwrap();

        let err = ex
            .get_access_token("user-1", Provider::Meta)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TOKEN_EXPIRED");
    }

    #[tokio::test]
    async fn test_expired_google_token_refreshes_and_advances_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "rotated-access",
                "expires_in": 3600,
                "token_type": "Bearer"
            })))
            .mount(&server)
            .await;

        let ex = exchange_with(OAuthEndpoints {
            google_token_url: format!("{}/token", server.uri()),
            ..OAuthEndpoints::default()
        });
        ex.store_tokens(
            "user-1",
            Provider::GoogleAds,
            &TokenSet {
                access_token: "stale-access".to_string(),
                refresh_token: Some("durable-refresh".to_string()),
                expires_in: Some(-60),
            },
        )
        .unwrap();

        let token = ex
            .get_access_token("user-1", Provider::GoogleAds)
            .await
            .unwrap();
        assert_eq!(token, "rotated-access");

        // Stored expiry advanced and refresh token survived the rotation
        let record = ex
            .integrations
            .get("user-1", Provider::GoogleAds)
            .unwrap()
            .unwrap();
        assert!(record.expires_at.unwrap() > Utc::now());
        let refresh = ex.vault.decrypt(record.refresh_token.as_deref().unwrap()).unwrap();
        assert_eq!(refresh, "durable-refresh");
    }
}
