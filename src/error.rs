//! Error taxonomy for the sync core.
//!
//! Every fallible operation in the vault, OAuth exchange, adapters and
//! orchestrator surfaces a `SyncError`. Each variant carries a stable code
//! and an HTTP-like status so the API layer and the retry policy can route
//! on them without string matching.

use std::time::Duration;

/// Which provider fetch operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Accounts,
    Campaigns,
    Metrics,
    Keywords,
}

impl FetchKind {
    /// Stable error code for this fetch kind.
    pub fn code(&self) -> &'static str {
        match self {
            FetchKind::Accounts => "ACCOUNTS_FETCH_ERROR",
            FetchKind::Campaigns => "CAMPAIGNS_FETCH_ERROR",
            FetchKind::Metrics => "METRICS_FETCH_ERROR",
            FetchKind::Keywords => "KEYWORDS_FETCH_ERROR",
        }
    }
}

impl std::fmt::Display for FetchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FetchKind::Accounts => "accounts",
            FetchKind::Campaigns => "campaigns",
            FetchKind::Metrics => "metrics",
            FetchKind::Keywords => "keywords",
        };
        f.write_str(name)
    }
}

/// Domain errors for credential, OAuth, adapter and sync operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Provider credentials or secrets missing from configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed or missing request input.
    #[error("invalid request: {0}")]
    Validation(String),

    /// No active integration exists for the (user, provider) pair.
    #[error("no active integration found")]
    IntegrationNotFound,

    /// Access token expired and the provider has no refresh path.
    #[error("access token expired, re-authorization required")]
    TokenExpired,

    /// Provider token endpoint rejected the exchange/refresh.
    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    /// Ciphertext failed to parse or authenticate. Fails only the affected
    /// record, never a whole batch.
    #[error("credential decryption failed")]
    Decryption,

    /// Inbound webhook signature did not match. Never retried.
    #[error("webhook signature verification failed")]
    InvalidSignature,

    /// Webhook subscription handshake rejected.
    #[error("webhook verification failed")]
    Verification,

    /// A provider fetch operation failed after retries.
    #[error("{kind} fetch failed with status {status}")]
    Fetch {
        kind: FetchKind,
        status: u16,
        message: String,
    },

    /// Raw upstream failure, before classification into a fetch kind.
    /// `retry_after` carries the provider-supplied backoff for 429 responses.
    #[error("upstream provider error with status {status}")]
    Upstream {
        status: u16,
        retry_after: Option<Duration>,
        message: String,
    },

    /// Storage collaborator failure.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl SyncError {
    /// Stable machine-readable code for logging and API payloads.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Configuration(_) => "CONFIGURATION_ERROR",
            SyncError::Validation(_) => "VALIDATION_ERROR",
            SyncError::IntegrationNotFound => "INTEGRATION_NOT_FOUND",
            SyncError::TokenExpired => "TOKEN_EXPIRED",
            SyncError::TokenExchange(_) => "TOKEN_EXCHANGE_ERROR",
            SyncError::Decryption => "DECRYPTION_ERROR",
            SyncError::InvalidSignature => "INVALID_SIGNATURE",
            SyncError::Verification => "VERIFICATION_ERROR",
            SyncError::Fetch { kind, .. } => kind.code(),
            SyncError::Upstream { .. } => "UPSTREAM_ERROR",
            SyncError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// HTTP-like status for upstream handling.
    pub fn status(&self) -> u16 {
        match self {
            SyncError::Configuration(_) => 500,
            SyncError::Validation(_) => 400,
            SyncError::IntegrationNotFound => 404,
            SyncError::TokenExpired => 401,
            SyncError::TokenExchange(_) => 502,
            SyncError::Decryption => 500,
            SyncError::InvalidSignature => 401,
            SyncError::Verification => 403,
            SyncError::Fetch { status, .. } => *status,
            SyncError::Upstream { status, .. } => *status,
            SyncError::Storage(_) => 500,
        }
    }

    /// True when the retry policy may attempt the call again (server errors
    /// and timeouts; rate limits are handled separately via `retry_after`).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Upstream { status, .. } if *status >= 500 || *status == 408
        )
    }
}
