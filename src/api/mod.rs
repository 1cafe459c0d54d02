//! HTTP API: integration management and webhook ingestion.

pub mod integrations;
pub mod webhooks;

use crate::auth::TokenError;
use crate::config::AppConfig;
use crate::error::SyncError;
use crate::oauth::OAuthExchange;
use crate::store::IntegrationStore;
use crate::sync::SyncOrchestrator;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Shared application state for the API.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub exchange: Arc<OAuthExchange>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub integrations: Arc<IntegrationStore>,
}

/// Error response body. `code` is stable across releases; `error` is
/// human-readable and intentionally provider-agnostic.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

/// Application error types
pub enum AppError {
    Unauthorized(String),
    Sync(SyncError),
}

impl From<SyncError> for AppError {
    fn from(e: SyncError) -> Self {
        AppError::Sync(e)
    }
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        AppError::Unauthorized(format!("Invalid token: {}", e))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, code) = match self {
            AppError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, msg, "UNAUTHORIZED".to_string())
            }
            AppError::Sync(e) => (
                StatusCode::from_u16(e.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                e.to_string(),
                e.code().to_string(),
            ),
        };

        (status, Json(ErrorResponse { error, code })).into_response()
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Assembles the full API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/integrations/:provider/auth", post(integrations::start_auth))
        .route(
            "/integrations/:provider/callback",
            get(integrations::oauth_callback),
        )
        .route(
            "/integrations/:provider/accounts",
            get(integrations::list_accounts),
        )
        .route(
            "/integrations/:provider/campaigns",
            get(integrations::list_campaigns),
        )
        .route(
            "/integrations/google/keywords",
            get(integrations::list_keywords),
        )
        .route("/integrations/:provider/sync", post(integrations::sync_now))
        .route(
            "/integrations/:provider/status",
            get(integrations::integration_status),
        )
        .route(
            "/integrations/:provider/disconnect",
            post(integrations::disconnect),
        )
        .route(
            "/webhooks/:provider",
            get(webhooks::verify_subscription).post(webhooks::receive_event),
        )
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}
