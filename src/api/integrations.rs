//! Integration management endpoints.
//!
//! The OAuth flow mirrors the providers' documented dance: the frontend asks
//! for an authorization URL, the provider redirects back to the callback, and
//! the callback always answers with a browser redirect to the frontend (a
//! user is sitting in front of it, not an API client).

use crate::api::{AppError, AppState};
use crate::auth::extract_bearer_token;
use crate::providers::{DateRange, Provider};
use crate::sync::SyncReport;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

fn parse_provider(raw: &str) -> Result<Provider, AppError> {
    Provider::parse(raw).ok_or_else(|| {
        AppError::Sync(crate::error::SyncError::Validation(format!(
            "unknown provider '{}'",
            raw
        )))
    })
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    pub redirect_uri: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub auth_url: String,
}

/// POST /integrations/:provider/auth
pub async fn start_auth(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Option<Json<AuthRequest>>,
) -> Result<Json<AuthResponse>, AppError> {
    let provider = parse_provider(&provider)?;
    let user_id = extract_bearer_token(&headers)?;

    let redirect_uri = body
        .and_then(|Json(b)| b.redirect_uri)
        .unwrap_or_else(|| {
            format!(
                "{}/integrations/{}/callback",
                state.config.callback_base_url,
                provider.as_str()
            )
        });

    let auth_url = state
        .exchange
        .generate_auth_url(provider, &user_id, &redirect_uri)?;

    debug!(provider = %provider, user_id = %user_id, "Issued authorization URL");
    Ok(Json(AuthResponse { auth_url }))
}

#[derive(Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// GET /integrations/:provider/callback
///
/// Always redirects to the frontend: `?connected=<provider>` on success,
/// `?error=<message>` on failure. Provider error bodies stay in the log.
pub async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    let frontend = state.config.frontend_url.clone();

    match handle_callback(&state, &provider, params).await {
        Ok(provider) => {
            Redirect::temporary(&format!("{}?connected={}", frontend, provider.as_str()))
        }
        Err(message) => Redirect::temporary(&format!(
            "{}?error={}",
            frontend,
            urlencoding::encode(&message)
        )),
    }
}

async fn handle_callback(
    state: &AppState,
    provider: &str,
    params: CallbackParams,
) -> Result<Provider, String> {
    let provider =
        Provider::parse(provider).ok_or_else(|| format!("unknown provider '{}'", provider))?;

    if let Some(error) = params.error {
        let description = params
            .error_description
            .unwrap_or_else(|| "authorization was denied".to_string());
        warn!(provider = %provider, error = %error, "Provider rejected authorization");
        return Err(description);
    }

    let code = params.code.ok_or("missing 'code' parameter")?;
    let state_blob = params.state.ok_or("missing 'state' parameter")?;

    let auth_state = state
        .exchange
        .decode_state(&state_blob)
        .map_err(|e| e.to_string())?;

    let mut tokens = state
        .exchange
        .exchange_code(provider, &code, &auth_state.redirect_uri)
        .await
        .map_err(|e| e.to_string())?;

    // Meta hands out a short-lived token first; swap it for a long-lived one
    if provider == Provider::Meta {
        tokens = state
            .exchange
            .extend_token(&tokens.access_token)
            .await
            .map_err(|e| e.to_string())?;
    }

    state
        .exchange
        .store_tokens(&auth_state.user_id, provider, &tokens)
        .map_err(|e| e.to_string())?;

    info!(
        provider = %provider,
        user_id = %auth_state.user_id,
        "Integration connected"
    );
    Ok(provider)
}

/// GET /integrations/:provider/accounts
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let provider = parse_provider(&provider)?;
    let user_id = extract_bearer_token(&headers)?;

    let adapter = state.orchestrator.adapter(provider)?;
    let accounts = adapter.list_accounts(&user_id).await?;
    Ok(Json(accounts).into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountQuery {
    pub account_id: String,
}

/// GET /integrations/:provider/campaigns?accountId=
pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Query(query): Query<AccountQuery>,
) -> Result<Response, AppError> {
    let provider = parse_provider(&provider)?;
    let user_id = extract_bearer_token(&headers)?;

    let adapter = state.orchestrator.adapter(provider)?;
    let campaigns = adapter.list_campaigns(&user_id, &query.account_id).await?;
    Ok(Json(campaigns).into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordQuery {
    pub account_id: String,
    pub days: Option<i64>,
}

/// GET /integrations/google/keywords?accountId=&days=
pub async fn list_keywords(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<KeywordQuery>,
) -> Result<Response, AppError> {
    let user_id = extract_bearer_token(&headers)?;
    let range = DateRange::last_days(query.days.unwrap_or(30));

    let adapter = state.orchestrator.adapter(Provider::GoogleAds)?;
    let keywords = adapter
        .list_keywords(&user_id, &query.account_id, &range)
        .await?;
    Ok(Json(keywords).into_response())
}

#[derive(Deserialize, Default)]
pub struct SyncRequest {
    pub force: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAccepted {
    pub accepted: bool,
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum SyncResponse {
    Report(SyncReport),
    Accepted(SyncAccepted),
}

/// POST /integrations/:provider/sync
///
/// `force: true` runs inline and returns the report (surfacing errors);
/// otherwise the run detaches and the caller gets 202 immediately.
pub async fn sync_now(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Option<Json<SyncRequest>>,
) -> Result<Response, AppError> {
    let provider = parse_provider(&provider)?;
    let user_id = extract_bearer_token(&headers)?;
    let force = body.map(|Json(b)| b.force.unwrap_or(false)).unwrap_or(false);

    if force {
        let report = state.orchestrator.sync_user(&user_id, provider).await?;
        return Ok(Json(SyncResponse::Report(report)).into_response());
    }

    state.orchestrator.spawn_sync(user_id, provider);
    Ok((
        StatusCode::ACCEPTED,
        Json(SyncResponse::Accepted(SyncAccepted { accepted: true })),
    )
        .into_response())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub connected: bool,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// GET /integrations/:provider/status
pub async fn integration_status(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, AppError> {
    let provider = parse_provider(&provider)?;
    let user_id = extract_bearer_token(&headers)?;

    let status = match state.integrations.get(&user_id, provider)? {
        Some(record) => StatusResponse {
            connected: true,
            is_active: record.is_active,
            expires_at: record.expires_at,
            last_sync_at: record.last_sync_at,
        },
        None => StatusResponse {
            connected: false,
            is_active: false,
            expires_at: None,
            last_sync_at: None,
        },
    };
    Ok(Json(status))
}

#[derive(Serialize)]
pub struct DisconnectResponse {
    pub success: bool,
}

/// POST /integrations/:provider/disconnect
///
/// Clears stored tokens, deactivates the row (it is kept for audit), and
/// drops the cached provider client handle.
pub async fn disconnect(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DisconnectResponse>, AppError> {
    let provider = parse_provider(&provider)?;
    let user_id = extract_bearer_token(&headers)?;

    state.integrations.deactivate(&user_id, provider)?;
    if let Ok(adapter) = state.orchestrator.adapter(provider) {
        adapter.invalidate(&user_id);
    }

    info!(provider = %provider, user_id = %user_id, "Integration disconnected");
    Ok(Json(DisconnectResponse { success: true }))
}
