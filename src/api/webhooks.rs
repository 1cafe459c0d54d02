//! Webhook ingestion.
//!
//! GET is the subscription handshake (Meta-style `hub.challenge` echo); POST
//! carries change notifications signed with HMAC-SHA256 over the raw body.
//! The signature is checked before the body is parsed: an unsigned or
//! mis-signed payload is rejected without processing.
//!
//! Dispatch is deliberately coarse: a `campaigns` change triggers a resync of
//! every active integration of that provider, because provider change events
//! do not carry our user ids.

use crate::api::{AppError, AppState};
use crate::error::SyncError;
use crate::providers::Provider;
use crate::vault::verify_signature;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SIGNATURE_HEADER: &str = "x-hub-signature-256";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyParams {
    pub mode: Option<String>,
    pub challenge: Option<String>,
    pub verify_token: Option<String>,
}

/// GET /webhooks/:provider — subscription handshake.
pub async fn verify_subscription(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(params): Query<VerifyParams>,
) -> Result<String, AppError> {
    let subscribed = params.mode.as_deref() == Some("subscribe");
    let token_matches =
        params.verify_token.as_deref() == Some(state.config.webhook_verify_token.as_str());

    if subscribed && token_matches {
        info!(provider = %provider, "Webhook subscription verified");
        return Ok(params.challenge.unwrap_or_default());
    }

    warn!(
        provider = %provider,
        mode = ?params.mode,
        "Webhook verification failed"
    );
    Err(SyncError::Verification.into())
}

/// Change notification payload. Unknown fields are ignored so provider
/// payload additions never break ingestion.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookChange {
    pub field: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// POST /webhooks/:provider — signed change notification.
pub async fn receive_event(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let provider = Provider::parse(&provider)
        .ok_or_else(|| SyncError::Validation(format!("unknown provider '{}'", provider)))?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !verify_signature(&body, signature, &state.config.webhook_signing_secret) {
        warn!(provider = %provider, "Webhook signature mismatch, payload dropped");
        return Err(SyncError::InvalidSignature.into());
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|_| SyncError::Validation("unparsable webhook payload".to_string()))?;

    debug!(
        provider = %provider,
        object = ?event.object,
        entries = event.entry.len(),
        "Webhook event accepted"
    );

    for entry in &event.entry {
        for change in &entry.changes {
            dispatch_change(&state, provider, entry, change);
        }
    }

    Ok(Json(serde_json::json!({"received": true})))
}

fn dispatch_change(
    state: &AppState,
    provider: Provider,
    entry: &WebhookEntry,
    change: &WebhookChange,
) {
    match change.field.as_str() {
        "campaigns" => {
            let users = match state.integrations.list_active(provider) {
                Ok(users) => users,
                Err(err) => {
                    warn!(error = %err, "Could not list integrations for webhook fan-out");
                    return;
                }
            };
            info!(
                provider = %provider,
                entry_id = ?entry.id,
                users = users.len(),
                "Campaign change received, fanning out resync"
            );
            for user_id in users {
                state.orchestrator.spawn_sync(user_id, provider);
            }
        }
        // Insight deltas are picked up by the scheduled sync window
        "insights" => {
            debug!(provider = %provider, entry_id = ?entry.id, "Insights change, no-op");
        }
        other => {
            debug!(provider = %provider, field = %other, "Unhandled webhook field, skipping");
        }
    }
}
