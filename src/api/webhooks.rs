//! Vendor webhook endpoints: status updates, inbound messages, and the
//! subscribe challenge handshake.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::api::{ApiError, AppState, resolve_tenant};
use crate::error::WebhookError;
use crate::webhook::WebhookOutcome;

async fn apply(
    state: &AppState,
    tenant_ref: Option<&str>,
    headers: &HeaderMap,
    body: serde_json::Value,
    endpoint: &'static str,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tenant = resolve_tenant(state, tenant_ref, headers).await?;

    let outcome = state.webhooks.handle(&tenant, &body).await?;
    tracing::debug!(tenant = %tenant.reference, endpoint, ?outcome, "Webhook applied");

    let body = match outcome {
        WebhookOutcome::StatusApplied { matched } => {
            serde_json::json!({"recebido": true, "atualizado": matched})
        }
        WebhookOutcome::InboundStored {
            message_id,
            duplicate,
            auto_replied,
        } => serde_json::json!({
            "recebido": true,
            "mensagemId": message_id,
            "duplicado": duplicate,
            "respostaAutomatica": auto_replied,
        }),
    };
    Ok(Json(body))
}

/// POST /{v}/whatsapp/webhookStatus/{tenantRef}
async fn webhook_status(
    State(state): State<AppState>,
    Path(tenant_ref): Path<String>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    apply(&state, Some(&tenant_ref), &headers, body, "status").await
}

/// POST /{v}/whatsapp/webhookStatus — tenant taken from the header.
async fn webhook_status_headerless(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    apply(&state, None, &headers, body, "status").await
}

/// POST /{v}/whatsapp/webhookRecebimento/{tenantRef}
async fn webhook_inbound(
    State(state): State<AppState>,
    Path(tenant_ref): Path<String>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    apply(&state, Some(&tenant_ref), &headers, body, "inbound").await
}

/// POST /{v}/whatsapp/webhookRecebimento
async fn webhook_inbound_headerless(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    apply(&state, None, &headers, body, "inbound").await
}

#[derive(Debug, Deserialize)]
pub struct ChallengeQuery {
    pub hub_mode: Option<String>,
    pub hub_challenge: Option<String>,
    pub hub_verify_token: Option<String>,
}

fn check_challenge(state: &AppState, query: &ChallengeQuery) -> Result<String, ApiError> {
    let subscribed = query.hub_mode.as_deref() == Some("subscribe");
    let token_matches =
        query.hub_verify_token.as_deref() == Some(state.config.verify_token.expose_secret());

    match (subscribed, token_matches, query.hub_challenge.as_deref()) {
        (true, true, Some(challenge)) => Ok(challenge.to_string()),
        _ => Err(WebhookError::ChallengeFailed.into()),
    }
}

/// GET /{v}/whatsapp/webhook/{tenantRef} — subscribe handshake. Echoes the
/// challenge iff the mode is `subscribe` and the verify token matches.
async fn webhook_challenge(
    State(state): State<AppState>,
    Path(_tenant_ref): Path<String>,
    Query(query): Query<ChallengeQuery>,
) -> Result<String, ApiError> {
    check_challenge(&state, &query)
}

/// GET /{v}/whatsapp/webhook
async fn webhook_challenge_headerless(
    State(state): State<AppState>,
    Query(query): Query<ChallengeQuery>,
) -> Result<String, ApiError> {
    check_challenge(&state, &query)
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/webhookStatus", post(webhook_status_headerless))
        .route("/webhookStatus/{tenant_ref}", post(webhook_status))
        .route("/webhookRecebimento", post(webhook_inbound_headerless))
        .route("/webhookRecebimento/{tenant_ref}", post(webhook_inbound))
        .route("/webhook", get(webhook_challenge_headerless))
        .route("/webhook/{tenant_ref}", get(webhook_challenge))
}
