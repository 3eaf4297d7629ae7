//! REST surface — JSON in/out, `{codigo, descricao}` error bodies.
//!
//! The send/webhook contract is versioned by path prefix (`v1`..`v3`); the
//! prefixes are aliases of the current contract (see DESIGN.md). Internal
//! error detail is logged, never returned to the caller.

pub mod contacts;
pub mod exports;
pub mod messages;
pub mod templates;
pub mod webhooks;

use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use crate::config::GatewayConfig;
use crate::dispatch::Dispatcher;
use crate::error::{DispatchError, ExportError, QueryError, StoreError, WebhookError};
use crate::export::ExportService;
use crate::model::Tenant;
use crate::store::Database;
use crate::webhook::WebhookHandler;

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub dispatcher: Arc<Dispatcher>,
    pub webhooks: Arc<WebhookHandler>,
    pub exports: Arc<ExportService>,
    pub config: Arc<GatewayConfig>,
}

/// Caller-facing error: HTTP status plus the `{codigo, descricao}` body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub codigo: &'static str,
    pub descricao: String,
}

impl ApiError {
    pub fn validation(descricao: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            codigo: "PARAMETRO_INVALIDO",
            descricao: descricao.into(),
        }
    }

    pub fn not_found(descricao: impl Into<String>) -> Self {
        // 404 semantics surfaced as 400 per the existing API convention.
        Self {
            status: StatusCode::BAD_REQUEST,
            codigo: "NAO_ENCONTRADO",
            descricao: descricao.into(),
        }
    }

    fn internal(codigo: &'static str) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            codigo,
            descricao: "internal failure; see server logs".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "codigo": self.codigo,
            "descricao": self.descricao,
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        Self::validation(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { ref entity, ref key } => {
                Self::not_found(format!("{entity} {key} not found"))
            }
            StoreError::Constraint(reason) => Self::validation(reason),
            other => {
                tracing::error!(error = %other, "Store failure");
                Self::internal("ERRO_PERSISTENCIA")
            }
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::QuotaExceeded { quota } => {
                Self::validation(format!("monthly quota of {quota} messages exhausted"))
            }
            DispatchError::TemplateNotFound { reference } => {
                Self::not_found(format!("template {reference} not found"))
            }
            DispatchError::MissingText => Self::validation("mensagem is required for tipo texto"),
            DispatchError::SendFailed(provider_err) => {
                tracing::error!(error = %provider_err, "Vendor send failure");
                Self::internal("ERRO_PROVEDOR")
            }
            other => {
                tracing::error!(error = %other, "Dispatch failure");
                Self::internal("ERRO_PERSISTENCIA")
            }
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::Unrecognized => {
                // Silently 200-ing would mask vendor misconfiguration.
                tracing::error!("Unrecognized webhook payload");
                Self::internal("WEBHOOK_DESCONHECIDO")
            }
            WebhookError::ChallengeFailed => {
                tracing::warn!("Webhook challenge verification failed");
                Self::internal("WEBHOOK_DESCONHECIDO")
            }
            WebhookError::AutoReply(dispatch_err) => {
                tracing::error!(error = %dispatch_err, "Auto-reply failure after inbound store");
                Self::internal("ERRO_PROVEDOR")
            }
            WebhookError::Store(store_err) => store_err.into(),
        }
    }
}

impl From<ExportError> for ApiError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::JobNotFound { hash } => {
                Self::not_found(format!("export job {hash} not found"))
            }
            ExportError::FileNotFound { path } => {
                Self::not_found(format!("export file {path} not found"))
            }
            ExportError::Enqueue(queue_err) => {
                tracing::error!(error = %queue_err, "Export enqueue failure");
                Self::internal("ERRO_FILA")
            }
            ExportError::Store(store_err) => store_err.into(),
            ExportError::Io(io_err) => {
                tracing::error!(error = %io_err, "Export file IO failure");
                Self::internal("ERRO_ARQUIVO")
            }
        }
    }
}

/// Resolve the tenant for a request from an explicit path segment or the
/// `x-tenant-ref` header (the JWT layer in front of the gateway injects the
/// header; the webhook routes carry the reference in the path).
pub async fn resolve_tenant(
    state: &AppState,
    path_ref: Option<&str>,
    headers: &HeaderMap,
) -> Result<Tenant, ApiError> {
    let reference = match path_ref {
        Some(r) if !r.is_empty() => r.to_string(),
        _ => headers
            .get("x-tenant-ref")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .ok_or_else(|| ApiError::validation("tenant reference missing"))?,
    };

    state
        .db
        .get_tenant(&reference)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("tenant {reference} not found")))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// Routes under one `/{version}/whatsapp` prefix.
fn whatsapp_routes() -> Router<AppState> {
    Router::new()
        .merge(messages::routes())
        .merge(webhooks::routes())
        .merge(templates::routes())
        .merge(contacts::routes())
}

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .merge(exports::routes());

    // v1..v3 denote contract evolutions of the send/webhook surface; the
    // gateway serves the converged contract on all three prefixes.
    for version in ["v1", "v2", "v3"] {
        app = app.nest(&format!("/{version}/whatsapp"), whatsapp_routes());
    }

    app.layer(CorsLayer::permissive()).with_state(state)
}
