//! Send and conversation-history endpoints.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{ApiError, AppState, resolve_tenant};
use crate::model::{Direction, Message, SendKind, SendRequest};
use crate::query::{self, FilterTerm, PageRequest, paginate};

/// Fields message-history requests may filter on.
const MESSAGE_FILTER_FIELDS: &[&str] = &[
    "status",
    "direction",
    "created_at",
    "sent_at",
    "provider_message_id",
];

#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
    #[serde(rename = "numeroDestinatario")]
    pub recipient: String,
    pub tipo: String,
    #[serde(rename = "mensagem", default)]
    pub text: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    /// Insertion order drives positional template placeholders.
    #[serde(rename = "parametros", default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

/// Caller-facing projection of a message. The raw vendor payload stays
/// internal.
#[derive(Debug, Serialize)]
pub struct MessageView {
    pub id: Uuid,
    #[serde(rename = "contatoId")]
    pub contact_id: Uuid,
    #[serde(rename = "remetente")]
    pub sender: String,
    #[serde(rename = "destinatario")]
    pub recipient: String,
    #[serde(rename = "conteudo")]
    pub content: String,
    #[serde(rename = "providerMessageId")]
    pub provider_message_id: String,
    #[serde(rename = "direcao")]
    pub direction: Direction,
    pub status: Option<String>,
    #[serde(rename = "lida")]
    pub read: bool,
    #[serde(rename = "enviadoEm")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(rename = "criadoEm")]
    pub created_at: DateTime<Utc>,
}

impl From<Message> for MessageView {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            contact_id: m.contact_id,
            sender: m.sender,
            recipient: m.recipient,
            content: m.content,
            provider_message_id: m.provider_message_id,
            direction: m.direction,
            status: m.status,
            read: m.read,
            sent_at: m.sent_at,
            created_at: m.created_at,
        }
    }
}

fn parse_kind(tipo: &str) -> Result<SendKind, ApiError> {
    match tipo {
        "texto" => Ok(SendKind::Text),
        "template" => Ok(SendKind::Template),
        other => Err(ApiError::validation(format!("unknown tipo: {other}"))),
    }
}

/// Flatten the JSON parameter object into ordered string pairs.
fn parse_parameters(
    raw: &serde_json::Map<String, serde_json::Value>,
) -> Result<Vec<(String, String)>, ApiError> {
    raw.iter()
        .map(|(key, value)| {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                _ => {
                    return Err(ApiError::validation(format!(
                        "parametros.{key} must be a scalar"
                    )));
                }
            };
            Ok((key.clone(), rendered))
        })
        .collect()
}

/// POST /{v}/whatsapp/enviarMensagem
async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SendMessageBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.recipient.trim().is_empty() {
        return Err(ApiError::validation("numeroDestinatario is required"));
    }
    let kind = parse_kind(&body.tipo)?;
    if kind == SendKind::Template && body.template.as_deref().unwrap_or("").is_empty() {
        return Err(ApiError::validation("template is required for tipo template"));
    }

    let tenant = resolve_tenant(&state, None, &headers).await?;
    let request = SendRequest {
        kind,
        recipient: body.recipient,
        text: body.text,
        template: body.template,
        parameters: parse_parameters(&body.parameters)?,
    };

    let message = state.dispatcher.send(&tenant, request).await?;
    Ok((StatusCode::CREATED, Json(MessageView::from(message))))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub pagina: Option<u32>,
    #[serde(rename = "porPagina")]
    pub page_size: Option<u32>,
    /// JSON-encoded array of `{campo, operador, valor}` terms.
    pub filtros: Option<String>,
}

pub(crate) fn parse_filter_terms(raw: Option<&str>) -> Result<Vec<FilterTerm>, ApiError> {
    match raw {
        None | Some("") => Ok(Vec::new()),
        Some(json) => serde_json::from_str(json)
            .map_err(|e| ApiError::validation(format!("filtros is not valid JSON: {e}"))),
    }
}

/// GET /{v}/whatsapp/historicoMensagens/{numero}
///
/// Fetching history doubles as the read receipt: received messages returned
/// here are flagged as read.
async fn message_history(
    State(state): State<AppState>,
    Path(numero): Path<String>,
    Query(params): Query<HistoryQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = resolve_tenant(&state, None, &headers).await?;

    let terms = parse_filter_terms(params.filtros.as_deref())?;
    let filters = query::validate_filters(&terms, MESSAGE_FILTER_FIELDS)?;
    let page_request = PageRequest::new(params.pagina, params.page_size)?;

    let (messages, total) = state
        .db
        .list_history(tenant.id, &numero, &filters, page_request)
        .await?;

    let unread: Vec<Uuid> = messages
        .iter()
        .filter(|m| m.direction == Direction::Received && !m.read)
        .map(|m| m.id)
        .collect();
    if !unread.is_empty() {
        state.db.mark_messages_read(&unread).await?;
    }

    let views: Vec<MessageView> = messages.into_iter().map(MessageView::from).collect();
    let page = paginate(views, total, page_request)?;
    Ok(Json(page))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/enviarMensagem", post(send_message))
        .route("/historicoMensagens/{numero}", get(message_history))
}
