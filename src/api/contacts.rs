//! Contact listing and lookup endpoints.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::messages::parse_filter_terms;
use crate::api::{ApiError, AppState, resolve_tenant};
use crate::model::Contact;
use crate::query::{self, PageRequest, paginate};

/// Fields contact listings may filter on.
const CONTACT_FILTER_FIELDS: &[&str] = &["phone", "display_name", "archived", "created_at"];

#[derive(Debug, Serialize)]
pub struct ContactView {
    pub id: Uuid,
    #[serde(rename = "telefone")]
    pub phone: String,
    #[serde(rename = "nome")]
    pub display_name: Option<String>,
    #[serde(rename = "arquivado")]
    pub archived: bool,
    #[serde(rename = "criadoEm")]
    pub created_at: DateTime<Utc>,
}

impl From<Contact> for ContactView {
    fn from(c: Contact) -> Self {
        Self {
            id: c.id,
            phone: c.phone,
            display_name: c.display_name,
            archived: c.archived,
            created_at: c.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub pagina: Option<u32>,
    #[serde(rename = "porPagina")]
    pub page_size: Option<u32>,
    pub filtros: Option<String>,
}

/// GET /{v}/whatsapp/contatos
async fn list_contacts(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = resolve_tenant(&state, None, &headers).await?;

    let terms = parse_filter_terms(params.filtros.as_deref())?;
    let filters = query::validate_filters(&terms, CONTACT_FILTER_FIELDS)?;
    let page_request = PageRequest::new(params.pagina, params.page_size)?;

    let (contacts, total) = state
        .db
        .list_contacts(tenant.id, &filters, page_request)
        .await?;
    let views: Vec<ContactView> = contacts.into_iter().map(ContactView::from).collect();
    Ok(Json(paginate(views, total, page_request)?))
}

/// GET /{v}/whatsapp/contatos/{numero}
async fn get_contact(
    State(state): State<AppState>,
    Path(numero): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = resolve_tenant(&state, None, &headers).await?;
    let contact = state
        .db
        .get_contact(tenant.id, &numero)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("contato {numero} not found")))?;
    Ok(Json(ContactView::from(contact)))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/contatos", get(list_contacts))
        .route("/contatos/{numero}", get(get_contact))
}
