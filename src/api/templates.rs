//! Template CRUD endpoints.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::messages::parse_filter_terms;
use crate::api::{ApiError, AppState, resolve_tenant};
use crate::model::Template;
use crate::query::{self, PageRequest, paginate};

/// Fields template listings may filter on.
const TEMPLATE_FILTER_FIELDS: &[&str] = &["title", "active", "created_at"];

#[derive(Debug, Deserialize)]
pub struct CreateTemplateBody {
    pub titulo: String,
    pub corpo: String,
    #[serde(rename = "zenviaRef", default)]
    pub zenvia_ref: Option<String>,
    #[serde(rename = "metaRef", default)]
    pub meta_ref: Option<String>,
    #[serde(rename = "ativo", default)]
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTemplateBody {
    pub titulo: Option<String>,
    pub corpo: Option<String>,
    #[serde(rename = "zenviaRef", default)]
    pub zenvia_ref: Option<String>,
    #[serde(rename = "metaRef", default)]
    pub meta_ref: Option<String>,
    #[serde(rename = "ativo", default)]
    pub active: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct TemplateView {
    pub hash: String,
    pub titulo: String,
    pub corpo: String,
    #[serde(rename = "zenviaRef")]
    pub zenvia_ref: Option<String>,
    #[serde(rename = "metaRef")]
    pub meta_ref: Option<String>,
    pub ativo: bool,
    #[serde(rename = "criadoEm")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "atualizadoEm")]
    pub updated_at: DateTime<Utc>,
}

impl From<Template> for TemplateView {
    fn from(t: Template) -> Self {
        Self {
            hash: t.hash,
            titulo: t.title,
            corpo: t.body,
            zenvia_ref: t.zenvia_ref,
            meta_ref: t.meta_ref,
            ativo: t.active,
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

/// POST /{v}/whatsapp/templates
async fn create_template(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateTemplateBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.titulo.trim().is_empty() {
        return Err(ApiError::validation("titulo is required"));
    }
    if body.corpo.trim().is_empty() {
        return Err(ApiError::validation("corpo is required"));
    }
    let tenant = resolve_tenant(&state, None, &headers).await?;

    let now = Utc::now();
    let template = Template {
        id: Uuid::new_v4(),
        tenant_id: tenant.id,
        title: body.titulo,
        body: body.corpo,
        zenvia_ref: body.zenvia_ref,
        meta_ref: body.meta_ref,
        active: body.active.unwrap_or(true),
        hash: Uuid::new_v4().simple().to_string(),
        created_at: now,
        updated_at: now,
    };
    state.db.insert_template(&template).await?;

    Ok((StatusCode::CREATED, Json(TemplateView::from(template))))
}

/// PUT /{v}/whatsapp/templates/{hash}
async fn update_template(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    headers: HeaderMap,
    Json(body): Json<UpdateTemplateBody>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = resolve_tenant(&state, None, &headers).await?;

    let mut template = state
        .db
        .get_template(tenant.id, &hash)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("template {hash} not found")))?;

    if let Some(titulo) = body.titulo {
        template.title = titulo;
    }
    if let Some(corpo) = body.corpo {
        template.body = corpo;
    }
    if body.zenvia_ref.is_some() {
        template.zenvia_ref = body.zenvia_ref;
    }
    if body.meta_ref.is_some() {
        template.meta_ref = body.meta_ref;
    }
    if let Some(active) = body.active {
        template.active = active;
    }
    state.db.update_template(&template).await?;

    Ok(Json(TemplateView::from(template)))
}

/// GET /{v}/whatsapp/templates/{hash}
async fn get_template(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = resolve_tenant(&state, None, &headers).await?;
    let template = state
        .db
        .get_template(tenant.id, &hash)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("template {hash} not found")))?;
    Ok(Json(TemplateView::from(template)))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub pagina: Option<u32>,
    #[serde(rename = "porPagina")]
    pub page_size: Option<u32>,
    pub filtros: Option<String>,
}

/// GET /{v}/whatsapp/templates
async fn list_templates(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = resolve_tenant(&state, None, &headers).await?;

    let terms = parse_filter_terms(params.filtros.as_deref())?;
    let filters = query::validate_filters(&terms, TEMPLATE_FILTER_FIELDS)?;
    let page_request = PageRequest::new(params.pagina, params.page_size)?;

    let (templates, total) = state
        .db
        .list_templates(tenant.id, &filters, page_request)
        .await?;
    let views: Vec<TemplateView> = templates.into_iter().map(TemplateView::from).collect();
    Ok(Json(paginate(views, total, page_request)?))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/templates", post(create_template).get(list_templates))
        .route("/templates/{hash}", put(update_template).get(get_template))
}
