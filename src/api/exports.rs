//! Export job endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::messages::parse_filter_terms;
use crate::api::{ApiError, AppState};
use crate::export::ExportDeletion;
use crate::model::{ExportJob, ExportStatus};
use crate::query::{self, PageRequest, paginate};

/// Fields export listings may filter on.
const EXPORT_FILTER_FIELDS: &[&str] = &["status", "table_name", "created_at"];

#[derive(Debug, Deserialize)]
pub struct CreateExportBody {
    #[serde(rename = "nomeTabela")]
    pub table_name: String,
    #[serde(default)]
    pub filtros: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct ExportJobView {
    pub hash: String,
    #[serde(rename = "nomeTabela")]
    pub table_name: String,
    pub filtros: serde_json::Value,
    pub status: ExportStatus,
    #[serde(rename = "arquivo")]
    pub file_path: Option<String>,
    #[serde(rename = "tentativas")]
    pub attempt_count: i64,
    #[serde(rename = "criadoEm")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "geradoEm")]
    pub generated_at: Option<DateTime<Utc>>,
}

impl From<ExportJob> for ExportJobView {
    fn from(j: ExportJob) -> Self {
        Self {
            hash: j.hash,
            table_name: j.table_name,
            filtros: j.filters,
            status: j.status,
            file_path: j.file_path,
            attempt_count: j.attempt_count,
            created_at: j.created_at,
            generated_at: j.generated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeletionView {
    pub hash: String,
    #[serde(rename = "arquivoRemovido")]
    pub file_removed: bool,
    #[serde(rename = "arquivoAusente")]
    pub missing_file: Option<String>,
}

impl From<ExportDeletion> for DeletionView {
    fn from(d: ExportDeletion) -> Self {
        Self {
            hash: d.hash,
            file_removed: d.file_removed,
            missing_file: d.missing_file,
        }
    }
}

/// POST /exportacao
async fn create_export(
    State(state): State<AppState>,
    Json(body): Json<CreateExportBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.table_name.trim().is_empty() {
        return Err(ApiError::validation("nomeTabela is required"));
    }
    let filters = if body.filtros.is_null() {
        serde_json::json!([])
    } else {
        body.filtros
    };

    let job = state.exports.create(&body.table_name, filters).await?;
    Ok((StatusCode::CREATED, Json(ExportJobView::from(job))))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub pagina: Option<u32>,
    #[serde(rename = "porPagina")]
    pub page_size: Option<u32>,
    pub filtros: Option<String>,
}

/// GET /exportacao
async fn list_exports(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let terms = parse_filter_terms(params.filtros.as_deref())?;
    let filters = query::validate_filters(&terms, EXPORT_FILTER_FIELDS)?;
    let page_request = PageRequest::new(params.pagina, params.page_size)?;

    let (jobs, total) = state.exports.list(&filters, page_request).await?;
    let views: Vec<ExportJobView> = jobs.into_iter().map(ExportJobView::from).collect();
    Ok(Json(paginate(views, total, page_request)?))
}

/// GET /exportacao/{hash}
async fn get_export(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.exports.get(&hash).await?;
    Ok(Json(ExportJobView::from(job)))
}

/// DELETE /exportacao/{hash}
async fn delete_export(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deletion = state.exports.delete(&hash).await?;
    Ok(Json(DeletionView::from(deletion)))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/exportacao", get(list_exports).post(create_export))
        .route("/exportacao/{hash}", get(get_export).delete(delete_export))
}
