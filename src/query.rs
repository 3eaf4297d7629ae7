//! Filter language and pagination shared by listing endpoints.
//!
//! Filters arrive as an ordered list of `{campo, operador, valor}` triples.
//! Allowed operators: `=`, `!=`, `in`, `&&` (inclusive range, bounds
//! auto-ordered). Each resource exposes a fixed allow-list of filterable
//! fields; one disallowed field or operator anywhere rejects the whole
//! request instead of silently dropping the term.

use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// Page size applied when the caller does not override it.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// A raw filter term as received on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterTerm {
    #[serde(rename = "campo")]
    pub field: String,
    #[serde(rename = "operador")]
    pub operator: String,
    #[serde(rename = "valor")]
    pub value: serde_json::Value,
}

/// Validated filter operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    In,
    /// Inclusive range; bounds are stored low..=high regardless of the
    /// order the caller passed them.
    Between,
}

/// A validated filter ready for SQL translation.
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub values: Vec<String>,
}

fn value_to_string(field: &str, value: &serde_json::Value) -> Result<String, QueryError> {
    match value {
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        _ => Err(QueryError::InvalidValue {
            field: field.to_string(),
            message: "expected a scalar value".to_string(),
        }),
    }
}

fn value_to_list(field: &str, value: &serde_json::Value) -> Result<Vec<String>, QueryError> {
    match value {
        serde_json::Value::Array(items) => items
            .iter()
            .map(|v| value_to_string(field, v))
            .collect::<Result<Vec<_>, _>>(),
        _ => Err(QueryError::InvalidValue {
            field: field.to_string(),
            message: "expected an array value".to_string(),
        }),
    }
}

/// Order two range bounds low..=high, numerically when both parse as numbers.
fn order_bounds(a: String, b: String) -> (String, String) {
    let swapped = match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x > y,
        _ => a > b,
    };
    if swapped { (b, a) } else { (a, b) }
}

/// Validate a list of raw terms against a field allow-list.
///
/// Every term is checked before the query runs; the first disallowed field
/// or operator fails the entire request.
pub fn validate_filters(
    terms: &[FilterTerm],
    allowed_fields: &[&str],
) -> Result<Vec<Filter>, QueryError> {
    let mut filters = Vec::with_capacity(terms.len());

    for term in terms {
        if !allowed_fields.contains(&term.field.as_str()) {
            return Err(QueryError::DisallowedField(term.field.clone()));
        }

        let filter = match term.operator.as_str() {
            "=" => Filter {
                field: term.field.clone(),
                op: FilterOp::Eq,
                values: vec![value_to_string(&term.field, &term.value)?],
            },
            "!=" => Filter {
                field: term.field.clone(),
                op: FilterOp::Ne,
                values: vec![value_to_string(&term.field, &term.value)?],
            },
            "in" => {
                let values = value_to_list(&term.field, &term.value)?;
                if values.is_empty() {
                    return Err(QueryError::InvalidValue {
                        field: term.field.clone(),
                        message: "in list cannot be empty".to_string(),
                    });
                }
                Filter {
                    field: term.field.clone(),
                    op: FilterOp::In,
                    values,
                }
            }
            "&&" => {
                let values = value_to_list(&term.field, &term.value)?;
                let [low, high]: [String; 2] =
                    values.try_into().map_err(|_| QueryError::InvalidValue {
                        field: term.field.clone(),
                        message: "range needs exactly two bounds".to_string(),
                    })?;
                let (low, high) = order_bounds(low, high);
                Filter {
                    field: term.field.clone(),
                    op: FilterOp::Between,
                    values: vec![low, high],
                }
            }
            other => return Err(QueryError::DisallowedOperator(other.to_string())),
        };
        filters.push(filter);
    }

    Ok(filters)
}

/// Render validated filters as an SQL conjunction with `?` placeholders.
///
/// Returns the fragment (without a leading `WHERE`/`AND`) and the bound
/// values in placeholder order. Field names were allow-listed during
/// validation, so interpolating them is safe.
pub fn sql_fragment(filters: &[Filter]) -> (String, Vec<String>) {
    let mut clauses = Vec::with_capacity(filters.len());
    let mut params = Vec::new();

    for filter in filters {
        match filter.op {
            FilterOp::Eq => {
                clauses.push(format!("{} = ?", filter.field));
                params.push(filter.values[0].clone());
            }
            FilterOp::Ne => {
                clauses.push(format!("{} != ?", filter.field));
                params.push(filter.values[0].clone());
            }
            FilterOp::In => {
                let marks = vec!["?"; filter.values.len()].join(", ");
                clauses.push(format!("{} IN ({})", filter.field, marks));
                params.extend(filter.values.iter().cloned());
            }
            FilterOp::Between => {
                clauses.push(format!("{} BETWEEN ? AND ?", filter.field));
                params.extend(filter.values.iter().cloned());
            }
        }
    }

    (clauses.join(" AND "), params)
}

// ── Pagination ──────────────────────────────────────────────────────

/// Requested page (1-based) and size.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page: Option<u32>, page_size: Option<u32>) -> Result<Self, QueryError> {
        let page = page.unwrap_or(1);
        if page == 0 {
            return Err(QueryError::InvalidParam("pagina".to_string()));
        }
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 {
            return Err(QueryError::InvalidParam("porPagina".to_string()));
        }
        Ok(Self { page, page_size })
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.page_size)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }
}

/// One page of results with totals.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    #[serde(rename = "itens")]
    pub items: Vec<T>,
    pub total: u64,
    #[serde(rename = "pagina")]
    pub page: u32,
    #[serde(rename = "porPagina")]
    pub page_size: u32,
    #[serde(rename = "totalPaginas")]
    pub total_pages: u64,
}

/// Assemble a page, enforcing the bound check that can only happen after
/// the query ran (it needs the true total). Page 1 of an empty result is
/// allowed; anything past the computed total is rejected.
pub fn paginate<T>(items: Vec<T>, total: u64, request: PageRequest) -> Result<Page<T>, QueryError> {
    let total_pages = total.div_ceil(u64::from(request.page_size));
    if u64::from(request.page) > total_pages && !(request.page == 1 && total == 0) {
        return Err(QueryError::InvalidParam("pagina".to_string()));
    }
    Ok(Page {
        items,
        total,
        page: request.page,
        page_size: request.page_size,
        total_pages,
    })
}
