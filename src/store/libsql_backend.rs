//! libSQL backend — async `Database` trait implementation.
//!
//! Stores a single connection that is reused for all operations.
//! `libsql::Connection` is `Send + Sync` and safe for concurrent async use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params, params_from_iter};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{
    Contact, Direction, ExportJob, ExportStatus, Message, ProviderCredentials, Template, Tenant,
};
use crate::query::{Filter, PageRequest, sql_fragment};
use crate::store::migrations;
use crate::store::traits::Database;

const CONTACT_COLUMNS: &str = "id, tenant_id, phone, display_name, archived, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, contact_id, tenant_id, sender, recipient, raw_payload, content, \
     provider_message_id, direction, status, read, sent_at, created_at, updated_at";

const TEMPLATE_COLUMNS: &str =
    "id, tenant_id, title, body, zenvia_ref, meta_ref, active, hash, created_at, updated_at";

const EXPORT_JOB_COLUMNS: &str = "id, hash, table_name, filters, status, file_path, \
     attempt_count, created_at, generated_at, deleted_at";

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run a `SELECT COUNT(*)` with the given params.
    async fn count(&self, sql: &str, values: Vec<String>) -> Result<u64, StoreError> {
        let mut rows = self
            .conn()
            .query(sql, params_from_iter(values))
            .await
            .map_err(|e| StoreError::Query(format!("count: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => {
                let total: i64 = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("count parse: {e}")))?;
                Ok(total.max(0) as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(StoreError::Query(format!("count: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|s| parse_datetime(&s))
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

fn row_to_tenant(row: &libsql::Row) -> Result<Tenant, StoreError> {
    let id: String = row.get(0).map_err(row_err)?;
    let reference: String = row.get(1).map_err(row_err)?;
    let name: String = row.get(2).map_err(row_err)?;
    let provider: String = row.get(3).map_err(row_err)?;
    let api_token: String = row.get(4).map_err(row_err)?;
    let from_number: String = row.get(5).map_err(row_err)?;
    let channel_id: Option<String> = row.get(6).map_err(row_err)?;
    let auto_reply: Option<String> = row.get(7).map_err(row_err)?;
    let monthly_quota: Option<i64> = row.get(8).map_err(row_err)?;

    Ok(Tenant {
        id: parse_uuid(&id),
        reference,
        name,
        provider: provider
            .parse()
            .map_err(|e: String| StoreError::Serialization(e))?,
        credentials: ProviderCredentials {
            api_token: SecretString::from(api_token),
            from_number,
            channel_id,
        },
        auto_reply,
        monthly_quota,
    })
}

fn row_to_contact(row: &libsql::Row) -> Result<Contact, StoreError> {
    let id: String = row.get(0).map_err(row_err)?;
    let tenant_id: String = row.get(1).map_err(row_err)?;
    let phone: String = row.get(2).map_err(row_err)?;
    let display_name: Option<String> = row.get(3).map_err(row_err)?;
    let archived: i64 = row.get(4).map_err(row_err)?;
    let created_at: String = row.get(5).map_err(row_err)?;
    let updated_at: String = row.get(6).map_err(row_err)?;

    Ok(Contact {
        id: parse_uuid(&id),
        tenant_id: parse_uuid(&tenant_id),
        phone,
        display_name,
        archived: archived != 0,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

fn row_to_message(row: &libsql::Row) -> Result<Message, StoreError> {
    let id: String = row.get(0).map_err(row_err)?;
    let contact_id: String = row.get(1).map_err(row_err)?;
    let tenant_id: String = row.get(2).map_err(row_err)?;
    let sender: String = row.get(3).map_err(row_err)?;
    let recipient: String = row.get(4).map_err(row_err)?;
    let raw_payload: String = row.get(5).map_err(row_err)?;
    let content: String = row.get(6).map_err(row_err)?;
    let provider_message_id: String = row.get(7).map_err(row_err)?;
    let direction: String = row.get(8).map_err(row_err)?;
    let status: Option<String> = row.get(9).map_err(row_err)?;
    let read: i64 = row.get(10).map_err(row_err)?;
    let sent_at: Option<String> = row.get(11).map_err(row_err)?;
    let created_at: String = row.get(12).map_err(row_err)?;
    let updated_at: String = row.get(13).map_err(row_err)?;

    Ok(Message {
        id: parse_uuid(&id),
        contact_id: parse_uuid(&contact_id),
        tenant_id: parse_uuid(&tenant_id),
        sender,
        recipient,
        raw_payload,
        content,
        provider_message_id,
        direction: direction
            .parse::<Direction>()
            .map_err(StoreError::Serialization)?,
        status,
        read: read != 0,
        sent_at: parse_optional_datetime(sent_at),
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

fn row_to_template(row: &libsql::Row) -> Result<Template, StoreError> {
    let id: String = row.get(0).map_err(row_err)?;
    let tenant_id: String = row.get(1).map_err(row_err)?;
    let title: String = row.get(2).map_err(row_err)?;
    let body: String = row.get(3).map_err(row_err)?;
    let zenvia_ref: Option<String> = row.get(4).map_err(row_err)?;
    let meta_ref: Option<String> = row.get(5).map_err(row_err)?;
    let active: i64 = row.get(6).map_err(row_err)?;
    let hash: String = row.get(7).map_err(row_err)?;
    let created_at: String = row.get(8).map_err(row_err)?;
    let updated_at: String = row.get(9).map_err(row_err)?;

    Ok(Template {
        id: parse_uuid(&id),
        tenant_id: parse_uuid(&tenant_id),
        title,
        body,
        zenvia_ref,
        meta_ref,
        active: active != 0,
        hash,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

fn row_to_export_job(row: &libsql::Row) -> Result<ExportJob, StoreError> {
    let id: String = row.get(0).map_err(row_err)?;
    let hash: String = row.get(1).map_err(row_err)?;
    let table_name: String = row.get(2).map_err(row_err)?;
    let filters: String = row.get(3).map_err(row_err)?;
    let status: i64 = row.get(4).map_err(row_err)?;
    let file_path: Option<String> = row.get(5).map_err(row_err)?;
    let attempt_count: i64 = row.get(6).map_err(row_err)?;
    let created_at: String = row.get(7).map_err(row_err)?;
    let generated_at: Option<String> = row.get(8).map_err(row_err)?;
    let deleted_at: Option<String> = row.get(9).map_err(row_err)?;

    Ok(ExportJob {
        id: parse_uuid(&id),
        hash,
        table_name,
        filters: serde_json::from_str(&filters)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        status: ExportStatus::from_i64(status),
        file_path,
        attempt_count,
        created_at: parse_datetime(&created_at),
        generated_at: parse_optional_datetime(generated_at),
        deleted_at: parse_optional_datetime(deleted_at),
    })
}

fn row_err(e: libsql::Error) -> StoreError {
    StoreError::Query(format!("row parse: {e}"))
}

/// Append an optional filter fragment to a base WHERE clause.
fn with_filters(base: &str, filters: &[Filter]) -> (String, Vec<String>) {
    let (fragment, values) = sql_fragment(filters);
    if fragment.is_empty() {
        (base.to_string(), values)
    } else {
        (format!("{base} AND {fragment}"), values)
    }
}

/// Bind parameters for a page query: the filter values followed by
/// integer LIMIT/OFFSET.
fn page_params(base: Vec<String>, values: Vec<String>, page: PageRequest) -> Vec<libsql::Value> {
    let mut params: Vec<libsql::Value> = base.into_iter().map(libsql::Value::from).collect();
    params.extend(values.into_iter().map(libsql::Value::from));
    params.push(libsql::Value::from(page.limit() as i64));
    params.push(libsql::Value::from(page.offset() as i64));
    params
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), StoreError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Tenants ─────────────────────────────────────────────────────

    async fn get_tenant(&self, reference: &str) -> Result<Option<Tenant>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, reference, name, provider, api_token, from_number, channel_id, \
                 auto_reply, monthly_quota FROM tenants WHERE reference = ?1",
                params![reference],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_tenant: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_tenant(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_tenant: {e}"))),
        }
    }

    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO tenants (id, reference, name, provider, api_token, from_number, \
                 channel_id, auto_reply, monthly_quota) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    tenant.id.to_string(),
                    tenant.reference.clone(),
                    tenant.name.clone(),
                    tenant.provider.to_string(),
                    tenant.credentials.api_token.expose_secret(),
                    tenant.credentials.from_number.clone(),
                    tenant.credentials.channel_id.clone(),
                    tenant.auto_reply.clone(),
                    tenant.monthly_quota,
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("insert_tenant: {e}")))?;
        Ok(())
    }

    // ── Contacts ────────────────────────────────────────────────────

    async fn upsert_contact(
        &self,
        tenant_id: Uuid,
        phone: &str,
        display_name: Option<&str>,
    ) -> Result<Contact, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO contacts (id, tenant_id, phone, display_name, archived, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5) \
                 ON CONFLICT (tenant_id, phone) DO UPDATE SET \
                 display_name = COALESCE(excluded.display_name, contacts.display_name), \
                 updated_at = excluded.updated_at",
                params![
                    Uuid::new_v4().to_string(),
                    tenant_id.to_string(),
                    phone,
                    display_name,
                    now,
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("upsert_contact: {e}")))?;

        self.get_contact(tenant_id, phone)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "contact".to_string(),
                key: phone.to_string(),
            })
    }

    async fn get_contact(
        &self,
        tenant_id: Uuid,
        phone: &str,
    ) -> Result<Option<Contact>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CONTACT_COLUMNS} FROM contacts WHERE tenant_id = ?1 AND phone = ?2"
                ),
                params![tenant_id.to_string(), phone],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_contact: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_contact(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_contact: {e}"))),
        }
    }

    async fn list_contacts(
        &self,
        tenant_id: Uuid,
        filters: &[Filter],
        page: PageRequest,
    ) -> Result<(Vec<Contact>, u64), StoreError> {
        let (where_clause, values) = with_filters("tenant_id = ?", filters);

        let mut count_params = vec![tenant_id.to_string()];
        count_params.extend(values.iter().cloned());
        let total = self
            .count(
                &format!("SELECT COUNT(*) FROM contacts WHERE {where_clause}"),
                count_params,
            )
            .await?;

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CONTACT_COLUMNS} FROM contacts WHERE {where_clause} \
                     ORDER BY phone LIMIT ? OFFSET ?"
                ),
                params_from_iter(page_params(vec![tenant_id.to_string()], values, page)),
            )
            .await
            .map_err(|e| StoreError::Query(format!("list_contacts: {e}")))?;

        let mut contacts = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("list_contacts: {e}")))?
        {
            contacts.push(row_to_contact(&row)?);
        }
        Ok((contacts, total))
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn insert_message(&self, message: &Message) -> Result<bool, StoreError> {
        let affected = self
            .conn()
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO messages ({MESSAGE_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                ),
                params![
                    message.id.to_string(),
                    message.contact_id.to_string(),
                    message.tenant_id.to_string(),
                    message.sender.clone(),
                    message.recipient.clone(),
                    message.raw_payload.clone(),
                    message.content.clone(),
                    message.provider_message_id.clone(),
                    message.direction.to_string(),
                    message.status.clone(),
                    message.read as i64,
                    message.sent_at.map(|t| t.to_rfc3339()),
                    message.created_at.to_rfc3339(),
                    message.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("insert_message: {e}")))?;

        debug!(
            id = %message.id,
            provider_message_id = %message.provider_message_id,
            inserted = affected > 0,
            "Message insert"
        );
        Ok(affected > 0)
    }

    async fn update_message_status(
        &self,
        tenant_id: Uuid,
        provider_message_id: &str,
        status: &str,
    ) -> Result<u64, StoreError> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn()
            .execute(
                "UPDATE messages SET status = ?1, updated_at = ?2 \
                 WHERE tenant_id = ?3 AND provider_message_id = ?4 AND direction = 'sent'",
                params![status, now, tenant_id.to_string(), provider_message_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("update_message_status: {e}")))?;
        Ok(affected)
    }

    async fn list_history(
        &self,
        tenant_id: Uuid,
        phone: &str,
        filters: &[Filter],
        page: PageRequest,
    ) -> Result<(Vec<Message>, u64), StoreError> {
        let (where_clause, values) =
            with_filters("tenant_id = ? AND (sender = ? OR recipient = ?)", filters);

        let mut count_params = vec![tenant_id.to_string(), phone.to_string(), phone.to_string()];
        count_params.extend(values.iter().cloned());
        let total = self
            .count(
                &format!("SELECT COUNT(*) FROM messages WHERE {where_clause}"),
                count_params,
            )
            .await?;

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE {where_clause} \
                     ORDER BY created_at DESC LIMIT ? OFFSET ?"
                ),
                params_from_iter(page_params(
                    vec![tenant_id.to_string(), phone.to_string(), phone.to_string()],
                    values,
                    page,
                )),
            )
            .await
            .map_err(|e| StoreError::Query(format!("list_history: {e}")))?;

        let mut messages = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("list_history: {e}")))?
        {
            messages.push(row_to_message(&row)?);
        }
        Ok((messages, total))
    }

    async fn mark_messages_read(&self, ids: &[Uuid]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let marks = vec!["?"; ids.len()].join(", ");
        let values: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        self.conn()
            .execute(
                &format!("UPDATE messages SET read = 1 WHERE id IN ({marks})"),
                params_from_iter(values),
            )
            .await
            .map_err(|e| StoreError::Query(format!("mark_messages_read: {e}")))?;
        Ok(())
    }

    async fn count_sent_since(
        &self,
        tenant_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let total = self
            .count(
                "SELECT COUNT(*) FROM messages \
                 WHERE tenant_id = ? AND direction = 'sent' AND created_at >= ?",
                vec![tenant_id.to_string(), since.to_rfc3339()],
            )
            .await?;
        Ok(total as i64)
    }

    // ── Templates ───────────────────────────────────────────────────

    async fn insert_template(&self, template: &Template) -> Result<(), StoreError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO templates ({TEMPLATE_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    template.id.to_string(),
                    template.tenant_id.to_string(),
                    template.title.clone(),
                    template.body.clone(),
                    template.zenvia_ref.clone(),
                    template.meta_ref.clone(),
                    template.active as i64,
                    template.hash.clone(),
                    template.created_at.to_rfc3339(),
                    template.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("UNIQUE") {
                    StoreError::Constraint(format!("template already exists: {msg}"))
                } else {
                    StoreError::Query(format!("insert_template: {msg}"))
                }
            })?;
        Ok(())
    }

    async fn update_template(&self, template: &Template) -> Result<(), StoreError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE templates SET title = ?1, body = ?2, zenvia_ref = ?3, meta_ref = ?4, \
                 active = ?5, updated_at = ?6 WHERE tenant_id = ?7 AND hash = ?8",
                params![
                    template.title.clone(),
                    template.body.clone(),
                    template.zenvia_ref.clone(),
                    template.meta_ref.clone(),
                    template.active as i64,
                    Utc::now().to_rfc3339(),
                    template.tenant_id.to_string(),
                    template.hash.clone(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("update_template: {e}")))?;

        if affected == 0 {
            return Err(StoreError::NotFound {
                entity: "template".to_string(),
                key: template.hash.clone(),
            });
        }
        Ok(())
    }

    async fn get_template(
        &self,
        tenant_id: Uuid,
        hash: &str,
    ) -> Result<Option<Template>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TEMPLATE_COLUMNS} FROM templates WHERE tenant_id = ?1 AND hash = ?2"
                ),
                params![tenant_id.to_string(), hash],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_template: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_template(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_template: {e}"))),
        }
    }

    async fn list_templates(
        &self,
        tenant_id: Uuid,
        filters: &[Filter],
        page: PageRequest,
    ) -> Result<(Vec<Template>, u64), StoreError> {
        let (where_clause, values) = with_filters("tenant_id = ?", filters);

        let mut count_params = vec![tenant_id.to_string()];
        count_params.extend(values.iter().cloned());
        let total = self
            .count(
                &format!("SELECT COUNT(*) FROM templates WHERE {where_clause}"),
                count_params,
            )
            .await?;

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TEMPLATE_COLUMNS} FROM templates WHERE {where_clause} \
                     ORDER BY title LIMIT ? OFFSET ?"
                ),
                params_from_iter(page_params(vec![tenant_id.to_string()], values, page)),
            )
            .await
            .map_err(|e| StoreError::Query(format!("list_templates: {e}")))?;

        let mut templates = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("list_templates: {e}")))?
        {
            templates.push(row_to_template(&row)?);
        }
        Ok((templates, total))
    }

    // ── Export jobs ─────────────────────────────────────────────────

    async fn insert_export_job(&self, job: &ExportJob) -> Result<(), StoreError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO export_jobs ({EXPORT_JOB_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    job.id.to_string(),
                    job.hash.clone(),
                    job.table_name.clone(),
                    job.filters.to_string(),
                    job.status.as_i64(),
                    job.file_path.clone(),
                    job.attempt_count,
                    job.created_at.to_rfc3339(),
                    job.generated_at.map(|t| t.to_rfc3339()),
                    job.deleted_at.map(|t| t.to_rfc3339()),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("insert_export_job: {e}")))?;
        Ok(())
    }

    async fn get_export_job(&self, hash: &str) -> Result<Option<ExportJob>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EXPORT_JOB_COLUMNS} FROM export_jobs \
                     WHERE hash = ?1 AND deleted_at IS NULL"
                ),
                params![hash],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_export_job: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_export_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_export_job: {e}"))),
        }
    }

    async fn list_export_jobs(
        &self,
        filters: &[Filter],
        page: PageRequest,
    ) -> Result<(Vec<ExportJob>, u64), StoreError> {
        let (where_clause, values) = with_filters("deleted_at IS NULL", filters);

        let total = self
            .count(
                &format!("SELECT COUNT(*) FROM export_jobs WHERE {where_clause}"),
                values.clone(),
            )
            .await?;

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EXPORT_JOB_COLUMNS} FROM export_jobs WHERE {where_clause} \
                     ORDER BY created_at DESC LIMIT ? OFFSET ?"
                ),
                params_from_iter(page_params(Vec::new(), values, page)),
            )
            .await
            .map_err(|e| StoreError::Query(format!("list_export_jobs: {e}")))?;

        let mut jobs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("list_export_jobs: {e}")))?
        {
            jobs.push(row_to_export_job(&row)?);
        }
        Ok((jobs, total))
    }

    async fn delete_export_job(&self, hash: &str) -> Result<(), StoreError> {
        self.conn()
            .execute("DELETE FROM export_jobs WHERE hash = ?1", params![hash])
            .await
            .map_err(|e| StoreError::Query(format!("delete_export_job: {e}")))?;
        Ok(())
    }

    async fn soft_delete_export_job(&self, hash: &str) -> Result<(), StoreError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE export_jobs SET deleted_at = ?1 WHERE hash = ?2 AND deleted_at IS NULL",
                params![Utc::now().to_rfc3339(), hash],
            )
            .await
            .map_err(|e| StoreError::Query(format!("soft_delete_export_job: {e}")))?;

        if affected == 0 {
            return Err(StoreError::NotFound {
                entity: "export_job".to_string(),
                key: hash.to_string(),
            });
        }
        Ok(())
    }

    async fn update_export_job_status(
        &self,
        hash: &str,
        status: ExportStatus,
        file_path: Option<&str>,
    ) -> Result<(), StoreError> {
        let generated_at = match status {
            ExportStatus::Done => Some(Utc::now().to_rfc3339()),
            _ => None,
        };
        let bump_attempts = matches!(status, ExportStatus::Failed) as i64;

        let affected = self
            .conn()
            .execute(
                "UPDATE export_jobs SET status = ?1, \
                 file_path = COALESCE(?2, file_path), \
                 generated_at = COALESCE(?3, generated_at), \
                 attempt_count = attempt_count + ?4 \
                 WHERE hash = ?5 AND deleted_at IS NULL",
                params![status.as_i64(), file_path, generated_at, bump_attempts, hash],
            )
            .await
            .map_err(|e| StoreError::Query(format!("update_export_job_status: {e}")))?;

        if affected == 0 {
            return Err(StoreError::NotFound {
                entity: "export_job".to_string(),
                key: hash.to_string(),
            });
        }
        Ok(())
    }

    // ── Queue ───────────────────────────────────────────────────────

    async fn enqueue(&self, queue_name: &str, payload: &str) -> Result<i64, StoreError> {
        self.conn()
            .execute(
                "INSERT INTO queue (queue_name, payload) VALUES (?1, ?2)",
                params![queue_name, payload],
            )
            .await
            .map_err(|e| StoreError::Query(format!("enqueue: {e}")))?;
        Ok(self.conn().last_insert_rowid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProviderKind;

    async fn backend() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn sent_message(tenant_id: Uuid, contact_id: Uuid, provider_message_id: &str) -> Message {
        let now = Utc::now();
        Message {
            id: Uuid::new_v4(),
            contact_id,
            tenant_id,
            sender: "5511900000000".into(),
            recipient: "5511987654321".into(),
            raw_payload: "{}".into(),
            content: "oi".into(),
            provider_message_id: provider_message_id.into(),
            direction: Direction::Sent,
            status: None,
            read: false,
            sent_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn contact_upsert_is_idempotent() {
        let db = backend().await;
        let tenant_id = Uuid::new_v4();

        let first = db
            .upsert_contact(tenant_id, "5511987654321", Some("Ana"))
            .await
            .unwrap();
        let second = db
            .upsert_contact(tenant_id, "5511987654321", None)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.display_name.as_deref(), Some("Ana"));

        let (contacts, total) = db
            .list_contacts(tenant_id, &[], PageRequest::new(None, None).unwrap())
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(contacts.len(), 1);
    }

    #[tokio::test]
    async fn contacts_are_tenant_scoped() {
        let db = backend().await;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        db.upsert_contact(a, "551100000001", None).await.unwrap();
        db.upsert_contact(b, "551100000001", None).await.unwrap();

        let (_, total_a) = db
            .list_contacts(a, &[], PageRequest::new(None, None).unwrap())
            .await
            .unwrap();
        assert_eq!(total_a, 1);
    }

    #[tokio::test]
    async fn duplicate_received_message_is_not_inserted() {
        let db = backend().await;
        let tenant_id = Uuid::new_v4();
        let contact = db.upsert_contact(tenant_id, "551100000001", None).await.unwrap();

        let mut msg = sent_message(tenant_id, contact.id, "wamid.1");
        msg.direction = Direction::Received;
        assert!(db.insert_message(&msg).await.unwrap());

        let mut dup = sent_message(tenant_id, contact.id, "wamid.1");
        dup.direction = Direction::Received;
        assert!(!db.insert_message(&dup).await.unwrap());
    }

    #[tokio::test]
    async fn status_update_matches_by_provider_id() {
        let db = backend().await;
        let tenant_id = Uuid::new_v4();
        let contact = db.upsert_contact(tenant_id, "551100000001", None).await.unwrap();

        db.insert_message(&sent_message(tenant_id, contact.id, "zv-1"))
            .await
            .unwrap();

        let matched = db
            .update_message_status(tenant_id, "zv-1", "delivered")
            .await
            .unwrap();
        assert_eq!(matched, 1);

        let missed = db
            .update_message_status(tenant_id, "zv-unknown", "delivered")
            .await
            .unwrap();
        assert_eq!(missed, 0);
    }

    #[tokio::test]
    async fn history_filters_and_counts() {
        let db = backend().await;
        let tenant_id = Uuid::new_v4();
        let contact = db.upsert_contact(tenant_id, "5511987654321", None).await.unwrap();

        for i in 0..3 {
            db.insert_message(&sent_message(tenant_id, contact.id, &format!("zv-{i}")))
                .await
                .unwrap();
        }

        let (messages, total) = db
            .list_history(
                tenant_id,
                "5511987654321",
                &[],
                PageRequest::new(None, None).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(messages.len(), 3);

        // A different number has no history.
        let (_, none) = db
            .list_history(
                tenant_id,
                "5511000000000",
                &[],
                PageRequest::new(None, None).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(none, 0);
    }

    #[tokio::test]
    async fn mark_read_flips_flag() {
        let db = backend().await;
        let tenant_id = Uuid::new_v4();
        let contact = db.upsert_contact(tenant_id, "5511987654321", None).await.unwrap();

        let mut msg = sent_message(tenant_id, contact.id, "wamid.9");
        msg.direction = Direction::Received;
        db.insert_message(&msg).await.unwrap();

        db.mark_messages_read(&[msg.id]).await.unwrap();

        let (messages, _) = db
            .list_history(
                tenant_id,
                "5511987654321",
                &[],
                PageRequest::new(None, None).unwrap(),
            )
            .await
            .unwrap();
        assert!(messages[0].read);
    }

    #[tokio::test]
    async fn template_roundtrip_and_unique_title() {
        let db = backend().await;
        let tenant_id = Uuid::new_v4();
        let now = Utc::now();
        let template = Template {
            id: Uuid::new_v4(),
            tenant_id,
            title: "welcome".into(),
            body: "Hello {{name}}".into(),
            zenvia_ref: Some("zv-tpl".into()),
            meta_ref: None,
            active: true,
            hash: "abc123".into(),
            created_at: now,
            updated_at: now,
        };
        db.insert_template(&template).await.unwrap();

        let loaded = db.get_template(tenant_id, "abc123").await.unwrap().unwrap();
        assert_eq!(loaded.title, "welcome");
        assert_eq!(loaded.provider_ref(ProviderKind::Zenvia), Some("zv-tpl"));
        assert_eq!(loaded.provider_ref(ProviderKind::Meta), None);

        let mut dup = template.clone();
        dup.id = Uuid::new_v4();
        dup.hash = "other".into();
        assert!(db.insert_template(&dup).await.is_err());
    }

    #[tokio::test]
    async fn export_job_lifecycle() {
        let db = backend().await;
        let now = Utc::now();
        let job = ExportJob {
            id: Uuid::new_v4(),
            hash: "deadbeef".into(),
            table_name: "messages".into(),
            filters: serde_json::json!([]),
            status: ExportStatus::Pending,
            file_path: None,
            attempt_count: 0,
            created_at: now,
            generated_at: None,
            deleted_at: None,
        };
        db.insert_export_job(&job).await.unwrap();

        let loaded = db.get_export_job("deadbeef").await.unwrap().unwrap();
        assert_eq!(loaded.status, ExportStatus::Pending);

        db.update_export_job_status("deadbeef", ExportStatus::Done, Some("/tmp/x.csv"))
            .await
            .unwrap();
        let done = db.get_export_job("deadbeef").await.unwrap().unwrap();
        assert_eq!(done.status, ExportStatus::Done);
        assert_eq!(done.file_path.as_deref(), Some("/tmp/x.csv"));
        assert!(done.generated_at.is_some());

        db.soft_delete_export_job("deadbeef").await.unwrap();
        assert!(db.get_export_job("deadbeef").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_transition_bumps_attempts() {
        let db = backend().await;
        let now = Utc::now();
        let job = ExportJob {
            id: Uuid::new_v4(),
            hash: "retry".into(),
            table_name: "messages".into(),
            filters: serde_json::json!([]),
            status: ExportStatus::Pending,
            file_path: None,
            attempt_count: 0,
            created_at: now,
            generated_at: None,
            deleted_at: None,
        };
        db.insert_export_job(&job).await.unwrap();

        db.update_export_job_status("retry", ExportStatus::Failed, None)
            .await
            .unwrap();
        db.update_export_job_status("retry", ExportStatus::Failed, None)
            .await
            .unwrap();

        let failed = db.get_export_job("retry").await.unwrap().unwrap();
        assert_eq!(failed.attempt_count, 2);
    }

    #[tokio::test]
    async fn enqueue_appends_rows() {
        let db = backend().await;
        let first = db.enqueue("exportacao", r#"{"hash":"a"}"#).await.unwrap();
        let second = db.enqueue("exportacao", r#"{"hash":"b"}"#).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn tenant_roundtrip() {
        let db = backend().await;
        let tenant = Tenant {
            id: Uuid::new_v4(),
            reference: "acme".into(),
            name: "Acme".into(),
            provider: ProviderKind::Meta,
            credentials: ProviderCredentials {
                api_token: SecretString::from("secret"),
                from_number: "5511900000000".into(),
                channel_id: Some("123".into()),
            },
            auto_reply: Some("We got it!".into()),
            monthly_quota: Some(1000),
        };
        db.insert_tenant(&tenant).await.unwrap();

        let loaded = db.get_tenant("acme").await.unwrap().unwrap();
        assert_eq!(loaded.id, tenant.id);
        assert_eq!(loaded.provider, ProviderKind::Meta);
        assert_eq!(loaded.credentials.channel_id.as_deref(), Some("123"));
        assert_eq!(loaded.auto_reply.as_deref(), Some("We got it!"));
        assert_eq!(loaded.monthly_quota, Some(1000));

        assert!(db.get_tenant("missing").await.unwrap().is_none());
    }
}
