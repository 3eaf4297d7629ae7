//! Unified `Database` trait — single async interface for all persistence.
//!
//! Every component receives an `Arc<dyn Database>` at construction instead
//! of reaching for a process-global handle, so each request has a bounded,
//! testable dependency graph.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{Contact, ExportJob, ExportStatus, Message, Template, Tenant};
use crate::query::{Filter, PageRequest};

/// Backend-agnostic persistence trait covering tenants, contacts, messages,
/// templates, and export jobs.
///
/// Listing methods take pre-validated filters and return `(rows, total)`;
/// the page-bound check happens in the query layer, after the true total is
/// known.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), StoreError>;

    // ── Tenants ─────────────────────────────────────────────────────

    /// Look up a tenant by its routing reference.
    async fn get_tenant(&self, reference: &str) -> Result<Option<Tenant>, StoreError>;

    /// Register a tenant (seeding and tests; tenant management itself is
    /// owned by an external service).
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), StoreError>;

    // ── Contacts ────────────────────────────────────────────────────

    /// Create or refresh the contact for `(tenant, phone)`.
    ///
    /// Backed by a uniqueness constraint on the pair — concurrent upserts
    /// never produce duplicates. An existing display name is kept unless a
    /// new one is provided.
    async fn upsert_contact(
        &self,
        tenant_id: Uuid,
        phone: &str,
        display_name: Option<&str>,
    ) -> Result<Contact, StoreError>;

    /// Get one contact by phone number.
    async fn get_contact(
        &self,
        tenant_id: Uuid,
        phone: &str,
    ) -> Result<Option<Contact>, StoreError>;

    /// List contacts for a tenant, filtered and paginated. Returns the rows
    /// of the requested page and the total match count.
    async fn list_contacts(
        &self,
        tenant_id: Uuid,
        filters: &[Filter],
        page: PageRequest,
    ) -> Result<(Vec<Contact>, u64), StoreError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Insert a message row. Returns `false` when a row with the same
    /// `(tenant, provider_message_id, direction)` already exists — inbound
    /// ingestion relies on this for idempotence under webhook redelivery.
    async fn insert_message(&self, message: &Message) -> Result<bool, StoreError>;

    /// Update the status of the message matching `provider_message_id`.
    /// Returns the number of rows matched (0 when the status webhook raced
    /// the send's own persistence).
    async fn update_message_status(
        &self,
        tenant_id: Uuid,
        provider_message_id: &str,
        status: &str,
    ) -> Result<u64, StoreError>;

    /// Conversation history with a phone number, newest first.
    async fn list_history(
        &self,
        tenant_id: Uuid,
        phone: &str,
        filters: &[Filter],
        page: PageRequest,
    ) -> Result<(Vec<Message>, u64), StoreError>;

    /// Flag received messages as read once a client fetched them.
    async fn mark_messages_read(&self, ids: &[Uuid]) -> Result<(), StoreError>;

    /// Sent-message count since a cutoff, for quota enforcement.
    async fn count_sent_since(
        &self,
        tenant_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    // ── Templates ───────────────────────────────────────────────────

    async fn insert_template(&self, template: &Template) -> Result<(), StoreError>;

    async fn update_template(&self, template: &Template) -> Result<(), StoreError>;

    /// Resolve a template by its client-stable hash.
    async fn get_template(
        &self,
        tenant_id: Uuid,
        hash: &str,
    ) -> Result<Option<Template>, StoreError>;

    async fn list_templates(
        &self,
        tenant_id: Uuid,
        filters: &[Filter],
        page: PageRequest,
    ) -> Result<(Vec<Template>, u64), StoreError>;

    // ── Export jobs ─────────────────────────────────────────────────

    async fn insert_export_job(&self, job: &ExportJob) -> Result<(), StoreError>;

    /// Look up a job by hash. Soft-deleted jobs are not returned.
    async fn get_export_job(&self, hash: &str) -> Result<Option<ExportJob>, StoreError>;

    async fn list_export_jobs(
        &self,
        filters: &[Filter],
        page: PageRequest,
    ) -> Result<(Vec<ExportJob>, u64), StoreError>;

    /// Hard-delete a job row. Compensation for a failed queue publish —
    /// the job must not be left visible when its work item never enqueued.
    async fn delete_export_job(&self, hash: &str) -> Result<(), StoreError>;

    /// Soft-delete: set `deleted_at`, keep the row.
    async fn soft_delete_export_job(&self, hash: &str) -> Result<(), StoreError>;

    /// Worker-driven status transition; sets `generated_at`/`file_path` on
    /// completion and bumps `attempt_count` on failure.
    async fn update_export_job_status(
        &self,
        hash: &str,
        status: ExportStatus,
        file_path: Option<&str>,
    ) -> Result<(), StoreError>;

    // ── Queue ───────────────────────────────────────────────────────

    /// Append a work item to the durable named queue. Returns the entry id.
    async fn enqueue(&self, queue_name: &str, payload: &str) -> Result<i64, StoreError>;
}
