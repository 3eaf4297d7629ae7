//! Export job pipeline — enqueue and status tracking.
//!
//! `create` performs two external writes with no spanning transaction: the
//! job row and the queue publish. The compensation rule keeps them
//! consistent: when the publish fails, the freshly inserted row is deleted
//! again so callers never observe a job whose work item was never enqueued.
//! File generation itself belongs to the external worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;
use uuid::Uuid;

use crate::error::ExportError;
use crate::model::{ExportJob, ExportStatus};
use crate::query::{Filter, PageRequest};
use crate::queue::{ExportQueue, ExportWorkItem};
use crate::store::Database;

/// Length of the client-facing job hash.
const HASH_LEN: usize = 40;

/// Generate a random, globally unique job hash.
fn generate_hash() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(HASH_LEN)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

/// Result of a delete, distinguishing the missing-file case from success.
#[derive(Debug, Clone)]
pub struct ExportDeletion {
    pub hash: String,
    /// True when an underlying file existed and was removed.
    pub file_removed: bool,
    /// Set when the job referenced a file that was no longer on disk; the
    /// job itself is still marked deleted.
    pub missing_file: Option<String>,
}

/// Owns the export job state machine.
pub struct ExportService {
    db: Arc<dyn Database>,
    queue: Arc<dyn ExportQueue>,
}

impl ExportService {
    pub fn new(db: Arc<dyn Database>, queue: Arc<dyn ExportQueue>) -> Self {
        Self { db, queue }
    }

    /// Create a pending job and publish its work item.
    ///
    /// Either both writes succeed or neither is visible: a failed publish
    /// triggers a compensating delete of the job row.
    pub async fn create(
        &self,
        table_name: &str,
        filters: serde_json::Value,
    ) -> Result<ExportJob, ExportError> {
        let job = ExportJob {
            id: Uuid::new_v4(),
            hash: generate_hash(),
            table_name: table_name.to_string(),
            filters: filters.clone(),
            status: ExportStatus::Pending,
            file_path: None,
            attempt_count: 0,
            created_at: Utc::now(),
            generated_at: None,
            deleted_at: None,
        };
        self.db.insert_export_job(&job).await?;

        let item = ExportWorkItem {
            hash: job.hash.clone(),
            table_name: job.table_name.clone(),
            filters,
            requested_at: job.created_at,
        };
        if let Err(publish_err) = self.queue.publish(&item).await {
            // The job must not be left orphaned without a work item.
            if let Err(delete_err) = self.db.delete_export_job(&job.hash).await {
                tracing::error!(
                    hash = %job.hash,
                    error = %delete_err,
                    "Compensating delete failed after publish failure"
                );
            }
            return Err(ExportError::Enqueue(publish_err));
        }

        tracing::info!(hash = %job.hash, table = %job.table_name, "Export job created");
        Ok(job)
    }

    /// Fetch one job by hash.
    pub async fn get(&self, hash: &str) -> Result<ExportJob, ExportError> {
        self.db
            .get_export_job(hash)
            .await?
            .ok_or_else(|| ExportError::JobNotFound {
                hash: hash.to_string(),
            })
    }

    /// List jobs with the shared filter/pagination semantics.
    pub async fn list(
        &self,
        filters: &[Filter],
        page: PageRequest,
    ) -> Result<(Vec<ExportJob>, u64), ExportError> {
        Ok(self.db.list_export_jobs(filters, page).await?)
    }

    /// Delete a job: remove the generated file first (when present), then
    /// soft-delete the record. A missing file is reported but non-fatal; a
    /// missing record is `JobNotFound`.
    pub async fn delete(&self, hash: &str) -> Result<ExportDeletion, ExportError> {
        let job = self.get(hash).await?;

        let mut file_removed = false;
        let mut missing_file = None;
        if let Some(path) = job.file_path.as_deref() {
            match tokio::fs::remove_file(Path::new(path)).await {
                Ok(()) => file_removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::warn!(hash = %hash, path = %path, "Export file already gone");
                    missing_file = Some(path.to_string());
                }
                Err(e) => return Err(ExportError::Io(e)),
            }
        }

        self.db.soft_delete_export_job(hash).await?;
        tracing::info!(hash = %hash, file_removed, "Export job deleted");

        Ok(ExportDeletion {
            hash: hash.to_string(),
            file_removed,
            missing_file,
        })
    }

    /// Worker-facing transition: claim, finish, or fail a job.
    pub async fn transition(
        &self,
        hash: &str,
        status: ExportStatus,
        file_path: Option<&PathBuf>,
    ) -> Result<(), ExportError> {
        let path = file_path.map(|p| p.display().to_string());
        self.db
            .update_export_job_status(hash, status, path.as_deref())
            .await?;
        Ok(())
    }
}
