//! Durable queue producer for export work items.
//!
//! Only the producer side lives in this core: a work item is appended to a
//! named queue table and an external worker drains it. The wire format is the
//! contract — `{hash, nomeTabela, filtros, dataSolicitacao}`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::QueueError;
use crate::store::Database;

/// Name of the export work queue.
pub const EXPORT_QUEUE: &str = "exportacao";

/// The message published for each export job.
#[derive(Debug, Clone, Serialize)]
pub struct ExportWorkItem {
    pub hash: String,
    #[serde(rename = "nomeTabela")]
    pub table_name: String,
    #[serde(rename = "filtros")]
    pub filters: serde_json::Value,
    #[serde(rename = "dataSolicitacao")]
    pub requested_at: DateTime<Utc>,
}

/// Producer contract for the export queue.
#[async_trait]
pub trait ExportQueue: Send + Sync {
    async fn publish(&self, item: &ExportWorkItem) -> Result<(), QueueError>;
}

/// Database-backed durable queue — rows in the `queue` table survive process
/// restarts and are drained by the external worker.
pub struct DurableQueue {
    db: Arc<dyn Database>,
}

impl DurableQueue {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ExportQueue for DurableQueue {
    async fn publish(&self, item: &ExportWorkItem) -> Result<(), QueueError> {
        let payload = serde_json::to_string(item).map_err(|e| QueueError::PublishFailed {
            queue: EXPORT_QUEUE.to_string(),
            reason: format!("serialize: {e}"),
        })?;

        let entry_id = self
            .db
            .enqueue(EXPORT_QUEUE, &payload)
            .await
            .map_err(|e| QueueError::PublishFailed {
                queue: EXPORT_QUEUE.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(entry_id, hash = %item.hash, "Export work item enqueued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    #[test]
    fn work_item_wire_format() {
        let item = ExportWorkItem {
            hash: "abc".into(),
            table_name: "messages".into(),
            filters: serde_json::json!([{"campo": "status", "operador": "=", "valor": "send"}]),
            requested_at: Utc::now(),
        };
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["hash"], "abc");
        assert_eq!(value["nomeTabela"], "messages");
        assert!(value["filtros"].is_array());
        assert!(value["dataSolicitacao"].is_string());
    }

    #[tokio::test]
    async fn publish_appends_to_queue_table() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let queue = DurableQueue::new(db);

        let item = ExportWorkItem {
            hash: "abc".into(),
            table_name: "messages".into(),
            filters: serde_json::json!([]),
            requested_at: Utc::now(),
        };
        queue.publish(&item).await.unwrap();
    }
}
