//! Outbound send orchestration.
//!
//! A linear pipeline with no partial-success state: contact upsert, quota
//! check, template resolution, vendor send, content render, message persist.
//! Each step gates the next; if the vendor send fails, no message row is
//! ever created.

use std::sync::Arc;

use chrono::{Datelike, TimeZone, Utc};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::model::{Direction, Message, SendKind, SendRequest, Tenant};
use crate::providers::ProviderSelector;
use crate::render;
use crate::store::Database;

/// Orchestrates a full outbound send for one tenant.
pub struct Dispatcher {
    db: Arc<dyn Database>,
    providers: Arc<dyn ProviderSelector>,
}

impl Dispatcher {
    pub fn new(db: Arc<dyn Database>, providers: Arc<dyn ProviderSelector>) -> Self {
        Self { db, providers }
    }

    /// Send one message and persist the resulting record.
    ///
    /// Returns the persisted message, or the error of whichever step failed
    /// first. At most one message row exists per successful vendor send.
    pub async fn send(
        &self,
        tenant: &Tenant,
        request: SendRequest,
    ) -> Result<Message, DispatchError> {
        if request.kind == SendKind::Text && request.text.as_deref().unwrap_or("").is_empty() {
            return Err(DispatchError::MissingText);
        }

        // 1. Contact upsert — the hard precondition for everything else.
        let contact = self
            .db
            .upsert_contact(tenant.id, &request.recipient, None)
            .await
            .map_err(|e| DispatchError::ContactPersistence {
                phone: request.recipient.clone(),
                source: e,
            })?;

        // 2. Quota check against sends this calendar month.
        if let Some(quota) = tenant.monthly_quota {
            let month_start = Utc
                .with_ymd_and_hms(Utc::now().year(), Utc::now().month(), 1, 0, 0, 0)
                .single()
                .unwrap_or_else(Utc::now);
            let sent = self
                .db
                .count_sent_since(tenant.id, month_start)
                .await
                .map_err(DispatchError::Store)?;
            if sent >= quota {
                return Err(DispatchError::QuotaExceeded { quota });
            }
        }

        // 3. Template resolution for template sends.
        let (vendor_request, template_body) = match request.kind {
            SendKind::Text => (request.clone(), None),
            SendKind::Template => {
                let reference = request.template.clone().ok_or_else(|| {
                    DispatchError::TemplateNotFound {
                        reference: "(missing)".to_string(),
                    }
                })?;
                let template = self
                    .db
                    .get_template(tenant.id, &reference)
                    .await
                    .map_err(DispatchError::Store)?
                    .filter(|t| t.active)
                    .ok_or_else(|| DispatchError::TemplateNotFound {
                        reference: reference.clone(),
                    })?;
                let vendor_ref = template
                    .provider_ref(tenant.provider)
                    .ok_or_else(|| DispatchError::TemplateNotFound {
                        reference: reference.clone(),
                    })?
                    .to_string();

                let mut vendor_request = request.clone();
                vendor_request.template = Some(vendor_ref);
                (vendor_request, Some(template.body))
            }
        };

        // 4. Vendor send. Failure aborts with nothing persisted.
        let result = self
            .providers
            .for_tenant(tenant)
            .send(&vendor_request, tenant)
            .await?;

        // 5. Render the audit content from the same parameters the vendor
        // got, independent of what it echoed back.
        let content = match template_body {
            Some(body) => render::render(&body, &request.parameters),
            None => request.text.clone().unwrap_or_default(),
        };

        // 6. Persist; status stays empty until a status webhook fills it.
        let now = Utc::now();
        let message = Message {
            id: Uuid::new_v4(),
            contact_id: contact.id,
            tenant_id: tenant.id,
            sender: result.raw_from,
            recipient: result.raw_to,
            raw_payload: result.raw_content,
            content,
            provider_message_id: result.provider_message_id,
            direction: Direction::Sent,
            status: None,
            read: false,
            sent_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        self.db
            .insert_message(&message)
            .await
            .map_err(DispatchError::MessagePersistence)?;

        tracing::info!(
            tenant = %tenant.reference,
            provider_message_id = %message.provider_message_id,
            kind = ?request.kind,
            "Outbound message dispatched"
        );
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use secrecy::SecretString;

    use crate::error::ProviderError;
    use crate::model::{ProviderCredentials, ProviderKind, SendResult, Template};
    use crate::providers::Provider;
    use crate::store::LibSqlBackend;

    /// Stub vendor — accepts or rejects every send, counting calls.
    struct StubProvider {
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Provider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn send(
            &self,
            request: &SendRequest,
            tenant: &Tenant,
        ) -> Result<SendResult, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::Rejected {
                    provider: "stub".into(),
                    status: 422,
                    body: "nope".into(),
                });
            }
            Ok(SendResult {
                provider_message_id: format!("stub-{}", self.calls.load(Ordering::SeqCst)),
                raw_from: tenant.credentials.from_number.clone(),
                raw_to: request.recipient.clone(),
                raw_content: "{}".into(),
                http_status: 200,
            })
        }
    }

    struct StubSelector(StubProvider);

    impl ProviderSelector for StubSelector {
        fn for_tenant(&self, _tenant: &Tenant) -> &dyn Provider {
            &self.0
        }
    }

    fn tenant(quota: Option<i64>) -> Tenant {
        Tenant {
            id: Uuid::new_v4(),
            reference: "acme".into(),
            name: "Acme".into(),
            provider: ProviderKind::Zenvia,
            credentials: ProviderCredentials {
                api_token: SecretString::from("tok"),
                from_number: "5511900000000".into(),
                channel_id: None,
            },
            auto_reply: None,
            monthly_quota: quota,
        }
    }

    fn text_request(text: &str) -> SendRequest {
        SendRequest {
            kind: SendKind::Text,
            recipient: "5511987654321".into(),
            text: Some(text.into()),
            template: None,
            parameters: Vec::new(),
        }
    }

    async fn dispatcher(fail: bool) -> (Dispatcher, Arc<LibSqlBackend>) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let selector = Arc::new(StubSelector(StubProvider {
            fail,
            calls: AtomicUsize::new(0),
        }));
        (Dispatcher::new(db.clone(), selector), db)
    }

    #[tokio::test]
    async fn text_send_creates_contact_and_message() {
        let (dispatcher, db) = dispatcher(false).await;
        let tenant = tenant(None);

        let message = dispatcher.send(&tenant, text_request("oi")).await.unwrap();
        assert_eq!(message.direction, Direction::Sent);
        assert!(message.status.is_none());
        assert!(!message.provider_message_id.is_empty());
        assert_eq!(message.content, "oi");

        let contact = db
            .get_contact(tenant.id, "5511987654321")
            .await
            .unwrap()
            .expect("contact upserted");
        assert_eq!(contact.id, message.contact_id);
    }

    #[tokio::test]
    async fn vendor_failure_persists_nothing() {
        let (dispatcher, db) = dispatcher(true).await;
        let tenant = tenant(None);

        let err = dispatcher.send(&tenant, text_request("oi")).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::SendFailed(ProviderError::Rejected { status: 422, .. })
        ));

        let (_, total) = db
            .list_history(
                tenant.id,
                "5511987654321",
                &[],
                crate::query::PageRequest::new(None, None).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(total, 0, "no message row may exist after a failed send");
    }

    #[tokio::test]
    async fn empty_text_is_rejected_before_any_mutation() {
        let (dispatcher, db) = dispatcher(false).await;
        let tenant = tenant(None);

        let err = dispatcher.send(&tenant, text_request("")).await.unwrap_err();
        assert!(matches!(err, DispatchError::MissingText));

        assert!(
            db.get_contact(tenant.id, "5511987654321")
                .await
                .unwrap()
                .is_none(),
            "validation failures must precede the contact upsert"
        );
    }

    #[tokio::test]
    async fn unknown_template_aborts_without_send() {
        let (dispatcher, _db) = dispatcher(false).await;
        let tenant = tenant(None);

        let request = SendRequest {
            kind: SendKind::Template,
            recipient: "5511987654321".into(),
            text: None,
            template: Some("missing-hash".into()),
            parameters: Vec::new(),
        };
        let err = dispatcher.send(&tenant, request).await.unwrap_err();
        assert!(matches!(err, DispatchError::TemplateNotFound { .. }));
    }

    #[tokio::test]
    async fn template_without_vendor_ref_is_not_found() {
        let (dispatcher, db) = dispatcher(false).await;
        let tenant = tenant(None); // configured for Zenvia

        let now = Utc::now();
        db.insert_template(&Template {
            id: Uuid::new_v4(),
            tenant_id: tenant.id,
            title: "welcome".into(),
            body: "Hello {{name}}".into(),
            zenvia_ref: None, // registered only with Meta
            meta_ref: Some("welcome_v1".into()),
            active: true,
            hash: "h1".into(),
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();

        let request = SendRequest {
            kind: SendKind::Template,
            recipient: "5511987654321".into(),
            text: None,
            template: Some("h1".into()),
            parameters: Vec::new(),
        };
        let err = dispatcher.send(&tenant, request).await.unwrap_err();
        assert!(matches!(err, DispatchError::TemplateNotFound { .. }));
    }

    #[tokio::test]
    async fn template_send_renders_audit_content() {
        let (dispatcher, db) = dispatcher(false).await;
        let tenant = tenant(None);

        let now = Utc::now();
        db.insert_template(&Template {
            id: Uuid::new_v4(),
            tenant_id: tenant.id,
            title: "welcome".into(),
            body: "Hello {{name}}, order {{2}} confirmed".into(),
            zenvia_ref: Some("zv-welcome".into()),
            meta_ref: None,
            active: true,
            hash: "h2".into(),
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();

        let request = SendRequest {
            kind: SendKind::Template,
            recipient: "5511987654321".into(),
            text: None,
            template: Some("h2".into()),
            parameters: vec![
                ("name".to_string(), "Ana".to_string()),
                ("order".to_string(), "42".to_string()),
            ],
        };
        let message = dispatcher.send(&tenant, request).await.unwrap();
        assert_eq!(message.content, "Hello Ana, order 42 confirmed");
    }

    #[tokio::test]
    async fn quota_exhaustion_blocks_send() {
        let (dispatcher, _db) = dispatcher(false).await;
        let tenant = tenant(Some(1));

        dispatcher.send(&tenant, text_request("first")).await.unwrap();
        let err = dispatcher
            .send(&tenant, text_request("second"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::QuotaExceeded { quota: 1 }));
    }
}
