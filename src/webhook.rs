//! Inbound webhook normalization and ingestion.
//!
//! Both vendors POST status updates and received messages to the gateway.
//! The payload shape itself is the discriminant — there is no trusted vendor
//! header. Whatever arrives is mapped to one [`CanonicalEvent`] and applied:
//! a status event updates the matching sent message, an inbound event upserts
//! the contact, stores the message, and fires the tenant's auto-reply.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::dispatch::Dispatcher;
use crate::error::WebhookError;
use crate::model::{
    CanonicalEvent, Direction, InboundEvent, Message, SendKind, SendRequest, StatusEvent, Tenant,
};
use crate::phone::normalize_br_phone;
use crate::store::Database;

/// Canonical status a vendor "sent" code maps to.
const STATUS_SEND: &str = "send";
/// Canonical status a vendor "failed" code maps to.
const STATUS_NOT_DELIVERED: &str = "not_delivered";

/// Normalize a vendor status code into the canonical set.
///
/// One table consumed by both vendors' status paths: `sent` → `send`,
/// `failed` → `not_delivered`, anything else passes through uppercased.
pub fn normalize_status(code: &str) -> String {
    match code.to_ascii_lowercase().as_str() {
        "sent" => STATUS_SEND.to_string(),
        "failed" => STATUS_NOT_DELIVERED.to_string(),
        _ => code.to_uppercase(),
    }
}

/// Map a raw webhook body to a canonical event by shape inspection.
pub fn normalize(raw: &serde_json::Value) -> Result<CanonicalEvent, WebhookError> {
    // Zenvia status: `messageStatus.code` exists in no other schema.
    if let Some(code) = raw
        .pointer("/messageStatus/code")
        .and_then(serde_json::Value::as_str)
    {
        let provider_message_id = raw
            .get("messageId")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Ok(CanonicalEvent::Status(StatusEvent {
            provider_message_id,
            status: normalize_status(code),
        }));
    }

    // Zenvia inbound: a `message` object with a `contents` array.
    if let Some(contents) = raw
        .pointer("/message/contents")
        .and_then(serde_json::Value::as_array)
    {
        let message = &raw["message"];
        let body = contents
            .iter()
            .find_map(|c| c.get("text").and_then(serde_json::Value::as_str))
            .unwrap_or_default()
            .to_string();
        let from = message
            .get("from")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        let to = message
            .get("to")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        let provider_message_id = message
            .get("id")
            .and_then(serde_json::Value::as_str)
            .or_else(|| raw.get("id").and_then(serde_json::Value::as_str))
            .unwrap_or_default()
            .to_string();
        let contact_name = raw
            .pointer("/message/visitor/name")
            .and_then(serde_json::Value::as_str)
            .map(String::from);

        // Zenvia is the vendor that drops the Brazilian ninth digit.
        return Ok(CanonicalEvent::Inbound(InboundEvent {
            provider_message_id,
            from: normalize_br_phone(from),
            to: normalize_br_phone(to),
            body,
            contact_name,
        }));
    }

    // Meta Cloud API wraps everything in entry[].changes[].value.
    if let Some(value) = raw.pointer("/entry/0/changes/0/value") {
        if let Some(status) = value
            .pointer("/statuses/0")
            .filter(|s| s.get("status").is_some())
        {
            let provider_message_id = status
                .get("id")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string();
            let code = status
                .get("status")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default();
            return Ok(CanonicalEvent::Status(StatusEvent {
                provider_message_id,
                status: normalize_status(code),
            }));
        }

        if let Some(message) = value.pointer("/messages/0") {
            let provider_message_id = message
                .get("id")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string();
            let from = message
                .get("from")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string();
            let to = value
                .pointer("/metadata/display_phone_number")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string();
            let body = message
                .pointer("/text/body")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string();
            let contact_name = value
                .pointer("/contacts/0/profile/name")
                .and_then(serde_json::Value::as_str)
                .map(String::from);
            return Ok(CanonicalEvent::Inbound(InboundEvent {
                provider_message_id,
                from,
                to,
                body,
                contact_name,
            }));
        }
    }

    Err(WebhookError::Unrecognized)
}

/// Published for each stored inbound message so connected consumers (socket
/// bridges, audit sinks) can react without polling.
#[derive(Debug, Clone)]
pub struct InboundNotification {
    pub tenant_id: Uuid,
    pub contact_id: Uuid,
    pub message_id: Uuid,
    pub from: String,
    pub body: String,
}

/// What the handler did with a webhook, for the HTTP layer's response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// A status event was applied; `matched` is false when no message row
    /// had that provider id (the event raced the send's persistence).
    StatusApplied { matched: bool },
    /// An inbound message was stored (or already existed on redelivery).
    InboundStored {
        message_id: Uuid,
        duplicate: bool,
        auto_replied: bool,
    },
}

/// Applies normalized webhook events for one tenant.
pub struct WebhookHandler {
    db: Arc<dyn Database>,
    dispatcher: Arc<Dispatcher>,
    notifications: broadcast::Sender<InboundNotification>,
}

impl WebhookHandler {
    pub fn new(
        db: Arc<dyn Database>,
        dispatcher: Arc<Dispatcher>,
        notifications: broadcast::Sender<InboundNotification>,
    ) -> Self {
        Self {
            db,
            dispatcher,
            notifications,
        }
    }

    /// Normalize and apply one raw webhook body.
    pub async fn handle(
        &self,
        tenant: &Tenant,
        raw: &serde_json::Value,
    ) -> Result<WebhookOutcome, WebhookError> {
        match normalize(raw)? {
            CanonicalEvent::Status(event) => self.apply_status(tenant, event).await,
            CanonicalEvent::Inbound(event) => self.apply_inbound(tenant, event, raw).await,
        }
    }

    /// Single UPDATE keyed by provider message id. An unmatched id is a
    /// no-op success: status webhooks can arrive before the send's own row
    /// is visible, and the vendor will not redeliver on our account.
    async fn apply_status(
        &self,
        tenant: &Tenant,
        event: StatusEvent,
    ) -> Result<WebhookOutcome, WebhookError> {
        let matched = self
            .db
            .update_message_status(tenant.id, &event.provider_message_id, &event.status)
            .await?;

        if matched == 0 {
            tracing::warn!(
                tenant = %tenant.reference,
                provider_message_id = %event.provider_message_id,
                status = %event.status,
                "Status event matched no message; ignoring"
            );
        }
        Ok(WebhookOutcome::StatusApplied {
            matched: matched > 0,
        })
    }

    /// Contact upsert, idempotent message insert, then auto-reply.
    ///
    /// An auto-reply failure leaves the stored inbound message in place but
    /// surfaces as an error so the vendor redelivers; the idempotent insert
    /// makes that redelivery safe.
    async fn apply_inbound(
        &self,
        tenant: &Tenant,
        event: InboundEvent,
        raw: &serde_json::Value,
    ) -> Result<WebhookOutcome, WebhookError> {
        let contact = self
            .db
            .upsert_contact(tenant.id, &event.from, event.contact_name.as_deref())
            .await?;

        let now = Utc::now();
        let message = Message {
            id: Uuid::new_v4(),
            contact_id: contact.id,
            tenant_id: tenant.id,
            sender: event.from.clone(),
            recipient: event.to.clone(),
            raw_payload: raw.to_string(),
            content: event.body.clone(),
            provider_message_id: event.provider_message_id.clone(),
            direction: Direction::Received,
            status: None,
            read: false,
            sent_at: None,
            created_at: now,
            updated_at: now,
        };
        let inserted = self.db.insert_message(&message).await?;
        if !inserted {
            tracing::info!(
                tenant = %tenant.reference,
                provider_message_id = %event.provider_message_id,
                "Inbound message redelivered; row already exists"
            );
        }

        if inserted {
            let _ = self.notifications.send(InboundNotification {
                tenant_id: tenant.id,
                contact_id: contact.id,
                message_id: message.id,
                from: event.from.clone(),
                body: event.body.clone(),
            });
        }

        let mut auto_replied = false;
        if let Some(reply) = tenant.auto_reply.as_deref().filter(|r| !r.is_empty()) {
            let request = SendRequest {
                kind: SendKind::Text,
                recipient: event.from.clone(),
                text: Some(reply.to_string()),
                template: None,
                parameters: Vec::new(),
            };
            // Synchronous re-entry into the send pipeline. The inbound
            // message above is already durable and is not rolled back.
            self.dispatcher.send(tenant, request).await?;
            auto_replied = true;
        }

        Ok(WebhookOutcome::InboundStored {
            message_id: message.id,
            duplicate: !inserted,
            auto_replied,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use secrecy::SecretString;

    use crate::error::ProviderError;
    use crate::model::{ProviderCredentials, ProviderKind, SendResult};
    use crate::providers::{Provider, ProviderSelector};
    use crate::query::PageRequest;
    use crate::store::LibSqlBackend;

    // ── Status normalization ────────────────────────────────────────

    #[test]
    fn vendor_sent_becomes_send() {
        assert_eq!(normalize_status("sent"), "send");
        assert_eq!(normalize_status("SENT"), "send");
    }

    #[test]
    fn vendor_failed_becomes_not_delivered() {
        assert_eq!(normalize_status("failed"), "not_delivered");
    }

    #[test]
    fn unknown_codes_pass_through_uppercased() {
        assert_eq!(normalize_status("read"), "READ");
        assert_eq!(normalize_status("delivered"), "DELIVERED");
    }

    // ── Shape discrimination ────────────────────────────────────────

    fn zenvia_status(message_id: &str, code: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "evt-1",
            "type": "MESSAGE_STATUS",
            "messageId": message_id,
            "messageStatus": {"timestamp": "2024-06-01T12:00:00Z", "code": code}
        })
    }

    fn zenvia_inbound(from: &str, text: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "evt-2",
            "type": "MESSAGE",
            "message": {
                "id": "zv-msg-1",
                "from": from,
                "to": "5511900000000",
                "direction": "IN",
                "contents": [{"type": "text", "text": text}],
                "visitor": {"name": "Ana"}
            }
        })
    }

    fn meta_status(message_id: &str, code: &str) -> serde_json::Value {
        serde_json::json!({
            "object": "whatsapp_business_account",
            "entry": [{"changes": [{"value": {
                "messaging_product": "whatsapp",
                "statuses": [{"id": message_id, "status": code, "timestamp": "1699999999"}]
            }}]}]
        })
    }

    fn meta_inbound(from: &str, text: &str) -> serde_json::Value {
        serde_json::json!({
            "object": "whatsapp_business_account",
            "entry": [{"changes": [{"value": {
                "messaging_product": "whatsapp",
                "metadata": {"display_phone_number": "5511900000000", "phone_number_id": "123"},
                "contacts": [{"input": from, "profile": {"name": "Ana"}, "wa_id": from}],
                "messages": [{"id": "wamid.X", "from": from, "timestamp": "1699999999",
                              "type": "text", "text": {"body": text}}]
            }}]}]
        })
    }

    #[test]
    fn message_status_code_routes_to_status_event() {
        let event = normalize(&zenvia_status("zv-1", "SENT")).unwrap();
        assert_eq!(
            event,
            CanonicalEvent::Status(StatusEvent {
                provider_message_id: "zv-1".into(),
                status: "send".into(),
            })
        );
    }

    #[test]
    fn zenvia_contents_routes_to_inbound_event() {
        let event = normalize(&zenvia_inbound("5511987654321", "oi")).unwrap();
        match event {
            CanonicalEvent::Inbound(inbound) => {
                assert_eq!(inbound.provider_message_id, "zv-msg-1");
                assert_eq!(inbound.from, "5511987654321");
                assert_eq!(inbound.body, "oi");
                assert_eq!(inbound.contact_name.as_deref(), Some("Ana"));
            }
            other => panic!("expected Inbound, got {other:?}"),
        }
    }

    #[test]
    fn zenvia_inbound_reinserts_missing_ninth_digit() {
        let event = normalize(&zenvia_inbound("551187654321", "oi")).unwrap();
        match event {
            CanonicalEvent::Inbound(inbound) => {
                assert_eq!(inbound.from, "5511987654321");
            }
            other => panic!("expected Inbound, got {other:?}"),
        }
    }

    #[test]
    fn meta_statuses_route_to_status_event() {
        let event = normalize(&meta_status("wamid.1", "failed")).unwrap();
        assert_eq!(
            event,
            CanonicalEvent::Status(StatusEvent {
                provider_message_id: "wamid.1".into(),
                status: "not_delivered".into(),
            })
        );
    }

    #[test]
    fn meta_messages_route_to_inbound_event() {
        let event = normalize(&meta_inbound("5511987654321", "hello")).unwrap();
        match event {
            CanonicalEvent::Inbound(inbound) => {
                assert_eq!(inbound.provider_message_id, "wamid.X");
                assert_eq!(inbound.to, "5511900000000");
                assert_eq!(inbound.body, "hello");
            }
            other => panic!("expected Inbound, got {other:?}"),
        }
    }

    #[test]
    fn unknown_shape_is_unrecognized() {
        let err = normalize(&serde_json::json!({"foo": "bar"})).unwrap_err();
        assert!(matches!(err, WebhookError::Unrecognized));

        let err = normalize(&serde_json::json!({"entry": [{"changes": [{"value": {}}]}]}))
            .unwrap_err();
        assert!(matches!(err, WebhookError::Unrecognized));
    }

    // ── Ingestion ───────────────────────────────────────────────────

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
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::Unreachable {
                    provider: "stub".into(),
                    reason: "down".into(),
                });
            }
            Ok(SendResult {
                provider_message_id: format!("reply-{call}"),
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

    fn tenant(auto_reply: Option<&str>) -> Tenant {
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
            auto_reply: auto_reply.map(String::from),
            monthly_quota: None,
        }
    }

    async fn handler(fail_sends: bool) -> (WebhookHandler, Arc<LibSqlBackend>) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let selector = Arc::new(StubSelector(StubProvider {
            fail: fail_sends,
            calls: AtomicUsize::new(0),
        }));
        let dispatcher = Arc::new(Dispatcher::new(db.clone(), selector));
        let (tx, _rx) = broadcast::channel(16);
        (WebhookHandler::new(db.clone(), dispatcher, tx), db)
    }

    #[tokio::test]
    async fn status_event_updates_sent_message() {
        let (handler, db) = handler(false).await;
        let tenant = tenant(None);

        // Seed a sent message waiting on its status.
        let contact = db
            .upsert_contact(tenant.id, "5511987654321", None)
            .await
            .unwrap();
        let now = Utc::now();
        db.insert_message(&Message {
            id: Uuid::new_v4(),
            contact_id: contact.id,
            tenant_id: tenant.id,
            sender: "5511900000000".into(),
            recipient: "5511987654321".into(),
            raw_payload: "{}".into(),
            content: "oi".into(),
            provider_message_id: "zv-1".into(),
            direction: Direction::Sent,
            status: None,
            read: false,
            sent_at: Some(now),
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();

        let outcome = handler
            .handle(&tenant, &zenvia_status("zv-1", "DELIVERED"))
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::StatusApplied { matched: true });

        let (messages, _) = db
            .list_history(
                tenant.id,
                "5511987654321",
                &[],
                PageRequest::new(None, None).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(messages[0].status.as_deref(), Some("DELIVERED"));
    }

    #[tokio::test]
    async fn unmatched_status_event_is_noop_success() {
        let (handler, _db) = handler(false).await;
        let outcome = handler
            .handle(&tenant(None), &zenvia_status("zv-unknown", "SENT"))
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::StatusApplied { matched: false });
    }

    #[tokio::test]
    async fn inbound_stores_contact_and_message() {
        let (handler, db) = handler(false).await;
        let tenant = tenant(None);

        let outcome = handler
            .handle(&tenant, &zenvia_inbound("5511987654321", "preciso de ajuda"))
            .await
            .unwrap();
        match outcome {
            WebhookOutcome::InboundStored {
                duplicate,
                auto_replied,
                ..
            } => {
                assert!(!duplicate);
                assert!(!auto_replied);
            }
            other => panic!("expected InboundStored, got {other:?}"),
        }

        let contact = db
            .get_contact(tenant.id, "5511987654321")
            .await
            .unwrap()
            .expect("contact created");
        assert_eq!(contact.display_name.as_deref(), Some("Ana"));

        let (messages, total) = db
            .list_history(
                tenant.id,
                "5511987654321",
                &[],
                PageRequest::new(None, None).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(messages[0].direction, Direction::Received);
        assert_eq!(messages[0].content, "preciso de ajuda");
    }

    #[tokio::test]
    async fn redelivered_inbound_is_not_duplicated() {
        let (handler, db) = handler(false).await;
        let tenant = tenant(None);
        let payload = zenvia_inbound("5511987654321", "oi");

        handler.handle(&tenant, &payload).await.unwrap();
        let second = handler.handle(&tenant, &payload).await.unwrap();
        match second {
            WebhookOutcome::InboundStored { duplicate, .. } => assert!(duplicate),
            other => panic!("expected InboundStored, got {other:?}"),
        }

        let (_, total) = db
            .list_history(
                tenant.id,
                "5511987654321",
                &[],
                PageRequest::new(None, None).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn auto_reply_goes_back_through_the_dispatcher() {
        let (handler, db) = handler(false).await;
        let tenant = tenant(Some("Recebemos sua mensagem!"));

        let outcome = handler
            .handle(&tenant, &zenvia_inbound("5511987654321", "oi"))
            .await
            .unwrap();
        match outcome {
            WebhookOutcome::InboundStored { auto_replied, .. } => assert!(auto_replied),
            other => panic!("expected InboundStored, got {other:?}"),
        }

        // Both the inbound and the auto-reply rows exist.
        let (messages, total) = db
            .list_history(
                tenant.id,
                "5511987654321",
                &[],
                PageRequest::new(None, None).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert!(messages.iter().any(|m| m.direction == Direction::Sent
            && m.content == "Recebemos sua mensagem!"));
    }

    #[tokio::test]
    async fn auto_reply_failure_keeps_inbound_but_fails_handler() {
        let (handler, db) = handler(true).await;
        let tenant = tenant(Some("auto"));

        let err = handler
            .handle(&tenant, &zenvia_inbound("5511987654321", "oi"))
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::AutoReply(_)));

        // The inbound message survived the failed auto-reply.
        let (messages, total) = db
            .list_history(
                tenant.id,
                "5511987654321",
                &[],
                PageRequest::new(None, None).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(messages[0].direction, Direction::Received);
    }
}
