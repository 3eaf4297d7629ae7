//! Meta WhatsApp Business Cloud API adapter.
//!
//! Sends go to `POST {base}/{phone_number_id}/messages` with the
//! `messaging_product` envelope; the response is destructured from
//! `{messages:[{id}], contacts:[{input}]}`.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::error::ProviderError;
use crate::model::{SendKind, SendRequest, SendResult, Tenant};
use crate::providers::{Provider, transport_error};

/// Default template language sent to the Cloud API.
const TEMPLATE_LANGUAGE: &str = "pt_BR";

/// Meta Business Cloud API adapter.
pub struct MetaProvider {
    base_url: String,
    client: reqwest::Client,
}

/// The slice of the Cloud API send response this core depends on.
#[derive(Debug, Deserialize)]
struct CloudApiResponse {
    #[serde(default)]
    messages: Vec<CloudApiMessage>,
    #[serde(default)]
    contacts: Vec<CloudApiContact>,
}

#[derive(Debug, Deserialize)]
struct CloudApiMessage {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CloudApiContact {
    input: String,
}

impl MetaProvider {
    pub fn new(base_url: String, client: reqwest::Client) -> Self {
        Self { base_url, client }
    }

    fn messages_url(&self, channel_id: &str) -> String {
        format!(
            "{}/{}/messages",
            self.base_url.trim_end_matches('/'),
            channel_id
        )
    }
}

/// Build the Cloud API envelope for a canonical request.
fn build_payload(request: &SendRequest) -> serde_json::Value {
    match request.kind {
        SendKind::Text => serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": request.recipient,
            "type": "text",
            "text": {
                "preview_url": false,
                "body": request.text.as_deref().unwrap_or_default(),
            }
        }),
        SendKind::Template => {
            let parameters: Vec<serde_json::Value> = request
                .parameters
                .iter()
                .map(|(_, v)| serde_json::json!({"type": "text", "text": v}))
                .collect();
            serde_json::json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": request.recipient,
                "type": "template",
                "template": {
                    "name": request.template.as_deref().unwrap_or_default(),
                    "language": {"code": TEMPLATE_LANGUAGE},
                    "components": [{
                        "type": "body",
                        "parameters": parameters,
                    }]
                }
            })
        }
    }
}

/// Destructure the Cloud API response into canonical fields.
fn parse_response(body: &str) -> Result<(String, Option<String>), ProviderError> {
    let parsed: CloudApiResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::InvalidResponse {
            provider: "meta".to_string(),
            reason: e.to_string(),
        })?;

    let id = parsed
        .messages
        .first()
        .map(|m| m.id.clone())
        .ok_or_else(|| ProviderError::InvalidResponse {
            provider: "meta".to_string(),
            reason: "response has no messages[0].id".to_string(),
        })?;

    Ok((id, parsed.contacts.first().map(|c| c.input.clone())))
}

#[async_trait]
impl Provider for MetaProvider {
    fn name(&self) -> &str {
        "meta"
    }

    async fn send(
        &self,
        request: &SendRequest,
        tenant: &Tenant,
    ) -> Result<SendResult, ProviderError> {
        let channel_id = tenant.credentials.channel_id.as_deref().ok_or_else(|| {
            ProviderError::Unreachable {
                provider: "meta".to_string(),
                reason: format!("tenant {} has no Cloud API phone number id", tenant.reference),
            }
        })?;

        let payload = build_payload(request);

        let response = self
            .client
            .post(self.messages_url(channel_id))
            .bearer_auth(tenant.credentials.api_token.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error("meta", &e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ProviderError::Rejected {
                provider: "meta".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let (provider_message_id, contact_input) = parse_response(&body)?;

        tracing::debug!(%provider_message_id, to = %request.recipient, "Cloud API accepted send");

        Ok(SendResult {
            provider_message_id,
            raw_from: tenant.credentials.from_number.clone(),
            raw_to: contact_input.unwrap_or_else(|| request.recipient.clone()),
            raw_content: payload.to_string(),
            http_status: status.as_u16(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProviderCredentials, ProviderKind};
    use secrecy::SecretString;
    use uuid::Uuid;

    fn tenant(channel_id: Option<&str>) -> Tenant {
        Tenant {
            id: Uuid::new_v4(),
            reference: "acme".into(),
            name: "Acme".into(),
            provider: ProviderKind::Meta,
            credentials: ProviderCredentials {
                api_token: SecretString::from("tok"),
                from_number: "5511900000000".into(),
                channel_id: channel_id.map(String::from),
            },
            auto_reply: None,
            monthly_quota: None,
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

    #[test]
    fn messages_url_includes_channel_id() {
        let p = MetaProvider::new(
            "https://graph.facebook.com/v18.0".into(),
            reqwest::Client::new(),
        );
        assert_eq!(
            p.messages_url("123456789"),
            "https://graph.facebook.com/v18.0/123456789/messages"
        );
    }

    #[test]
    fn text_payload_envelope() {
        let payload = build_payload(&text_request("oi"));
        assert_eq!(payload["messaging_product"], "whatsapp");
        assert_eq!(payload["to"], "5511987654321");
        assert_eq!(payload["type"], "text");
        assert_eq!(payload["text"]["body"], "oi");
    }

    #[test]
    fn template_payload_keeps_parameter_order() {
        let request = SendRequest {
            kind: SendKind::Template,
            recipient: "5511987654321".into(),
            text: None,
            template: Some("order_update".into()),
            parameters: vec![
                ("nome".to_string(), "Ana".to_string()),
                ("pedido".to_string(), "42".to_string()),
            ],
        };
        let payload = build_payload(&request);
        assert_eq!(payload["type"], "template");
        assert_eq!(payload["template"]["name"], "order_update");
        let body_params = &payload["template"]["components"][0]["parameters"];
        assert_eq!(body_params[0]["text"], "Ana");
        assert_eq!(body_params[1]["text"], "42");
    }

    #[test]
    fn parse_response_destructures_id_and_input() {
        let body = r#"{
            "messaging_product": "whatsapp",
            "contacts": [{"input": "5511987654321", "wa_id": "5511987654321"}],
            "messages": [{"id": "wamid.HBgL"}]
        }"#;
        let (id, input) = parse_response(body).unwrap();
        assert_eq!(id, "wamid.HBgL");
        assert_eq!(input.as_deref(), Some("5511987654321"));
    }

    #[test]
    fn parse_response_without_messages_is_invalid() {
        let err = parse_response(r#"{"contacts": []}"#).unwrap_err();
        match err {
            ProviderError::InvalidResponse { provider, .. } => assert_eq!(provider, "meta"),
            other => panic!("expected InvalidResponse, got {other:?}"),
        }
    }

    #[test]
    fn parse_response_garbage_is_invalid() {
        assert!(parse_response("not json").is_err());
    }

    #[tokio::test]
    async fn missing_channel_id_fails_before_any_call() {
        let p = MetaProvider::new("http://127.0.0.1:1".into(), reqwest::Client::new());
        let err = p.send(&text_request("x"), &tenant(None)).await.unwrap_err();
        match err {
            ProviderError::Unreachable { reason, .. } => {
                assert!(reason.contains("phone number id"))
            }
            other => panic!("expected Unreachable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transport_failure_maps_to_unreachable() {
        let p = MetaProvider::new("http://127.0.0.1:1".into(), reqwest::Client::new());
        let err = p
            .send(&text_request("x"), &tenant(Some("123")))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unreachable { .. }));
    }
}
