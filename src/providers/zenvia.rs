//! Zenvia adapter — `{from, to, contents}` wire format.

use async_trait::async_trait;
use secrecy::ExposeSecret;

use crate::error::ProviderError;
use crate::model::{SendKind, SendRequest, SendResult, Tenant};
use crate::providers::{Provider, transport_error};

/// Zenvia WhatsApp channel adapter.
pub struct ZenviaProvider {
    base_url: String,
    client: reqwest::Client,
}

impl ZenviaProvider {
    pub fn new(base_url: String, client: reqwest::Client) -> Self {
        Self { base_url, client }
    }

    fn messages_url(&self) -> String {
        format!("{}/messages", self.base_url.trim_end_matches('/'))
    }
}

/// Build the vendor payload for a canonical request.
fn build_payload(request: &SendRequest, tenant: &Tenant) -> serde_json::Value {
    let contents = match request.kind {
        SendKind::Text => serde_json::json!([{
            "type": "text",
            "text": request.text.as_deref().unwrap_or_default(),
        }]),
        SendKind::Template => {
            let fields: serde_json::Map<String, serde_json::Value> = request
                .parameters
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            serde_json::json!([{
                "type": "template",
                "templateId": request.template.as_deref().unwrap_or_default(),
                "fields": fields,
            }])
        }
    };

    serde_json::json!({
        "from": tenant.credentials.from_number,
        "to": request.recipient,
        "contents": contents,
    })
}

#[async_trait]
impl Provider for ZenviaProvider {
    fn name(&self) -> &str {
        "zenvia"
    }

    async fn send(
        &self,
        request: &SendRequest,
        tenant: &Tenant,
    ) -> Result<SendResult, ProviderError> {
        let payload = build_payload(request, tenant);

        let response = self
            .client
            .post(self.messages_url())
            .bearer_auth(tenant.credentials.api_token.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error("zenvia", &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected {
                provider: "zenvia".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let body: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    provider: "zenvia".to_string(),
                    reason: e.to_string(),
                })?;

        let provider_message_id = body
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::InvalidResponse {
                provider: "zenvia".to_string(),
                reason: "response has no message id".to_string(),
            })?
            .to_string();

        tracing::debug!(%provider_message_id, to = %request.recipient, "Zenvia accepted send");

        Ok(SendResult {
            provider_message_id,
            raw_from: tenant.credentials.from_number.clone(),
            raw_to: request.recipient.clone(),
            raw_content: payload.to_string(),
            http_status: status.as_u16(),
        })
    }
}
