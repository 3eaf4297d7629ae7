//! Provider abstraction for upstream WhatsApp vendors.
//!
//! Each vendor implements [`Provider`]; the registry picks the adapter once
//! per request from the tenant's configured [`ProviderKind`]. Adapters only
//! translate wire formats and perform the outbound HTTP call — they never
//! persist anything.

pub mod meta;
pub mod zenvia;

use std::time::Duration;

use async_trait::async_trait;

pub use meta::MetaProvider;
pub use zenvia::ZenviaProvider;

use crate::error::ProviderError;
use crate::model::{ProviderKind, SendRequest, SendResult, Tenant};

/// A vendor integration able to send text and template messages.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Translate the canonical request into the vendor wire call and the
    /// vendor response back into a canonical result.
    ///
    /// For template sends, `request.template` carries the vendor-side
    /// reference (the dispatcher resolves it before calling here).
    async fn send(
        &self,
        request: &SendRequest,
        tenant: &Tenant,
    ) -> Result<SendResult, ProviderError>;
}

/// Endpoint configuration for the registry.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub zenvia_base_url: String,
    pub meta_base_url: String,
    /// Applied to every outbound vendor call.
    pub request_timeout: Duration,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            zenvia_base_url: "https://api.zenvia.com/v2/channels/whatsapp".to_string(),
            meta_base_url: "https://graph.facebook.com/v18.0".to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Tenant-keyed adapter lookup. The dispatcher depends on this trait so
/// tests can substitute a stub vendor.
pub trait ProviderSelector: Send + Sync {
    fn for_tenant(&self, tenant: &Tenant) -> &dyn Provider;
}

/// Closed set of vendor adapters, selected by tenant configuration.
///
/// Adding a vendor is a local change: one adapter module, one variant in
/// [`ProviderKind`], one arm in `for_tenant`.
pub struct ProviderRegistry {
    zenvia: ZenviaProvider,
    meta: MetaProvider,
}

impl ProviderRegistry {
    pub fn new(endpoints: ProviderEndpoints) -> Self {
        let client = reqwest::Client::builder()
            .timeout(endpoints.request_timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            zenvia: ZenviaProvider::new(endpoints.zenvia_base_url, client.clone()),
            meta: MetaProvider::new(endpoints.meta_base_url, client),
        }
    }
}

impl ProviderSelector for ProviderRegistry {
    /// The adapter for a tenant's configured vendor.
    fn for_tenant(&self, tenant: &Tenant) -> &dyn Provider {
        match tenant.provider {
            ProviderKind::Zenvia => &self.zenvia,
            ProviderKind::Meta => &self.meta,
        }
    }
}

/// Map a reqwest transport failure to the canonical unreachable error.
pub(crate) fn transport_error(provider: &str, err: &reqwest::Error) -> ProviderError {
    let reason = if err.is_timeout() {
        "request timed out".to_string()
    } else {
        err.to_string()
    };
    ProviderError::Unreachable {
        provider: provider.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProviderCredentials;
    use secrecy::SecretString;
    use uuid::Uuid;

    fn tenant(kind: ProviderKind) -> Tenant {
        Tenant {
            id: Uuid::new_v4(),
            reference: "acme".into(),
            name: "Acme".into(),
            provider: kind,
            credentials: ProviderCredentials {
                api_token: SecretString::from("tok"),
                from_number: "5511900000000".into(),
                channel_id: Some("123".into()),
            },
            auto_reply: None,
            monthly_quota: None,
        }
    }

    #[test]
    fn registry_selects_by_tenant_kind() {
        let registry = ProviderRegistry::new(ProviderEndpoints::default());
        assert_eq!(
            registry.for_tenant(&tenant(ProviderKind::Zenvia)).name(),
            "zenvia"
        );
        assert_eq!(
            registry.for_tenant(&tenant(ProviderKind::Meta)).name(),
            "meta"
        );
    }
}
