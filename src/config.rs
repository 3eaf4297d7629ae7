//! Process configuration, loaded once at startup from the environment and
//! read-only afterwards.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::providers::ProviderEndpoints;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// HTTP listen port.
    pub port: u16,
    /// Path of the local database file.
    pub db_path: String,
    /// Shared secret echoed back during the webhook subscribe handshake.
    pub verify_token: SecretString,
    /// Zenvia API base URL (overridable for staging).
    pub zenvia_base_url: String,
    /// Meta Graph API base URL.
    pub meta_base_url: String,
    /// Timeout applied to every outbound vendor call.
    pub provider_timeout: Duration,
}

impl GatewayConfig {
    /// Load configuration from environment variables.
    ///
    /// `ZAPGATE_VERIFY_TOKEN` is required; everything else has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let verify_token = std::env::var("ZAPGATE_VERIFY_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("ZAPGATE_VERIFY_TOKEN".to_string()))?;

        let port = match std::env::var("ZAPGATE_PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "ZAPGATE_PORT".to_string(),
                message: format!("not a port number: {raw}"),
            })?,
            Err(_) => 8080,
        };

        let timeout_secs = match std::env::var("ZAPGATE_PROVIDER_TIMEOUT_SECS") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "ZAPGATE_PROVIDER_TIMEOUT_SECS".to_string(),
                message: format!("not a number of seconds: {raw}"),
            })?,
            Err(_) => 15,
        };

        let defaults = ProviderEndpoints::default();
        Ok(Self {
            port,
            db_path: std::env::var("ZAPGATE_DB_PATH")
                .unwrap_or_else(|_| "./data/zapgate.db".to_string()),
            verify_token: SecretString::from(verify_token),
            zenvia_base_url: std::env::var("ZAPGATE_ZENVIA_BASE_URL")
                .unwrap_or(defaults.zenvia_base_url),
            meta_base_url: std::env::var("ZAPGATE_META_BASE_URL")
                .unwrap_or(defaults.meta_base_url),
            provider_timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// The provider endpoint set derived from this configuration.
    pub fn provider_endpoints(&self) -> ProviderEndpoints {
        ProviderEndpoints {
            zenvia_base_url: self.zenvia_base_url.clone(),
            meta_base_url: self.meta_base_url.clone(),
            request_timeout: self.provider_timeout,
        }
    }
}
