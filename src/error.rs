//! Error types for the gateway.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence-related errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with key {key}")]
    NotFound { entity: String, key: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Upstream vendor errors. The vendor's HTTP status is carried unmodified
/// so operators can correlate with the vendor's own logs.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider {provider} rejected the send: HTTP {status}")]
    Rejected {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Provider {provider} unreachable: {reason}")]
    Unreachable { provider: String, reason: String },

    #[error("Provider {provider} returned an unparseable response: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Outbound send pipeline errors. Each maps to one gating step of the
/// dispatcher; a failure at any step means no message row was created.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Could not persist contact for {phone}: {source}")]
    ContactPersistence {
        phone: String,
        #[source]
        source: StoreError,
    },

    #[error("Monthly quota of {quota} messages exhausted")]
    QuotaExceeded { quota: i64 },

    #[error("Template {reference} not found or not registered for the configured provider")]
    TemplateNotFound { reference: String },

    #[error("Text message requires a body")]
    MissingText,

    #[error("Send failed: {0}")]
    SendFailed(#[from] ProviderError),

    #[error("Could not persist message: {0}")]
    MessagePersistence(StoreError),

    #[error("Store error: {0}")]
    Store(StoreError),
}

/// Inbound webhook errors.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Webhook payload matches no known vendor schema")]
    Unrecognized,

    #[error("Challenge verification failed")]
    ChallengeFailed,

    #[error("Store error while applying webhook: {0}")]
    Store(#[from] StoreError),

    #[error("Auto-reply failed after inbound message was stored: {0}")]
    AutoReply(#[from] DispatchError),
}

/// Filter/pagination validation errors. Field and operator checks run before
/// the query; the page-bound check runs after (it needs the true total).
/// Either way the whole request is rejected, never partially applied.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Field {0} cannot be filtered or sorted")]
    DisallowedField(String),

    #[error("Operator {0} is not supported")]
    DisallowedOperator(String),

    #[error("Invalid value for field {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Queue producer errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Failed to publish to queue {queue}: {reason}")]
    PublishFailed { queue: String, reason: String },
}

/// Export job pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Export job {hash} not found")]
    JobNotFound { hash: String },

    #[error("Export file missing at {path}")]
    FileNotFound { path: String },

    #[error("Could not enqueue export job: {0}")]
    Enqueue(#[from] QueueError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the gateway.
pub type Result<T> = std::result::Result<T, Error>;
