//! Core data model — tenants, contacts, messages, templates, export jobs.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which upstream vendor a tenant is wired to.
///
/// Closed set: adding a vendor means adding a variant here plus one adapter,
/// nothing else. Business logic never branches on vendor strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Zenvia-style aggregator (`{from, to, contents}` wire format).
    Zenvia,
    /// Meta WhatsApp Business Cloud API.
    Meta,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Zenvia => write!(f, "zenvia"),
            Self::Meta => write!(f, "meta"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zenvia" => Ok(Self::Zenvia),
            "meta" => Ok(Self::Meta),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

/// Vendor credentials for one tenant.
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    /// Bearer token for the vendor API.
    pub api_token: SecretString,
    /// The tenant's WhatsApp number (sender for Zenvia, display number for Meta).
    pub from_number: String,
    /// Meta phone-number id; unused by Zenvia.
    pub channel_id: Option<String>,
}

/// A client organization. Loaded once per request and immutable during it.
#[derive(Debug, Clone)]
pub struct Tenant {
    pub id: Uuid,
    /// Routing key used in webhook paths and the `x-tenant-ref` header.
    pub reference: String,
    pub name: String,
    pub provider: ProviderKind,
    pub credentials: ProviderCredentials,
    /// Text sent back automatically on every inbound message, when set.
    pub auto_reply: Option<String>,
    /// Maximum sent messages per calendar month; `None` = unlimited.
    pub monthly_quota: Option<i64>,
}

/// A phone number the gateway has interacted with, scoped to a tenant.
/// `(tenant_id, phone)` is unique; contacts are upserted, never duplicated
/// and never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub phone: String,
    pub display_name: Option<String>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Message direction relative to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Sent,
    Received,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sent => write!(f, "sent"),
            Self::Received => write!(f, "received"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "received" => Ok(Self::Received),
            _ => Err(format!("Unknown direction: {}", s)),
        }
    }
}

/// A directional message record.
///
/// Sent messages are created the moment the vendor accepts the send, with an
/// empty status that a status webhook later fills in (keyed by
/// `provider_message_id`). Received messages are created once per inbound
/// webhook and only ever change their `read` flag afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub contact_id: Uuid,
    pub tenant_id: Uuid,
    pub sender: String,
    pub recipient: String,
    /// Raw vendor payload, for diagnostics.
    pub raw_payload: String,
    /// Rendered human-readable content, audit-accurate regardless of what
    /// the vendor echoed back.
    pub content: String,
    pub provider_message_id: String,
    pub direction: Direction,
    /// Canonical status (`queued|send|delivered|read|not_delivered`); unknown
    /// vendor codes pass through uppercased. Empty until the first status
    /// webhook for sent messages.
    pub status: Option<String>,
    /// Set when a client fetched this message through conversation history.
    pub read: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A reusable message body with placeholders, optionally pre-registered with
/// each vendor. `(tenant_id, title)` is unique; `hash` gives clients a stable
/// address that survives renames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    /// Body with `{{name}}` and 1-based `{{1}}` positional placeholders.
    pub body: String,
    /// Vendor-side template identifier for Zenvia sends.
    pub zenvia_ref: Option<String>,
    /// Vendor-side template name for Meta sends.
    pub meta_ref: Option<String>,
    pub active: bool,
    pub hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    /// The vendor reference for a given provider, if registered.
    pub fn provider_ref(&self, provider: ProviderKind) -> Option<&str> {
        match provider {
            ProviderKind::Zenvia => self.zenvia_ref.as_deref(),
            ProviderKind::Meta => self.meta_ref.as_deref(),
        }
    }
}

/// Export job lifecycle. Stored as integers (`pending = 0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl ExportStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Done => 2,
            Self::Failed => 3,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => Self::Processing,
            2 => Self::Done,
            3 => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// An asynchronous request to materialize a filtered dataset to a file.
///
/// This core owns the state machine; the file itself is produced by an
/// external worker that is never awaited synchronously.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJob {
    pub id: Uuid,
    /// Client-facing identifier, globally unique, generated at creation.
    pub hash: String,
    pub table_name: String,
    /// Opaque query description forwarded to the worker.
    pub filters: serde_json::Value,
    pub status: ExportStatus,
    /// Populated by the external worker once the file exists.
    pub file_path: Option<String>,
    pub attempt_count: i64,
    pub created_at: DateTime<Utc>,
    pub generated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

// ── Canonical send types ────────────────────────────────────────────

/// What kind of outbound message is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendKind {
    Text,
    Template,
}

/// Canonical outbound request, independent of vendor wire formats.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub kind: SendKind,
    pub recipient: String,
    /// Body for text sends.
    pub text: Option<String>,
    /// Template hash for template sends.
    pub template: Option<String>,
    /// Ordered parameter map; insertion order drives positional placeholders.
    pub parameters: Vec<(String, String)>,
}

/// Canonical result of a vendor send.
#[derive(Debug, Clone)]
pub struct SendResult {
    pub provider_message_id: String,
    pub raw_from: String,
    pub raw_to: String,
    /// The vendor payload as sent, for the message's raw_payload column.
    pub raw_content: String,
    pub http_status: u16,
}

// ── Canonical webhook events ────────────────────────────────────────

/// Status transition for an already-sent message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub provider_message_id: String,
    /// Already normalized through the status table.
    pub status: String,
}

/// An inbound message from an end user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub provider_message_id: String,
    pub from: String,
    pub to: String,
    pub body: String,
    /// Sender display name, when the vendor includes one.
    pub contact_name: Option<String>,
}

/// The normalized form of either vendor's webhook, independent of which
/// vendor sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalEvent {
    Status(StatusEvent),
    Inbound(InboundEvent),
}
