use super::identifiers::{AgentId, WorkItemId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Queued,
    Processing,
    Done,
    Failed,
}

impl WorkItemStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for WorkItemStatus {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown work item status: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantMessage {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ScheduledTick {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformEvent {
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

/// What a work item asks the agent to do. Stored as a `kind` column plus a
/// JSON `payload` column; the variant tag is the `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum WorkItemKind {
    MerchantMessage(MerchantMessage),
    ScheduledTick(ScheduledTick),
    PlatformEvent(PlatformEvent),
}

impl WorkItemKind {
    #[must_use]
    pub fn merchant_message(message: impl Into<String>) -> Self {
        Self::MerchantMessage(MerchantMessage {
            message: message.into(),
        })
    }

    #[must_use]
    pub const fn kind_str(&self) -> &'static str {
        match self {
            Self::MerchantMessage(_) => "merchant_message",
            Self::ScheduledTick(_) => "scheduled_tick",
            Self::PlatformEvent(_) => "platform_event",
        }
    }

    /// Splits the variant into its stored `(kind, payload)` columns.
    ///
    /// # Errors
    /// Returns a serialization error if the payload cannot be encoded.
    pub fn to_parts(&self) -> serde_json::Result<(&'static str, Value)> {
        let payload = match self {
            Self::MerchantMessage(inner) => serde_json::to_value(inner)?,
            Self::ScheduledTick(inner) => serde_json::to_value(inner)?,
            Self::PlatformEvent(inner) => serde_json::to_value(inner)?,
        };
        Ok((self.kind_str(), payload))
    }

    /// Rebuilds the variant from stored columns.
    ///
    /// # Errors
    /// Returns a serialization error for an unknown kind or a payload that does
    /// not match the kind's shape.
    pub fn from_parts(kind: &str, payload: Value) -> serde_json::Result<Self> {
        serde_json::from_value(json!({ "kind": kind, "payload": payload }))
    }

    /// Text delivered to the executable for this item.
    #[must_use]
    pub fn prompt_text(&self) -> String {
        match self {
            Self::MerchantMessage(inner) => inner.message.clone(),
            Self::ScheduledTick(inner) => serde_json::to_string(inner).unwrap_or_default(),
            Self::PlatformEvent(inner) => serde_json::to_string(inner).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub agent_id: AgentId,
    pub kind: WorkItemKind,
    pub source: Option<String>,
    pub status: WorkItemStatus,
    pub priority: i32,
    pub attempt_count: u32,
    pub available_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Result of a successful claim. A row whose payload does not decode for its
/// kind is still claimed so that it can be failed instead of retried forever.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimedItem {
    Ready(WorkItem),
    Malformed {
        id: WorkItemId,
        agent_id: AgentId,
        reason: String,
    },
}

impl ClaimedItem {
    #[must_use]
    pub const fn id(&self) -> &WorkItemId {
        match self {
            Self::Ready(item) => &item.id,
            Self::Malformed { id, .. } => id,
        }
    }

    #[must_use]
    pub const fn agent_id(&self) -> &AgentId {
        match self {
            Self::Ready(item) => &item.agent_id,
            Self::Malformed { agent_id, .. } => agent_id,
        }
    }
}

/// Producer-side request for a new inbox entry.
#[derive(Debug, Clone, PartialEq)]
pub struct NewWorkItem {
    pub agent_id: AgentId,
    pub kind: WorkItemKind,
    pub source: Option<String>,
    pub priority: i32,
}

impl NewWorkItem {
    #[must_use]
    pub const fn new(agent_id: AgentId, kind: WorkItemKind) -> Self {
        Self {
            agent_id,
            kind,
            source: None,
            priority: 0,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}
