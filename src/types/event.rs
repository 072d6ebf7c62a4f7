use super::identifiers::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Tag of an activity-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentEventType {
    /// Inbound merchant message, logged at enqueue time.
    Message,
    Response,
    ToolUse,
    Error,
    Info,
}

impl AgentEventType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Response => "response",
            Self::ToolUse => "tool_use",
            Self::Error => "error",
            Self::Info => "info",
        }
    }
}

impl fmt::Display for AgentEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for AgentEventType {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        match s {
            "message" => Ok(Self::Message),
            "response" => Ok(Self::Response),
            "tool_use" => Ok(Self::ToolUse),
            "error" => Ok(Self::Error),
            "info" => Ok(Self::Info),
            _ => Err(format!("Unknown event type: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub id: i64,
    pub agent_id: AgentId,
    pub event_type: AgentEventType,
    pub content: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAgentEvent {
    pub agent_id: AgentId,
    pub event_type: AgentEventType,
    pub content: Option<String>,
    pub metadata: Value,
}
