#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Help,
    Migrate,
    Worker,
    Reconcile,
    Provision {
        agent_id: String,
        workspace: PathBuf,
        name: Option<String>,
    },
    Pause {
        agent_id: String,
    },
    Resume {
        agent_id: String,
    },
    Enqueue {
        agent_id: String,
        message: String,
        priority: Option<i32>,
        source: Option<String>,
    },
    Tick {
        agent_id: String,
        reason: Option<String>,
        priority: Option<i32>,
    },
    Event {
        agent_id: String,
        event_type: String,
        data: Option<String>,
        priority: Option<i32>,
    },
    Status {
        agent_id: String,
    },
    Events {
        agent_id: String,
        limit: Option<u32>,
        before: Option<i64>,
    },
    Watch {
        agent_id: String,
        interval_ms: Option<u64>,
    },
}

impl CliCommand {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Help => "help",
            Self::Migrate => "migrate",
            Self::Worker => "worker",
            Self::Reconcile => "reconcile",
            Self::Provision { .. } => "provision",
            Self::Pause { .. } => "pause",
            Self::Resume { .. } => "resume",
            Self::Enqueue { .. } => "enqueue",
            Self::Tick { .. } => "tick",
            Self::Event { .. } => "event",
            Self::Status { .. } => "status",
            Self::Events { .. } => "events",
            Self::Watch { .. } => "watch",
        }
    }

    /// Whether the command needs a database connection.
    #[must_use]
    pub const fn needs_database(&self) -> bool {
        !matches!(self, Self::Help)
    }
}

/// Flags accepted by each command, besides the global ones.
#[must_use]
pub fn allowed_flags(command: &str) -> &'static [&'static str] {
    match command {
        "provision" => &["--agent-id", "--workspace", "--name"],
        "pause" | "resume" | "status" => &["--agent-id"],
        "enqueue" => &["--agent-id", "--message", "--priority", "--source"],
        "tick" => &["--agent-id", "--reason", "--priority"],
        "event" => &["--agent-id", "--event-type", "--data", "--priority"],
        "events" => &["--agent-id", "--limit", "--before"],
        "watch" => &["--agent-id", "--interval-ms"],
        _ => &[],
    }
}
