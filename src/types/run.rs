use super::identifiers::{AgentId, RunId, SessionId, WorkItemId, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_RUN_STALE_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Starting,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Starting and running runs hold the agent's single execution slot.
    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for RunStatus {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        match s {
            "starting" => Ok(Self::Starting),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown run status: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub agent_id: AgentId,
    pub session_id: SessionId,
    pub inbox_id: Option<WorkItemId>,
    pub status: RunStatus,
    pub worker_id: Option<WorkerId>,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRun {
    pub id: RunId,
    pub agent_id: AgentId,
    pub session_id: SessionId,
    pub inbox_id: Option<WorkItemId>,
}

/// Which in-flight runs a reconciliation pass may treat as abandoned: runs
/// stamped with `worker_id` (a restarted worker with a stable identity), runs
/// with no owner, and runs whose heartbeat is older than `stale_after`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileScope {
    pub worker_id: WorkerId,
    pub stale_after: Duration,
}

impl ReconcileScope {
    #[must_use]
    pub const fn new(worker_id: WorkerId, stale_after: Duration) -> Self {
        Self {
            worker_id,
            stale_after,
        }
    }
}

/// Successful finish of a run and the item it served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCompletion {
    pub run_id: RunId,
    pub item_id: WorkItemId,
    pub agent_id: AgentId,
    pub exit_code: i32,
    pub finished_at: DateTime<Utc>,
}

/// Failed finish of a run; paired with an [`ItemDisposition`] for its item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    pub run_id: RunId,
    pub item_id: WorkItemId,
    pub error: String,
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
    pub finished_at: DateTime<Utc>,
}

/// What happens to a work item whose run failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemDisposition {
    /// Back to `queued`, eligible again at `available_at`.
    Requeue {
        attempt_count: u32,
        available_at: DateTime<Utc>,
    },
    /// Back to `queued` immediately without consuming an attempt.
    Release,
    /// Terminal `failed`.
    Fail,
}
