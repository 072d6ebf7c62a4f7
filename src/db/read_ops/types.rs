use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;

#[derive(FromRow)]
pub(crate) struct AgentRow {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) status: String,
    pub(crate) workspace_path: String,
}

#[derive(FromRow)]
pub(crate) struct SessionRow {
    pub(crate) agent_id: String,
    pub(crate) session_id: String,
    pub(crate) last_run_at: Option<DateTime<Utc>>,
    pub(crate) created_at: DateTime<Utc>,
}

#[derive(FromRow)]
pub(crate) struct WorkItemRow {
    pub(crate) id: String,
    pub(crate) agent_id: String,
    pub(crate) kind: String,
    pub(crate) payload: Value,
    pub(crate) source: Option<String>,
    pub(crate) status: String,
    pub(crate) priority: i32,
    pub(crate) attempt_count: i32,
    pub(crate) available_at: DateTime<Utc>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) processed_at: Option<DateTime<Utc>>,
    pub(crate) last_error: Option<String>,
}

#[derive(FromRow)]
pub(crate) struct ClaimCandidateRow {
    pub(crate) id: String,
    pub(crate) agent_id: String,
}

#[derive(FromRow)]
pub(crate) struct RunRow {
    pub(crate) id: String,
    pub(crate) agent_id: String,
    pub(crate) session_id: String,
    pub(crate) inbox_id: Option<String>,
    pub(crate) status: String,
    pub(crate) worker_id: Option<String>,
    pub(crate) pid: Option<i32>,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) heartbeat_at: DateTime<Utc>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
    pub(crate) exit_code: Option<i32>,
    pub(crate) signal: Option<String>,
    pub(crate) error: Option<String>,
}

#[derive(FromRow)]
pub(crate) struct EventRow {
    pub(crate) id: i64,
    pub(crate) agent_id: String,
    pub(crate) event_type: String,
    pub(crate) content: Option<String>,
    pub(crate) metadata: Value,
    pub(crate) created_at: DateTime<Utc>,
}

#[derive(FromRow)]
pub(crate) struct StatusCountRow {
    pub(crate) status: String,
    pub(crate) count: i64,
}

pub(crate) const WORK_ITEM_COLUMNS: &str = "id, agent_id, kind, payload, source, status, priority, \
     attempt_count, available_at, created_at, processed_at, last_error";

pub(crate) const RUN_COLUMNS: &str = "id, agent_id, session_id, inbox_id, status, worker_id, pid, \
     started_at, heartbeat_at, finished_at, exit_code, signal, error";

pub(crate) const EVENT_COLUMNS: &str = "id, agent_id, event_type, content, metadata, created_at";
