use super::read_ops::{AgentRow, EventRow, RunRow, SessionRow, WorkItemRow};
use crate::error::{InboxError, Result};
use crate::types::{
    AgentEvent, AgentEventType, AgentId, AgentRecord, AgentStatus, ClaimedItem, Run, RunId,
    RunStatus, Session, SessionId, WorkItem, WorkItemId, WorkItemKind, WorkItemStatus, WorkerId,
};
use std::path::PathBuf;

pub const fn to_u32_i32(value: i32) -> u32 {
    if value < 0 {
        0
    } else {
        value.cast_unsigned()
    }
}

pub const fn to_u64_i64(value: i64) -> u64 {
    if value < 0 {
        0
    } else {
        value.cast_unsigned()
    }
}

pub fn parse_agent(row: AgentRow) -> Result<AgentRecord> {
    let status = AgentStatus::try_from(row.status.as_str()).map_err(InboxError::DatabaseError)?;
    Ok(AgentRecord {
        id: AgentId::new(row.id),
        name: row.name,
        status,
        workspace_path: PathBuf::from(row.workspace_path),
    })
}

pub fn parse_session(row: SessionRow) -> Session {
    Session {
        agent_id: AgentId::new(row.agent_id),
        session_id: SessionId::new(row.session_id),
        last_run_at: row.last_run_at,
        created_at: row.created_at,
    }
}

/// Maps a row whose payload is known to decode; see [`parse_claimed_item`]
/// for the tolerant variant used when claiming.
pub fn parse_work_item(row: WorkItemRow) -> Result<WorkItem> {
    let kind = WorkItemKind::from_parts(&row.kind, row.payload.clone()).map_err(|e| {
        InboxError::WorkItemError(format!("Invalid payload for {} item {}: {e}", row.kind, row.id))
    })?;
    build_work_item(row, kind)
}

pub fn parse_claimed_item(row: WorkItemRow) -> Result<ClaimedItem> {
    match WorkItemKind::from_parts(&row.kind, row.payload.clone()) {
        Ok(kind) => build_work_item(row, kind).map(ClaimedItem::Ready),
        Err(e) => Ok(ClaimedItem::Malformed {
            reason: format!("Invalid payload for kind {}: {e}", row.kind),
            id: WorkItemId::new(row.id),
            agent_id: AgentId::new(row.agent_id),
        }),
    }
}

fn build_work_item(row: WorkItemRow, kind: WorkItemKind) -> Result<WorkItem> {
    let status =
        WorkItemStatus::try_from(row.status.as_str()).map_err(InboxError::DatabaseError)?;
    Ok(WorkItem {
        id: WorkItemId::new(row.id),
        agent_id: AgentId::new(row.agent_id),
        kind,
        source: row.source,
        status,
        priority: row.priority,
        attempt_count: to_u32_i32(row.attempt_count),
        available_at: row.available_at,
        created_at: row.created_at,
        processed_at: row.processed_at,
        last_error: row.last_error,
    })
}

pub fn parse_run(row: RunRow) -> Result<Run> {
    let status = RunStatus::try_from(row.status.as_str()).map_err(InboxError::DatabaseError)?;
    Ok(Run {
        id: RunId::new(row.id),
        agent_id: AgentId::new(row.agent_id),
        session_id: SessionId::new(row.session_id),
        inbox_id: row.inbox_id.map(WorkItemId::new),
        status,
        worker_id: row.worker_id.map(WorkerId::new),
        pid: row.pid.map(to_u32_i32),
        started_at: row.started_at,
        heartbeat_at: row.heartbeat_at,
        finished_at: row.finished_at,
        exit_code: row.exit_code,
        signal: row.signal,
        error: row.error,
    })
}

pub fn parse_event(row: EventRow) -> Result<AgentEvent> {
    let event_type =
        AgentEventType::try_from(row.event_type.as_str()).map_err(InboxError::DatabaseError)?;
    Ok(AgentEvent {
        id: row.id,
        agent_id: AgentId::new(row.agent_id),
        event_type,
        content: row.content,
        metadata: row.metadata,
        created_at: row.created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::{parse_claimed_item, to_u32_i32};
    use crate::db::read_ops::WorkItemRow;
    use crate::types::ClaimedItem;
    use chrono::Utc;
    use serde_json::json;

    fn row(kind: &str, payload: serde_json::Value) -> WorkItemRow {
        WorkItemRow {
            id: "inb_1".to_string(),
            agent_id: "agt_1".to_string(),
            kind: kind.to_string(),
            payload,
            source: Some("dashboard".to_string()),
            status: "processing".to_string(),
            priority: 0,
            attempt_count: 1,
            available_at: Utc::now(),
            created_at: Utc::now(),
            processed_at: Some(Utc::now()),
            last_error: None,
        }
    }

    #[test]
    fn negative_counts_clamp_to_zero() {
        assert_eq!(to_u32_i32(-4), 0);
        assert_eq!(to_u32_i32(7), 7);
    }

    #[test]
    fn claimed_row_with_valid_payload_is_ready() {
        let claimed = parse_claimed_item(row("merchant_message", json!({"message": "hi"})));
        assert!(matches!(claimed, Ok(ClaimedItem::Ready(item)) if item.attempt_count == 1));
    }

    #[test]
    fn claimed_row_with_bad_payload_is_malformed_not_an_error() {
        let claimed = parse_claimed_item(row("merchant_message", json!({"text": "hi"})));
        assert!(matches!(claimed, Ok(ClaimedItem::Malformed { .. })));
    }
}
