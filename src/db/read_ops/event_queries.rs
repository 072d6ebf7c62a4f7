use crate::db::mappers::parse_event;
use crate::db::InboxDb;
use crate::error::{InboxError, Result};
use crate::types::{AgentEvent, AgentId};

use super::types::{EventRow, EVENT_COLUMNS};

pub const MAX_EVENT_PAGE: u32 = 500;

impl InboxDb {
    /// Reverse-chronological page of an agent's events, strictly older than
    /// `before` when given.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored event type is unknown.
    pub async fn list_events(
        &self,
        agent_id: &AgentId,
        before: Option<i64>,
        limit: u32,
    ) -> Result<Vec<AgentEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM agent_events
             WHERE agent_id = $1 AND ($2::BIGINT IS NULL OR id < $2)
             ORDER BY id DESC
             LIMIT $3"
        );
        sqlx::query_as::<_, EventRow>(&sql)
            .bind(agent_id.value())
            .bind(before)
            .bind(i64::from(limit.clamp(1, MAX_EVENT_PAGE)))
            .fetch_all(self.pool())
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to list events: {e}")))
            .and_then(|rows| rows.into_iter().map(parse_event).collect())
    }

    /// Events newer than `after_id`, oldest first, for follow mode.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored event type is unknown.
    pub async fn events_after(
        &self,
        agent_id: &AgentId,
        after_id: i64,
        limit: u32,
    ) -> Result<Vec<AgentEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM agent_events
             WHERE agent_id = $1 AND id > $2
             ORDER BY id ASC
             LIMIT $3"
        );
        sqlx::query_as::<_, EventRow>(&sql)
            .bind(agent_id.value())
            .bind(after_id)
            .bind(i64::from(limit.clamp(1, MAX_EVENT_PAGE)))
            .fetch_all(self.pool())
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to poll events: {e}")))
            .and_then(|rows| rows.into_iter().map(parse_event).collect())
    }
}
