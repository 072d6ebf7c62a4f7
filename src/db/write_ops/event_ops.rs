use crate::db::InboxDb;
use crate::error::{InboxError, Result};
use crate::types::NewAgentEvent;

impl InboxDb {
    /// Appends one activity-log entry and returns its id.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn append_event(&self, event: &NewAgentEvent) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO agent_events (agent_id, event_type, content, metadata)
             VALUES ($1, $2, $3, $4)
             RETURNING id",
        )
        .bind(event.agent_id.value())
        .bind(event.event_type.as_str())
        .bind(event.content.as_deref())
        .bind(&event.metadata)
        .fetch_one(self.pool())
        .await
        .map_err(|e| InboxError::DatabaseError(format!("Failed to append event: {e}")))
    }
}
