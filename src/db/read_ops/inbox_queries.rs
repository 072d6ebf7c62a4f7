use crate::db::mappers::{parse_work_item, to_u64_i64};
use crate::db::InboxDb;
use crate::error::{InboxError, Result};
use crate::types::{AgentId, MessageStats, WorkItem, WorkItemId};
use chrono::{DateTime, Utc};

use super::types::{StatusCountRow, WorkItemRow, WORK_ITEM_COLUMNS};

impl InboxDb {
    /// # Errors
    /// Returns an error if the query fails or the row does not decode.
    pub async fn get_work_item(&self, item_id: &WorkItemId) -> Result<Option<WorkItem>> {
        let sql = format!("SELECT {WORK_ITEM_COLUMNS} FROM agent_inbox WHERE id = $1");
        sqlx::query_as::<_, WorkItemRow>(&sql)
            .bind(item_id.value())
            .fetch_optional(self.pool())
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to get work item: {e}")))
            .and_then(|row| row.map(parse_work_item).transpose())
    }

    /// Most recent items for an agent, newest first.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row does not decode.
    pub async fn list_work_items(&self, agent_id: &AgentId, limit: u32) -> Result<Vec<WorkItem>> {
        let sql = format!(
            "SELECT {WORK_ITEM_COLUMNS} FROM agent_inbox
             WHERE agent_id = $1
             ORDER BY created_at DESC
             LIMIT $2"
        );
        sqlx::query_as::<_, WorkItemRow>(&sql)
            .bind(agent_id.value())
            .bind(i64::from(limit))
            .fetch_all(self.pool())
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to list work items: {e}")))
            .and_then(|rows| rows.into_iter().map(parse_work_item).collect())
    }

    /// Items created since `since`, grouped into processed and pending.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn message_stats(
        &self,
        agent_id: &AgentId,
        since: DateTime<Utc>,
    ) -> Result<MessageStats> {
        sqlx::query_as::<_, StatusCountRow>(
            "SELECT status, COUNT(*) AS count
             FROM agent_inbox
             WHERE agent_id = $1 AND created_at >= $2
             GROUP BY status",
        )
        .bind(agent_id.value())
        .bind(since)
        .fetch_all(self.pool())
        .await
        .map(|rows| {
            MessageStats::from_status_counts(
                rows.iter()
                    .map(|row| (row.status.as_str(), to_u64_i64(row.count))),
            )
        })
        .map_err(|e| InboxError::DatabaseError(format!("Failed to get message stats: {e}")))
    }

    /// Queued or processing items regardless of age.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn pending_count(&self, agent_id: &AgentId) -> Result<u64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM agent_inbox
             WHERE agent_id = $1 AND status IN ('queued', 'processing')",
        )
        .bind(agent_id.value())
        .fetch_one(self.pool())
        .await
        .map(to_u64_i64)
        .map_err(|e| InboxError::DatabaseError(format!("Failed to count pending items: {e}")))
    }
}
