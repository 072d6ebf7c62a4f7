use crate::db::mappers::{parse_agent, parse_session};
use crate::db::InboxDb;
use crate::error::{InboxError, Result};
use crate::types::{AgentId, AgentRecord, Session};

use super::types::{AgentRow, SessionRow};

impl InboxDb {
    /// # Errors
    /// Returns an error if the query fails or the stored status is unknown.
    pub async fn get_agent(&self, agent_id: &AgentId) -> Result<Option<AgentRecord>> {
        sqlx::query_as::<_, AgentRow>(
            "SELECT id, name, status, workspace_path FROM agents WHERE id = $1",
        )
        .bind(agent_id.value())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| InboxError::DatabaseError(format!("Failed to get agent: {e}")))
        .and_then(|row| row.map(parse_agent).transpose())
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_session(&self, agent_id: &AgentId) -> Result<Option<Session>> {
        sqlx::query_as::<_, SessionRow>(
            "SELECT agent_id, session_id, last_run_at, created_at
             FROM agent_sessions WHERE agent_id = $1",
        )
        .bind(agent_id.value())
        .fetch_optional(self.pool())
        .await
        .map(|row| row.map(parse_session))
        .map_err(|e| InboxError::DatabaseError(format!("Failed to get session: {e}")))
    }
}
