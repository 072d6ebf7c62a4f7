use crate::db::InboxDb;
use crate::error::{InboxError, Result};
use crate::types::{AgentId, AgentRecord, AgentStatus, Session, SessionId};
use sqlx::Acquire;
use std::path::Path;
use tracing::info;

impl InboxDb {
    /// Creates an active agent and its session in one transaction.
    ///
    /// # Errors
    /// Returns [`InboxError::AgentError`] if the agent already exists, or a
    /// database error.
    pub async fn provision_agent(
        &self,
        agent_id: &AgentId,
        name: &str,
        workspace_path: &Path,
    ) -> Result<(AgentRecord, Session)> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to begin tx: {e}")))?;

        let conn = tx
            .acquire()
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to acquire tx conn: {e}")))?;

        let inserted = sqlx::query(
            "INSERT INTO agents (id, name, status, workspace_path)
             VALUES ($1, $2, 'active', $3)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(agent_id.value())
        .bind(name)
        .bind(workspace_path.display().to_string())
        .execute(&mut *conn)
        .await
        .map(|result| result.rows_affected() > 0)
        .map_err(|e| InboxError::DatabaseError(format!("Failed to insert agent: {e}")))?;

        if !inserted {
            tx.rollback()
                .await
                .map_err(|e| InboxError::DatabaseError(format!("Failed to rollback tx: {e}")))?;
            return Err(InboxError::AgentError(format!(
                "Agent {agent_id} already exists"
            )));
        }

        let session_id = SessionId::generate();
        let created_at = sqlx::query_scalar::<_, chrono::DateTime<chrono::Utc>>(
            "INSERT INTO agent_sessions (agent_id, session_id)
             VALUES ($1, $2)
             RETURNING created_at",
        )
        .bind(agent_id.value())
        .bind(session_id.value())
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| InboxError::DatabaseError(format!("Failed to create session: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to commit tx: {e}")))?;

        info!(agent_id = %agent_id, session_id = %session_id, "Provisioned agent");
        Ok((
            AgentRecord {
                id: agent_id.clone(),
                name: name.to_string(),
                status: AgentStatus::Active,
                workspace_path: workspace_path.to_path_buf(),
            },
            Session {
                agent_id: agent_id.clone(),
                session_id,
                last_run_at: None,
                created_at,
            },
        ))
    }

    /// Returns the agent's session, creating one if it does not exist yet.
    ///
    /// # Errors
    /// Returns an error if the agent does not exist or the query fails.
    pub async fn get_or_create_session(&self, agent_id: &AgentId) -> Result<Session> {
        sqlx::query(
            "INSERT INTO agent_sessions (agent_id, session_id)
             VALUES ($1, $2)
             ON CONFLICT (agent_id) DO NOTHING",
        )
        .bind(agent_id.value())
        .bind(SessionId::generate().value())
        .execute(self.pool())
        .await
        .map_err(|e| InboxError::DatabaseError(format!("Failed to create session: {e}")))?;

        self.get_session(agent_id).await?.ok_or_else(|| {
            InboxError::AgentError(format!("Session for agent {agent_id} disappeared"))
        })
    }

    /// # Errors
    /// Returns an error if the update fails.
    pub async fn set_agent_status(&self, agent_id: &AgentId, status: AgentStatus) -> Result<bool> {
        sqlx::query("UPDATE agents SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(agent_id.value())
            .bind(status.as_str())
            .execute(self.pool())
            .await
            .map(|result| result.rows_affected() > 0)
            .map_err(|e| InboxError::DatabaseError(format!("Failed to set agent status: {e}")))
    }
}
