use crate::db::mappers::parse_run;
use crate::db::InboxDb;
use crate::error::{InboxError, Result};
use crate::types::{AgentId, Run, RunId};

use super::types::{RunRow, RUN_COLUMNS};

impl InboxDb {
    /// # Errors
    /// Returns an error if the query fails or the stored status is unknown.
    pub async fn get_run(&self, run_id: &RunId) -> Result<Option<Run>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM agent_runs WHERE id = $1");
        sqlx::query_as::<_, RunRow>(&sql)
            .bind(run_id.value())
            .fetch_optional(self.pool())
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to get run: {e}")))
            .and_then(|row| row.map(parse_run).transpose())
    }

    /// # Errors
    /// Returns an error if the query fails or a stored status is unknown.
    pub async fn recent_runs(&self, agent_id: &AgentId, limit: u32) -> Result<Vec<Run>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM agent_runs
             WHERE agent_id = $1
             ORDER BY started_at DESC
             LIMIT $2"
        );
        sqlx::query_as::<_, RunRow>(&sql)
            .bind(agent_id.value())
            .bind(i64::from(limit))
            .fetch_all(self.pool())
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to list runs: {e}")))
            .and_then(|rows| rows.into_iter().map(parse_run).collect())
    }

    /// Runs in `starting` or `running` across all agents.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored status is unknown.
    pub async fn in_flight_runs(&self) -> Result<Vec<Run>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM agent_runs
             WHERE status IN ('starting', 'running')
             ORDER BY started_at ASC"
        );
        sqlx::query_as::<_, RunRow>(&sql)
            .fetch_all(self.pool())
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to list in-flight runs: {e}")))
            .and_then(|rows| rows.into_iter().map(parse_run).collect())
    }
}
