use crate::db::InboxDb;
use crate::error::{InboxError, Result};
use crate::types::{ItemDisposition, NewRun, RunCompletion, RunFailure, RunId, WorkerId};
use sqlx::Acquire;
use tracing::{info, warn};

const UNIQUE_VIOLATION: &str = "23505";

impl InboxDb {
    /// Records a run in `starting`, owned by `worker_id`, immediately before
    /// its process is spawned.
    ///
    /// # Errors
    /// Returns [`InboxError::AgentError`] if the agent already has a run in
    /// flight, or a database error.
    pub async fn start_run(&self, run: &NewRun, worker_id: &WorkerId) -> Result<RunId> {
        sqlx::query(
            "INSERT INTO agent_runs
                 (id, agent_id, session_id, inbox_id, status, worker_id, started_at, heartbeat_at)
             VALUES ($1, $2, $3, $4, 'starting', $5, NOW(), NOW())",
        )
        .bind(run.id.value())
        .bind(run.agent_id.value())
        .bind(run.session_id.value())
        .bind(run.inbox_id.as_ref().map(|id| id.value().to_string()))
        .bind(worker_id.value())
        .execute(self.pool())
        .await
        .map_err(|e| {
            let in_flight = e
                .as_database_error()
                .and_then(|db_error| db_error.code())
                .is_some_and(|code| code == UNIQUE_VIOLATION);
            if in_flight {
                InboxError::AgentError(format!(
                    "Agent {} already has a run in flight",
                    run.agent_id
                ))
            } else {
                InboxError::DatabaseError(format!("Failed to start run: {e}"))
            }
        })?;

        Ok(run.id.clone())
    }

    /// Stores the child pid and moves the run to `running`.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn mark_run_running(&self, run_id: &RunId, pid: u32) -> Result<bool> {
        sqlx::query(
            "UPDATE agent_runs SET status = 'running', pid = $2, heartbeat_at = NOW()
             WHERE id = $1 AND status = 'starting'",
        )
        .bind(run_id.value())
        .bind(pid.cast_signed())
        .execute(self.pool())
        .await
        .map(|result| result.rows_affected() > 0)
        .map_err(|e| InboxError::DatabaseError(format!("Failed to mark run running: {e}")))
    }

    /// Proves the owning worker is still alive. Returns `false` once the run
    /// is no longer in flight, e.g. after a peer reconciled it as stale.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn heartbeat_run(&self, run_id: &RunId) -> Result<bool> {
        sqlx::query(
            "UPDATE agent_runs SET heartbeat_at = NOW()
             WHERE id = $1 AND status IN ('starting', 'running')",
        )
        .bind(run_id.value())
        .execute(self.pool())
        .await
        .map(|result| result.rows_affected() > 0)
        .map_err(|e| InboxError::DatabaseError(format!("Failed to record run heartbeat: {e}")))
    }

    /// Completes the run, marks its item `done` and stamps the session's
    /// `last_run_at`, all in one transaction.
    ///
    /// # Errors
    /// Returns an error if any statement fails.
    pub async fn complete_run(&self, completion: &RunCompletion) -> Result<()> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to begin tx: {e}")))?;

        let conn = tx
            .acquire()
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to acquire tx conn: {e}")))?;

        let run_updated = sqlx::query(
            "UPDATE agent_runs
             SET status = 'completed', exit_code = $2, finished_at = $3
             WHERE id = $1 AND status IN ('starting', 'running')",
        )
        .bind(completion.run_id.value())
        .bind(completion.exit_code)
        .bind(completion.finished_at)
        .execute(&mut *conn)
        .await
        .map(|result| result.rows_affected() > 0)
        .map_err(|e| InboxError::DatabaseError(format!("Failed to complete run: {e}")))?;

        if !run_updated {
            // Reconciled away from us; the item may already belong to another run.
            tx.rollback()
                .await
                .map_err(|e| InboxError::DatabaseError(format!("Failed to rollback tx: {e}")))?;
            warn!(run_id = %completion.run_id, "Completed run was no longer in flight");
            return Ok(());
        }

        sqlx::query(
            "UPDATE agent_inbox
             SET status = 'done', processed_at = $2, last_error = NULL
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(completion.item_id.value())
        .bind(completion.finished_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| InboxError::DatabaseError(format!("Failed to mark item done: {e}")))?;

        sqlx::query("UPDATE agent_sessions SET last_run_at = $2 WHERE agent_id = $1")
            .bind(completion.agent_id.value())
            .bind(completion.finished_at)
            .execute(&mut *conn)
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to touch session: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to commit tx: {e}")))?;
        Ok(())
    }

    /// Fails the run and applies `disposition` to its item in one transaction.
    /// A run that is no longer in flight leaves its item untouched.
    ///
    /// # Errors
    /// Returns an error if any statement fails.
    pub async fn fail_run(&self, failure: &RunFailure, disposition: &ItemDisposition) -> Result<()> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to begin tx: {e}")))?;

        let conn = tx
            .acquire()
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to acquire tx conn: {e}")))?;

        let run_updated = sqlx::query(
            "UPDATE agent_runs
             SET status = 'failed', error = $2, exit_code = $3, signal = $4, finished_at = $5
             WHERE id = $1 AND status IN ('starting', 'running')",
        )
        .bind(failure.run_id.value())
        .bind(&failure.error)
        .bind(failure.exit_code)
        .bind(failure.signal.as_deref())
        .bind(failure.finished_at)
        .execute(&mut *conn)
        .await
        .map(|result| result.rows_affected() > 0)
        .map_err(|e| InboxError::DatabaseError(format!("Failed to fail run: {e}")))?;

        if !run_updated {
            tx.rollback()
                .await
                .map_err(|e| InboxError::DatabaseError(format!("Failed to rollback tx: {e}")))?;
            warn!(run_id = %failure.run_id, "Failed run was no longer in flight");
            return Ok(());
        }

        let item_update = match disposition {
            ItemDisposition::Requeue {
                attempt_count,
                available_at,
            } => sqlx::query(
                "UPDATE agent_inbox
                 SET status = 'queued', attempt_count = $3, available_at = $4, last_error = $2
                 WHERE id = $1 AND status = 'processing'",
            )
            .bind(failure.item_id.value())
            .bind(&failure.error)
            .bind(attempt_count.cast_signed())
            .bind(available_at),
            ItemDisposition::Release => sqlx::query(
                "UPDATE agent_inbox
                 SET status = 'queued', available_at = NOW(), last_error = $2
                 WHERE id = $1 AND status = 'processing'",
            )
            .bind(failure.item_id.value())
            .bind(&failure.error),
            ItemDisposition::Fail => sqlx::query(
                "UPDATE agent_inbox
                 SET status = 'failed', processed_at = $3, last_error = $2
                 WHERE id = $1 AND status = 'processing'",
            )
            .bind(failure.item_id.value())
            .bind(&failure.error)
            .bind(failure.finished_at),
        };

        item_update
            .execute(&mut *conn)
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to update failed item: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to commit tx: {e}")))?;

        info!(
            run_id = %failure.run_id,
            item_id = %failure.item_id,
            disposition = ?disposition,
            "Recorded failed run"
        );
        Ok(())
    }
}
