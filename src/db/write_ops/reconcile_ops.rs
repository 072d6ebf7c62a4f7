use crate::db::InboxDb;
use crate::error::{InboxError, Result};
use crate::types::{ReconcileReport, ReconcileScope};
use sqlx::Acquire;

pub const CRASHED_RUN_ERROR: &str = "Worker crashed";

impl InboxDb {
    /// Fails in-flight runs abandoned by a dead worker and re-queues their
    /// items. A run is abandoned when it has no owner, when its owner is
    /// `scope.worker_id`, or when its heartbeat is older than
    /// `scope.stale_after`. Runs of live peers are left alone.
    ///
    /// Items left `processing` with no run at all are re-queued once their
    /// claim is older than `scope.stale_after`. Attempt counts are unchanged
    /// and a second pass is a no-op.
    ///
    /// # Errors
    /// Returns an error if either statement fails.
    pub async fn reconcile_stalled_runs(&self, scope: &ReconcileScope) -> Result<ReconcileReport> {
        let stale_after_secs = scope.stale_after.as_secs_f64();
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to begin tx: {e}")))?;

        let conn = tx
            .acquire()
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to acquire tx conn: {e}")))?;

        let failed_items: Vec<Option<String>> = sqlx::query_scalar(
            "UPDATE agent_runs
             SET status = 'failed', error = $1, finished_at = NOW()
             WHERE status IN ('starting', 'running')
               AND (worker_id IS NULL
                    OR worker_id = $2
                    OR heartbeat_at < NOW() - make_interval(secs => $3))
             RETURNING inbox_id",
        )
        .bind(CRASHED_RUN_ERROR)
        .bind(scope.worker_id.value())
        .bind(stale_after_secs)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| InboxError::DatabaseError(format!("Failed to reconcile runs: {e}")))?;

        let runs_failed = u64::try_from(failed_items.len()).unwrap_or(u64::MAX);
        let failed_items: Vec<String> = failed_items.into_iter().flatten().collect();

        let items_requeued = sqlx::query(
            "UPDATE agent_inbox i
             SET status = 'queued', available_at = NOW(), last_error = $1
             WHERE i.status = 'processing'
               AND NOT EXISTS (
                   SELECT 1 FROM agent_runs r
                   WHERE r.inbox_id = i.id AND r.status IN ('starting', 'running')
               )
               AND (i.id = ANY($2)
                    OR i.processed_at < NOW() - make_interval(secs => $3))",
        )
        .bind(CRASHED_RUN_ERROR)
        .bind(&failed_items)
        .bind(stale_after_secs)
        .execute(&mut *conn)
        .await
        .map(|result| result.rows_affected())
        .map_err(|e| InboxError::DatabaseError(format!("Failed to requeue orphaned items: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to commit tx: {e}")))?;

        Ok(ReconcileReport {
            runs_failed,
            items_requeued,
        })
    }
}
