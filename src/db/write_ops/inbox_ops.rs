use crate::db::mappers::parse_claimed_item;
use crate::db::read_ops::{ClaimCandidateRow, WorkItemRow, WORK_ITEM_COLUMNS};
use crate::db::InboxDb;
use crate::error::{InboxError, Result};
use crate::types::{ClaimedItem, NewWorkItem, WorkItemId, WorkItemKind};
use serde_json::json;
use sqlx::Acquire;
use tracing::{debug, info};

const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Upper bound on candidates skipped in one claim attempt because a racing
/// claimant got to their agent first.
const MAX_CLAIM_CANDIDATES: usize = 32;

impl InboxDb {
    /// Inserts a `queued` item available immediately. Merchant messages are
    /// also logged as a `message` event in the same transaction.
    ///
    /// # Errors
    /// Returns [`InboxError::AgentError`] for an unknown agent, or a database
    /// or serialization error.
    pub async fn enqueue(&self, item: &NewWorkItem) -> Result<WorkItemId> {
        let (kind, payload) = item.kind.to_parts()?;
        let item_id = WorkItemId::generate();

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to begin tx: {e}")))?;

        let conn = tx
            .acquire()
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to acquire tx conn: {e}")))?;

        sqlx::query(
            "INSERT INTO agent_inbox (id, agent_id, kind, payload, source, priority, status, available_at)
             VALUES ($1, $2, $3, $4, $5, $6, 'queued', NOW())",
        )
        .bind(item_id.value())
        .bind(item.agent_id.value())
        .bind(kind)
        .bind(&payload)
        .bind(item.source.as_deref())
        .bind(item.priority)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                InboxError::AgentError(format!("Agent not found: {}", item.agent_id))
            } else {
                InboxError::DatabaseError(format!("Failed to enqueue work item: {e}"))
            }
        })?;

        if let WorkItemKind::MerchantMessage(message) = &item.kind {
            sqlx::query(
                "INSERT INTO agent_events (agent_id, event_type, content, metadata)
                 VALUES ($1, 'message', $2, $3)",
            )
            .bind(item.agent_id.value())
            .bind(&message.message)
            .bind(json!({ "source": item.source, "inbox_id": item_id.value() }))
            .execute(&mut *conn)
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to log message event: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to commit tx: {e}")))?;

        info!(
            item_id = %item_id,
            agent_id = %item.agent_id,
            kind,
            priority = item.priority,
            "Enqueued work item"
        );
        Ok(item_id)
    }

    /// Atomically claims the highest-priority, oldest eligible item and marks
    /// it `processing`.
    ///
    /// Eligible means queued, available, and owned by an agent with no run in
    /// flight and no other item processing. Rows locked by concurrent
    /// claimants are skipped. Two claimants that pick different items of the
    /// same agent are serialized by a per-agent transaction-scoped advisory
    /// lock followed by a fresh busy check; the loser moves on to the next
    /// agent.
    ///
    /// # Errors
    /// Returns an error if any statement fails.
    pub async fn claim_next_item(&self) -> Result<Option<ClaimedItem>> {
        let mut excluded_agents: Vec<String> = Vec::new();

        while excluded_agents.len() < MAX_CLAIM_CANDIDATES {
            let mut tx = self
                .pool()
                .begin()
                .await
                .map_err(|e| InboxError::DatabaseError(format!("Failed to begin tx: {e}")))?;

            let conn = tx.acquire().await.map_err(|e| {
                InboxError::DatabaseError(format!("Failed to acquire tx conn: {e}"))
            })?;

            let candidate = sqlx::query_as::<_, ClaimCandidateRow>(
                "SELECT i.id, i.agent_id
                 FROM agent_inbox i
                 WHERE i.status = 'queued'
                   AND i.available_at <= NOW()
                   AND i.agent_id <> ALL($1::TEXT[])
                   AND NOT EXISTS (
                       SELECT 1 FROM agent_runs r
                       WHERE r.agent_id = i.agent_id AND r.status IN ('starting', 'running')
                   )
                   AND NOT EXISTS (
                       SELECT 1 FROM agent_inbox p
                       WHERE p.agent_id = i.agent_id AND p.status = 'processing'
                   )
                 ORDER BY i.priority DESC, i.created_at ASC
                 LIMIT 1
                 FOR UPDATE OF i SKIP LOCKED",
            )
            .bind(&excluded_agents)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to select work item: {e}")))?;

            let Some(candidate) = candidate else {
                tx.rollback()
                    .await
                    .map_err(|e| InboxError::DatabaseError(format!("Failed to rollback tx: {e}")))?;
                return Ok(None);
            };

            let locked = sqlx::query_scalar::<_, bool>(
                "SELECT pg_try_advisory_xact_lock(hashtextextended($1, 0))",
            )
            .bind(&candidate.agent_id)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| InboxError::DatabaseError(format!("Failed to lock agent: {e}")))?;

            let busy = if locked {
                sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS (
                         SELECT 1 FROM agent_runs
                         WHERE agent_id = $1 AND status IN ('starting', 'running')
                     ) OR EXISTS (
                         SELECT 1 FROM agent_inbox
                         WHERE agent_id = $1 AND status = 'processing'
                     )",
                )
                .bind(&candidate.agent_id)
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| InboxError::DatabaseError(format!("Failed to recheck agent: {e}")))?
            } else {
                true
            };

            if busy {
                tx.rollback()
                    .await
                    .map_err(|e| InboxError::DatabaseError(format!("Failed to rollback tx: {e}")))?;
                debug!(agent_id = %candidate.agent_id, "Agent claimed concurrently; skipping");
                excluded_agents.push(candidate.agent_id);
                continue;
            }

            let sql = format!(
                "UPDATE agent_inbox
                 SET status = 'processing', processed_at = NOW()
                 WHERE id = $1
                 RETURNING {WORK_ITEM_COLUMNS}"
            );
            let row = sqlx::query_as::<_, WorkItemRow>(&sql)
                .bind(&candidate.id)
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| InboxError::DatabaseError(format!("Failed to claim work item: {e}")))?;

            tx.commit()
                .await
                .map_err(|e| InboxError::DatabaseError(format!("Failed to commit tx: {e}")))?;

            let claimed = parse_claimed_item(row)?;
            info!(item_id = %claimed.id(), agent_id = %claimed.agent_id(), "Claimed work item");
            return Ok(Some(claimed));
        }

        Ok(None)
    }

    /// Fails a claimed item without creating a run.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn reject_item(&self, item_id: &WorkItemId, reason: &str) -> Result<bool> {
        sqlx::query(
            "UPDATE agent_inbox
             SET status = 'failed', processed_at = NOW(), last_error = $2
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(item_id.value())
        .bind(reason)
        .execute(self.pool())
        .await
        .map(|result| result.rows_affected() > 0)
        .map_err(|e| InboxError::DatabaseError(format!("Failed to reject work item: {e}")))
    }

    /// Returns a claimed item to `queued`, available now, without consuming an
    /// attempt.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn release_item(&self, item_id: &WorkItemId, reason: &str) -> Result<bool> {
        sqlx::query(
            "UPDATE agent_inbox
             SET status = 'queued', available_at = NOW(), last_error = $2
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(item_id.value())
        .bind(reason)
        .execute(self.pool())
        .await
        .map(|result| result.rows_affected() > 0)
        .map_err(|e| InboxError::DatabaseError(format!("Failed to release work item: {e}")))
    }
}

fn is_foreign_key_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .and_then(|db_error| db_error.code())
        .is_some_and(|code| code == FOREIGN_KEY_VIOLATION)
}
