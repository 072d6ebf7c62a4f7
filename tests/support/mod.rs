#![allow(dead_code, clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use inbox::{
    AgentId, AgentStatus, InboxDb, NewWorkItem, ReconcileScope, Session, WorkItem, WorkItemId,
    WorkItemKind, WorkerId,
};
use sqlx::postgres::PgPoolOptions;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

/// Tests in one binary share one database, and claims are global, so they
/// take turns.
static DB_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub struct TestDb {
    pub db: InboxDb,
    _guard: MutexGuard<'static, ()>,
}

fn test_db_url() -> String {
    std::env::var("INBOX_TEST_DATABASE_URL")
        .ok()
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .unwrap_or_else(|| {
            panic!("Set INBOX_TEST_DATABASE_URL or DATABASE_URL for DB integration tests")
        })
}

/// Exclusive access to a freshly reset schema.
pub async fn test_db() -> TestDb {
    let guard = DB_LOCK.get_or_init(|| Mutex::new(())).lock().await;
    let pool = PgPoolOptions::new()
        .max_connections(16)
        .connect(&test_db_url())
        .await
        .unwrap_or_else(|e| panic!("Failed to connect test database: {e}"));
    let db = InboxDb::new_with_pool(pool);

    sqlx::raw_sql(
        "DROP TABLE IF EXISTS agent_events CASCADE;
         DROP TABLE IF EXISTS agent_runs CASCADE;
         DROP TABLE IF EXISTS agent_inbox CASCADE;
         DROP TABLE IF EXISTS agent_sessions CASCADE;
         DROP TABLE IF EXISTS agents CASCADE;",
    )
    .execute(db.pool())
    .await
    .expect("Schema reset failed");
    db.initialize_schema().await.expect("Schema init failed");

    TestDb { db, _guard: guard }
}

pub async fn provision(db: &InboxDb, agent_id: &str, status: AgentStatus) -> Session {
    provision_in(db, agent_id, status, Path::new("/tmp")).await
}

pub async fn provision_in(
    db: &InboxDb,
    agent_id: &str,
    status: AgentStatus,
    workspace: &Path,
) -> Session {
    let agent_id = AgentId::new(agent_id);
    let (_, session) = db
        .provision_agent(&agent_id, "Test shop", workspace)
        .await
        .expect("provision agent");
    if status != AgentStatus::Active {
        db.set_agent_status(&agent_id, status)
            .await
            .expect("set agent status");
    }
    session
}

pub async fn enqueue_message(db: &InboxDb, agent_id: &str, message: &str, priority: i32) -> WorkItemId {
    db.enqueue(
        &NewWorkItem::new(AgentId::new(agent_id), WorkItemKind::merchant_message(message))
            .with_priority(priority)
            .with_source("dashboard"),
    )
    .await
    .expect("enqueue")
}

pub async fn work_item(db: &InboxDb, item_id: &WorkItemId) -> WorkItem {
    db.get_work_item(item_id)
        .await
        .expect("get work item")
        .expect("work item exists")
}

/// A worker identity with the production stale threshold.
pub fn worker(name: &str) -> ReconcileScope {
    ReconcileScope::new(WorkerId::new(name), Duration::from_secs(60))
}

/// Ages every in-flight heartbeat and every claim by `secs`, as if their
/// worker had stopped that long ago.
pub async fn backdate_in_flight(db: &InboxDb, secs: i32) {
    sqlx::query(
        "UPDATE agent_runs SET heartbeat_at = heartbeat_at - make_interval(secs => $1)
         WHERE status IN ('starting', 'running')",
    )
    .bind(f64::from(secs))
    .execute(db.pool())
    .await
    .expect("backdate heartbeats");
    sqlx::query(
        "UPDATE agent_inbox SET processed_at = processed_at - make_interval(secs => $1)
         WHERE status = 'processing'",
    )
    .bind(f64::from(secs))
    .execute(db.pool())
    .await
    .expect("backdate claims");
}
