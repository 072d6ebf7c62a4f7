use crate::cli::{CliCommand, HELP};
use crate::config::WorkerConfig;
use crate::db::{InboxDb, MAX_EVENT_PAGE};
use crate::error::{InboxError, Result};
use crate::orchestrator::{OrchestratorService, WorkerPorts};
use crate::output::emit_output;
use crate::supervisor::ProcessSupervisor;
use crate::types::{
    AgentId, AgentStatus, NewWorkItem, PlatformEvent, ScheduledTick, WorkItemKind,
};
use chrono::{TimeDelta, Utc};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

const DEFAULT_EVENT_PAGE: u32 = 50;
const DEFAULT_WATCH_INTERVAL_MS: u64 = 1_000;
const RECENT_RUNS: u32 = 5;

/// Runs one parsed command. `shutdown` stops long-running commands.
///
/// # Errors
/// Returns configuration, database and orchestrator failures.
pub async fn dispatch(
    command: CliCommand,
    config: &WorkerConfig,
    shutdown: &CancellationToken,
) -> Result<()> {
    if !command.needs_database() {
        println!("{HELP}");
        return Ok(());
    }

    let db = InboxDb::connect(&config.database_url, config.db_max_connections).await?;
    match command {
        CliCommand::Help => Ok(()),
        CliCommand::Migrate => migrate_command(&db).await,
        CliCommand::Worker => worker_command(db, config, shutdown).await,
        CliCommand::Reconcile => reconcile_command(&db, config).await,
        CliCommand::Provision {
            agent_id,
            workspace,
            name,
        } => provision_command(&db, &agent_id, &workspace, name).await,
        CliCommand::Pause { agent_id } => {
            set_status_command(&db, "pause", &agent_id, AgentStatus::Paused).await
        }
        CliCommand::Resume { agent_id } => {
            set_status_command(&db, "resume", &agent_id, AgentStatus::Active).await
        }
        CliCommand::Enqueue {
            agent_id,
            message,
            priority,
            source,
        } => {
            let item = NewWorkItem::new(
                AgentId::new(agent_id),
                WorkItemKind::merchant_message(message),
            );
            enqueue_command(&db, "enqueue", with_options(item, priority, source)).await
        }
        CliCommand::Tick {
            agent_id,
            reason,
            priority,
        } => {
            let item = NewWorkItem::new(
                AgentId::new(agent_id),
                WorkItemKind::ScheduledTick(ScheduledTick { reason }),
            );
            enqueue_command(&db, "tick", with_options(item, priority, None)).await
        }
        CliCommand::Event {
            agent_id,
            event_type,
            data,
            priority,
        } => {
            let data = data
                .map(|raw| serde_json::from_str::<Value>(&raw))
                .transpose()?
                .unwrap_or_else(|| json!({}));
            let item = NewWorkItem::new(
                AgentId::new(agent_id),
                WorkItemKind::PlatformEvent(PlatformEvent { event_type, data }),
            );
            enqueue_command(&db, "event", with_options(item, priority, None)).await
        }
        CliCommand::Status { agent_id } => status_command(&db, &AgentId::new(agent_id)).await,
        CliCommand::Events {
            agent_id,
            limit,
            before,
        } => events_command(&db, &AgentId::new(agent_id), limit, before).await,
        CliCommand::Watch {
            agent_id,
            interval_ms,
        } => {
            let interval = Duration::from_millis(interval_ms.unwrap_or(DEFAULT_WATCH_INTERVAL_MS).max(1));
            watch_command(&db, &AgentId::new(agent_id), interval, shutdown).await
        }
    }
}

fn with_options(item: NewWorkItem, priority: Option<i32>, source: Option<String>) -> NewWorkItem {
    let item = item.with_priority(priority.unwrap_or_default());
    match source {
        Some(source) => item.with_source(source),
        None => item,
    }
}

async fn migrate_command(db: &InboxDb) -> Result<()> {
    db.initialize_schema().await?;
    emit_output("migrate", json!({"message": "Schema applied"}));
    Ok(())
}

async fn worker_command(
    db: InboxDb,
    config: &WorkerConfig,
    shutdown: &CancellationToken,
) -> Result<()> {
    let supervisor = ProcessSupervisor::new(config.supervisor());
    let scope = config.reconcile_scope();
    info!(
        executable = %config.executable,
        worker_id = %scope.worker_id,
        "Starting worker"
    );
    let service = OrchestratorService::new(
        WorkerPorts::new(db, supervisor, scope),
        config.orchestrator(),
    );
    service.run(shutdown).await?;
    emit_output("worker", json!({"message": "Worker stopped"}));
    Ok(())
}

/// Without a configured `worker_id` only runs whose heartbeat went stale are
/// touched.
async fn reconcile_command(db: &InboxDb, config: &WorkerConfig) -> Result<()> {
    let report = db.reconcile_stalled_runs(&config.reconcile_scope()).await?;
    emit_output("reconcile", serde_json::to_value(report)?);
    Ok(())
}

async fn provision_command(
    db: &InboxDb,
    agent_id: &str,
    workspace: &Path,
    name: Option<String>,
) -> Result<()> {
    let name = name.unwrap_or_else(|| agent_id.to_string());
    let (agent, session) = db
        .provision_agent(&AgentId::new(agent_id), &name, workspace)
        .await?;
    emit_output("provision", json!({"agent": agent, "session": session}));
    Ok(())
}

async fn set_status_command(
    db: &InboxDb,
    command: &str,
    agent_id: &str,
    status: AgentStatus,
) -> Result<()> {
    let agent_id = AgentId::new(agent_id);
    if !db.set_agent_status(&agent_id, status).await? {
        return Err(InboxError::AgentError(format!("Agent not found: {agent_id}")));
    }
    emit_output(
        command,
        json!({"agent_id": agent_id, "status": status.as_str()}),
    );
    Ok(())
}

async fn enqueue_command(db: &InboxDb, command: &str, item: NewWorkItem) -> Result<()> {
    let item_id = db.enqueue(&item).await?;
    emit_output(
        command,
        json!({"item_id": item_id, "agent_id": item.agent_id, "kind": item.kind.kind_str()}),
    );
    Ok(())
}

async fn status_command(db: &InboxDb, agent_id: &AgentId) -> Result<()> {
    let agent = db
        .get_agent(agent_id)
        .await?
        .ok_or_else(|| InboxError::AgentError(format!("Agent not found: {agent_id}")))?;
    let since = Utc::now() - TimeDelta::hours(24);
    let stats = db.message_stats(agent_id, since).await?;
    let pending = db.pending_count(agent_id).await?;
    let runs = db.recent_runs(agent_id, RECENT_RUNS).await?;

    emit_output(
        "status",
        json!({
            "agent": agent,
            "last_24h": stats,
            "pending": pending,
            "recent_runs": runs,
        }),
    );
    Ok(())
}

async fn events_command(
    db: &InboxDb,
    agent_id: &AgentId,
    limit: Option<u32>,
    before: Option<i64>,
) -> Result<()> {
    let events = db
        .list_events(agent_id, before, limit.unwrap_or(DEFAULT_EVENT_PAGE))
        .await?;
    let next_before = events.last().map(|event| event.id);
    emit_output(
        "events",
        json!({"events": events, "next_before": next_before}),
    );
    Ok(())
}

/// Prints events newer than the latest one at start, one line each, until
/// `shutdown` fires.
async fn watch_command(
    db: &InboxDb,
    agent_id: &AgentId,
    interval: Duration,
    shutdown: &CancellationToken,
) -> Result<()> {
    let mut last_seen = db
        .list_events(agent_id, None, 1)
        .await?
        .first()
        .map_or(0, |event| event.id);
    info!(agent_id = %agent_id, last_seen, "Watching agent events");

    loop {
        tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            () = tokio::time::sleep(interval) => {}
        }

        let events = db.events_after(agent_id, last_seen, MAX_EVENT_PAGE).await?;
        for event in events {
            last_seen = last_seen.max(event.id);
            emit_output("watch", serde_json::to_value(&event)?);
        }
    }
}
