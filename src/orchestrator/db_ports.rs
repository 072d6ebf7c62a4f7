use super::ports::{
    AgentDirectory, AgentExecutor, EventSink, InboxRepository, PortFuture, RunLedger,
};
use crate::db::InboxDb;
use crate::error::InboxError;
use crate::supervisor::{ExecutionOutcome, ExecutionRequest, ProcessSupervisor, SupervisorHooks};
use crate::types::{
    AgentId, AgentRecord, ClaimedItem, ItemDisposition, NewAgentEvent, NewRun, ReconcileReport,
    ReconcileScope, RunCompletion, RunFailure, RunId, Session, WorkItemId,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Production ports: Postgres for state, a real child process for execution.
/// Runs are stamped with `scope.worker_id`; startup reconciliation is limited
/// to `scope`.
#[derive(Clone)]
pub struct WorkerPorts {
    db: InboxDb,
    supervisor: ProcessSupervisor,
    scope: ReconcileScope,
}

impl WorkerPorts {
    #[must_use]
    pub const fn new(db: InboxDb, supervisor: ProcessSupervisor, scope: ReconcileScope) -> Self {
        Self {
            db,
            supervisor,
            scope,
        }
    }
}

impl InboxRepository for WorkerPorts {
    fn claim_next_item(&self) -> PortFuture<'_, Option<ClaimedItem>> {
        Box::pin(self.db.claim_next_item())
    }

    fn reject_item<'a>(&'a self, item_id: &'a WorkItemId, reason: &'a str) -> PortFuture<'a, ()> {
        Box::pin(async move {
            if !self.db.reject_item(item_id, reason).await? {
                debug!(item_id = %item_id, "Rejected item was no longer processing");
            }
            Ok(())
        })
    }

    fn release_item<'a>(
        &'a self,
        item_id: &'a WorkItemId,
        reason: &'a str,
    ) -> PortFuture<'a, ()> {
        Box::pin(async move {
            if !self.db.release_item(item_id, reason).await? {
                debug!(item_id = %item_id, "Released item was no longer processing");
            }
            Ok(())
        })
    }
}

impl RunLedger for WorkerPorts {
    fn reconcile_stalled_runs(&self) -> PortFuture<'_, ReconcileReport> {
        Box::pin(self.db.reconcile_stalled_runs(&self.scope))
    }

    fn start_run<'a>(&'a self, run: &'a NewRun) -> PortFuture<'a, ()> {
        Box::pin(async move {
            self.db
                .start_run(run, &self.scope.worker_id)
                .await
                .map(|_run_id| ())
        })
    }

    fn mark_run_running<'a>(&'a self, run_id: &'a RunId, pid: u32) -> PortFuture<'a, ()> {
        Box::pin(async move {
            if !self.db.mark_run_running(run_id, pid).await? {
                debug!(run_id = %run_id, pid, "Run left starting before its pid was recorded");
            }
            Ok(())
        })
    }

    fn heartbeat_run<'a>(&'a self, run_id: &'a RunId) -> PortFuture<'a, bool> {
        Box::pin(self.db.heartbeat_run(run_id))
    }

    fn complete_run<'a>(&'a self, completion: &'a RunCompletion) -> PortFuture<'a, ()> {
        Box::pin(self.db.complete_run(completion))
    }

    fn fail_run<'a>(
        &'a self,
        failure: &'a RunFailure,
        disposition: &'a ItemDisposition,
    ) -> PortFuture<'a, ()> {
        Box::pin(self.db.fail_run(failure, disposition))
    }
}

impl AgentDirectory for WorkerPorts {
    fn get_agent<'a>(&'a self, agent_id: &'a AgentId) -> PortFuture<'a, Option<AgentRecord>> {
        Box::pin(self.db.get_agent(agent_id))
    }

    fn get_session<'a>(&'a self, agent_id: &'a AgentId) -> PortFuture<'a, Option<Session>> {
        Box::pin(self.db.get_session(agent_id))
    }
}

impl EventSink for WorkerPorts {
    fn append_event(&self, event: NewAgentEvent) -> PortFuture<'_, ()> {
        Box::pin(async move { self.db.append_event(&event).await.map(|_id| ()) })
    }
}

impl AgentExecutor for WorkerPorts {
    fn execute<'a>(
        &'a self,
        request: &'a ExecutionRequest,
        hooks: &'a dyn SupervisorHooks,
        cancel: &'a CancellationToken,
    ) -> PortFuture<'a, ExecutionOutcome> {
        Box::pin(async move {
            self.supervisor
                .execute(request, hooks, cancel)
                .await
                .map_err(InboxError::from)
        })
    }
}
