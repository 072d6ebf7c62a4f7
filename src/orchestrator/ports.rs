use crate::supervisor::{ExecutionOutcome, ExecutionRequest, SupervisorHooks};
use crate::types::{
    AgentId, AgentRecord, ClaimedItem, ItemDisposition, NewAgentEvent, NewRun, ReconcileReport,
    RunCompletion, RunFailure, RunId, Session, WorkItemId,
};
use crate::Result;
use std::future::Future;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

pub type PortFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Work item store as seen by the loop.
pub trait InboxRepository {
    fn claim_next_item(&self) -> PortFuture<'_, Option<ClaimedItem>>;

    /// Terminal failure of a claimed item that never got a run.
    fn reject_item<'a>(&'a self, item_id: &'a WorkItemId, reason: &'a str) -> PortFuture<'a, ()>;

    /// Hands a claimed item back to the queue untouched.
    fn release_item<'a>(&'a self, item_id: &'a WorkItemId, reason: &'a str)
        -> PortFuture<'a, ()>;
}

pub trait RunLedger {
    fn reconcile_stalled_runs(&self) -> PortFuture<'_, ReconcileReport>;

    fn start_run<'a>(&'a self, run: &'a NewRun) -> PortFuture<'a, ()>;

    fn mark_run_running<'a>(&'a self, run_id: &'a RunId, pid: u32) -> PortFuture<'a, ()>;

    /// `false` once the run is no longer in flight.
    fn heartbeat_run<'a>(&'a self, run_id: &'a RunId) -> PortFuture<'a, bool>;

    fn complete_run<'a>(&'a self, completion: &'a RunCompletion) -> PortFuture<'a, ()>;

    fn fail_run<'a>(
        &'a self,
        failure: &'a RunFailure,
        disposition: &'a ItemDisposition,
    ) -> PortFuture<'a, ()>;
}

pub trait AgentDirectory {
    fn get_agent<'a>(&'a self, agent_id: &'a AgentId) -> PortFuture<'a, Option<AgentRecord>>;

    fn get_session<'a>(&'a self, agent_id: &'a AgentId) -> PortFuture<'a, Option<Session>>;
}

pub trait EventSink {
    fn append_event(&self, event: NewAgentEvent) -> PortFuture<'_, ()>;
}

pub trait AgentExecutor {
    fn execute<'a>(
        &'a self,
        request: &'a ExecutionRequest,
        hooks: &'a dyn SupervisorHooks,
        cancel: &'a CancellationToken,
    ) -> PortFuture<'a, ExecutionOutcome>;
}

pub trait OrchestratorPorts:
    InboxRepository + RunLedger + AgentDirectory + EventSink + AgentExecutor
{
}

impl<T> OrchestratorPorts for T where
    T: InboxRepository + RunLedger + AgentDirectory + EventSink + AgentExecutor
{
}
