use super::ports::OrchestratorPorts;
use super::retry::RetryPolicy;
use crate::error::{InboxError, Result};
use crate::supervisor::{
    ExecutionOutcome, ExecutionRequest, HookFuture, StreamRecord, SupervisorError,
    SupervisorHooks,
};
use crate::types::{
    AgentId, AgentRecord, ClaimedItem, ItemDisposition, NewAgentEvent, NewRun, ReconcileReport,
    RunCompletion, RunFailure, RunId, Session, WorkItem, WorkItemId,
};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_ERROR_BACKOFF_MULTIPLIER: u32 = 5;
pub const DEFAULT_AGENT_CHECK_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_FINALIZE_ATTEMPTS: u32 = 5;
pub const DEFAULT_FINALIZE_BACKOFF: Duration = Duration::from_millis(250);
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

pub const AGENT_NOT_FOUND: &str = "Agent not found";
pub const AGENT_NOT_ACTIVE: &str = "Agent not active";
pub const SESSION_NOT_FOUND: &str = "Session not found";
pub const SHUTDOWN_REASON: &str = "Worker shutting down";
pub const RUN_LOST_REASON: &str = "Run reconciled by another worker";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub poll_interval: Duration,
    pub error_backoff_multiplier: u32,
    pub retry: RetryPolicy,
    /// How often a running item's agent is re-read to notice a pause. Also
    /// the run heartbeat period.
    pub agent_check_interval: Duration,
    /// Tries for each write that settles an item, before it is deferred to
    /// the next iteration.
    pub finalize_attempts: u32,
    /// Delay before the first retry of a settling write; doubles per retry.
    pub finalize_backoff: Duration,
    /// Period of the reconciliation pass that picks up runs of peers that
    /// died after this worker started.
    pub reconcile_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            error_backoff_multiplier: DEFAULT_ERROR_BACKOFF_MULTIPLIER,
            retry: RetryPolicy::default(),
            agent_check_interval: DEFAULT_AGENT_CHECK_INTERVAL,
            finalize_attempts: DEFAULT_FINALIZE_ATTEMPTS,
            finalize_backoff: DEFAULT_FINALIZE_BACKOFF,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
        }
    }
}

impl OrchestratorConfig {
    #[must_use]
    pub const fn error_backoff(&self) -> Duration {
        self.poll_interval.saturating_mul(self.error_backoff_multiplier)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    Rejected {
        item_id: WorkItemId,
        reason: String,
    },
    Completed {
        item_id: WorkItemId,
        run_id: RunId,
    },
    RunFailed {
        item_id: WorkItemId,
        run_id: RunId,
        disposition: ItemDisposition,
    },
}

impl TickOutcome {
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// A store write that takes a claimed item out of `processing`. Kept until
/// it succeeds: an unsettled item blocks its agent's queue.
#[derive(Debug, Clone)]
enum Finalization {
    Reject {
        item_id: WorkItemId,
        reason: String,
    },
    Release {
        item_id: WorkItemId,
        reason: String,
    },
    Complete(RunCompletion),
    Fail {
        failure: RunFailure,
        disposition: ItemDisposition,
    },
}

impl Finalization {
    const fn item_id(&self) -> &WorkItemId {
        match self {
            Self::Reject { item_id, .. } | Self::Release { item_id, .. } => item_id,
            Self::Complete(completion) => &completion.item_id,
            Self::Fail { failure, .. } => &failure.item_id,
        }
    }

    const fn action(&self) -> &'static str {
        match self {
            Self::Reject { .. } => "reject",
            Self::Release { .. } => "release",
            Self::Complete(_) => "complete",
            Self::Fail { .. } => "fail",
        }
    }
}

/// Why the loop cancelled a run it was watching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interruption {
    AgentDeactivated,
    RunLost,
}

enum Dispatch {
    Ready {
        agent: AgentRecord,
        session: Session,
    },
    Reject(&'static str),
}

pub struct OrchestratorService<P> {
    ports: P,
    config: OrchestratorConfig,
    deferred: Mutex<Vec<Finalization>>,
}

impl<P> OrchestratorService<P>
where
    P: OrchestratorPorts + Send + Sync,
{
    #[must_use]
    pub fn new(ports: P, config: OrchestratorConfig) -> Self {
        Self {
            ports,
            config,
            deferred: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Fails runs abandoned by a crashed worker. Called before polling and
    /// then every `reconcile_interval`.
    ///
    /// # Errors
    /// Returns any store failure.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let report = self.ports.reconcile_stalled_runs().await?;
        if report.is_noop() {
            debug!("No stalled runs to reconcile");
        } else {
            warn!(
                runs_failed = report.runs_failed,
                items_requeued = report.items_requeued,
                "Reconciled runs left by a crashed worker"
            );
        }
        Ok(report)
    }

    /// Reconciles, then polls until `shutdown` fires, reconciling again every
    /// `reconcile_interval`. A failing iteration is logged and followed by
    /// the longer error backoff.
    ///
    /// # Errors
    /// Returns an error only if the startup reconciliation fails.
    pub async fn run(&self, shutdown: &CancellationToken) -> Result<()> {
        self.reconcile().await?;
        let mut next_reconcile = Instant::now() + self.config.reconcile_interval;
        info!(
            poll_ms = u64::try_from(self.config.poll_interval.as_millis()).unwrap_or(u64::MAX),
            max_retries = self.config.retry.max_retries,
            "Orchestrator loop started"
        );

        while !shutdown.is_cancelled() {
            // Our own run is still in flight while its settling write is deferred.
            if Instant::now() >= next_reconcile && self.deferred.lock().await.is_empty() {
                if let Err(error) = self.reconcile().await {
                    error!(error = %error, "Periodic reconciliation failed");
                }
                next_reconcile = Instant::now() + self.config.reconcile_interval;
            }

            let pause = match self.tick(shutdown).await {
                Ok(outcome) if outcome.is_idle() => self.config.poll_interval,
                Ok(_) => Duration::ZERO,
                Err(error) => {
                    error!(error = %error, "Orchestrator iteration failed");
                    self.config.error_backoff()
                }
            };

            if !pause.is_zero() {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(pause) => {}
                }
            }
        }

        info!("Orchestrator loop stopped");
        Ok(())
    }

    /// Claims and fully processes at most one work item. Settling writes
    /// deferred by an earlier iteration are replayed first; nothing new is
    /// claimed until they succeed.
    ///
    /// # Errors
    /// Returns store failures. An item claimed before the failure is released
    /// back to the queue when no run was created for it.
    pub async fn tick(&self, shutdown: &CancellationToken) -> Result<TickOutcome> {
        self.replay_deferred().await?;

        let Some(claimed) = self.ports.claim_next_item().await? else {
            return Ok(TickOutcome::Idle);
        };

        let item = match claimed {
            ClaimedItem::Ready(item) => item,
            ClaimedItem::Malformed {
                id,
                agent_id,
                reason,
            } => {
                warn!(item_id = %id, agent_id = %agent_id, reason = %reason, "Rejecting undecodable work item");
                self.settle(Finalization::Reject {
                    item_id: id.clone(),
                    reason: reason.clone(),
                })
                .await?;
                return Ok(TickOutcome::Rejected {
                    item_id: id,
                    reason,
                });
            }
        };

        let (agent, session) = match self.resolve_dispatch(&item).await {
            Ok(Dispatch::Ready { agent, session }) => (agent, session),
            Ok(Dispatch::Reject(reason)) => {
                warn!(item_id = %item.id, agent_id = %item.agent_id, reason, "Rejecting work item");
                self.settle(Finalization::Reject {
                    item_id: item.id.clone(),
                    reason: reason.to_string(),
                })
                .await?;
                return Ok(TickOutcome::Rejected {
                    item_id: item.id,
                    reason: reason.to_string(),
                });
            }
            Err(error) => return Err(self.release_after(&item.id, error).await),
        };

        let run = NewRun {
            id: RunId::generate(),
            agent_id: item.agent_id.clone(),
            session_id: session.session_id.clone(),
            inbox_id: Some(item.id.clone()),
        };
        if let Err(error) = self.ports.start_run(&run).await {
            return Err(self.release_after(&item.id, error).await);
        }
        info!(
            run_id = %run.id,
            item_id = %item.id,
            agent_id = %item.agent_id,
            kind = item.kind.kind_str(),
            attempt = item.attempt_count,
            "Dispatching work item"
        );

        let request = ExecutionRequest {
            run_id: run.id.clone(),
            agent_id: item.agent_id.clone(),
            workspace: agent.workspace_path,
            session_id: session.session_id,
            message: item.kind.prompt_text(),
        };
        let (result, interruption) = self.execute_watching_agent(&request, shutdown).await;

        self.finish(&item, run.id, result, interruption, shutdown)
            .await
    }

    async fn resolve_dispatch(&self, item: &WorkItem) -> Result<Dispatch> {
        let Some(agent) = self.ports.get_agent(&item.agent_id).await? else {
            return Ok(Dispatch::Reject(AGENT_NOT_FOUND));
        };
        if !agent.status.is_active() {
            return Ok(Dispatch::Reject(AGENT_NOT_ACTIVE));
        }
        let Some(session) = self.ports.get_session(&item.agent_id).await? else {
            return Ok(Dispatch::Reject(SESSION_NOT_FOUND));
        };
        Ok(Dispatch::Ready { agent, session })
    }

    async fn release_after(&self, item_id: &WorkItemId, error: InboxError) -> InboxError {
        let release = Finalization::Release {
            item_id: item_id.clone(),
            reason: error.to_string(),
        };
        if self.settle(release).await.is_ok() {
            warn!(item_id = %item_id, error = %error, "Released work item after dispatch error");
        }
        error
    }

    /// Applies `finalization`, retrying with doubling delays. After
    /// `finalize_attempts` failures it is deferred to the next iteration.
    async fn settle(&self, finalization: Finalization) -> Result<()> {
        let attempts = self.config.finalize_attempts.max(1);
        let mut delay = self.config.finalize_backoff;
        let mut attempt = 1;
        loop {
            match self.apply(&finalization).await {
                Ok(()) => return Ok(()),
                Err(error) if attempt < attempts => {
                    warn!(
                        item_id = %finalization.item_id(),
                        action = finalization.action(),
                        attempt,
                        error = %error,
                        "Settling work item failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(error) => {
                    error!(
                        item_id = %finalization.item_id(),
                        action = finalization.action(),
                        error = %error,
                        "Settling work item failed; deferring to the next iteration"
                    );
                    self.deferred.lock().await.push(finalization);
                    return Err(error);
                }
            }
        }
    }

    async fn replay_deferred(&self) -> Result<()> {
        let mut deferred = self.deferred.lock().await;
        while let Some(finalization) = deferred.first() {
            self.apply(finalization).await?;
            info!(
                item_id = %finalization.item_id(),
                action = finalization.action(),
                "Settled deferred work item"
            );
            deferred.remove(0);
        }
        Ok(())
    }

    async fn apply(&self, finalization: &Finalization) -> Result<()> {
        match finalization {
            Finalization::Reject { item_id, reason } => {
                self.ports.reject_item(item_id, reason).await
            }
            Finalization::Release { item_id, reason } => {
                self.ports.release_item(item_id, reason).await
            }
            Finalization::Complete(completion) => self.ports.complete_run(completion).await,
            Finalization::Fail {
                failure,
                disposition,
            } => self.ports.fail_run(failure, disposition).await,
        }
    }

    /// Runs the executor while heartbeating the run and re-reading the agent
    /// every `agent_check_interval`. A run that is no longer in flight or an
    /// agent that stops being active cancels the child.
    async fn execute_watching_agent(
        &self,
        request: &ExecutionRequest,
        shutdown: &CancellationToken,
    ) -> (Result<ExecutionOutcome>, Option<Interruption>) {
        let cancel = shutdown.child_token();
        let hooks = RunHooks {
            ports: &self.ports,
            run_id: &request.run_id,
            agent_id: &request.agent_id,
        };
        let mut execution = self.ports.execute(request, &hooks, &cancel);

        let period = self.config.agent_check_interval;
        let mut checks = tokio::time::interval_at(Instant::now() + period, period);
        checks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut interruption = None;

        loop {
            tokio::select! {
                result = &mut execution => return (result, interruption),
                _ = checks.tick(), if interruption.is_none() => {
                    interruption = self.check_in_flight(request).await;
                    if let Some(reason) = interruption {
                        info!(
                            run_id = %request.run_id,
                            agent_id = %request.agent_id,
                            reason = ?reason,
                            "Cancelling run"
                        );
                        cancel.cancel();
                    }
                }
            }
        }
    }

    async fn check_in_flight(&self, request: &ExecutionRequest) -> Option<Interruption> {
        match self.ports.heartbeat_run(&request.run_id).await {
            Ok(true) => {}
            Ok(false) => return Some(Interruption::RunLost),
            Err(error) => {
                warn!(run_id = %request.run_id, error = %error, "Failed to record run heartbeat");
            }
        }
        if self.agent_still_active(&request.agent_id).await {
            None
        } else {
            Some(Interruption::AgentDeactivated)
        }
    }

    async fn agent_still_active(&self, agent_id: &AgentId) -> bool {
        match self.ports.get_agent(agent_id).await {
            Ok(Some(agent)) => agent.status.is_active(),
            Ok(None) => false,
            Err(error) => {
                warn!(agent_id = %agent_id, error = %error, "Failed to re-check agent status");
                true
            }
        }
    }

    async fn finish(
        &self,
        item: &WorkItem,
        run_id: RunId,
        result: Result<ExecutionOutcome>,
        interruption: Option<Interruption>,
        shutdown: &CancellationToken,
    ) -> Result<TickOutcome> {
        let finished_at = Utc::now();

        let error = match result {
            Ok(outcome) => {
                self.settle(Finalization::Complete(RunCompletion {
                    run_id: run_id.clone(),
                    item_id: item.id.clone(),
                    agent_id: item.agent_id.clone(),
                    exit_code: outcome.exit_code,
                    finished_at,
                }))
                .await?;
                info!(
                    run_id = %run_id,
                    item_id = %item.id,
                    records = outcome.records,
                    "Run completed"
                );
                return Ok(TickOutcome::Completed {
                    item_id: item.id.clone(),
                    run_id,
                });
            }
            Err(error) => error,
        };

        let cancelled = matches!(error, InboxError::Supervisor(SupervisorError::Cancelled));
        let (reason, disposition) = if cancelled && interruption == Some(Interruption::RunLost) {
            (RUN_LOST_REASON.to_string(), ItemDisposition::Release)
        } else if cancelled && interruption == Some(Interruption::AgentDeactivated) {
            (AGENT_NOT_ACTIVE.to_string(), ItemDisposition::Fail)
        } else if cancelled && shutdown.is_cancelled() {
            (SHUTDOWN_REASON.to_string(), ItemDisposition::Release)
        } else {
            let disposition = self.config.retry.disposition(
                item.attempt_count,
                error.is_retryable(),
                finished_at,
            );
            (error.to_string(), disposition)
        };

        let (exit_code, signal) = match &error {
            InboxError::Supervisor(supervisor) => (
                supervisor.exit_code(),
                supervisor.signal().map(str::to_string),
            ),
            _ => (None, None),
        };

        let failure = RunFailure {
            run_id: run_id.clone(),
            item_id: item.id.clone(),
            error: reason,
            exit_code,
            signal,
            finished_at,
        };
        self.settle(Finalization::Fail {
            failure: failure.clone(),
            disposition: disposition.clone(),
        })
        .await?;

        match &disposition {
            ItemDisposition::Requeue {
                attempt_count,
                available_at,
            } => warn!(
                run_id = %run_id,
                item_id = %item.id,
                attempt = attempt_count,
                available_at = %available_at,
                error = %failure.error,
                "Run failed; retry scheduled"
            ),
            ItemDisposition::Release => info!(
                run_id = %run_id,
                item_id = %item.id,
                "Run interrupted; work item released"
            ),
            ItemDisposition::Fail => error!(
                run_id = %run_id,
                item_id = %item.id,
                attempt = item.attempt_count,
                error = %failure.error,
                "Run failed; work item failed"
            ),
        }

        Ok(TickOutcome::RunFailed {
            item_id: item.id.clone(),
            run_id,
            disposition,
        })
    }
}

/// Bridges supervisor callbacks to the run ledger and the event sink.
struct RunHooks<'a, P> {
    ports: &'a P,
    run_id: &'a RunId,
    agent_id: &'a AgentId,
}

impl<P> SupervisorHooks for RunHooks<'_, P>
where
    P: OrchestratorPorts + Send + Sync,
{
    fn on_spawned(&self, pid: u32) -> HookFuture<'_> {
        Box::pin(async move {
            if let Err(error) = self.ports.mark_run_running(self.run_id, pid).await {
                warn!(run_id = %self.run_id, pid, error = %error, "Failed to record run pid");
            }
        })
    }

    fn on_record(&self, record: StreamRecord) -> HookFuture<'_> {
        Box::pin(async move {
            let event = NewAgentEvent {
                agent_id: self.agent_id.clone(),
                event_type: record.event_type,
                content: record.content,
                metadata: record.raw,
            };
            if let Err(error) = self.ports.append_event(event).await {
                warn!(run_id = %self.run_id, error = %error, "Failed to store agent event");
            }
        })
    }
}
