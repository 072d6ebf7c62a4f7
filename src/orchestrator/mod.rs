#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! The polling loop: claim one item, dispatch it to the executor, record the
//! outcome, apply retry policy. All shared state lives behind the ports.

mod db_ports;
mod ports;
mod retry;
mod service;


pub use db_ports::WorkerPorts;
pub use ports::{
    AgentDirectory, AgentExecutor, EventSink, InboxRepository, OrchestratorPorts, PortFuture,
    RunLedger,
};
pub use retry::{RetryPolicy, DEFAULT_MAX_RETRIES};
pub use service::{
    OrchestratorConfig, OrchestratorService, TickOutcome, AGENT_NOT_ACTIVE, AGENT_NOT_FOUND,
    DEFAULT_AGENT_CHECK_INTERVAL, DEFAULT_ERROR_BACKOFF_MULTIPLIER, DEFAULT_FINALIZE_ATTEMPTS,
    DEFAULT_FINALIZE_BACKOFF, DEFAULT_POLL_INTERVAL, DEFAULT_RECONCILE_INTERVAL, RUN_LOST_REASON,
    SESSION_NOT_FOUND, SHUTDOWN_REASON,
};
