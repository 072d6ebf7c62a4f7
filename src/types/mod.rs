mod agent_types;
mod event;
mod identifiers;
mod run;
mod stats;
mod work_item;

pub use agent_types::{AgentRecord, AgentStatus, Session};
pub use event::{AgentEvent, AgentEventType, NewAgentEvent};
pub use identifiers::{AgentId, RunId, SessionId, WorkItemId, WorkerId};
pub use run::{
    ItemDisposition, NewRun, ReconcileScope, Run, RunCompletion, RunFailure, RunStatus,
    DEFAULT_RUN_STALE_AFTER,
};
pub use stats::{MessageStats, ReconcileReport};
pub use work_item::{
    ClaimedItem, MerchantMessage, NewWorkItem, PlatformEvent, ScheduledTick, WorkItem,
    WorkItemKind, WorkItemStatus,
};
