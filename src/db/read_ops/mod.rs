mod agent_queries;
mod event_queries;
mod inbox_queries;
mod run_queries;
mod types;

pub(crate) use types::*;

pub use event_queries::MAX_EVENT_PAGE;
