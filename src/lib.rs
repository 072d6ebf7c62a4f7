pub mod cli;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod supervisor;
pub mod types;

pub use config::WorkerConfig;
pub use db::InboxDb;
pub use error::{InboxError, Result};
pub use orchestrator::{OrchestratorService, WorkerPorts};
pub use supervisor::ProcessSupervisor;
pub use types::*;
