#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::supervisor::SupervisorError;
use thiserror::Error;

/// Error code constants for type-safe error handling
pub mod code {
    pub const CLI_ERROR: &str = "CLI_ERROR";
    pub const NOTFOUND: &str = "NOTFOUND";
    pub const INVALID: &str = "INVALID";
    pub const CONFLICT: &str = "CONFLICT";
    pub const DEPENDENCY: &str = "DEPENDENCY";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const INTERNAL: &str = "INTERNAL";
}

#[derive(Error, Debug)]
pub enum InboxError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Agent error: {0}")]
    AgentError(String),

    #[error("Work item error: {0}")]
    WorkItemError(String),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl InboxError {
    /// Returns the protocol error code for this error
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) | Self::SerializationError(_) | Self::WorkItemError(_) => {
                code::INVALID
            }
            Self::DatabaseError(_) | Self::SqlxError(_) | Self::Internal(_) => code::INTERNAL,
            Self::AgentError(_) => code::CONFLICT,
            Self::Supervisor(SupervisorError::TimedOut { .. }) => code::TIMEOUT,
            Self::Supervisor(SupervisorError::ExecutableNotFound { .. }) | Self::IoError(_) => {
                code::DEPENDENCY
            }
            Self::Supervisor(_) => code::INTERNAL,
        }
    }

    /// Returns the exit code for this error
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigError(_) => 2,
            Self::DatabaseError(_) | Self::SqlxError(_) => 3,
            Self::AgentError(_) => 4,
            Self::WorkItemError(_) => 5,
            Self::Supervisor(_) => 6,
            Self::IoError(_) => 7,
            Self::SerializationError(_) => 8,
            Self::Internal(_) => 9,
        }
    }

    /// Whether a run that ended with this error may be attempted again.
    ///
    /// Anything that is not a classified, structural supervisor failure is
    /// treated as transient: store hiccups while streaming events, reader task
    /// failures and the like.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Supervisor(error) => error.is_retryable(),
            Self::ConfigError(_) => false,
            _ => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, InboxError>;
