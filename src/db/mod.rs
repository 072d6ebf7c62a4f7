#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

mod mappers;
mod read_ops;
mod write_ops;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::error::Result;

pub use read_ops::MAX_EVENT_PAGE;

pub const SCHEMA_SQL: &str = include_str!("../../schema.sql");

pub const DEFAULT_POOL_MAX_CONNECTIONS: u32 = 10;

/// Postgres-backed work item store, run ledger, session registry and event log.
#[derive(Clone)]
pub struct InboxDb {
    pool: PgPool,
}

impl InboxDb {
    /// # Errors
    /// Returns an error if the pool cannot connect.
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::connect(database_url, resolve_pool_max_connections()).await
    }

    /// # Errors
    /// Returns an error if the pool cannot connect.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!(max_connections, "Connected to PostgreSQL inbox database");
        Ok(Self { pool })
    }

    /// Create a new `InboxDb` with an existing pool (for testing).
    #[must_use]
    pub const fn new_with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn resolve_pool_max_connections() -> u32 {
    resolve_pool_max_connections_from(|key| std::env::var(key).ok())
}

pub fn resolve_pool_max_connections_from<F>(env_lookup: F) -> u32
where
    F: Fn(&str) -> Option<String>,
{
    env_lookup("INBOX_DB_MAX_CONNECTIONS")
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_POOL_MAX_CONNECTIONS)
}

#[cfg(test)]
mod tests {
    use super::{resolve_pool_max_connections_from, DEFAULT_POOL_MAX_CONNECTIONS};
    use std::collections::HashMap;

    fn lookup(map: HashMap<String, String>) -> impl Fn(&str) -> Option<String> {
        move |key| map.get(key).cloned()
    }

    #[test]
    fn pool_size_defaults_when_unset_or_invalid() {
        assert_eq!(
            resolve_pool_max_connections_from(lookup(HashMap::new())),
            DEFAULT_POOL_MAX_CONNECTIONS
        );
        assert_eq!(
            resolve_pool_max_connections_from(lookup(HashMap::from([(
                "INBOX_DB_MAX_CONNECTIONS".to_string(),
                "0".to_string(),
            )]))),
            DEFAULT_POOL_MAX_CONNECTIONS
        );
    }

    #[test]
    fn explicit_pool_override_wins() {
        assert_eq!(
            resolve_pool_max_connections_from(lookup(HashMap::from([(
                "INBOX_DB_MAX_CONNECTIONS".to_string(),
                "64".to_string(),
            )]))),
            64
        );
    }

    #[test]
    fn embedded_schema_declares_every_table() {
        for table in [
            "agents",
            "agent_sessions",
            "agent_inbox",
            "agent_runs",
            "agent_events",
        ] {
            assert!(
                super::SCHEMA_SQL.contains(&format!("CREATE TABLE IF NOT EXISTS {table} ")),
                "missing table {table}"
            );
        }
    }
}
