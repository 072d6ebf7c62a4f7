use crate::db::{InboxDb, SCHEMA_SQL};
use crate::error::{InboxError, Result};
use tracing::info;

impl InboxDb {
    /// Applies the embedded schema. Safe to run repeatedly.
    ///
    /// # Errors
    /// Returns an error if any statement fails.
    pub async fn initialize_schema(&self) -> Result<()> {
        self.initialize_schema_from_sql(SCHEMA_SQL).await
    }

    /// # Errors
    /// Returns an error if any statement fails.
    pub async fn initialize_schema_from_sql(&self, schema_sql: &str) -> Result<()> {
        sqlx::raw_sql(schema_sql)
            .execute(self.pool())
            .await
            .map(|_result| info!("Inbox schema is up to date"))
            .map_err(|e| InboxError::DatabaseError(format!("Failed to initialize schema: {e}")))
    }
}
