use super::dialect::SqlDialect;
use super::statements::{LEASE_TABLE, TRANSFER_PROCESS_TABLE};
use crate::error::Result;
use sqlx::AnyPool;
use tracing::debug;

/// Idempotent DDL for both tables.
pub fn schema_statements(dialect: &dyn SqlDialect) -> Vec<String> {
    let key = dialect.key_type();
    let big = dialect.bigint_type();
    let text = dialect.text_type();

    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {TRANSFER_PROCESS_TABLE} (\
             id {key} PRIMARY KEY, \
             process_type {key} NOT NULL, \
             state {big} NOT NULL, \
             state_count {big} NOT NULL, \
             state_timestamp {big} NOT NULL, \
             created_at {big} NOT NULL, \
             updated_at {big} NOT NULL, \
             correlation_id {key}, \
             trace_context {text} NOT NULL, \
             error_detail {text}, \
             payload {text} NOT NULL, \
             version {big} NOT NULL)"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {TRANSFER_PROCESS_TABLE}_state_idx \
             ON {TRANSFER_PROCESS_TABLE} (state, state_timestamp)"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {TRANSFER_PROCESS_TABLE}_correlation_idx \
             ON {TRANSFER_PROCESS_TABLE} (correlation_id)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {LEASE_TABLE} (\
             entity_id {key} PRIMARY KEY, \
             lease_id {key} NOT NULL, \
             leased_by {key} NOT NULL, \
             leased_at {big} NOT NULL, \
             lease_duration {big} NOT NULL)"
        ),
    ]
}

/// Creates the tables if they do not exist yet.
pub async fn create_schema(pool: &AnyPool, dialect: &dyn SqlDialect) -> Result<()> {
    for statement in schema_statements(dialect) {
        sqlx::query(&statement).execute(pool).await?;
    }
    debug!(dialect = dialect.name(), "Schema ready");
    Ok(())
}
