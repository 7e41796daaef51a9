//! SQL-backed lease manager and transfer process store.
//!
//! Both adapters run on a `sqlx` `Any` pool so the same code serves every
//! database; the per-database SQL comes from a [`dialect::SqlDialect`].

pub mod dialect;
pub mod lease;
pub mod schema;
pub mod statements;
pub mod store;

use crate::error::{Result, StoreError};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{Any, AnyPool, Row, Transaction};

/// Opens a pool for `database_url`. Pool sizing and credentials are the
/// caller's business; the store only ever borrows connections from it.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<AnyPool> {
    if cfg!(not(feature = "storage-postgres")) && database_url.starts_with("postgres") {
        return Err(StoreError::Configuration(
            "PostgreSQL support requires the 'storage-postgres' feature".to_string(),
        ));
    }

    sqlx::any::install_default_drivers();
    let pool = AnyPoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Opens a transaction with the dialect's write-transaction statement.
/// Dropping it uncommitted rolls it back.
pub(crate) async fn begin_write(
    pool: &AnyPool,
    statement: &'static str,
) -> Result<Transaction<'static, Any>> {
    Ok(pool.begin_with(statement).await?)
}

pub(crate) fn column<T>(row: &AnyRow, name: &str) -> Result<T>
where
    T: for<'r> sqlx::Decode<'r, Any> + sqlx::Type<Any>,
{
    row.try_get(name)
        .map_err(|e| StoreError::InvalidData(format!("Column {}: {}", name, e)))
}
