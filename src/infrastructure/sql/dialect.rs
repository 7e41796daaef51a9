use crate::error::{Result, StoreError};
use std::fmt;
use std::sync::Arc;

/// Per-database SQL differences.
///
/// The store and lease manager never branch on the database; every
/// dialect-specific fragment comes from here.
pub trait SqlDialect: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Positional parameter marker, `index` starting at 1.
    fn placeholder(&self, index: usize) -> String;

    fn bigint_type(&self) -> &'static str {
        "BIGINT"
    }

    fn text_type(&self) -> &'static str {
        "TEXT"
    }

    /// Column type used for identifiers and primary keys.
    fn key_type(&self) -> &'static str {
        "VARCHAR(255)"
    }

    /// Statement opening a transaction that will write. It must take the
    /// write lock up front so a read-then-write transaction cannot fail its
    /// first write on a lock held by another connection.
    fn begin_write(&self) -> &'static str {
        "BEGIN"
    }

    /// Suffix locking the rows a SELECT returns until the transaction ends,
    /// so a lease checked inside a transaction cannot be reclaimed before
    /// it commits.
    fn share_lock(&self) -> &'static str {
        ""
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("?{}", index)
    }

    // A deferred transaction upgrades to a write lock on its first write and
    // fails with SQLITE_BUSY if another connection got there first.
    fn begin_write(&self) -> &'static str {
        "BEGIN IMMEDIATE"
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn share_lock(&self) -> &'static str {
        " FOR SHARE"
    }
}

/// Picks the dialect matching the scheme of a connection URL.
pub fn dialect_for_url(url: &str) -> Result<Arc<dyn SqlDialect>> {
    let scheme = url.split(':').next().unwrap_or_default();
    match scheme {
        "sqlite" => Ok(Arc::new(SqliteDialect)),
        "postgres" | "postgresql" => Ok(Arc::new(PostgresDialect)),
        other => Err(StoreError::Configuration(format!(
            "Unsupported database URL scheme '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(SqliteDialect.placeholder(3), "?3");
        assert_eq!(PostgresDialect.placeholder(3), "$3");
    }

    #[test]
    fn test_sqlite_takes_the_write_lock_up_front() {
        assert_eq!(SqliteDialect.begin_write(), "BEGIN IMMEDIATE");
        assert_eq!(SqliteDialect.share_lock(), "");
        assert_eq!(PostgresDialect.begin_write(), "BEGIN");
        assert_eq!(PostgresDialect.share_lock(), " FOR SHARE");
    }

    #[test]
    fn test_dialect_for_url() {
        assert_eq!(
            dialect_for_url("sqlite://store.db?mode=rwc").unwrap().name(),
            "sqlite"
        );
        assert_eq!(
            dialect_for_url("postgresql://user@localhost/edc")
                .unwrap()
                .name(),
            "postgres"
        );
        assert!(matches!(
            dialect_for_url("mysql://localhost/edc"),
            Err(StoreError::Configuration(_))
        ));
    }
}
