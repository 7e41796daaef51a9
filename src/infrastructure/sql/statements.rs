//! SQL text for the transfer process and lease tables, rendered once per
//! dialect at construction time.

use super::dialect::SqlDialect;
use crate::domain::query::{QuerySpec, SortField, SortOrder};
use sqlx::Any;
use sqlx::any::AnyArguments;
use sqlx::query::Query;

pub const TRANSFER_PROCESS_TABLE: &str = "transfer_process";
pub const LEASE_TABLE: &str = "lease";

pub const PROCESS_COLUMNS: &str = "id, process_type, state, state_count, state_timestamp, \
     created_at, updated_at, correlation_id, trace_context, error_detail, payload, version";

pub const LEASE_COLUMNS: &str = "entity_id, lease_id, leased_by, leased_at, lease_duration";

/// A value bound to a positional parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int(i64),
    Text(String),
    NullableText(Option<String>),
}

pub fn bind_values<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    values: Vec<SqlValue>,
) -> Query<'q, Any, AnyArguments<'q>> {
    for value in values {
        query = match value {
            SqlValue::Int(v) => query.bind(v),
            SqlValue::Text(v) => query.bind(v),
            SqlValue::NullableText(v) => query.bind(v),
        };
    }
    query
}

/// Numbers placeholders in the order values are pushed.
struct Params<'d> {
    dialect: &'d dyn SqlDialect,
    values: Vec<SqlValue>,
}

impl<'d> Params<'d> {
    fn new(dialect: &'d dyn SqlDialect) -> Self {
        Self {
            dialect,
            values: Vec::new(),
        }
    }

    fn push(&mut self, value: SqlValue) -> String {
        self.values.push(value);
        self.dialect.placeholder(self.values.len())
    }
}

fn placeholders(dialect: &dyn SqlDialect, count: usize) -> String {
    (1..=count)
        .map(|i| dialect.placeholder(i))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone)]
pub struct TransferProcessStatements {
    pub insert: String,
    pub select_by_id: String,
    pub select_by_correlation_id: String,
    pub update: String,
    pub delete: String,
    pub select_not_leased: String,
}

impl TransferProcessStatements {
    pub fn new(dialect: &dyn SqlDialect) -> Self {
        let p = |i| dialect.placeholder(i);

        Self {
            insert: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                TRANSFER_PROCESS_TABLE,
                PROCESS_COLUMNS,
                placeholders(dialect, 12)
            ),
            select_by_id: format!(
                "SELECT {} FROM {} WHERE id = {}",
                PROCESS_COLUMNS,
                TRANSFER_PROCESS_TABLE,
                p(1)
            ),
            select_by_correlation_id: format!(
                "SELECT {} FROM {} WHERE correlation_id = {} ORDER BY created_at ASC, id ASC LIMIT 1",
                PROCESS_COLUMNS,
                TRANSFER_PROCESS_TABLE,
                p(1)
            ),
            // Parameter 3 is both the new updated_at and the instant the
            // lease must still be live at.
            update: format!(
                "UPDATE {} SET state = {}, state_count = state_count + 1, state_timestamp = {}, \
                 updated_at = {}, correlation_id = {}, trace_context = {}, error_detail = {}, \
                 payload = {}, version = version + 1 WHERE id = {} AND state_count = {} \
                 AND EXISTS (SELECT 1 FROM {} l WHERE l.entity_id = {} AND l.lease_id = {} \
                 AND l.leased_by = {} AND l.leased_at + l.lease_duration > {})",
                TRANSFER_PROCESS_TABLE,
                p(1),
                p(2),
                p(3),
                p(4),
                p(5),
                p(6),
                p(7),
                p(8),
                p(9),
                LEASE_TABLE,
                p(8),
                p(10),
                p(11),
                p(3)
            ),
            delete: format!("DELETE FROM {} WHERE id = {}", TRANSFER_PROCESS_TABLE, p(1)),
            select_not_leased: format!(
                "SELECT {} FROM {} t WHERE t.state = {} AND NOT EXISTS (\
                 SELECT 1 FROM {} l WHERE l.entity_id = t.id AND l.leased_at + l.lease_duration > {}) \
                 ORDER BY t.state_timestamp ASC, t.id ASC LIMIT {}",
                PROCESS_COLUMNS,
                TRANSFER_PROCESS_TABLE,
                p(1),
                LEASE_TABLE,
                p(2),
                p(3)
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LeaseStatements {
    pub delete_expired: String,
    pub insert_if_absent: String,
    pub select_by_entity: String,
    pub select_by_entity_locked: String,
    pub renew: String,
    pub delete_by_lease: String,
    pub delete_by_entity: String,
}

impl LeaseStatements {
    pub fn new(dialect: &dyn SqlDialect) -> Self {
        let p = |i| dialect.placeholder(i);

        Self {
            delete_expired: format!(
                "DELETE FROM {} WHERE entity_id = {} AND leased_at + lease_duration <= {}",
                LEASE_TABLE,
                p(1),
                p(2)
            ),
            insert_if_absent: format!(
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT (entity_id) DO NOTHING",
                LEASE_TABLE,
                LEASE_COLUMNS,
                placeholders(dialect, 5)
            ),
            select_by_entity: format!(
                "SELECT {} FROM {} WHERE entity_id = {}",
                LEASE_COLUMNS,
                LEASE_TABLE,
                p(1)
            ),
            select_by_entity_locked: format!(
                "SELECT {} FROM {} WHERE entity_id = {}{}",
                LEASE_COLUMNS,
                LEASE_TABLE,
                p(1),
                dialect.share_lock()
            ),
            renew: format!(
                "UPDATE {} SET leased_at = {} WHERE entity_id = {} AND lease_id = {} \
                 AND leased_by = {} AND leased_at + lease_duration > {}",
                LEASE_TABLE,
                p(1),
                p(2),
                p(3),
                p(4),
                p(5)
            ),
            delete_by_lease: format!(
                "DELETE FROM {} WHERE entity_id = {} AND lease_id = {}",
                LEASE_TABLE,
                p(1),
                p(2)
            ),
            delete_by_entity: format!(
                "DELETE FROM {} WHERE entity_id = {}",
                LEASE_TABLE,
                p(1)
            ),
        }
    }
}

/// Renders one page of a `find_all` query.
pub fn render_find_all(
    dialect: &dyn SqlDialect,
    query: &QuerySpec,
    limit: usize,
    offset: usize,
) -> (String, Vec<SqlValue>) {
    let mut params = Params::new(dialect);
    let mut clauses = Vec::new();

    if !query.states.is_empty() {
        let markers = query
            .states
            .iter()
            .map(|state| params.push(SqlValue::Int(state.code())))
            .collect::<Vec<_>>()
            .join(", ");
        clauses.push(format!("state IN ({})", markers));
    }
    if let Some(process_type) = query.process_type {
        let marker = params.push(SqlValue::Text(process_type.as_str().to_string()));
        clauses.push(format!("process_type = {}", marker));
    }
    if let Some(correlation_id) = &query.correlation_id {
        let marker = params.push(SqlValue::Text(correlation_id.clone()));
        clauses.push(format!("correlation_id = {}", marker));
    }

    let mut sql = format!("SELECT {} FROM {}", PROCESS_COLUMNS, TRANSFER_PROCESS_TABLE);
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    let column = match query.sort_field {
        SortField::StateTimestamp => "state_timestamp",
        SortField::CreatedAt => "created_at",
        SortField::Id => "id",
    };
    let direction = match query.sort_order {
        SortOrder::Ascending => "ASC",
        SortOrder::Descending => "DESC",
    };
    if query.sort_field == SortField::Id {
        sql.push_str(&format!(" ORDER BY id {}", direction));
    } else {
        sql.push_str(&format!(" ORDER BY {} {}, id {}", column, direction, direction));
    }

    let limit_marker = params.push(SqlValue::Int(to_i64(limit)));
    let offset_marker = params.push(SqlValue::Int(to_i64(offset)));
    sql.push_str(&format!(" LIMIT {} OFFSET {}", limit_marker, offset_marker));

    (sql, params.values)
}

pub(crate) fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::process::{ProcessType, TransferProcessState};
    use crate::infrastructure::sql::dialect::{PostgresDialect, SqliteDialect};

    #[test]
    fn test_render_unfiltered_page() {
        let (sql, values) = render_find_all(&SqliteDialect, &QuerySpec::new(), 50, 0);

        assert_eq!(
            sql,
            format!(
                "SELECT {} FROM transfer_process ORDER BY state_timestamp ASC, id ASC LIMIT ?1 OFFSET ?2",
                PROCESS_COLUMNS
            )
        );
        assert_eq!(values, vec![SqlValue::Int(50), SqlValue::Int(0)]);
    }

    #[test]
    fn test_render_filtered_page_numbers_postgres_params_in_order() {
        let query = QuerySpec::new()
            .with_state(TransferProcessState::Started)
            .with_state(TransferProcessState::Suspended)
            .with_process_type(ProcessType::Provider)
            .sorted_by(SortField::CreatedAt, SortOrder::Descending);

        let (sql, values) = render_find_all(&PostgresDialect, &query, 10, 20);

        assert!(sql.contains("WHERE state IN ($1, $2) AND process_type = $3"));
        assert!(sql.ends_with("ORDER BY created_at DESC, id DESC LIMIT $4 OFFSET $5"));
        assert_eq!(
            values,
            vec![
                SqlValue::Int(600),
                SqlValue::Int(700),
                SqlValue::Text("PROVIDER".to_string()),
                SqlValue::Int(10),
                SqlValue::Int(20),
            ]
        );
    }

    #[test]
    fn test_lease_insert_is_conditional() {
        let statements = LeaseStatements::new(&PostgresDialect);
        assert_eq!(
            statements.insert_if_absent,
            "INSERT INTO lease (entity_id, lease_id, leased_by, leased_at, lease_duration) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (entity_id) DO NOTHING"
        );
    }

    #[test]
    fn test_update_guards_on_state_count_and_live_lease() {
        let statements = TransferProcessStatements::new(&SqliteDialect);
        assert!(statements.update.contains("state_count = state_count + 1"));
        assert!(statements.update.contains("WHERE id = ?8 AND state_count = ?9 AND EXISTS"));
        assert!(statements.update.ends_with(
            "l.entity_id = ?8 AND l.lease_id = ?10 AND l.leased_by = ?11 \
             AND l.leased_at + l.lease_duration > ?3)"
        ));
    }

    #[test]
    fn test_locked_lease_read_holds_a_share_lock_on_postgres() {
        let postgres = LeaseStatements::new(&PostgresDialect);
        assert!(postgres.select_by_entity_locked.ends_with("WHERE entity_id = $1 FOR SHARE"));

        let sqlite = LeaseStatements::new(&SqliteDialect);
        assert_eq!(sqlite.select_by_entity_locked, sqlite.select_by_entity);
    }
}
