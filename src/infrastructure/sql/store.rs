use super::dialect::{SqlDialect, dialect_for_url};
use super::{begin_write, column};
use super::lease::SqlLeaseManager;
use super::statements::{TransferProcessStatements, bind_values, render_find_all, to_i64};
use crate::config::StoreConfig;
use crate::domain::lease::{LeaseToken, duration_millis};
use crate::domain::ports::{
    ClockRef, LeasedProcess, ProcessStream, TransferProcessStore,
};
use crate::domain::process::{ProcessType, TransferProcess, TransferProcessState};
use crate::domain::query::QuerySpec;
use crate::domain::transition::{validate_timestamp, validate_transition};
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use sqlx::any::AnyRow;
use sqlx::{Any, AnyPool, Transaction};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(60);

/// Transfer process store over the `transfer_process` table.
///
/// Mutations are guarded by leases from the embedded [`SqlLeaseManager`],
/// which shares this store's pool, dialect and clock. Cloning is cheap and
/// clones share the pool.
#[derive(Clone)]
pub struct SqlTransferProcessStore {
    pool: AnyPool,
    dialect: Arc<dyn SqlDialect>,
    statements: Arc<TransferProcessStatements>,
    leases: SqlLeaseManager,
    clock: ClockRef,
    page_size: usize,
    lease_duration: Duration,
}

impl SqlTransferProcessStore {
    pub fn new(pool: AnyPool, dialect: Arc<dyn SqlDialect>, clock: ClockRef) -> Self {
        let leases = SqlLeaseManager::new(pool.clone(), dialect.as_ref(), clock.clone());
        let statements = Arc::new(TransferProcessStatements::new(dialect.as_ref()));
        Self {
            pool,
            dialect,
            statements,
            leases,
            clock,
            page_size: DEFAULT_PAGE_SIZE,
            lease_duration: DEFAULT_LEASE_DURATION,
        }
    }

    /// Connects to `config.database_url` and picks the matching dialect.
    /// The schema is expected to exist already.
    pub async fn open(config: &StoreConfig, clock: ClockRef) -> Result<Self> {
        let dialect = dialect_for_url(&config.database_url)?;
        let pool = super::connect(&config.database_url, config.max_connections).await?;
        Ok(Self::new(pool, dialect, clock)
            .with_page_size(config.page_size)
            .with_lease_duration(config.lease_duration()))
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Duration of the leases taken by `next_not_leased`.
    pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    pub fn lease_manager(&self) -> SqlLeaseManager {
        self.leases.clone()
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn dialect(&self) -> &dyn SqlDialect {
        self.dialect.as_ref()
    }

    async fn write_transaction(&self) -> Result<Transaction<'static, Any>> {
        begin_write(&self.pool, self.dialect.begin_write()).await
    }

    async fn fetch_page(
        &self,
        query: &QuerySpec,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransferProcess>> {
        let (sql, values) = render_find_all(self.dialect.as_ref(), query, limit, offset);
        let rows = bind_values(sqlx::query(&sql), values)
            .fetch_all(&self.pool)
            .await?;
        debug!(limit, offset, fetched = rows.len(), "Fetched transfer process page");
        rows.iter().map(process_from_row).collect()
    }
}

/// Pulls `find_all` results one page at a time.
struct PageCursor {
    store: SqlTransferProcessStore,
    query: QuerySpec,
    next_offset: usize,
    remaining: Option<usize>,
    buffer: VecDeque<TransferProcess>,
    done: bool,
}

impl PageCursor {
    async fn fill(&mut self) -> Result<()> {
        let page_size = match self.remaining {
            Some(0) => {
                self.done = true;
                return Ok(());
            }
            Some(remaining) => remaining.min(self.store.page_size),
            None => self.store.page_size,
        };

        let page = self
            .store
            .fetch_page(&self.query, page_size, self.next_offset)
            .await?;
        if page.len() < page_size {
            self.done = true;
        }
        self.next_offset += page.len();
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(page.len());
        }
        self.buffer.extend(page);
        Ok(())
    }
}

#[async_trait]
impl TransferProcessStore for SqlTransferProcessStore {
    async fn create(&self, process: TransferProcess) -> Result<()> {
        let mut tx = self.write_transaction().await?;

        let existing = sqlx::query(&self.statements.select_by_id)
            .bind(process.id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_some() {
            return Err(StoreError::DuplicateId { id: process.id });
        }

        let inserted = sqlx::query(&self.statements.insert)
            .bind(process.id.as_str())
            .bind(process.process_type.as_str())
            .bind(process.state.code())
            .bind(process.state_count)
            .bind(process.state_timestamp)
            .bind(process.created_at)
            .bind(process.updated_at)
            .bind(process.correlation_id.clone())
            .bind(serde_json::to_string(&process.trace_context)?)
            .bind(process.error_detail.clone())
            .bind(serde_json::to_string(&process.payload)?)
            .bind(process.version)
            .execute(&mut *tx)
            .await;

        match inserted {
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(StoreError::DuplicateId { id: process.id });
            }
            Err(e) => return Err(e.into()),
            Ok(_) => {}
        }

        tx.commit().await?;
        debug!(id = %process.id, state = %process.state, "Transfer process created");
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<TransferProcess>> {
        let row = sqlx::query(&self.statements.select_by_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(process_from_row).transpose()
    }

    async fn find_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Option<TransferProcess>> {
        let row = sqlx::query(&self.statements.select_by_correlation_id)
            .bind(correlation_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(process_from_row).transpose()
    }

    fn find_all(&self, query: QuerySpec) -> ProcessStream {
        let cursor = PageCursor {
            store: self.clone(),
            next_offset: query.offset,
            remaining: query.limit,
            query,
            buffer: VecDeque::new(),
            done: false,
        };

        stream::unfold(cursor, |mut cursor| async move {
            loop {
                if let Some(process) = cursor.buffer.pop_front() {
                    return Some((Ok(process), cursor));
                }
                if cursor.done {
                    return None;
                }
                if let Err(e) = cursor.fill().await {
                    cursor.done = true;
                    return Some((Err(e), cursor));
                }
            }
        })
        .boxed()
    }

    async fn update(&self, process: TransferProcess, lease: &LeaseToken) -> Result<TransferProcess> {
        if lease.entity_id != process.id {
            return Err(StoreError::LeaseNotOwned {
                entity_id: process.id,
                holder: lease.holder.clone(),
            });
        }

        // Lease, row and state count are all checked inside this transaction
        // and again by the UPDATE itself; any early return drops it
        // uncommitted, leaving the row untouched.
        let mut tx = self.write_transaction().await?;
        let now = self.clock.now_ms();

        self.leases.verify_in(&mut tx, lease, now).await?;

        let row = sqlx::query(&self.statements.select_by_id)
            .bind(process.id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Err(StoreError::NotFound { id: process.id });
        };
        let persisted = process_from_row(&row)?;

        if persisted.state_count != process.state_count {
            warn!(
                id = %process.id,
                expected = process.state_count,
                actual = persisted.state_count,
                "Stale write rejected"
            );
            return Err(StoreError::StaleWrite {
                id: process.id,
                expected: process.state_count,
                actual: persisted.state_count,
            });
        }
        validate_transition(persisted.state, process.state)?;
        validate_timestamp(&process.id, persisted.state_timestamp, process.state_timestamp)?;

        let updated = sqlx::query(&self.statements.update)
            .bind(process.state.code())
            .bind(process.state_timestamp)
            .bind(now)
            .bind(process.correlation_id.clone())
            .bind(serde_json::to_string(&process.trace_context)?)
            .bind(process.error_detail.clone())
            .bind(serde_json::to_string(&process.payload)?)
            .bind(process.id.as_str())
            .bind(persisted.state_count)
            .bind(lease.lease_id.as_str())
            .bind(lease.holder.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if updated == 0 {
            // Either the lease or the row moved under us; report the lease
            // first, as the read checks do.
            self.leases.verify_in(&mut tx, lease, now).await?;
            return Err(StoreError::StaleWrite {
                id: process.id,
                expected: process.state_count,
                actual: persisted.state_count,
            });
        }

        tx.commit().await?;
        debug!(
            id = %process.id,
            from = %persisted.state,
            to = %process.state,
            state_count = persisted.state_count + 1,
            "Transfer process updated"
        );

        Ok(TransferProcess {
            process_type: persisted.process_type,
            state_count: persisted.state_count + 1,
            created_at: persisted.created_at,
            updated_at: now,
            version: persisted.version + 1,
            ..process
        })
    }

    async fn delete(&self, id: &str, holder: &str) -> Result<()> {
        let mut tx = self.write_transaction().await?;
        let now = self.clock.now_ms();

        let existing = sqlx::query(&self.statements.select_by_id)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_none() {
            return Err(StoreError::NotFound { id: id.to_string() });
        }

        if let Some(lease) = self.leases.find_in(&mut tx, id).await?
            && !lease.is_expired(now)
            && lease.leased_by != holder
        {
            return Err(StoreError::LeaseHeld {
                entity_id: id.to_string(),
                holder: lease.leased_by,
            });
        }

        self.leases.remove_in(&mut tx, id).await?;
        sqlx::query(&self.statements.delete)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(id, holder, "Transfer process deleted");
        Ok(())
    }

    async fn next_not_leased(
        &self,
        holder: &str,
        max: usize,
        state: TransferProcessState,
    ) -> Result<Vec<LeasedProcess>> {
        if max == 0 {
            return Ok(Vec::new());
        }

        let mut tx = self.write_transaction().await?;
        let now = self.clock.now_ms();
        let duration_ms = duration_millis(self.lease_duration);

        let rows = sqlx::query(&self.statements.select_not_leased)
            .bind(state.code())
            .bind(now)
            .bind(to_i64(max))
            .fetch_all(&mut *tx)
            .await?;
        let candidates = rows
            .iter()
            .map(process_from_row)
            .collect::<Result<Vec<_>>>()?;

        let mut claimed = Vec::with_capacity(candidates.len());
        for process in candidates {
            match self
                .leases
                .acquire_in(&mut tx, &process.id, holder, duration_ms, now)
                .await
            {
                Ok(lease) => claimed.push(LeasedProcess { process, lease }),
                Err(StoreError::LeaseAlreadyHeld { .. }) => continue,
                Err(e) => return Err(e),
            }
        }

        tx.commit().await?;
        if !claimed.is_empty() {
            info!(holder, %state, claimed = claimed.len(), "Claimed transfer processes");
        }
        Ok(claimed)
    }
}

fn process_from_row(row: &AnyRow) -> Result<TransferProcess> {
    let id: String = column(row, "id")?;

    let state_code: i64 = column(row, "state")?;
    let state = TransferProcessState::from_code(state_code).ok_or_else(|| {
        StoreError::InvalidData(format!("Unknown state code {} on {}", state_code, id))
    })?;

    let process_type: String = column(row, "process_type")?;
    let process_type = ProcessType::parse(&process_type).ok_or_else(|| {
        StoreError::InvalidData(format!("Unknown process type {} on {}", process_type, id))
    })?;

    let trace_context: String = column(row, "trace_context")?;
    let trace_context: BTreeMap<String, String> = serde_json::from_str(&trace_context)?;
    let payload: String = column(row, "payload")?;
    let payload: serde_json::Value = serde_json::from_str(&payload)?;

    Ok(TransferProcess {
        process_type,
        state,
        state_count: column(row, "state_count")?,
        state_timestamp: column(row, "state_timestamp")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
        correlation_id: column(row, "correlation_id")?,
        trace_context,
        error_detail: column(row, "error_detail")?,
        payload,
        version: column(row, "version")?,
        id,
    })
}
