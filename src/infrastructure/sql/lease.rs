use super::dialect::SqlDialect;
use super::{begin_write, column};
use super::statements::LeaseStatements;
use crate::domain::lease::{Lease, LeaseToken, duration_millis};
use crate::domain::ports::{ClockRef, LeaseManager};
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use sqlx::any::AnyRow;
use sqlx::{Any, AnyConnection, AnyPool, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lease manager backed by the `lease` table.
///
/// Every method runs in its own transaction. The `*_in` helpers take an open
/// connection instead so the entity store can check or take leases inside
/// its own transactions.
#[derive(Clone)]
pub struct SqlLeaseManager {
    pool: AnyPool,
    statements: Arc<LeaseStatements>,
    begin: &'static str,
    clock: ClockRef,
}

impl SqlLeaseManager {
    pub fn new(pool: AnyPool, dialect: &dyn SqlDialect, clock: ClockRef) -> Self {
        Self {
            pool,
            statements: Arc::new(LeaseStatements::new(dialect)),
            begin: dialect.begin_write(),
            clock,
        }
    }

    async fn write_transaction(&self) -> Result<Transaction<'static, Any>> {
        begin_write(&self.pool, self.begin).await
    }

    pub(crate) async fn acquire_in(
        &self,
        conn: &mut AnyConnection,
        entity_id: &str,
        holder: &str,
        duration_ms: i64,
        now: i64,
    ) -> Result<LeaseToken> {
        let reclaimed = sqlx::query(&self.statements.delete_expired)
            .bind(entity_id)
            .bind(now)
            .execute(&mut *conn)
            .await?
            .rows_affected();
        if reclaimed > 0 {
            info!(entity_id, holder, "Reclaimed expired lease");
        }

        let lease_id = Uuid::new_v4().to_string();
        let inserted = sqlx::query(&self.statements.insert_if_absent)
            .bind(entity_id)
            .bind(lease_id.as_str())
            .bind(holder)
            .bind(now)
            .bind(duration_ms)
            .execute(&mut *conn)
            .await?
            .rows_affected();

        if inserted == 0 {
            let current = self.find_in(conn, entity_id).await?;
            let current_holder = current.map(|lease| lease.leased_by).unwrap_or_default();
            warn!(entity_id, holder, current_holder = %current_holder, "Lease refused");
            return Err(StoreError::LeaseAlreadyHeld {
                entity_id: entity_id.to_string(),
                holder: current_holder,
            });
        }

        debug!(entity_id, holder, lease_id = %lease_id, duration_ms, "Lease granted");
        Ok(LeaseToken {
            entity_id: entity_id.to_string(),
            lease_id,
            holder: holder.to_string(),
            leased_at: now,
            lease_duration: duration_ms,
        })
    }

    pub(crate) async fn find_in(
        &self,
        conn: &mut AnyConnection,
        entity_id: &str,
    ) -> Result<Option<Lease>> {
        let row = sqlx::query(&self.statements.select_by_entity)
            .bind(entity_id)
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(lease_from_row).transpose()
    }

    /// Confirms that `token` still names the live lease on its entity. The
    /// lease row stays locked until the surrounding transaction ends.
    pub(crate) async fn verify_in(
        &self,
        conn: &mut AnyConnection,
        token: &LeaseToken,
        now: i64,
    ) -> Result<Lease> {
        let row = sqlx::query(&self.statements.select_by_entity_locked)
            .bind(token.entity_id.as_str())
            .fetch_optional(&mut *conn)
            .await?;
        let lease = row.as_ref().map(lease_from_row).transpose()?;

        match lease {
            Some(lease) if token.matches(&lease) => {
                if lease.is_expired(now) {
                    Err(lease_expired(token))
                } else {
                    Ok(lease)
                }
            }
            _ if token.is_expired(now) => Err(lease_expired(token)),
            _ => Err(StoreError::LeaseNotOwned {
                entity_id: token.entity_id.clone(),
                holder: token.holder.clone(),
            }),
        }
    }

    pub(crate) async fn remove_in(&self, conn: &mut AnyConnection, entity_id: &str) -> Result<()> {
        sqlx::query(&self.statements.delete_by_entity)
            .bind(entity_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LeaseManager for SqlLeaseManager {
    async fn acquire(
        &self,
        entity_id: &str,
        holder: &str,
        duration: Duration,
    ) -> Result<LeaseToken> {
        let duration_ms = duration_millis(duration);
        if duration_ms <= 0 {
            return Err(StoreError::InvalidData(
                "Lease duration must be positive".to_string(),
            ));
        }

        let mut tx = self.write_transaction().await?;
        let now = self.clock.now_ms();
        let token = self
            .acquire_in(&mut tx, entity_id, holder, duration_ms, now)
            .await?;
        tx.commit().await?;
        Ok(token)
    }

    async fn renew(&self, token: &LeaseToken) -> Result<LeaseToken> {
        let mut tx = self.write_transaction().await?;
        let now = self.clock.now_ms();
        self.verify_in(&mut tx, token, now).await?;

        let renewed = sqlx::query(&self.statements.renew)
            .bind(now)
            .bind(token.entity_id.as_str())
            .bind(token.lease_id.as_str())
            .bind(token.holder.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if renewed == 0 {
            return Err(lease_expired(token));
        }
        tx.commit().await?;

        debug!(entity_id = %token.entity_id, holder = %token.holder, "Lease renewed");
        Ok(LeaseToken {
            leased_at: now,
            ..token.clone()
        })
    }

    async fn release(&self, token: &LeaseToken) -> Result<()> {
        let mut tx = self.write_transaction().await?;
        let now = self.clock.now_ms();

        let deleted = sqlx::query(&self.statements.delete_by_lease)
            .bind(token.entity_id.as_str())
            .bind(token.lease_id.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if deleted == 0 {
            if let Some(current) = self.find_in(&mut tx, &token.entity_id).await?
                && !current.is_expired(now)
            {
                return Err(StoreError::LeaseNotOwned {
                    entity_id: token.entity_id.clone(),
                    holder: token.holder.clone(),
                });
            }
            debug!(entity_id = %token.entity_id, "Lease already released");
            return Ok(());
        }

        tx.commit().await?;
        debug!(entity_id = %token.entity_id, holder = %token.holder, "Lease released");
        Ok(())
    }

    async fn current(&self, entity_id: &str) -> Result<Option<Lease>> {
        let mut conn = self.pool.acquire().await?;
        self.find_in(&mut conn, entity_id).await
    }
}

fn lease_expired(token: &LeaseToken) -> StoreError {
    StoreError::LeaseExpired {
        entity_id: token.entity_id.clone(),
    }
}

fn lease_from_row(row: &AnyRow) -> Result<Lease> {
    Ok(Lease {
        entity_id: column(row, "entity_id")?,
        lease_id: column(row, "lease_id")?,
        leased_by: column(row, "leased_by")?,
        leased_at: column(row, "leased_at")?,
        lease_duration: column(row, "lease_duration")?,
    })
}
