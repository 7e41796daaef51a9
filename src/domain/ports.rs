use super::lease::{Lease, LeaseToken};
use super::process::{TransferProcess, TransferProcessState};
use super::query::QuerySpec;
use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;

/// Source of "now" for lease windows and state timestamps, in epoch millis.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Time-bounded exclusive locks on entity ids.
#[async_trait]
pub trait LeaseManager: Send + Sync {
    /// Grants a lease iff no active lease exists for `entity_id`. An expired
    /// lease left behind by a previous holder is reclaimed first.
    async fn acquire(&self, entity_id: &str, holder: &str, duration: Duration)
    -> Result<LeaseToken>;

    /// Restarts the lease window of a still-valid lease.
    async fn renew(&self, token: &LeaseToken) -> Result<LeaseToken>;

    /// Drops the lease. Releasing an already released lease is a no-op.
    async fn release(&self, token: &LeaseToken) -> Result<()>;

    /// The stored lease row for `entity_id`, expired or not.
    async fn current(&self, entity_id: &str) -> Result<Option<Lease>>;
}

/// A process together with the lease that guards it.
#[derive(Debug, Clone, PartialEq)]
pub struct LeasedProcess {
    pub process: TransferProcess,
    pub lease: LeaseToken,
}

/// Lazy, finite sequence of query results. Polling it again after
/// re-issuing the query re-reads current data.
pub type ProcessStream = BoxStream<'static, Result<TransferProcess>>;

#[async_trait]
pub trait TransferProcessStore: Send + Sync {
    async fn create(&self, process: TransferProcess) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<TransferProcess>>;

    async fn find_by_correlation_id(&self, correlation_id: &str)
    -> Result<Option<TransferProcess>>;

    fn find_all(&self, query: QuerySpec) -> ProcessStream;

    /// Persists `process` under `lease`, returning the stored record with its
    /// bumped `state_count` and `version`.
    async fn update(&self, process: TransferProcess, lease: &LeaseToken)
    -> Result<TransferProcess>;

    /// Deletes the process unless another holder has an active lease on it.
    async fn delete(&self, id: &str, holder: &str) -> Result<()>;

    /// Leases up to `max` processes in `state` that nobody currently holds.
    async fn next_not_leased(
        &self,
        holder: &str,
        max: usize,
        state: TransferProcessState,
    ) -> Result<Vec<LeasedProcess>>;
}

pub type ClockRef = Arc<dyn Clock>;
pub type LeaseManagerBox = Box<dyn LeaseManager>;
pub type TransferProcessStoreBox = Box<dyn TransferProcessStore>;
pub type TransferProcessStoreFactory = Box<dyn Fn() -> TransferProcessStoreBox + Send + Sync>;
