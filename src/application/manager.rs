use crate::domain::lease::LeaseToken;
use crate::domain::ports::{ClockRef, LeaseManagerBox, LeasedProcess, TransferProcessStoreBox};
use crate::domain::process::{TransferProcess, TransferProcessState};
use crate::error::{Result, StoreError};
use std::time::Duration;
use tracing::warn;

/// Drives transfer processes through their state machine.
///
/// `TransferProcessManager` owns the storage ports and runs the guarded
/// write cycle for a single process: lease, read, apply the new state,
/// update, release. The lease is released whether or not the update
/// succeeded.
pub struct TransferProcessManager {
    store: TransferProcessStoreBox,
    leases: LeaseManagerBox,
    clock: ClockRef,
    holder: String,
    lease_duration: Duration,
}

impl TransferProcessManager {
    /// Creates a new `TransferProcessManager`.
    ///
    /// # Arguments
    ///
    /// * `store` - The transfer process store.
    /// * `leases` - The lease manager guarding the store's rows.
    /// * `clock` - Source of state timestamps.
    /// * `holder` - Identity recorded on every lease this manager takes.
    /// * `lease_duration` - Length of those leases.
    pub fn new(
        store: TransferProcessStoreBox,
        leases: LeaseManagerBox,
        clock: ClockRef,
        holder: impl Into<String>,
        lease_duration: Duration,
    ) -> Self {
        Self {
            store,
            leases,
            clock,
            holder: holder.into(),
            lease_duration,
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn store(&self) -> &TransferProcessStoreBox {
        &self.store
    }

    pub async fn initiate(&self, process: TransferProcess) -> Result<()> {
        self.store.create(process).await
    }

    /// Moves process `id` to `target`, letting `mutate` adjust the record
    /// before it is written.
    pub async fn transition<F>(
        &self,
        id: &str,
        target: TransferProcessState,
        mutate: F,
    ) -> Result<TransferProcess>
    where
        F: FnOnce(&mut TransferProcess) + Send,
    {
        let lease = self
            .leases
            .acquire(id, &self.holder, self.lease_duration)
            .await?;

        let outcome = match self.store.find_by_id(id).await {
            Ok(Some(process)) => self.write(process, target, mutate, &lease).await,
            Ok(None) => Err(StoreError::NotFound { id: id.to_string() }),
            Err(e) => Err(e),
        };

        self.release(&lease).await;
        outcome
    }

    /// Records `error_detail` and moves the process to `TERMINATED`.
    pub async fn terminate(
        &self,
        id: &str,
        error_detail: impl Into<String>,
    ) -> Result<TransferProcess> {
        let detail = error_detail.into();
        self.transition(id, TransferProcessState::Terminated, move |process| {
            process.error_detail = Some(detail);
        })
        .await
    }

    /// Leases up to `max` unleased processes sitting in `state`.
    pub async fn claim(&self, state: TransferProcessState, max: usize) -> Result<Vec<LeasedProcess>> {
        self.store.next_not_leased(&self.holder, max, state).await
    }

    /// Finishes work on a process obtained from [`claim`](Self::claim):
    /// writes the new state under the claimed lease, then releases it.
    pub async fn advance<F>(
        &self,
        claimed: LeasedProcess,
        target: TransferProcessState,
        mutate: F,
    ) -> Result<TransferProcess>
    where
        F: FnOnce(&mut TransferProcess) + Send,
    {
        let LeasedProcess { process, lease } = claimed;
        let outcome = self.write(process, target, mutate, &lease).await;
        self.release(&lease).await;
        outcome
    }

    async fn write<F>(
        &self,
        mut process: TransferProcess,
        target: TransferProcessState,
        mutate: F,
        lease: &LeaseToken,
    ) -> Result<TransferProcess>
    where
        F: FnOnce(&mut TransferProcess) + Send,
    {
        process.transition_to(target, self.clock.now_ms());
        mutate(&mut process);
        self.store.update(process, lease).await
    }

    async fn release(&self, lease: &LeaseToken) {
        if let Err(e) = self.leases.release(lease).await {
            warn!(entity_id = %lease.entity_id, error = %e, "Failed to release lease");
        }
    }
}
