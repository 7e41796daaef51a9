//! Transfer process state machine.
//!
//! The transition table is fixed: a move is legal only if the proposed state
//! appears in the set listed for the current state. Staying in the same state
//! is legal only for the in-flight states that are retried.

use crate::domain::process::TransferProcessState;
use crate::error::{Result, StoreError};

/// Returns the states reachable from `from` in one step.
pub fn allowed_transitions(from: TransferProcessState) -> &'static [TransferProcessState] {
    use TransferProcessState::*;

    match from {
        Initial => &[Provisioning, Requesting, Terminating, Terminated],
        Provisioning => &[
            Provisioning,
            ProvisioningRequested,
            Provisioned,
            Terminating,
            Terminated,
        ],
        ProvisioningRequested => &[Provisioned, Terminating, Terminated],
        Provisioned => &[Requesting, Starting, Terminating, Terminated],
        Requesting => &[Requesting, Requested, Terminating, Terminated],
        Requested => &[Starting, Started, Terminating, Terminated],
        Starting => &[Starting, Started, Terminating, Terminated],
        Started => &[Suspending, Completing, Completed, Terminating, Terminated],
        Suspending => &[Suspending, Suspended, Terminating, Terminated],
        Suspended => &[Starting, Started, Terminating, Terminated],
        Completing => &[Completing, Completed, Terminating, Terminated],
        Completed => &[Deprovisioning],
        Terminating => &[Terminating, Terminated],
        Terminated => &[Deprovisioning],
        Deprovisioning => &[Deprovisioning, DeprovisioningRequested, Deprovisioned],
        DeprovisioningRequested => &[Deprovisioned],
        Deprovisioned => &[],
    }
}

pub fn can_transition(current: TransferProcessState, proposed: TransferProcessState) -> bool {
    allowed_transitions(current).contains(&proposed)
}

pub fn validate_transition(
    current: TransferProcessState,
    proposed: TransferProcessState,
) -> Result<()> {
    if can_transition(current, proposed) {
        Ok(())
    } else {
        Err(StoreError::IllegalTransition {
            from: current,
            to: proposed,
        })
    }
}

/// State timestamps may repeat (millisecond clocks) but never go backwards.
pub fn validate_timestamp(id: &str, persisted: i64, proposed: i64) -> Result<()> {
    if proposed < persisted {
        return Err(StoreError::ClockSkew {
            id: id.to_string(),
            persisted,
            proposed,
        });
    }
    Ok(())
}
