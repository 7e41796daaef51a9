use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle states of a transfer process.
///
/// Each state is persisted as its integer code, so the codes are part of the
/// storage contract and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferProcessState {
    Initial,
    Provisioning,
    ProvisioningRequested,
    Provisioned,
    Requesting,
    Requested,
    Starting,
    Started,
    Suspending,
    Suspended,
    Completing,
    Completed,
    Terminating,
    Terminated,
    Deprovisioning,
    DeprovisioningRequested,
    Deprovisioned,
}

impl TransferProcessState {
    pub const ALL: [TransferProcessState; 17] = [
        TransferProcessState::Initial,
        TransferProcessState::Provisioning,
        TransferProcessState::ProvisioningRequested,
        TransferProcessState::Provisioned,
        TransferProcessState::Requesting,
        TransferProcessState::Requested,
        TransferProcessState::Starting,
        TransferProcessState::Started,
        TransferProcessState::Suspending,
        TransferProcessState::Suspended,
        TransferProcessState::Completing,
        TransferProcessState::Completed,
        TransferProcessState::Terminating,
        TransferProcessState::Terminated,
        TransferProcessState::Deprovisioning,
        TransferProcessState::DeprovisioningRequested,
        TransferProcessState::Deprovisioned,
    ];

    pub fn code(&self) -> i64 {
        match self {
            TransferProcessState::Initial => 100,
            TransferProcessState::Provisioning => 200,
            TransferProcessState::ProvisioningRequested => 250,
            TransferProcessState::Provisioned => 300,
            TransferProcessState::Requesting => 400,
            TransferProcessState::Requested => 500,
            TransferProcessState::Starting => 550,
            TransferProcessState::Started => 600,
            TransferProcessState::Suspending => 650,
            TransferProcessState::Suspended => 700,
            TransferProcessState::Completing => 750,
            TransferProcessState::Completed => 800,
            TransferProcessState::Terminating => 825,
            TransferProcessState::Terminated => 850,
            TransferProcessState::Deprovisioning => 900,
            TransferProcessState::DeprovisioningRequested => 950,
            TransferProcessState::Deprovisioned => 1000,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.code() == code)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferProcessState::Initial => "INITIAL",
            TransferProcessState::Provisioning => "PROVISIONING",
            TransferProcessState::ProvisioningRequested => "PROVISIONING_REQUESTED",
            TransferProcessState::Provisioned => "PROVISIONED",
            TransferProcessState::Requesting => "REQUESTING",
            TransferProcessState::Requested => "REQUESTED",
            TransferProcessState::Starting => "STARTING",
            TransferProcessState::Started => "STARTED",
            TransferProcessState::Suspending => "SUSPENDING",
            TransferProcessState::Suspended => "SUSPENDED",
            TransferProcessState::Completing => "COMPLETING",
            TransferProcessState::Completed => "COMPLETED",
            TransferProcessState::Terminating => "TERMINATING",
            TransferProcessState::Terminated => "TERMINATED",
            TransferProcessState::Deprovisioning => "DEPROVISIONING",
            TransferProcessState::DeprovisioningRequested => "DEPROVISIONING_REQUESTED",
            TransferProcessState::Deprovisioned => "DEPROVISIONED",
        }
    }

    /// Final state: nothing may follow it.
    pub fn is_final(&self) -> bool {
        matches!(self, TransferProcessState::Deprovisioned)
    }
}

impl fmt::Display for TransferProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("Unknown transfer process state: {0}")]
pub struct ParseStateError(String);

impl FromStr for TransferProcessState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == wanted)
            .ok_or_else(|| ParseStateError(s.to_string()))
    }
}

/// Which side of the transfer this process represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessType {
    #[default]
    Consumer,
    Provider,
}

impl ProcessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessType::Consumer => "CONSUMER",
            ProcessType::Provider => "PROVIDER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CONSUMER" => Some(ProcessType::Consumer),
            "PROVIDER" => Some(ProcessType::Provider),
            _ => None,
        }
    }
}

/// A persisted transfer process.
///
/// `state_count` and `version` are owned by the store: callers hand back the
/// values they read and the store bumps both on every successful update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferProcess {
    /// Immutable after creation.
    pub id: String,
    pub process_type: ProcessType,
    pub state: TransferProcessState,
    pub state_count: i64,
    /// Epoch millis of the last transition.
    pub state_timestamp: i64,
    pub created_at: i64,
    pub updated_at: i64,
    /// Id of the counter-party's process, when known.
    pub correlation_id: Option<String>,
    pub trace_context: BTreeMap<String, String>,
    pub error_detail: Option<String>,
    /// Opaque to the store.
    pub payload: serde_json::Value,
    pub version: i64,
}

impl TransferProcess {
    /// A fresh process in `INITIAL`, stamped with `now_ms`.
    pub fn new(id: impl Into<String>, process_type: ProcessType, now_ms: i64) -> Self {
        Self {
            id: id.into(),
            process_type,
            state: TransferProcessState::Initial,
            state_count: 1,
            state_timestamp: now_ms,
            created_at: now_ms,
            updated_at: now_ms,
            correlation_id: None,
            trace_context: BTreeMap::new(),
            error_detail: None,
            payload: serde_json::Value::Null,
            version: 1,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Moves the in-memory record to `state`. Nothing is validated here; the
    /// store checks the move against the persisted row on update.
    pub fn transition_to(&mut self, state: TransferProcessState, now_ms: i64) {
        self.state = state;
        self.state_timestamp = now_ms;
    }
}
