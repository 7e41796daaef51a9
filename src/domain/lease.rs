use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A stored lease row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub entity_id: String,
    pub lease_id: String,
    pub leased_by: String,
    /// Epoch millis at which the lease was granted or last renewed.
    pub leased_at: i64,
    /// Length of the lease window in millis.
    pub lease_duration: i64,
}

impl Lease {
    pub fn expires_at(&self) -> i64 {
        self.leased_at.saturating_add(self.lease_duration)
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at()
    }

    pub fn token(&self) -> LeaseToken {
        LeaseToken {
            entity_id: self.entity_id.clone(),
            lease_id: self.lease_id.clone(),
            holder: self.leased_by.clone(),
            leased_at: self.leased_at,
            lease_duration: self.lease_duration,
        }
    }
}

/// Proof of a granted lease, handed back to the lease manager and the store
/// on every guarded call.
///
/// The token is only a claim: the store always re-checks it against the
/// lease row, so a token that looks valid in memory can still be refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseToken {
    pub entity_id: String,
    pub lease_id: String,
    pub holder: String,
    pub leased_at: i64,
    pub lease_duration: i64,
}

impl LeaseToken {
    pub fn expires_at(&self) -> i64 {
        self.leased_at.saturating_add(self.lease_duration)
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at()
    }

    pub fn matches(&self, lease: &Lease) -> bool {
        self.entity_id == lease.entity_id
            && self.lease_id == lease.lease_id
            && self.holder == lease.leased_by
    }
}

pub fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
