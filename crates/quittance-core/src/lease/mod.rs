//! Lease arithmetic for time-bounded exclusive work claims.
//!
//! A lease is transient coordination state, never a receipt: only the
//! obligation boundaries (`accepted`, `complete`, `escalate`) cross into
//! the ledger. At most one active lease exists per task at any time; the
//! store enforces that with a conditional status update, and this module
//! holds the arithmetic the engine applies around it: TTL-based expiry,
//! heartbeat renewal, and the hard cap on total lease lifetime that stops
//! a runaway worker from renewing forever.
//!
//! ```text
//! grant --> Active --heartbeat--> Active (later expires_at, capped)
//!              |
//!              +--release/complete/fail--> Released
//!              |
//!              +--deadline passes--> Expired (reaper reclaims)
//! ```


use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for lease-bound operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum LeaseError {
    /// The lease deadline has passed.
    #[error("lease {lease_id} expired at {expired_at}")]
    Expired {
        /// The lease id.
        lease_id: String,
        /// When the lease expired.
        expired_at: DateTime<Utc>,
    },

    /// The caller is not the worker the lease was granted to.
    #[error("lease {lease_id} is not held by worker {worker_id}")]
    NotOwned {
        /// The lease id.
        lease_id: String,
        /// The worker that attempted the operation.
        worker_id: String,
    },

    /// The lease was already released by a terminal call.
    #[error("lease {lease_id} was already released")]
    Released {
        /// The lease id.
        lease_id: String,
    },

    /// No lease with this id exists within the tenant.
    #[error("lease not found: {lease_id}")]
    NotFound {
        /// The lease id.
        lease_id: String,
    },
}

/// Lifecycle state of a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseState {
    /// The worker holds an exclusive claim.
    Active,
    /// Terminated by complete, fail, or voluntary release.
    Released,
    /// The deadline passed without a terminal call.
    Expired,
}

/// A worker's exclusive, time-bounded claim on a task.
///
/// Persisted as columns on the task row; this value is the projection
/// handed to workers and the reaper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Lease identifier.
    pub lease_id: String,

    /// The claimed task.
    pub task_id: String,

    /// The worker holding the claim.
    pub worker_id: String,

    /// When the lease was granted.
    pub granted_at: DateTime<Utc>,

    /// Current deadline.
    pub expires_at: DateTime<Utc>,

    /// Heartbeats received so far.
    pub heartbeats: u32,

    /// Lifecycle state.
    pub state: LeaseState,
}

impl Lease {
    /// Creates a freshly-granted lease with a deadline of `granted_at +
    /// ttl_seconds`.
    #[must_use]
    pub fn granted(
        lease_id: &str,
        task_id: &str,
        worker_id: &str,
        granted_at: DateTime<Utc>,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            lease_id: lease_id.to_owned(),
            task_id: task_id.to_owned(),
            worker_id: worker_id.to_owned(),
            granted_at,
            expires_at: granted_at + Duration::seconds(i64::try_from(ttl_seconds).unwrap_or(0)),
            heartbeats: 0,
            state: LeaseState::Active,
        }
    }

    /// Returns `true` when the deadline has passed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Computes the deadline a heartbeat at `now` would move this lease to:
    /// `now + ttl_seconds`, capped at `granted_at + max_lifetime_seconds`,
    /// and never earlier than the current deadline.
    ///
    /// # Errors
    ///
    /// - [`LeaseError::Released`] / [`LeaseError::Expired`] when the lease
    ///   is no longer active.
    /// - [`LeaseError::NotOwned`] when `worker_id` is not the holder.
    pub fn renewed_expiry(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        ttl_seconds: u64,
        max_lifetime_seconds: u64,
    ) -> Result<DateTime<Utc>, LeaseError> {
        match self.state {
            LeaseState::Released => {
                return Err(LeaseError::Released {
                    lease_id: self.lease_id.clone(),
                });
            }
            LeaseState::Expired => {
                return Err(LeaseError::Expired {
                    lease_id: self.lease_id.clone(),
                    expired_at: self.expires_at,
                });
            }
            LeaseState::Active => {}
        }
        if worker_id != self.worker_id {
            return Err(LeaseError::NotOwned {
                lease_id: self.lease_id.clone(),
                worker_id: worker_id.to_owned(),
            });
        }
        if self.is_expired_at(now) {
            return Err(LeaseError::Expired {
                lease_id: self.lease_id.clone(),
                expired_at: self.expires_at,
            });
        }

        let ttl = Duration::seconds(i64::try_from(ttl_seconds).unwrap_or(0));
        let max_lifetime = Duration::seconds(i64::try_from(max_lifetime_seconds).unwrap_or(0));
        let hard_cap = self.granted_at + max_lifetime;
        let proposed = (now + ttl).min(hard_cap);

        Ok(proposed.max(self.expires_at))
    }
}
