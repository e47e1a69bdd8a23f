//! The durable task queue model.
//!
//! Tasks are the mutable side of the substrate: a task row tracks queue
//! position, lease occupancy, and retry budget, while every obligation
//! boundary (acceptance, completion, transfer) is recorded as an immutable
//! receipt. Task status never appears on a receipt; it is either read from
//! the task row or derived from receipt history.
//!
//! # Lifecycle
//!
//! ```text
//! queued --lease--> leased --complete--> completed
//!   ^                  |
//!   |                  +--fail(retryable, attempts left)--> queued (attempt+1)
//!   |                  |
//!   |                  +--fail(terminal) or retries exhausted--> failed
//!   |                  |
//!   +--reaper(expired)-+       exhausted expiry --> expired
//! ```


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::receipt::{OutcomeKind, NA};

/// Queue status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for a worker.
    Queued,
    /// Exclusively claimed by a worker under a live lease.
    Leased,
    /// Resolved by a terminal `complete` receipt.
    Completed,
    /// Terminally failed (non-retryable failure or retries exhausted).
    Failed,
    /// Lease expired with no retry budget left.
    Expired,
}

impl TaskStatus {
    /// Canonical wire string for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Leased => "leased",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    /// Parses a wire string into a task status.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(Self::Queued),
            "leased" => Some(Self::Leased),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Returns `true` when no further transition may leave this status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }

    /// Returns `true` when `self -> next` is a legal lifecycle transition.
    ///
    /// Every state change in the engine funnels through a conditional
    /// update whose expected-status guard encodes exactly this table.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Leased)
                | (
                    Self::Leased,
                    Self::Completed | Self::Failed | Self::Queued | Self::Expired
                )
        )
    }
}

/// Generates a new task id (time-prefixed, sortable).
#[must_use]
pub fn generate_task_id() -> String {
    format!("T-{}", Uuid::now_v7())
}

/// Generates a new lease id.
#[must_use]
pub fn generate_lease_id() -> String {
    format!("lease-{}", Uuid::now_v7())
}

fn na_string() -> String {
    NA.to_owned()
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_priority() -> u8 {
    0
}

/// A client submission to the task queue.
///
/// Submission persists the task in `queued`; it does not emit a receipt.
/// The obligation is created later, by the `accepted` receipt the worker
/// (or the planner) appends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Category of task (e.g. `code.generate`).
    pub task_type: String,

    /// Brief description.
    pub task_summary: String,

    /// Full task specification.
    #[serde(default)]
    pub task_body: String,

    /// Structured task parameters.
    #[serde(default = "empty_object")]
    pub inputs: serde_json::Value,

    /// Agent that owns this task.
    pub recipient_ai: String,

    /// Principal requesting the work.
    pub from_principal: String,

    /// Principal the work is done for.
    pub for_principal: String,

    /// Expected outcome type.
    #[serde(default)]
    pub expected_outcome_kind: OutcomeKind,

    /// Expected artifact MIME type.
    #[serde(default = "na_string")]
    pub expected_artifact_mime: String,

    /// Receipt that caused this task, or `"NA"`.
    #[serde(default = "na_string")]
    pub caused_by_receipt_id: String,

    /// Parent task for delegation trees, or `"NA"`.
    #[serde(default = "na_string")]
    pub parent_task_id: String,

    /// Priority hint, 0 (normal) to 10 (highest).
    #[serde(default = "default_priority")]
    pub priority: u8,

    /// Retry budget override; the engine default applies when absent.
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Principal that receives system escalations for this task (lease
    /// expiry, retry exhaustion). Falls back to the tenant's configured
    /// retry handler.
    #[serde(default)]
    pub retry_principal: Option<String>,

    /// Freeform metadata. A `not_before` key (RFC 3339 timestamp) keeps
    /// the task out of the dispensable queue until that instant.
    #[serde(default = "empty_object")]
    pub metadata: serde_json::Value,
}

impl TaskSpec {
    /// Extracts the `not_before` gate from the submission metadata, if one
    /// is present and parseable.
    #[must_use]
    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        self.metadata
            .get("not_before")
            .and_then(serde_json::Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// A persisted task row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task identifier, unique per tenant.
    pub task_id: String,

    /// Tenant scope.
    pub tenant_id: String,

    /// Category of task.
    pub task_type: String,

    /// Brief description.
    pub task_summary: String,

    /// Full task specification.
    pub task_body: String,

    /// Structured task parameters.
    pub inputs: serde_json::Value,

    /// Agent that owns this task.
    pub recipient_ai: String,

    /// Principal requesting the work.
    pub from_principal: String,

    /// Principal the work is done for.
    pub for_principal: String,

    /// Expected outcome type.
    pub expected_outcome_kind: OutcomeKind,

    /// Expected artifact MIME type.
    pub expected_artifact_mime: String,

    /// Receipt that caused this task, or `"NA"`.
    pub caused_by_receipt_id: String,

    /// Parent task for delegation trees, or `"NA"`.
    pub parent_task_id: String,

    /// Queue status.
    pub status: TaskStatus,

    /// Priority hint, 0..=10.
    pub priority: u8,

    /// Principal that receives system escalations for this task.
    pub retry_principal: String,

    /// Active lease id, if leased.
    pub lease_id: Option<String>,

    /// Worker holding the lease, if leased.
    pub worker_id: Option<String>,

    /// When the current lease was granted.
    pub lease_granted_at: Option<DateTime<Utc>>,

    /// When the current lease expires.
    pub lease_expires_at: Option<DateTime<Utc>>,

    /// Heartbeats received on the current lease.
    pub lease_heartbeats: u32,

    /// Retry attempt counter.
    pub attempt: u32,

    /// Retry budget.
    pub max_attempts: u32,

    /// Earliest instant this task may be dispensed, if gated.
    pub not_before: Option<DateTime<Utc>>,

    /// Freeform metadata.
    pub metadata: serde_json::Value,

    /// Submission time.
    pub created_at: DateTime<Utc>,

    /// First lease grant time.
    pub started_at: Option<DateTime<Utc>>,

    /// Terminal transition time.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Returns `true` when another lease attempt remains after the current
    /// one fails or expires.
    #[must_use]
    pub const fn has_retry_budget(&self) -> bool {
        self.attempt + 1 < self.max_attempts
    }
}

/// The subset of a task handed to a worker inside a lease offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOffer {
    /// Task identifier.
    pub task_id: String,

    /// Category of task.
    pub task_type: String,

    /// Brief description.
    pub task_summary: String,

    /// Full task specification.
    pub task_body: String,

    /// Structured task parameters.
    pub inputs: serde_json::Value,

    /// Expected outcome type.
    pub expected_outcome_kind: OutcomeKind,

    /// Expected artifact MIME type.
    pub expected_artifact_mime: String,

    /// Retry attempt this offer represents.
    pub attempt: u32,
}

impl From<&Task> for TaskOffer {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.task_id.clone(),
            task_type: task.task_type.clone(),
            task_summary: task.task_summary.clone(),
            task_body: task.task_body.clone(),
            inputs: task.inputs.clone(),
            expected_outcome_kind: task.expected_outcome_kind,
            expected_artifact_mime: task.expected_artifact_mime.clone(),
            attempt: task.attempt,
        }
    }
}
