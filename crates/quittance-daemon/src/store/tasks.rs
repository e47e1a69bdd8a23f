//! The durable task queue and lease engine.
//!
//! Tasks are multi-writer under conditional updates: every state change is
//! an `UPDATE ... WHERE status = <expected>` inside a transaction, so a
//! losing racer observes zero affected rows and moves on. The terminal
//! calls (`complete`, `fail`, `release`) append their receipt and flip the
//! task in the same transaction; either both commit or neither does.
//!
//! Lease offers are ephemeral: `lease_next` emits no receipt. The offer
//! becomes an obligation only when a worker appends `accepted` through the
//! ledger.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, ToSql, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use quittance_core::config::EngineConfig;
use quittance_core::escalation::{
    LEASE_EXPIRED_REASON, REAPER_MALFORMED_REASON, VOLUNTARY_RELEASE_REASON, class_from_reason,
};
use quittance_core::lease::{Lease, LeaseError, LeaseState};
use quittance_core::receipt::{
    EscalationClass, Fault, Layer, OutcomeKind, ReceiptDraft, Status, ValidationFailure, validate,
    NA, TBD,
};
use quittance_core::task::{
    Task, TaskOffer, TaskSpec, TaskStatus, generate_lease_id, generate_task_id,
};

use super::ledger::{insert_receipt, next_stored_at};
use super::{Store, StoreError, corrupt, from_micros, parse_json_column};

/// `source_system` stamped on receipts the engine emits on a worker's or
/// the reaper's behalf.
const ENGINE_SOURCE: &str = "quittance";

/// Bounded retry loop for losing a lease grant race.
const LEASE_GRANT_RETRIES: usize = 3;

/// Errors from task and lease operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TaskError {
    /// No task with this id exists within the tenant.
    #[error("task not found: {task_id}")]
    NotFound {
        /// The missing task id.
        task_id: String,
    },

    /// No task holds this lease within the tenant.
    #[error("lease not found: {lease_id}")]
    LeaseNotFound {
        /// The missing lease id.
        lease_id: String,
    },

    /// A lease-bound operation was refused.
    #[error(transparent)]
    Lease(#[from] LeaseError),

    /// A `complete` arrived after its lease died. The receipt was still
    /// appended (the ledger is append-only); only the task flip was
    /// refused. Operators reconcile via the task timeline.
    #[error("lease {lease_id} is no longer active; completion receipt {receipt_id} appended for reconciliation")]
    LateCompletion {
        /// The dead lease.
        lease_id: String,
        /// The receipt that was appended anyway.
        receipt_id: String,
    },

    /// The submission or the engine-built receipt failed validation.
    #[error(transparent)]
    Validation(ValidationFailure),

    /// A different receipt already holds the outcome's idempotency key.
    #[error("dedupe key {dedupe_key:?} is already bound to another receipt")]
    DedupeConflict {
        /// The colliding key.
        dedupe_key: String,
    },

    /// The storage layer failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for TaskError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Database(err))
    }
}

/// A granted lease offer: the exclusive claim plus the work to do.
#[derive(Debug, Clone, Serialize)]
pub struct LeaseGrant {
    /// The claim, with its deadline.
    pub lease: Lease,
    /// The task subset the worker needs.
    pub task: TaskOffer,
}

/// A worker's completion report, from which the engine builds the
/// `complete` receipt.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionOutcome {
    /// The worker reporting completion; must hold the lease.
    pub worker_id: String,

    /// Terminal status: `success`, `failure`, or `canceled`.
    pub status: Status,

    /// Outcome type; defaults to `none`.
    #[serde(default = "default_outcome_kind")]
    pub outcome_kind: OutcomeKind,

    /// Inline text outcome.
    #[serde(default)]
    pub outcome_text: String,

    /// Artifact pointer, when the outcome kind calls for one.
    #[serde(default)]
    pub artifact_pointer: Option<String>,

    /// Artifact storage location type.
    #[serde(default)]
    pub artifact_location: Option<String>,

    /// Artifact MIME type.
    #[serde(default)]
    pub artifact_mime: Option<String>,

    /// Artifact integrity checksum.
    #[serde(default)]
    pub artifact_checksum: Option<String>,

    /// Artifact size in bytes.
    #[serde(default)]
    pub artifact_size_bytes: u64,

    /// Idempotency key guarding downstream side effects.
    #[serde(default)]
    pub dedupe_key: Option<String>,
}

const fn default_outcome_kind() -> OutcomeKind {
    OutcomeKind::None
}

/// Result of a successful completion.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRecord {
    /// The completed task.
    pub task_id: String,
    /// The released lease.
    pub lease_id: String,
    /// Terminal status recorded.
    pub status: Status,
    /// The appended `complete` receipt.
    pub receipt_id: String,
    /// When the completion was recorded.
    pub completed_at: DateTime<Utc>,
}

/// A worker's failure report, from which the engine builds the `escalate`
/// receipt.
#[derive(Debug, Clone, Deserialize)]
pub struct FailureReport {
    /// The worker reporting failure; must hold the lease.
    pub worker_id: String,

    /// What went wrong. A `class:` prefix (`policy:`, `capability:`, ...)
    /// selects the escalation class when none is given explicitly.
    pub reason: String,

    /// Whether the task should be retried; subject to the retry budget.
    #[serde(default = "default_retryable")]
    pub retryable: bool,

    /// Explicit escalation class; derived from the reason when absent.
    #[serde(default)]
    pub escalation_class: Option<EscalationClass>,

    /// Escalation target; the task's retry principal when absent.
    #[serde(default)]
    pub escalation_to: Option<String>,
}

const fn default_retryable() -> bool {
    true
}

/// Result of a failure report.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    /// The failed task.
    pub task_id: String,
    /// The released lease.
    pub lease_id: String,
    /// The appended `escalate` receipt.
    pub receipt_id: String,
    /// Whether the task went back to the queue.
    pub retry_scheduled: bool,
    /// The attempt the next lease will carry, when retry was scheduled.
    pub next_attempt: Option<u32>,
    /// The principal the escalation was routed to.
    pub escalation_to: String,
}

/// Counters from one reaper sweep.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SweepStats {
    /// Expired leases observed.
    pub swept: usize,
    /// Tasks returned to the queue.
    pub requeued: usize,
    /// Tasks whose retry budget ran out.
    pub exhausted: usize,
    /// Malformed rows quarantined and skipped.
    pub quarantined: usize,
}

/// Filters for task listing.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Restrict to one queue status.
    pub status: Option<TaskStatus>,
    /// Restrict to one owning agent.
    pub recipient_ai: Option<String>,
    /// Page size, clamped to 1..=100.
    pub limit: usize,
}

/// The task queue and lease engine over the shared store.
#[derive(Debug, Clone)]
pub struct TaskStore {
    store: Store,
}

const TASK_COLUMNS: &str = "tenant_id, task_id, task_type, task_summary, task_body, inputs, \
     recipient_ai, from_principal, for_principal, expected_outcome_kind, expected_artifact_mime, \
     caused_by_receipt_id, parent_task_id, status, priority, retry_principal, lease_id, \
     worker_id, lease_granted_at, lease_expires_at, lease_heartbeats, attempt, max_attempts, \
     not_before, metadata, created_at, started_at, completed_at";

impl TaskStore {
    pub(crate) const fn new(store: Store) -> Self {
        Self { store }
    }

    /// Persists a task in `queued`. No receipt is emitted: acceptance is
    /// the worker's act, recorded when it appends `accepted` through the
    /// ledger.
    ///
    /// # Errors
    ///
    /// [`TaskError::Validation`] when the submission violates the sentinel
    /// or size rules; [`TaskError::Store`] when the database fails.
    pub fn submit(
        &self,
        tenant_id: &str,
        spec: TaskSpec,
        engine: &EngineConfig,
        tenant_retry_principal: Option<&str>,
    ) -> Result<Task, TaskError> {
        let task_id = generate_task_id();
        validate_spec(&task_id, &spec)?;

        let retry_principal = spec
            .retry_principal
            .clone()
            .filter(|p| !p.is_empty() && p != NA && p != TBD)
            .or_else(|| tenant_retry_principal.map(str::to_owned))
            .unwrap_or_else(|| engine.default_retry_principal.clone());
        let max_attempts = spec.max_attempts.unwrap_or(engine.default_max_attempts).max(1);
        let not_before = spec.not_before();
        let now = Utc::now();

        let inputs = serde_json::to_string(&spec.inputs).map_err(StoreError::from)?;
        let metadata = serde_json::to_string(&spec.metadata).map_err(StoreError::from)?;

        let conn = self.store.conn();
        conn.execute(
            "INSERT INTO tasks (tenant_id, task_id, task_type, task_summary, task_body, inputs, \
                 recipient_ai, from_principal, for_principal, expected_outcome_kind, \
                 expected_artifact_mime, caused_by_receipt_id, parent_task_id, status, priority, \
                 retry_principal, lease_heartbeats, attempt, max_attempts, not_before, metadata, \
                 created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, 0, \
                 0, ?17, ?18, ?19, ?20)",
            params![
                tenant_id,
                task_id,
                spec.task_type,
                spec.task_summary,
                spec.task_body,
                inputs,
                spec.recipient_ai,
                spec.from_principal,
                spec.for_principal,
                spec.expected_outcome_kind.as_str(),
                spec.expected_artifact_mime,
                spec.caused_by_receipt_id,
                spec.parent_task_id,
                TaskStatus::Queued.as_str(),
                spec.priority.min(10),
                retry_principal,
                max_attempts,
                not_before.map(|dt| dt.timestamp_micros()),
                metadata,
                now.timestamp_micros(),
            ],
        )?;
        drop(conn);

        tracing::info!(tenant_id, task_id = %task_id, task_type = %spec.task_type, "task queued");
        self.get(tenant_id, &task_id)
    }

    /// Fetches a task.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotFound`] when the id is unknown within the tenant.
    pub fn get(&self, tenant_id: &str, task_id: &str) -> Result<Task, TaskError> {
        let conn = self.store.conn();
        get_task_opt(&conn, tenant_id, task_id)?.ok_or_else(|| TaskError::NotFound {
            task_id: task_id.to_owned(),
        })
    }

    /// Lists tasks matching the filter, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Store`] when the database fails.
    pub fn list(&self, tenant_id: &str, filter: &TaskFilter) -> Result<Vec<Task>, TaskError> {
        let limit = if filter.limit == 0 { 20 } else { filter.limit.clamp(1, 100) };
        let mut sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE tenant_id = ?1"
        );
        let limit_i64 = limit as i64;
        let mut args: Vec<&dyn ToSql> = vec![&tenant_id];
        let status_str = filter.status.map(TaskStatus::as_str);
        if let Some(ref status) = status_str {
            sql.push_str(" AND status = ?");
            args.push(status);
        }
        if let Some(ref recipient) = filter.recipient_ai {
            sql.push_str(" AND recipient_ai = ?");
            args.push(recipient);
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ?");
        args.push(&limit_i64);

        let conn = self.store.conn();
        let mut stmt = conn.prepare(&sql)?;
        let tasks = stmt
            .query_map(&args[..], row_to_task)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// Offers the head of the queue to a worker, flipping the task to
    /// `leased` with a fresh lease. Returns `None` when no work matches.
    ///
    /// The offer is transient: no receipt is emitted. The grant is
    /// linearizable against concurrent callers via the conditional update;
    /// a losing racer selects the next candidate, bounded by a small retry
    /// loop.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Store`] when the database fails.
    pub fn lease_next(
        &self,
        tenant_id: &str,
        worker_id: &str,
        capabilities: &[String],
        preferred_kinds: &[String],
        engine: &EngineConfig,
        now: DateTime<Utc>,
    ) -> Result<Option<LeaseGrant>, TaskError> {
        let mut conn = self.store.conn();
        let tx = conn.transaction()?;

        for _ in 0..LEASE_GRANT_RETRIES {
            let candidate = select_candidate(&tx, tenant_id, preferred_kinds, now)?;
            let Some(task) = candidate else {
                return Ok(None);
            };

            let lease = Lease::granted(
                &generate_lease_id(),
                &task.task_id,
                worker_id,
                now,
                engine.lease_ttl_seconds,
            );
            let updated = tx.execute(
                "UPDATE tasks SET status = 'leased', lease_id = ?1, worker_id = ?2, \
                     lease_granted_at = ?3, lease_expires_at = ?4, lease_heartbeats = 0, \
                     started_at = COALESCE(started_at, ?3) \
                 WHERE tenant_id = ?5 AND task_id = ?6 AND status = 'queued'",
                params![
                    lease.lease_id,
                    worker_id,
                    now.timestamp_micros(),
                    lease.expires_at.timestamp_micros(),
                    tenant_id,
                    task.task_id,
                ],
            )?;
            if updated == 1 {
                tx.commit()?;
                tracing::info!(
                    tenant_id,
                    task_id = %task.task_id,
                    lease_id = %lease.lease_id,
                    worker_id,
                    ?capabilities,
                    "lease granted"
                );
                let offer = TaskOffer::from(&task);
                return Ok(Some(LeaseGrant { lease, task: offer }));
            }
            // Lost the race on this row; pick the next candidate.
        }

        Ok(None)
    }

    /// Extends an active lease by the TTL from now, bounded by the maximum
    /// lease lifetime. Returns the lease with its new deadline.
    ///
    /// # Errors
    ///
    /// [`TaskError::LeaseNotFound`], or [`TaskError::Lease`] with
    /// `LeaseExpired` / `LeaseNotOwned` / `LeaseReleased`.
    pub fn heartbeat(
        &self,
        tenant_id: &str,
        lease_id: &str,
        worker_id: &str,
        engine: &EngineConfig,
        now: DateTime<Utc>,
    ) -> Result<Lease, TaskError> {
        let mut conn = self.store.conn();
        let tx = conn.transaction()?;

        let task = find_by_lease(&tx, tenant_id, lease_id)?.ok_or_else(|| {
            TaskError::LeaseNotFound {
                lease_id: lease_id.to_owned(),
            }
        })?;
        let mut lease = lease_view(&task).ok_or_else(|| TaskError::LeaseNotFound {
            lease_id: lease_id.to_owned(),
        })?;

        let new_expiry = lease.renewed_expiry(
            worker_id,
            now,
            engine.lease_ttl_seconds,
            engine.max_lease_lifetime_seconds,
        )?;

        tx.execute(
            "UPDATE tasks SET lease_expires_at = ?1, lease_heartbeats = lease_heartbeats + 1 \
             WHERE tenant_id = ?2 AND lease_id = ?3 AND status = 'leased'",
            params![new_expiry.timestamp_micros(), tenant_id, lease_id],
        )?;
        tx.commit()?;

        lease.expires_at = new_expiry;
        lease.heartbeats += 1;
        tracing::debug!(tenant_id, lease_id, worker_id, %new_expiry, "lease renewed");
        Ok(lease)
    }

    /// Records a completion: validates the engine-built `complete` receipt,
    /// appends it, and flips the task to `completed`, atomically.
    ///
    /// When the lease has already expired or been reclaimed, the receipt is
    /// still appended (the ledger is append-only) and the refusal is
    /// reported as [`TaskError::LateCompletion`] carrying the appended
    /// receipt id.
    ///
    /// # Errors
    ///
    /// Lease errors, [`TaskError::Validation`], [`TaskError::LateCompletion`],
    /// or [`TaskError::Store`].
    pub fn complete(
        &self,
        tenant_id: &str,
        lease_id: &str,
        outcome: &CompletionOutcome,
        now: DateTime<Utc>,
    ) -> Result<CompletionRecord, TaskError> {
        let mut conn = self.store.conn();
        let tx = conn.transaction()?;

        let task = find_by_lease(&tx, tenant_id, lease_id)?.ok_or_else(|| {
            TaskError::LeaseNotFound {
                lease_id: lease_id.to_owned(),
            }
        })?;
        if task.worker_id.as_deref() != Some(outcome.worker_id.as_str()) {
            return Err(LeaseError::NotOwned {
                lease_id: lease_id.to_owned(),
                worker_id: outcome.worker_id.clone(),
            }
            .into());
        }

        let mut draft = ReceiptDraft::complete(
            &task.task_id,
            &task.task_type,
            &task.task_summary,
            outcome.status,
            outcome.outcome_kind,
        )
        .from_principal(&task.from_principal)
        .for_principal(&task.for_principal)
        .source_system(ENGINE_SOURCE)
        .recipient_ai(&task.recipient_ai)
        .parent_task_id(&task.parent_task_id)
        .caused_by(&task.caused_by_receipt_id)
        .attempt(task.attempt)
        .task_body(&task.task_body)
        .inputs(task.inputs.clone())
        .expects(task.expected_outcome_kind, &task.expected_artifact_mime)
        .completed_at(now);
        if !outcome.outcome_text.is_empty() {
            draft = draft.outcome_text(&outcome.outcome_text);
        }
        if outcome.artifact_pointer.is_some()
            || outcome.artifact_location.is_some()
            || outcome.artifact_mime.is_some()
        {
            draft = draft.artifact(
                outcome.artifact_pointer.as_deref().unwrap_or(NA),
                outcome.artifact_location.as_deref().unwrap_or(NA),
                outcome.artifact_mime.as_deref().unwrap_or(NA),
                outcome.artifact_checksum.as_deref().unwrap_or(NA),
                outcome.artifact_size_bytes,
            );
        }
        if let Some(key) = outcome.dedupe_key.as_deref() {
            draft = draft.dedupe_key(key);
        }
        if let Some(started) = task.started_at {
            draft = draft.started_at(started);
        }

        let receipt = draft.into_receipt(tenant_id);
        validate(&receipt).map_err(TaskError::Validation)?;
        if receipt.dedupe_key != NA {
            let existing: Option<String> = tx
                .query_row(
                    "SELECT receipt_id FROM receipts WHERE tenant_id = ?1 AND dedupe_key = ?2",
                    params![tenant_id, receipt.dedupe_key],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                return Err(TaskError::DedupeConflict {
                    dedupe_key: receipt.dedupe_key,
                });
            }
        }

        let stored_at = next_stored_at(&tx, tenant_id, now)?;
        insert_receipt(&tx, &receipt, stored_at)?;

        let lease_live = task.status == TaskStatus::Leased
            && task.lease_expires_at.is_some_and(|deadline| deadline > now);
        if lease_live {
            tx.execute(
                "UPDATE tasks SET status = 'completed', completed_at = ?1 \
                 WHERE tenant_id = ?2 AND task_id = ?3 AND status = 'leased'",
                params![now.timestamp_micros(), tenant_id, task.task_id],
            )?;
            tx.commit()?;
            tracing::info!(
                tenant_id,
                task_id = %task.task_id,
                lease_id,
                receipt_id = %receipt.receipt_id,
                status = outcome.status.as_str(),
                "task completed"
            );
            Ok(CompletionRecord {
                task_id: task.task_id,
                lease_id: lease_id.to_owned(),
                status: outcome.status,
                receipt_id: receipt.receipt_id,
                completed_at: now,
            })
        } else {
            // Append-only: the late receipt is kept and reconciled to the
            // surviving task via task_id; the lease-bound flip is refused.
            tx.commit()?;
            tracing::warn!(
                tenant_id,
                task_id = %task.task_id,
                lease_id,
                receipt_id = %receipt.receipt_id,
                "late completion: receipt appended after lease expiry"
            );
            Err(TaskError::LateCompletion {
                lease_id: lease_id.to_owned(),
                receipt_id: receipt.receipt_id,
            })
        }
    }

    /// Records a failure: appends the `escalate` receipt and either returns
    /// the task to the queue (retryable, budget left) or fails it, in one
    /// transaction.
    ///
    /// # Errors
    ///
    /// Lease errors, [`TaskError::Validation`], or [`TaskError::Store`].
    pub fn fail(
        &self,
        tenant_id: &str,
        lease_id: &str,
        report: &FailureReport,
        now: DateTime<Utc>,
    ) -> Result<FailureRecord, TaskError> {
        let mut conn = self.store.conn();
        let tx = conn.transaction()?;

        let task = find_by_lease(&tx, tenant_id, lease_id)?.ok_or_else(|| {
            TaskError::LeaseNotFound {
                lease_id: lease_id.to_owned(),
            }
        })?;
        if task.worker_id.as_deref() != Some(report.worker_id.as_str()) {
            return Err(LeaseError::NotOwned {
                lease_id: lease_id.to_owned(),
                worker_id: report.worker_id.clone(),
            }
            .into());
        }
        if task.status != TaskStatus::Leased {
            return Err(LeaseError::Released {
                lease_id: lease_id.to_owned(),
            }
            .into());
        }
        if let Some(deadline) = task.lease_expires_at {
            if deadline <= now {
                return Err(LeaseError::Expired {
                    lease_id: lease_id.to_owned(),
                    expired_at: deadline,
                }
                .into());
            }
        }

        let will_retry = report.retryable && task.has_retry_budget();
        let class = report
            .escalation_class
            .filter(|c| *c != EscalationClass::Na)
            .unwrap_or_else(|| class_from_reason(&report.reason));
        let escalation_to = report
            .escalation_to
            .clone()
            .filter(|to| !to.is_empty() && to != NA)
            .unwrap_or_else(|| task.retry_principal.clone());

        let receipt = escalation_draft(&task, class, &report.reason, &escalation_to, will_retry)
            .into_receipt(tenant_id);
        validate(&receipt).map_err(TaskError::Validation)?;

        let stored_at = next_stored_at(&tx, tenant_id, now)?;
        insert_receipt(&tx, &receipt, stored_at)?;

        let (retry_scheduled, next_attempt) = if will_retry {
            tx.execute(
                "UPDATE tasks SET status = 'queued', attempt = attempt + 1, lease_id = NULL, \
                     worker_id = NULL, lease_granted_at = NULL, lease_expires_at = NULL, \
                     lease_heartbeats = 0 \
                 WHERE tenant_id = ?1 AND task_id = ?2 AND status = 'leased'",
                params![tenant_id, task.task_id],
            )?;
            (true, Some(task.attempt + 1))
        } else {
            tx.execute(
                "UPDATE tasks SET status = 'failed', completed_at = ?1 \
                 WHERE tenant_id = ?2 AND task_id = ?3 AND status = 'leased'",
                params![now.timestamp_micros(), tenant_id, task.task_id],
            )?;
            (false, None)
        };
        tx.commit()?;

        tracing::info!(
            tenant_id,
            task_id = %task.task_id,
            lease_id,
            receipt_id = %receipt.receipt_id,
            class = class.as_str(),
            retry_scheduled,
            "task failure escalated"
        );
        Ok(FailureRecord {
            task_id: task.task_id,
            lease_id: lease_id.to_owned(),
            receipt_id: receipt.receipt_id,
            retry_scheduled,
            next_attempt,
            escalation_to,
        })
    }

    /// Voluntary cancellation: the worker hands the task back. Same retry
    /// policy as a retryable failure.
    ///
    /// # Errors
    ///
    /// Same as [`TaskStore::fail`].
    pub fn release(
        &self,
        tenant_id: &str,
        lease_id: &str,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<FailureRecord, TaskError> {
        let report = FailureReport {
            worker_id: worker_id.to_owned(),
            reason: VOLUNTARY_RELEASE_REASON.to_owned(),
            retryable: true,
            escalation_class: Some(EscalationClass::Other),
            escalation_to: None,
        };
        self.fail(tenant_id, lease_id, &report, now)
    }

    /// One reaper pass over every tenant: expired leases are reclaimed,
    /// each with an `escalate(policy, "lease_expired")` receipt routed to
    /// the task's retry principal, then the retry policy applies. Malformed
    /// rows are quarantined with `escalate(other, "reaper_malformed")` and
    /// skipped.
    ///
    /// Idempotent: a row that changed hands between the scan and its
    /// conditional update is simply skipped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only for scan-level failures; per-task
    /// failures are quarantined or logged.
    pub fn sweep_expired(
        &self,
        engine: &EngineConfig,
        now: DateTime<Utc>,
    ) -> Result<SweepStats, StoreError> {
        let mut conn = self.store.conn();

        let expired: Vec<(String, String)> = {
            let mut stmt = conn.prepare(
                "SELECT tenant_id, task_id FROM tasks \
                 WHERE status = 'leased' AND lease_expires_at <= ?1",
            )?;
            let rows = stmt
                .query_map(params![now.timestamp_micros()], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut stats = SweepStats {
            swept: expired.len(),
            ..SweepStats::default()
        };

        for (tenant_id, task_id) in expired {
            match self.reclaim_one(&mut conn, &tenant_id, &task_id, now) {
                Ok(Some(true)) => stats.requeued += 1,
                Ok(Some(false)) => stats.exhausted += 1,
                Ok(None) => {} // changed hands between scan and update
                Err(err) => {
                    tracing::warn!(
                        tenant_id,
                        task_id,
                        error = %err,
                        "malformed task row; quarantining"
                    );
                    if self
                        .quarantine_one(&mut conn, &tenant_id, &task_id, engine, now)
                        .is_ok()
                    {
                        stats.quarantined += 1;
                    } else {
                        tracing::error!(tenant_id, task_id, "quarantine failed; row skipped");
                    }
                }
            }
        }

        if stats.swept > 0 {
            tracing::info!(
                swept = stats.swept,
                requeued = stats.requeued,
                exhausted = stats.exhausted,
                quarantined = stats.quarantined,
                "reaper sweep finished"
            );
        }
        Ok(stats)
    }

    /// Reclaims one expired lease. Returns `Some(true)` when requeued,
    /// `Some(false)` when the retry budget ran out, `None` when the row
    /// changed hands.
    fn reclaim_one(
        &self,
        conn: &mut Connection,
        tenant_id: &str,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<bool>, TaskError> {
        let tx = conn.transaction()?;

        let Some(task) = get_task_opt(&tx, tenant_id, task_id)? else {
            return Ok(None);
        };
        if task.status != TaskStatus::Leased
            || !task.lease_expires_at.is_some_and(|deadline| deadline <= now)
        {
            return Ok(None);
        }

        let will_retry = task.has_retry_budget();
        let receipt = escalation_draft(
            &task,
            EscalationClass::Policy,
            LEASE_EXPIRED_REASON,
            &task.retry_principal,
            will_retry,
        )
        .into_receipt(tenant_id);
        validate(&receipt).map_err(TaskError::Validation)?;

        let stored_at = next_stored_at(&tx, tenant_id, now)?;
        insert_receipt(&tx, &receipt, stored_at)?;

        let updated = if will_retry {
            tx.execute(
                "UPDATE tasks SET status = 'queued', attempt = attempt + 1, lease_id = NULL, \
                     worker_id = NULL, lease_granted_at = NULL, lease_expires_at = NULL, \
                     lease_heartbeats = 0 \
                 WHERE tenant_id = ?1 AND task_id = ?2 AND status = 'leased'",
                params![tenant_id, task_id],
            )?
        } else {
            tx.execute(
                "UPDATE tasks SET status = 'expired', completed_at = ?1 \
                 WHERE tenant_id = ?2 AND task_id = ?3 AND status = 'leased'",
                params![now.timestamp_micros(), tenant_id, task_id],
            )?
        };
        if updated == 0 {
            return Ok(None); // rollback drops the receipt with it
        }
        tx.commit()?;

        tracing::info!(
            tenant_id,
            task_id,
            receipt_id = %receipt.receipt_id,
            requeued = will_retry,
            "expired lease reclaimed"
        );
        Ok(Some(will_retry))
    }

    /// Takes a malformed row out of the sweep set: emits
    /// `escalate(other, "reaper_malformed")` built from safe fallbacks and
    /// fails the task.
    fn quarantine_one(
        &self,
        conn: &mut Connection,
        tenant_id: &str,
        task_id: &str,
        engine: &EngineConfig,
        now: DateTime<Utc>,
    ) -> Result<(), TaskError> {
        let tx = conn.transaction()?;

        let receipt = ReceiptDraft::escalate(
            task_id,
            "quarantine",
            "malformed task row",
            EscalationClass::Other,
            REAPER_MALFORMED_REASON,
            &engine.default_retry_principal,
        )
        .from_principal(ENGINE_SOURCE)
        .for_principal(ENGINE_SOURCE)
        .source_system(ENGINE_SOURCE)
        .into_receipt(tenant_id);
        validate(&receipt).map_err(TaskError::Validation)?;

        let stored_at = next_stored_at(&tx, tenant_id, now)?;
        insert_receipt(&tx, &receipt, stored_at)?;
        tx.execute(
            "UPDATE tasks SET status = 'failed', completed_at = ?1 \
             WHERE tenant_id = ?2 AND task_id = ?3 AND status = 'leased'",
            params![now.timestamp_micros(), tenant_id, task_id],
        )?;
        tx.commit()?;
        Ok(())
    }
}

/// Builds the engine's `escalate` draft for a task, from its row.
fn escalation_draft(
    task: &Task,
    class: EscalationClass,
    reason: &str,
    escalation_to: &str,
    will_retry: bool,
) -> ReceiptDraft {
    let mut draft = ReceiptDraft::escalate(
        &task.task_id,
        &task.task_type,
        &task.task_summary,
        class,
        reason,
        escalation_to,
    )
    .from_principal(&task.from_principal)
    .for_principal(&task.for_principal)
    .source_system(ENGINE_SOURCE)
    .parent_task_id(&task.parent_task_id)
    .caused_by(&task.caused_by_receipt_id)
    .attempt(task.attempt + u32::from(will_retry))
    .retry_requested(will_retry)
    .task_body(&task.task_body)
    .inputs(task.inputs.clone())
    .expects(task.expected_outcome_kind, &task.expected_artifact_mime);
    if let Some(started) = task.started_at {
        draft = draft.started_at(started);
    }
    draft
}

/// Validates a submission against the same sentinel and size rules as
/// receipts, by running a synthetic `accepted` draft through the receipt
/// pipeline, plus the priority bound.
fn validate_spec(task_id: &str, spec: &TaskSpec) -> Result<(), TaskError> {
    let synthetic = ReceiptDraft::accepted(task_id, &spec.task_type, &spec.task_summary)
        .from_principal(&spec.from_principal)
        .for_principal(&spec.for_principal)
        .source_system(ENGINE_SOURCE)
        .recipient_ai(&spec.recipient_ai)
        .task_body(&spec.task_body)
        .inputs(spec.inputs.clone())
        .metadata(spec.metadata.clone())
        .into_receipt("validation");
    let mut faults = match validate(&synthetic) {
        Ok(()) => Vec::new(),
        Err(failure) => failure.faults,
    };
    if spec.priority > 10 {
        faults.push(Fault {
            code: "TASK-STRUCT-001".to_owned(),
            layer: Layer::Structural,
            path: "priority".to_owned(),
            message: format!("priority must be within 0..=10, got {}", spec.priority),
            hint: None,
        });
    }
    if faults.is_empty() {
        Ok(())
    } else {
        Err(TaskError::Validation(ValidationFailure { faults }))
    }
}

fn select_candidate(
    conn: &Connection,
    tenant_id: &str,
    preferred_kinds: &[String],
    now: DateTime<Utc>,
) -> rusqlite::Result<Option<Task>> {
    let now_micros = now.timestamp_micros();

    if !preferred_kinds.is_empty() {
        let placeholders = vec!["?"; preferred_kinds.len()].join(", ");
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE tenant_id = ? AND status = 'queued' \
               AND (not_before IS NULL OR not_before <= ?) \
               AND task_type IN ({placeholders}) \
             ORDER BY priority DESC, created_at ASC, id ASC LIMIT 1"
        );
        let mut args: Vec<&dyn ToSql> = vec![&tenant_id, &now_micros];
        for kind in preferred_kinds {
            args.push(kind);
        }
        let preferred = conn
            .query_row(&sql, &args[..], row_to_task)
            .optional()?;
        if preferred.is_some() {
            return Ok(preferred);
        }
    }

    conn.query_row(
        &format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE tenant_id = ?1 AND status = 'queued' \
               AND (not_before IS NULL OR not_before <= ?2) \
             ORDER BY priority DESC, created_at ASC, id ASC LIMIT 1"
        ),
        params![tenant_id, now_micros],
        row_to_task,
    )
    .optional()
}

fn find_by_lease(
    conn: &Connection,
    tenant_id: &str,
    lease_id: &str,
) -> rusqlite::Result<Option<Task>> {
    conn.query_row(
        &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE tenant_id = ?1 AND lease_id = ?2"),
        params![tenant_id, lease_id],
        row_to_task,
    )
    .optional()
}

fn get_task_opt(
    conn: &Connection,
    tenant_id: &str,
    task_id: &str,
) -> rusqlite::Result<Option<Task>> {
    conn.query_row(
        &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE tenant_id = ?1 AND task_id = ?2"),
        params![tenant_id, task_id],
        row_to_task,
    )
    .optional()
}

/// Projects the lease columns of a task row into a [`Lease`] value.
fn lease_view(task: &Task) -> Option<Lease> {
    let lease_id = task.lease_id.clone()?;
    let worker_id = task.worker_id.clone()?;
    let granted_at = task.lease_granted_at?;
    let expires_at = task.lease_expires_at?;
    let state = match task.status {
        TaskStatus::Leased => LeaseState::Active,
        TaskStatus::Expired => LeaseState::Expired,
        _ => LeaseState::Released,
    };
    Some(Lease {
        lease_id,
        task_id: task.task_id.clone(),
        worker_id,
        granted_at,
        expires_at,
        heartbeats: task.lease_heartbeats,
        state,
    })
}

/// Converts a task row (in `TASK_COLUMNS` order) to a [`Task`].
fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let status_raw: String = row.get(13)?;
    let expected_kind_raw: String = row.get(9)?;
    let inputs_raw: String = row.get(5)?;
    let metadata_raw: String = row.get(24)?;

    Ok(Task {
        tenant_id: row.get(0)?,
        task_id: row.get(1)?,
        task_type: row.get(2)?,
        task_summary: row.get(3)?,
        task_body: row.get(4)?,
        inputs: parse_json_column(5, "inputs", &inputs_raw)?,
        recipient_ai: row.get(6)?,
        from_principal: row.get(7)?,
        for_principal: row.get(8)?,
        expected_outcome_kind: OutcomeKind::parse(&expected_kind_raw)
            .ok_or_else(|| corrupt(9, "expected_outcome_kind", &expected_kind_raw))?,
        expected_artifact_mime: row.get(10)?,
        caused_by_receipt_id: row.get(11)?,
        parent_task_id: row.get(12)?,
        status: TaskStatus::parse(&status_raw).ok_or_else(|| corrupt(13, "status", &status_raw))?,
        priority: row.get::<_, i64>(14)? as u8,
        retry_principal: row.get(15)?,
        lease_id: row.get(16)?,
        worker_id: row.get(17)?,
        lease_granted_at: from_micros(row.get(18)?),
        lease_expires_at: from_micros(row.get(19)?),
        lease_heartbeats: row.get::<_, i64>(20)? as u32,
        attempt: row.get::<_, i64>(21)? as u32,
        max_attempts: row.get::<_, i64>(22)? as u32,
        not_before: from_micros(row.get(23)?),
        metadata: parse_json_column(24, "metadata", &metadata_raw)?,
        created_at: from_micros(Some(row.get(25)?)).unwrap_or_else(Utc::now),
        started_at: from_micros(row.get(26)?),
        completed_at: from_micros(row.get(27)?),
    })
}
