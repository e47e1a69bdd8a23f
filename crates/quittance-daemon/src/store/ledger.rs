//! The receipt ledger: single-writer, append-only, append-optimized.
//!
//! All receipt mutations funnel through [`ReceiptLedger::append`] and
//! [`ReceiptLedger::archive`]; every other method is a tenant-scoped read.
//! `stored_at` is assigned here from the ledger clock and is monotonic
//! non-decreasing per tenant, clamped against the tenant's previous
//! maximum so a wall-clock step backwards cannot reorder the ledger.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

use quittance_core::derived::DerivedStatus;
use quittance_core::receipt::{
    EscalationClass, OutcomeKind, Phase, Receipt, ReceiptDraft, Status, ValidationFailure,
    validate, NA,
};

use super::{Store, StoreError, corrupt, from_micros, parse_json_column, to_micros};

/// Errors from ledger operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// The receipt failed schema or invariant checks.
    #[error(transparent)]
    Validation(ValidationFailure),

    /// `(tenant_id, receipt_id)` already exists with different content.
    #[error("receipt {receipt_id} already exists with different content")]
    DuplicateReceipt {
        /// The colliding receipt id.
        receipt_id: String,
    },

    /// A different receipt already holds this idempotency key.
    #[error("dedupe key {dedupe_key:?} is already bound to receipt {existing_receipt_id}")]
    DedupeConflict {
        /// The colliding key.
        dedupe_key: String,
        /// The receipt that holds it.
        existing_receipt_id: String,
    },

    /// No receipt with this id exists within the tenant.
    #[error("receipt not found: {receipt_id}")]
    NotFound {
        /// The missing receipt id.
        receipt_id: String,
    },

    /// The provenance graph contains a cycle. Impossible by construction,
    /// defended against anyway.
    #[error("provenance cycle detected at receipt {receipt_id}")]
    ChainCycle {
        /// The receipt where the traversal bit its own tail.
        receipt_id: String,
    },

    /// The storage layer failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Database(err))
    }
}

/// Result of an append: a fresh row, or an idempotent replay of one that
/// was already stored.
#[derive(Debug, Clone)]
pub enum AppendOutcome {
    /// A new row was written.
    Appended(Receipt),
    /// An identical receipt was already in the ledger; nothing changed.
    AlreadyStored(Receipt),
}

impl AppendOutcome {
    /// The stored receipt, whichever way it got there.
    #[must_use]
    pub const fn receipt(&self) -> &Receipt {
        match self {
            Self::Appended(r) | Self::AlreadyStored(r) => r,
        }
    }
}

/// A provenance chain, possibly truncated at the traversal depth cap.
#[derive(Debug, Clone)]
pub struct ChainPage {
    /// Receipts in `stored_at` order.
    pub chain: Vec<Receipt>,
    /// `true` when the depth cap cut the traversal short; the caller can
    /// continue from the last returned receipt.
    pub truncated: bool,
}

/// The single writer for receipt rows.
#[derive(Debug, Clone)]
pub struct ReceiptLedger {
    store: Store,
}

const RECEIPT_COLUMNS: &str = "schema_version, tenant_id, receipt_id, task_id, parent_task_id, \
     caused_by_receipt_id, dedupe_key, attempt, from_principal, for_principal, source_system, \
     recipient_ai, trust_domain, phase, status, realtime, task_type, task_summary, task_body, \
     inputs, expected_outcome_kind, expected_artifact_mime, outcome_kind, outcome_text, \
     artifact_location, artifact_pointer, artifact_checksum, artifact_size_bytes, artifact_mime, \
     escalation_class, escalation_reason, escalation_to, retry_requested, created_at, stored_at, \
     started_at, completed_at, read_at, archived_at, metadata";

impl ReceiptLedger {
    pub(crate) const fn new(store: Store) -> Self {
        Self { store }
    }

    /// Validates, normalizes, and appends a receipt under `tenant_id`.
    ///
    /// The tenant comes from the caller's authenticated scope; any value in
    /// the draft body was already dropped at deserialization. Replays of an
    /// identical payload (same `receipt_id`, or same `dedupe_key` with a
    /// regenerated id) return [`AppendOutcome::AlreadyStored`].
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Validation`] with the full fault list.
    /// - [`LedgerError::DuplicateReceipt`] / [`LedgerError::DedupeConflict`]
    ///   when the id or key is reused with different content.
    /// - [`LedgerError::Store`] when the database fails.
    pub fn append(&self, tenant_id: &str, draft: ReceiptDraft) -> Result<AppendOutcome, LedgerError> {
        let receipt = draft.into_receipt(tenant_id);
        validate(&receipt).map_err(LedgerError::Validation)?;

        let mut conn = self.store.conn();
        let tx = conn.transaction()?;

        if let Some(existing) = get_opt(&tx, tenant_id, &receipt.receipt_id)? {
            if existing.content_fingerprint(true) == receipt.content_fingerprint(true) {
                return Ok(AppendOutcome::AlreadyStored(existing));
            }
            return Err(LedgerError::DuplicateReceipt {
                receipt_id: receipt.receipt_id,
            });
        }

        if receipt.dedupe_key != NA {
            if let Some(existing) = get_by_dedupe_key(&tx, tenant_id, &receipt.dedupe_key)? {
                if existing.content_fingerprint(false) == receipt.content_fingerprint(false) {
                    return Ok(AppendOutcome::AlreadyStored(existing));
                }
                return Err(LedgerError::DedupeConflict {
                    dedupe_key: receipt.dedupe_key,
                    existing_receipt_id: existing.receipt_id,
                });
            }
        }

        let stored_at = next_stored_at(&tx, tenant_id, Utc::now())?;
        insert_receipt(&tx, &receipt, stored_at)?;
        tx.commit()?;

        let mut stored = receipt;
        stored.stored_at = from_micros(Some(stored_at));
        tracing::info!(
            tenant_id,
            receipt_id = %stored.receipt_id,
            task_id = %stored.task_id,
            phase = stored.phase.as_str(),
            "receipt appended"
        );
        Ok(AppendOutcome::Appended(stored))
    }

    /// Fetches a single receipt.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] when the id is unknown within the tenant.
    pub fn get(&self, tenant_id: &str, receipt_id: &str) -> Result<Receipt, LedgerError> {
        let conn = self.store.conn();
        get_opt(&conn, tenant_id, receipt_id)?.ok_or_else(|| LedgerError::NotFound {
            receipt_id: receipt_id.to_owned(),
        })
    }

    /// Soft-hides a receipt from inbox queries. Content is unchanged;
    /// repeat calls are no-ops returning the original archive time.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] when the id is unknown within the tenant.
    pub fn archive(&self, tenant_id: &str, receipt_id: &str) -> Result<DateTime<Utc>, LedgerError> {
        let mut conn = self.store.conn();
        let tx = conn.transaction()?;

        let existing: Option<Option<i64>> = tx
            .query_row(
                "SELECT archived_at FROM receipts WHERE tenant_id = ?1 AND receipt_id = ?2",
                params![tenant_id, receipt_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(archived_at) = existing else {
            return Err(LedgerError::NotFound {
                receipt_id: receipt_id.to_owned(),
            });
        };

        if let Some(already) = from_micros(archived_at) {
            return Ok(already);
        }

        let now = Utc::now();
        tx.execute(
            "UPDATE receipts SET archived_at = ?1 \
             WHERE tenant_id = ?2 AND receipt_id = ?3 AND archived_at IS NULL",
            params![now.timestamp_micros(), tenant_id, receipt_id],
        )?;
        tx.commit()?;
        Ok(now)
    }

    /// Active obligations for an agent, newest first: `accepted` receipts
    /// that are unarchived and whose task has no terminal receipt yet.
    ///
    /// The second condition is what makes the inbox derived state rather
    /// than a mailbox: a `complete` or `escalate` on the task drains the
    /// obligation without mutating the accepted receipt. `limit` is
    /// clamped to 1..=100.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Store`] when the database fails.
    pub fn inbox(
        &self,
        tenant_id: &str,
        recipient_ai: &str,
        limit: usize,
    ) -> Result<Vec<Receipt>, LedgerError> {
        let limit = limit.clamp(1, 100);
        let conn = self.store.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECEIPT_COLUMNS} FROM receipts AS r \
             WHERE r.tenant_id = ?1 AND r.recipient_ai = ?2 \
               AND r.phase = 'accepted' AND r.archived_at IS NULL \
               AND NOT EXISTS (\
                   SELECT 1 FROM receipts AS t \
                   WHERE t.tenant_id = r.tenant_id AND t.task_id = r.task_id \
                     AND t.phase IN ('complete', 'escalate')) \
             ORDER BY r.stored_at DESC, r.id DESC LIMIT ?3"
        ))?;
        let receipts = stmt
            .query_map(params![tenant_id, recipient_ai, limit as i64], row_to_receipt)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(receipts)
    }

    /// All receipts for a task, ordered by `(stored_at, created_at)`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Store`] when the database fails.
    pub fn timeline(
        &self,
        tenant_id: &str,
        task_id: &str,
        ascending: bool,
    ) -> Result<Vec<Receipt>, LedgerError> {
        let order = if ascending { "ASC" } else { "DESC" };
        let conn = self.store.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECEIPT_COLUMNS} FROM receipts \
             WHERE tenant_id = ?1 AND task_id = ?2 \
             ORDER BY stored_at {order}, created_at {order}, id {order}"
        ))?;
        let receipts = stmt
            .query_map(params![tenant_id, task_id], row_to_receipt)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(receipts)
    }

    /// Receipts spawned under a parent task (the delegation tree, one
    /// level).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Store`] when the database fails.
    pub fn children(
        &self,
        tenant_id: &str,
        parent_task_id: &str,
    ) -> Result<Vec<Receipt>, LedgerError> {
        let conn = self.store.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECEIPT_COLUMNS} FROM receipts \
             WHERE tenant_id = ?1 AND parent_task_id = ?2 \
             ORDER BY stored_at ASC, id ASC"
        ))?;
        let receipts = stmt
            .query_map(params![tenant_id, parent_task_id], row_to_receipt)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(receipts)
    }

    /// The provenance chain through `caused_by_receipt_id`: ancestors up to
    /// the root, then all descendants, bounded by `depth_cap` receipts in
    /// total and returned in `stored_at` order.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] when the root is unknown.
    /// - [`LedgerError::ChainCycle`] when the graph bites its own tail.
    pub fn chain(
        &self,
        tenant_id: &str,
        receipt_id: &str,
        depth_cap: usize,
    ) -> Result<ChainPage, LedgerError> {
        let conn = self.store.conn();
        let root = get_opt(&conn, tenant_id, receipt_id)?.ok_or_else(|| LedgerError::NotFound {
            receipt_id: receipt_id.to_owned(),
        })?;

        let mut visited: HashSet<String> = HashSet::new();
        let mut collected: Vec<Receipt> = Vec::new();
        let mut truncated = false;

        visited.insert(root.receipt_id.clone());

        // Walk up to the root of the causal chain.
        let mut cursor = root.caused_by_receipt_id.clone();
        let mut ancestors: Vec<Receipt> = Vec::new();
        while cursor != NA {
            if visited.len() >= depth_cap {
                truncated = true;
                break;
            }
            let Some(parent) = get_opt(&conn, tenant_id, &cursor)? else {
                // Dangling link; the chain simply ends here.
                break;
            };
            if !visited.insert(parent.receipt_id.clone()) {
                return Err(LedgerError::ChainCycle {
                    receipt_id: parent.receipt_id,
                });
            }
            cursor = parent.caused_by_receipt_id.clone();
            ancestors.push(parent);
        }
        collected.append(&mut ancestors);
        collected.push(root.clone());

        // Breadth-first over descendants.
        let mut frontier = vec![root.receipt_id];
        while let Some(parent_id) = frontier.pop() {
            let descendants = caused_by(&conn, tenant_id, &parent_id)?;
            for child in descendants {
                if visited.len() >= depth_cap {
                    truncated = true;
                    break;
                }
                if !visited.insert(child.receipt_id.clone()) {
                    return Err(LedgerError::ChainCycle {
                        receipt_id: child.receipt_id,
                    });
                }
                frontier.push(child.receipt_id.clone());
                collected.push(child);
            }
            if truncated {
                break;
            }
        }

        collected.sort_by(|a, b| {
            (a.stored_at, &a.receipt_id).cmp(&(b.stored_at, &b.receipt_id))
        });
        Ok(ChainPage {
            chain: collected,
            truncated,
        })
    }

    /// The phases present in a task's receipt history.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Store`] when the database fails.
    pub fn task_phases(&self, tenant_id: &str, task_id: &str) -> Result<Vec<Phase>, LedgerError> {
        let conn = self.store.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT phase FROM receipts WHERE tenant_id = ?1 AND task_id = ?2",
        )?;
        let phases = stmt
            .query_map(params![tenant_id, task_id], |row| {
                let raw: String = row.get(0)?;
                Phase::parse(&raw).ok_or_else(|| corrupt(0, "phase", &raw))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(phases)
    }

    /// Derived status of an obligation, computed from receipt existence.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Store`] when the database fails.
    pub fn derived_status(
        &self,
        tenant_id: &str,
        task_id: &str,
    ) -> Result<DerivedStatus, LedgerError> {
        Ok(DerivedStatus::from_phases(
            self.task_phases(tenant_id, task_id)?,
        ))
    }

    /// The most recent receipts addressed to an agent, regardless of phase.
    /// Used by session bootstrap for recent context.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Store`] when the database fails.
    pub fn recent_for_recipient(
        &self,
        tenant_id: &str,
        recipient_ai: &str,
        limit: usize,
    ) -> Result<Vec<Receipt>, LedgerError> {
        let conn = self.store.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECEIPT_COLUMNS} FROM receipts \
             WHERE tenant_id = ?1 AND recipient_ai = ?2 \
             ORDER BY stored_at DESC, id DESC LIMIT ?3"
        ))?;
        let receipts = stmt
            .query_map(params![tenant_id, recipient_ai, limit as i64], row_to_receipt)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(receipts)
    }
}

/// Computes the next `stored_at` for a tenant: the ledger clock, clamped
/// to never run backwards relative to rows already stored.
pub(crate) fn next_stored_at(
    conn: &Connection,
    tenant_id: &str,
    now: DateTime<Utc>,
) -> rusqlite::Result<i64> {
    let previous: Option<i64> = conn.query_row(
        "SELECT MAX(stored_at) FROM receipts WHERE tenant_id = ?1",
        params![tenant_id],
        |row| row.get(0),
    )?;
    Ok(previous.map_or(now.timestamp_micros(), |prev| {
        prev.max(now.timestamp_micros())
    }))
}

/// Inserts a validated receipt row. Shared with the task store so terminal
/// lease calls can append and flip in one transaction.
pub(crate) fn insert_receipt(
    conn: &Connection,
    receipt: &Receipt,
    stored_at: i64,
) -> Result<(), StoreError> {
    let inputs = serde_json::to_string(&receipt.inputs)?;
    let metadata = serde_json::to_string(&receipt.metadata)?;
    conn.execute(
        "INSERT INTO receipts (schema_version, tenant_id, receipt_id, task_id, parent_task_id, \
             caused_by_receipt_id, dedupe_key, attempt, from_principal, for_principal, \
             source_system, recipient_ai, trust_domain, phase, status, realtime, task_type, \
             task_summary, task_body, inputs, expected_outcome_kind, expected_artifact_mime, \
             outcome_kind, outcome_text, artifact_location, artifact_pointer, artifact_checksum, \
             artifact_size_bytes, artifact_mime, escalation_class, escalation_reason, \
             escalation_to, retry_requested, created_at, stored_at, started_at, completed_at, \
             read_at, archived_at, metadata) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
             ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32, ?33, \
             ?34, ?35, ?36, ?37, ?38, ?39, ?40)",
        params![
            receipt.schema_version,
            receipt.tenant_id,
            receipt.receipt_id,
            receipt.task_id,
            receipt.parent_task_id,
            receipt.caused_by_receipt_id,
            receipt.dedupe_key,
            receipt.attempt,
            receipt.from_principal,
            receipt.for_principal,
            receipt.source_system,
            receipt.recipient_ai,
            receipt.trust_domain,
            receipt.phase.as_str(),
            receipt.status.as_str(),
            receipt.realtime,
            receipt.task_type,
            receipt.task_summary,
            receipt.task_body,
            inputs,
            receipt.expected_outcome_kind.as_str(),
            receipt.expected_artifact_mime,
            receipt.outcome_kind.as_str(),
            receipt.outcome_text,
            receipt.artifact_location,
            receipt.artifact_pointer,
            receipt.artifact_checksum,
            i64::try_from(receipt.artifact_size_bytes).unwrap_or(i64::MAX),
            receipt.artifact_mime,
            receipt.escalation_class.as_str(),
            receipt.escalation_reason,
            receipt.escalation_to,
            receipt.retry_requested,
            to_micros(receipt.created_at),
            stored_at,
            to_micros(receipt.started_at),
            to_micros(receipt.completed_at),
            to_micros(receipt.read_at),
            to_micros(receipt.archived_at),
            metadata,
        ],
    )?;
    Ok(())
}

pub(crate) fn get_opt(
    conn: &Connection,
    tenant_id: &str,
    receipt_id: &str,
) -> rusqlite::Result<Option<Receipt>> {
    conn.query_row(
        &format!(
            "SELECT {RECEIPT_COLUMNS} FROM receipts WHERE tenant_id = ?1 AND receipt_id = ?2"
        ),
        params![tenant_id, receipt_id],
        row_to_receipt,
    )
    .optional()
}

fn get_by_dedupe_key(
    conn: &Connection,
    tenant_id: &str,
    dedupe_key: &str,
) -> rusqlite::Result<Option<Receipt>> {
    conn.query_row(
        &format!(
            "SELECT {RECEIPT_COLUMNS} FROM receipts WHERE tenant_id = ?1 AND dedupe_key = ?2"
        ),
        params![tenant_id, dedupe_key],
        row_to_receipt,
    )
    .optional()
}

fn caused_by(
    conn: &Connection,
    tenant_id: &str,
    receipt_id: &str,
) -> rusqlite::Result<Vec<Receipt>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECEIPT_COLUMNS} FROM receipts \
         WHERE tenant_id = ?1 AND caused_by_receipt_id = ?2 \
         ORDER BY stored_at ASC, id ASC"
    ))?;
    let receipts = stmt
        .query_map(params![tenant_id, receipt_id], row_to_receipt)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(receipts)
}

/// Converts a ledger row (in `RECEIPT_COLUMNS` order) to a [`Receipt`].
pub(crate) fn row_to_receipt(row: &rusqlite::Row<'_>) -> rusqlite::Result<Receipt> {
    let phase_raw: String = row.get(13)?;
    let status_raw: String = row.get(14)?;
    let expected_kind_raw: String = row.get(20)?;
    let outcome_kind_raw: String = row.get(22)?;
    let class_raw: String = row.get(29)?;
    let inputs_raw: String = row.get(19)?;
    let metadata_raw: String = row.get(39)?;

    Ok(Receipt {
        schema_version: row.get(0)?,
        tenant_id: row.get(1)?,
        receipt_id: row.get(2)?,
        task_id: row.get(3)?,
        parent_task_id: row.get(4)?,
        caused_by_receipt_id: row.get(5)?,
        dedupe_key: row.get(6)?,
        attempt: row.get::<_, i64>(7)? as u32,
        from_principal: row.get(8)?,
        for_principal: row.get(9)?,
        source_system: row.get(10)?,
        recipient_ai: row.get(11)?,
        trust_domain: row.get(12)?,
        phase: Phase::parse(&phase_raw).ok_or_else(|| corrupt(13, "phase", &phase_raw))?,
        status: Status::parse(&status_raw).ok_or_else(|| corrupt(14, "status", &status_raw))?,
        realtime: row.get(15)?,
        task_type: row.get(16)?,
        task_summary: row.get(17)?,
        task_body: row.get(18)?,
        inputs: parse_json_column(19, "inputs", &inputs_raw)?,
        expected_outcome_kind: OutcomeKind::parse(&expected_kind_raw)
            .ok_or_else(|| corrupt(20, "expected_outcome_kind", &expected_kind_raw))?,
        expected_artifact_mime: row.get(21)?,
        outcome_kind: OutcomeKind::parse(&outcome_kind_raw)
            .ok_or_else(|| corrupt(22, "outcome_kind", &outcome_kind_raw))?,
        outcome_text: row.get(23)?,
        artifact_location: row.get(24)?,
        artifact_pointer: row.get(25)?,
        artifact_checksum: row.get(26)?,
        artifact_size_bytes: row.get::<_, i64>(27)? as u64,
        artifact_mime: row.get(28)?,
        escalation_class: EscalationClass::parse(&class_raw)
            .ok_or_else(|| corrupt(29, "escalation_class", &class_raw))?,
        escalation_reason: row.get(30)?,
        escalation_to: row.get(31)?,
        retry_requested: row.get(32)?,
        created_at: from_micros(row.get(33)?),
        stored_at: from_micros(Some(row.get(34)?)),
        started_at: from_micros(row.get(35)?),
        completed_at: from_micros(row.get(36)?),
        read_at: from_micros(row.get(37)?),
        archived_at: from_micros(row.get(38)?),
        metadata: parse_json_column(39, "metadata", &metadata_raw)?,
    })
}
