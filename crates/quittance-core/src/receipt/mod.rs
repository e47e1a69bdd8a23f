//! The receipt model.
//!
//! Receipts are immutable records of obligation lifecycle events:
//!
//! - `accepted` creates an obligation
//! - `complete` resolves an obligation
//! - `escalate` transfers responsibility
//!
//! A [`ReceiptDraft`] is the client-submitted form: it carries no tenant
//! (the access gate assigns one from authenticated identity) and may omit
//! its `receipt_id`. [`ReceiptDraft::into_receipt`] normalizes the draft
//! into a [`Receipt`], which the [`validate`] pipeline then checks against
//! the phase and routing invariants before it may be appended.
//!
//! After append the only mutable field is `archived_at`; everything else is
//! frozen for the life of the ledger.

mod validate;

#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use validate::{
    Fault, Layer, ValidationFailure, size_limits, validate,
};

/// Sentinel for "not applicable". Identity and routing fields must never
/// carry it; optional link fields use it in place of null.
pub const NA: &str = "NA";

/// Sentinel for "to be determined". Forbidden everywhere a real value is
/// required at append time.
pub const TBD: &str = "TBD";

/// Current receipt schema version.
pub const SCHEMA_VERSION: &str = "1.0";

/// Default trust boundary identifier.
pub const DEFAULT_TRUST_DOMAIN: &str = "default";

/// Receipt lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Creates an obligation.
    Accepted,
    /// Resolves an obligation.
    Complete,
    /// Transfers responsibility to another principal.
    Escalate,
}

impl Phase {
    /// Canonical wire string for this phase.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Complete => "complete",
            Self::Escalate => "escalate",
        }
    }

    /// Parses a wire string into a phase.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "accepted" => Some(Self::Accepted),
            "complete" => Some(Self::Complete),
            "escalate" => Some(Self::Escalate),
            _ => None,
        }
    }
}

/// Completion status. `NA` outside the `complete` phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Not applicable (any phase other than `complete`).
    #[default]
    #[serde(rename = "NA")]
    Na,
    /// The obligation was fulfilled.
    #[serde(rename = "success")]
    Success,
    /// The obligation was attempted and failed.
    #[serde(rename = "failure")]
    Failure,
    /// The obligation was canceled.
    #[serde(rename = "canceled")]
    Canceled,
}

impl Status {
    /// Canonical wire string for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Na => "NA",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Canceled => "canceled",
        }
    }

    /// Parses a wire string into a status.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NA" => Some(Self::Na),
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Returns `true` for the terminal completion statuses.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Canceled)
    }
}

/// Kind of task outcome carried by a `complete` receipt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomeKind {
    /// Not applicable (phase is not `complete`).
    #[default]
    #[serde(rename = "NA")]
    Na,
    /// Completed with no payload.
    #[serde(rename = "none")]
    None,
    /// Completed with an inline text outcome.
    #[serde(rename = "response_text")]
    ResponseText,
    /// Completed with a pointer into the artifact store.
    #[serde(rename = "artifact_pointer")]
    ArtifactPointer,
    /// Completed with both text and an artifact pointer.
    #[serde(rename = "mixed")]
    Mixed,
}

impl OutcomeKind {
    /// Canonical wire string for this outcome kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Na => "NA",
            Self::None => "none",
            Self::ResponseText => "response_text",
            Self::ArtifactPointer => "artifact_pointer",
            Self::Mixed => "mixed",
        }
    }

    /// Parses a wire string into an outcome kind.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NA" => Some(Self::Na),
            "none" => Some(Self::None),
            "response_text" => Some(Self::ResponseText),
            "artifact_pointer" => Some(Self::ArtifactPointer),
            "mixed" => Some(Self::Mixed),
            _ => None,
        }
    }

    /// Returns `true` if this kind requires the artifact fields to be set.
    #[must_use]
    pub const fn requires_artifact(self) -> bool {
        matches!(self, Self::ArtifactPointer | Self::Mixed)
    }
}

/// Reason category for an `escalate` receipt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationClass {
    /// Not applicable (phase is not `escalate`).
    #[default]
    #[serde(rename = "NA")]
    Na,
    /// The owner must decide.
    Owner,
    /// The worker lacks a required capability.
    Capability,
    /// A trust boundary was crossed.
    Trust,
    /// A policy rule fired (including lease expiry).
    Policy,
    /// The request exceeded the worker's scope.
    Scope,
    /// Anything else.
    Other,
}

impl EscalationClass {
    /// Canonical wire string for this class.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Na => "NA",
            Self::Owner => "owner",
            Self::Capability => "capability",
            Self::Trust => "trust",
            Self::Policy => "policy",
            Self::Scope => "scope",
            Self::Other => "other",
        }
    }

    /// Parses a wire string into an escalation class.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NA" => Some(Self::Na),
            "owner" => Some(Self::Owner),
            "capability" => Some(Self::Capability),
            "trust" => Some(Self::Trust),
            "policy" => Some(Self::Policy),
            "scope" => Some(Self::Scope),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Generates a new receipt id: UUIDv7, time-prefixed and lexicographically
/// sortable in its hyphenated form.
#[must_use]
pub fn generate_receipt_id() -> String {
    Uuid::now_v7().to_string()
}

fn na_string() -> String {
    NA.to_owned()
}

fn schema_version_default() -> String {
    SCHEMA_VERSION.to_owned()
}

fn trust_domain_default() -> String {
    DEFAULT_TRUST_DOMAIN.to_owned()
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// A stored receipt: the normalized form with server-assigned identity.
///
/// All fields except `archived_at` are immutable once the ledger has
/// appended the row. `stored_at` comes from the ledger clock and is the
/// authoritative ordering key; `created_at` is the issuer's clock and is
/// advisory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    /// Receipt schema version.
    #[serde(default = "schema_version_default")]
    pub schema_version: String,

    /// Tenant scope. Server-assigned from authenticated identity; a
    /// client-supplied value is ignored.
    pub tenant_id: String,

    /// Stable wire identifier, unique per tenant.
    pub receipt_id: String,

    /// Correlation key spanning the lifecycle of one obligation.
    pub task_id: String,

    /// Delegation link, or `"NA"`.
    #[serde(default = "na_string")]
    pub parent_task_id: String,

    /// Provenance link to the receipt that spawned this one, or `"NA"`.
    #[serde(default = "na_string")]
    pub caused_by_receipt_id: String,

    /// Idempotency key, or `"NA"`.
    #[serde(default = "na_string")]
    pub dedupe_key: String,

    /// Retry attempt number (0 for the first attempt).
    #[serde(default)]
    pub attempt: u32,

    /// Principal requesting the work.
    pub from_principal: String,

    /// Principal the work is done for.
    pub for_principal: String,

    /// System emitting the receipt.
    pub source_system: String,

    /// Agent owning this receipt.
    pub recipient_ai: String,

    /// Trust boundary identifier.
    #[serde(default = "trust_domain_default")]
    pub trust_domain: String,

    /// Lifecycle phase.
    pub phase: Phase,

    /// Completion status.
    #[serde(default)]
    pub status: Status,

    /// Whether this is realtime work.
    #[serde(default)]
    pub realtime: bool,

    /// Category of task.
    pub task_type: String,

    /// Brief description of the task.
    pub task_summary: String,

    /// Full task specification.
    #[serde(default)]
    pub task_body: String,

    /// Structured task input parameters.
    #[serde(default = "empty_object")]
    pub inputs: serde_json::Value,

    /// Expected type of outcome.
    #[serde(default)]
    pub expected_outcome_kind: OutcomeKind,

    /// Expected artifact MIME type.
    #[serde(default = "na_string")]
    pub expected_artifact_mime: String,

    /// Actual outcome type.
    #[serde(default)]
    pub outcome_kind: OutcomeKind,

    /// Text outcome or summary.
    #[serde(default = "na_string")]
    pub outcome_text: String,

    /// Artifact storage location type.
    #[serde(default = "na_string")]
    pub artifact_location: String,

    /// Pointer into the artifact store.
    #[serde(default = "na_string")]
    pub artifact_pointer: String,

    /// Artifact integrity checksum.
    #[serde(default = "na_string")]
    pub artifact_checksum: String,

    /// Artifact size in bytes.
    #[serde(default)]
    pub artifact_size_bytes: u64,

    /// Artifact MIME type.
    #[serde(default = "na_string")]
    pub artifact_mime: String,

    /// Escalation reason category.
    #[serde(default)]
    pub escalation_class: EscalationClass,

    /// Detailed escalation reason.
    #[serde(default = "na_string")]
    pub escalation_reason: String,

    /// Escalation target principal.
    #[serde(default = "na_string")]
    pub escalation_to: String,

    /// Whether a retry is requested.
    #[serde(default)]
    pub retry_requested: bool,

    /// Issuer clock timestamp.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    /// Ledger clock, set on append. Authoritative ordering key.
    #[serde(default)]
    pub stored_at: Option<DateTime<Utc>>,

    /// Execution start time.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    /// Execution completion time.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    /// Inbox read time.
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,

    /// Archive time. The sole mutable field after append.
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,

    /// Freeform structured metadata.
    #[serde(default = "empty_object")]
    pub metadata: serde_json::Value,
}

impl Receipt {
    /// The content fingerprint of this receipt: everything the issuer
    /// submitted, excluding server-assigned fields.
    ///
    /// Two appends are "the same receipt" when their fingerprints match;
    /// the ledger uses this to distinguish an idempotent replay from a
    /// conflicting reuse of the same `receipt_id` or `dedupe_key`.
    /// `with_receipt_id` controls whether the id participates: replays of
    /// the same id include it, dedupe-key comparisons do not (a retry may
    /// regenerate the id while keeping the key).
    #[must_use]
    pub fn content_fingerprint(&self, with_receipt_id: bool) -> serde_json::Value {
        let mut fp = serde_json::json!({
            "schema_version": self.schema_version,
            "task_id": self.task_id,
            "parent_task_id": self.parent_task_id,
            "caused_by_receipt_id": self.caused_by_receipt_id,
            "dedupe_key": self.dedupe_key,
            "attempt": self.attempt,
            "from_principal": self.from_principal,
            "for_principal": self.for_principal,
            "source_system": self.source_system,
            "recipient_ai": self.recipient_ai,
            "trust_domain": self.trust_domain,
            "phase": self.phase.as_str(),
            "status": self.status.as_str(),
            "realtime": self.realtime,
            "task_type": self.task_type,
            "task_summary": self.task_summary,
            "task_body": self.task_body,
            "inputs": self.inputs,
            "expected_outcome_kind": self.expected_outcome_kind.as_str(),
            "expected_artifact_mime": self.expected_artifact_mime,
            "outcome_kind": self.outcome_kind.as_str(),
            "outcome_text": self.outcome_text,
            "artifact_location": self.artifact_location,
            "artifact_pointer": self.artifact_pointer,
            "artifact_checksum": self.artifact_checksum,
            "artifact_size_bytes": self.artifact_size_bytes,
            "artifact_mime": self.artifact_mime,
            "escalation_class": self.escalation_class.as_str(),
            "escalation_reason": self.escalation_reason,
            "escalation_to": self.escalation_to,
            "retry_requested": self.retry_requested,
            "created_at": self.created_at,
            "started_at": self.started_at,
            "completed_at": self.completed_at,
            "metadata": self.metadata,
        });
        if with_receipt_id {
            fp["receipt_id"] = serde_json::Value::String(self.receipt_id.clone());
        }
        fp
    }
}

/// A client-submitted receipt, before tenant stamping and validation.
///
/// The draft intentionally has no `tenant_id` field: whatever the request
/// body carries for it is dropped at deserialization, and the access gate's
/// resolved tenant is stamped in [`ReceiptDraft::into_receipt`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptDraft {
    /// Receipt schema version.
    #[serde(default = "schema_version_default")]
    pub schema_version: String,

    /// Client-generated id; assigned by the ledger when absent.
    #[serde(default)]
    pub receipt_id: Option<String>,

    /// Correlation key spanning the lifecycle of one obligation.
    #[serde(default)]
    pub task_id: String,

    /// Delegation link, or `"NA"`.
    #[serde(default = "na_string")]
    pub parent_task_id: String,

    /// Provenance link, or `"NA"`.
    #[serde(default = "na_string")]
    pub caused_by_receipt_id: String,

    /// Idempotency key, or `"NA"`.
    #[serde(default = "na_string")]
    pub dedupe_key: String,

    /// Retry attempt number.
    #[serde(default)]
    pub attempt: u32,

    /// Principal requesting the work.
    #[serde(default)]
    pub from_principal: String,

    /// Principal the work is done for.
    #[serde(default)]
    pub for_principal: String,

    /// System emitting the receipt.
    #[serde(default)]
    pub source_system: String,

    /// Agent owning this receipt.
    #[serde(default)]
    pub recipient_ai: String,

    /// Trust boundary identifier.
    #[serde(default = "trust_domain_default")]
    pub trust_domain: String,

    /// Lifecycle phase.
    pub phase: Phase,

    /// Completion status.
    #[serde(default)]
    pub status: Status,

    /// Whether this is realtime work.
    #[serde(default)]
    pub realtime: bool,

    /// Category of task.
    #[serde(default)]
    pub task_type: String,

    /// Brief description of the task.
    #[serde(default)]
    pub task_summary: String,

    /// Full task specification.
    #[serde(default)]
    pub task_body: String,

    /// Structured task input parameters.
    #[serde(default = "empty_object")]
    pub inputs: serde_json::Value,

    /// Expected type of outcome.
    #[serde(default)]
    pub expected_outcome_kind: OutcomeKind,

    /// Expected artifact MIME type.
    #[serde(default = "na_string")]
    pub expected_artifact_mime: String,

    /// Actual outcome type.
    #[serde(default)]
    pub outcome_kind: OutcomeKind,

    /// Text outcome or summary.
    #[serde(default = "na_string")]
    pub outcome_text: String,

    /// Artifact storage location type.
    #[serde(default = "na_string")]
    pub artifact_location: String,

    /// Pointer into the artifact store.
    #[serde(default = "na_string")]
    pub artifact_pointer: String,

    /// Artifact integrity checksum.
    #[serde(default = "na_string")]
    pub artifact_checksum: String,

    /// Artifact size in bytes.
    #[serde(default)]
    pub artifact_size_bytes: u64,

    /// Artifact MIME type.
    #[serde(default = "na_string")]
    pub artifact_mime: String,

    /// Escalation reason category.
    #[serde(default)]
    pub escalation_class: EscalationClass,

    /// Detailed escalation reason.
    #[serde(default = "na_string")]
    pub escalation_reason: String,

    /// Escalation target principal.
    #[serde(default = "na_string")]
    pub escalation_to: String,

    /// Whether a retry is requested.
    #[serde(default)]
    pub retry_requested: bool,

    /// Issuer clock timestamp.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    /// Execution start time.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    /// Execution completion time.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    /// Freeform structured metadata.
    #[serde(default = "empty_object")]
    pub metadata: serde_json::Value,
}

impl ReceiptDraft {
    fn new(phase: Phase, task_id: &str, task_type: &str, task_summary: &str) -> Self {
        Self {
            schema_version: schema_version_default(),
            receipt_id: None,
            task_id: task_id.to_owned(),
            parent_task_id: na_string(),
            caused_by_receipt_id: na_string(),
            dedupe_key: na_string(),
            attempt: 0,
            from_principal: String::new(),
            for_principal: String::new(),
            source_system: String::new(),
            recipient_ai: String::new(),
            trust_domain: trust_domain_default(),
            phase,
            status: Status::Na,
            realtime: false,
            task_type: task_type.to_owned(),
            task_summary: task_summary.to_owned(),
            task_body: String::new(),
            inputs: empty_object(),
            expected_outcome_kind: OutcomeKind::Na,
            expected_artifact_mime: na_string(),
            outcome_kind: OutcomeKind::Na,
            outcome_text: na_string(),
            artifact_location: na_string(),
            artifact_pointer: na_string(),
            artifact_checksum: na_string(),
            artifact_size_bytes: 0,
            artifact_mime: na_string(),
            escalation_class: EscalationClass::Na,
            escalation_reason: na_string(),
            escalation_to: na_string(),
            retry_requested: false,
            created_at: None,
            started_at: None,
            completed_at: None,
            metadata: empty_object(),
        }
    }

    /// Starts an `accepted` draft: the creation of an obligation.
    #[must_use]
    pub fn accepted(task_id: &str, task_type: &str, task_summary: &str) -> Self {
        Self::new(Phase::Accepted, task_id, task_type, task_summary)
    }

    /// Starts a `complete` draft: the resolution of an obligation.
    ///
    /// `completed_at` defaults to now; override with
    /// [`ReceiptDraft::completed_at`] if the work finished earlier.
    #[must_use]
    pub fn complete(
        task_id: &str,
        task_type: &str,
        task_summary: &str,
        status: Status,
        outcome_kind: OutcomeKind,
    ) -> Self {
        let mut draft = Self::new(Phase::Complete, task_id, task_type, task_summary);
        draft.status = status;
        draft.outcome_kind = outcome_kind;
        draft.completed_at = Some(Utc::now());
        draft
    }

    /// Starts an `escalate` draft: the transfer of an obligation.
    ///
    /// `recipient_ai` is set to the escalation target, satisfying the
    /// routing invariant by construction.
    #[must_use]
    pub fn escalate(
        task_id: &str,
        task_type: &str,
        task_summary: &str,
        class: EscalationClass,
        reason: &str,
        escalation_to: &str,
    ) -> Self {
        let mut draft = Self::new(Phase::Escalate, task_id, task_type, task_summary);
        draft.escalation_class = class;
        draft.escalation_reason = reason.to_owned();
        draft.escalation_to = escalation_to.to_owned();
        draft.recipient_ai = escalation_to.to_owned();
        draft
    }

    /// Sets the client-supplied receipt id.
    #[must_use]
    pub fn receipt_id(mut self, id: &str) -> Self {
        self.receipt_id = Some(id.to_owned());
        self
    }

    /// Sets the requesting principal.
    #[must_use]
    pub fn from_principal(mut self, value: &str) -> Self {
        self.from_principal = value.to_owned();
        self
    }

    /// Sets the beneficiary principal.
    #[must_use]
    pub fn for_principal(mut self, value: &str) -> Self {
        self.for_principal = value.to_owned();
        self
    }

    /// Sets the emitting system.
    #[must_use]
    pub fn source_system(mut self, value: &str) -> Self {
        self.source_system = value.to_owned();
        self
    }

    /// Sets the owning agent.
    #[must_use]
    pub fn recipient_ai(mut self, value: &str) -> Self {
        self.recipient_ai = value.to_owned();
        self
    }

    /// Sets the trust boundary identifier.
    #[must_use]
    pub fn trust_domain(mut self, value: &str) -> Self {
        self.trust_domain = value.to_owned();
        self
    }

    /// Sets the delegation link.
    #[must_use]
    pub fn parent_task_id(mut self, value: &str) -> Self {
        self.parent_task_id = value.to_owned();
        self
    }

    /// Sets the provenance link.
    #[must_use]
    pub fn caused_by(mut self, receipt_id: &str) -> Self {
        self.caused_by_receipt_id = receipt_id.to_owned();
        self
    }

    /// Sets the idempotency key.
    #[must_use]
    pub fn dedupe_key(mut self, value: &str) -> Self {
        self.dedupe_key = value.to_owned();
        self
    }

    /// Sets the attempt counter.
    #[must_use]
    pub const fn attempt(mut self, value: u32) -> Self {
        self.attempt = value;
        self
    }

    /// Sets the full task body.
    #[must_use]
    pub fn task_body(mut self, value: &str) -> Self {
        self.task_body = value.to_owned();
        self
    }

    /// Sets the structured inputs.
    #[must_use]
    pub fn inputs(mut self, value: serde_json::Value) -> Self {
        self.inputs = value;
        self
    }

    /// Sets the freeform metadata.
    #[must_use]
    pub fn metadata(mut self, value: serde_json::Value) -> Self {
        self.metadata = value;
        self
    }

    /// Sets the expected outcome contract.
    #[must_use]
    pub fn expects(mut self, kind: OutcomeKind, artifact_mime: &str) -> Self {
        self.expected_outcome_kind = kind;
        self.expected_artifact_mime = artifact_mime.to_owned();
        self
    }

    /// Sets the inline text outcome.
    #[must_use]
    pub fn outcome_text(mut self, value: &str) -> Self {
        self.outcome_text = value.to_owned();
        self
    }

    /// Sets all artifact fields at once.
    #[must_use]
    pub fn artifact(
        mut self,
        pointer: &str,
        location: &str,
        mime: &str,
        checksum: &str,
        size_bytes: u64,
    ) -> Self {
        self.artifact_pointer = pointer.to_owned();
        self.artifact_location = location.to_owned();
        self.artifact_mime = mime.to_owned();
        self.artifact_checksum = checksum.to_owned();
        self.artifact_size_bytes = size_bytes;
        self
    }

    /// Flags that a retry is requested. `attempt` must already be >= 1.
    #[must_use]
    pub const fn retry_requested(mut self, value: bool) -> Self {
        self.retry_requested = value;
        self
    }

    /// Sets the issuer clock timestamp.
    #[must_use]
    pub const fn created_at(mut self, value: DateTime<Utc>) -> Self {
        self.created_at = Some(value);
        self
    }

    /// Sets the execution start time.
    #[must_use]
    pub const fn started_at(mut self, value: DateTime<Utc>) -> Self {
        self.started_at = Some(value);
        self
    }

    /// Sets the execution completion time.
    #[must_use]
    pub const fn completed_at(mut self, value: DateTime<Utc>) -> Self {
        self.completed_at = Some(value);
        self
    }

    /// Normalizes the draft into a [`Receipt`] under the given tenant,
    /// assigning a receipt id when the client supplied none.
    ///
    /// Timestamps are truncated to microsecond precision, the resolution
    /// the ledger stores; replay comparison depends on the in-memory and
    /// stored forms agreeing. The result is not yet validated or stored;
    /// `stored_at` stays unset until the ledger appends it.
    #[must_use]
    pub fn into_receipt(self, tenant_id: &str) -> Receipt {
        Receipt {
            schema_version: self.schema_version,
            tenant_id: tenant_id.to_owned(),
            receipt_id: self
                .receipt_id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(generate_receipt_id),
            task_id: self.task_id,
            parent_task_id: self.parent_task_id,
            caused_by_receipt_id: self.caused_by_receipt_id,
            dedupe_key: self.dedupe_key,
            attempt: self.attempt,
            from_principal: self.from_principal,
            for_principal: self.for_principal,
            source_system: self.source_system,
            recipient_ai: self.recipient_ai,
            trust_domain: self.trust_domain,
            phase: self.phase,
            status: self.status,
            realtime: self.realtime,
            task_type: self.task_type,
            task_summary: self.task_summary,
            task_body: self.task_body,
            inputs: self.inputs,
            expected_outcome_kind: self.expected_outcome_kind,
            expected_artifact_mime: self.expected_artifact_mime,
            outcome_kind: self.outcome_kind,
            outcome_text: self.outcome_text,
            artifact_location: self.artifact_location,
            artifact_pointer: self.artifact_pointer,
            artifact_checksum: self.artifact_checksum,
            artifact_size_bytes: self.artifact_size_bytes,
            artifact_mime: self.artifact_mime,
            escalation_class: self.escalation_class,
            escalation_reason: self.escalation_reason,
            escalation_to: self.escalation_to,
            retry_requested: self.retry_requested,
            created_at: self.created_at.map(truncate_to_micros),
            stored_at: None,
            started_at: self.started_at.map(truncate_to_micros),
            completed_at: self.completed_at.map(truncate_to_micros),
            read_at: None,
            archived_at: None,
            metadata: self.metadata,
        }
    }
}

/// Drops sub-microsecond precision, the resolution the ledger stores.
fn truncate_to_micros(value: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(value.timestamp_micros()).unwrap_or(value)
}
