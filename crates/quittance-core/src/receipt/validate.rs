//! Receipt validation pipeline.
//!
//! Validation runs in five classes, in order: structural, sentinel, phase,
//! routing, retry. The first class that produces any fault short-circuits
//! the pipeline; within a class every field fault is collected, so a caller
//! sees all structural problems at once rather than one per round trip.
//!
//! Every fault carries a stable code (`RCP-STRUCT-*`, `RCP-SIZE-*`,
//! `RCP-SENT-*`, `RCP-PHASE-*`, `RCP-ROUTE-*`, `RCP-RETRY-*`), the layer it
//! belongs to, the field path, a message, and an optional hint. Size faults
//! keep their own code prefix so the transport edge can map them to a 413
//! instead of a 400.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{EscalationClass, OutcomeKind, Phase, Receipt, Status, NA, TBD};

/// Per-field byte caps enforced by the structural class.
pub mod size_limits {
    /// Maximum serialized size of `inputs`.
    pub const INPUTS_MAX: usize = 64 * 1024;

    /// Maximum serialized size of `metadata`.
    pub const METADATA_MAX: usize = 16 * 1024;

    /// Maximum size of `task_body`.
    pub const TASK_BODY_MAX: usize = 100 * 1024;

    /// Maximum size of `outcome_text`.
    pub const OUTCOME_TEXT_MAX: usize = 100 * 1024;
}

/// The validation class a fault belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    /// Required fields, types, enum membership, size caps.
    Structural,
    /// Forbidden sentinel values in identity and routing fields.
    Sentinel,
    /// Phase-specific invariants.
    Phase,
    /// The escalation routing invariant.
    Routing,
    /// Retry coherence.
    Retry,
}

/// A single validation fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// Stable code from the `RCP-*` taxonomy.
    pub code: String,

    /// The class that produced this fault.
    pub layer: Layer,

    /// Path of the offending field.
    pub path: String,

    /// Human-readable description.
    pub message: String,

    /// Optional remediation hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl Fault {
    fn new(code: &str, layer: Layer, path: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_owned(),
            layer,
            path: path.to_owned(),
            message: message.into(),
            hint: None,
        }
    }

    fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Returns `true` if this fault is a size-cap violation.
    #[must_use]
    pub fn is_size_fault(&self) -> bool {
        self.code.starts_with("RCP-SIZE-")
    }
}

/// A rejected receipt, with every fault from the failing class.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("receipt validation failed with {} fault(s), first: {}", .faults.len(), .faults.first().map_or("none", |f| f.code.as_str()))]
pub struct ValidationFailure {
    /// The collected faults, in field order.
    pub faults: Vec<Fault>,
}

impl ValidationFailure {
    /// Returns `true` if any fault is a size-cap violation, which the
    /// transport edge reports as 413 rather than 400.
    #[must_use]
    pub fn exceeded_size_limit(&self) -> bool {
        self.faults.iter().any(Fault::is_size_fault)
    }
}

/// Validates a normalized receipt against the full pipeline.
///
/// # Errors
///
/// Returns [`ValidationFailure`] carrying every fault from the first class
/// that rejected the receipt.
pub fn validate(receipt: &Receipt) -> Result<(), ValidationFailure> {
    let classes: [fn(&Receipt) -> Vec<Fault>; 5] = [
        check_structural,
        check_sentinels,
        check_phase,
        check_routing,
        check_retry,
    ];
    for check in classes {
        let faults = check(receipt);
        if !faults.is_empty() {
            return Err(ValidationFailure { faults });
        }
    }
    Ok(())
}

fn json_size(value: &serde_json::Value) -> usize {
    serde_json::to_string(value).map_or(usize::MAX, |s| s.len())
}

fn check_structural(receipt: &Receipt) -> Vec<Fault> {
    let mut faults = Vec::new();

    if receipt.task_id.is_empty() {
        faults.push(
            Fault::new(
                "RCP-STRUCT-001",
                Layer::Structural,
                "task_id",
                "task_id is required",
            )
            .with_hint("supply the correlation key for the obligation"),
        );
    }
    if receipt.task_type.is_empty() {
        faults.push(Fault::new(
            "RCP-STRUCT-002",
            Layer::Structural,
            "task_type",
            "task_type is required",
        ));
    }
    if receipt.task_summary.is_empty() {
        faults.push(Fault::new(
            "RCP-STRUCT-003",
            Layer::Structural,
            "task_summary",
            "task_summary is required",
        ));
    }
    if !receipt.inputs.is_object() {
        faults.push(Fault::new(
            "RCP-STRUCT-004",
            Layer::Structural,
            "inputs",
            "inputs must be a JSON object",
        ));
    }
    if !receipt.metadata.is_object() {
        faults.push(Fault::new(
            "RCP-STRUCT-005",
            Layer::Structural,
            "metadata",
            "metadata must be a JSON object",
        ));
    }

    let size_caps = [
        (
            "RCP-SIZE-001",
            "inputs",
            json_size(&receipt.inputs),
            size_limits::INPUTS_MAX,
        ),
        (
            "RCP-SIZE-002",
            "metadata",
            json_size(&receipt.metadata),
            size_limits::METADATA_MAX,
        ),
        (
            "RCP-SIZE-003",
            "task_body",
            receipt.task_body.len(),
            size_limits::TASK_BODY_MAX,
        ),
        (
            "RCP-SIZE-004",
            "outcome_text",
            receipt.outcome_text.len(),
            size_limits::OUTCOME_TEXT_MAX,
        ),
    ];
    for (code, path, size, cap) in size_caps {
        if size > cap {
            faults.push(Fault::new(
                code,
                Layer::Structural,
                path,
                format!("{path} exceeds size limit of {cap} bytes (got {size})"),
            ));
        }
    }

    faults
}

fn check_sentinels(receipt: &Receipt) -> Vec<Fault> {
    let identity_fields = [
        ("RCP-SENT-001", "from_principal", &receipt.from_principal),
        ("RCP-SENT-002", "for_principal", &receipt.for_principal),
        ("RCP-SENT-003", "source_system", &receipt.source_system),
        ("RCP-SENT-004", "recipient_ai", &receipt.recipient_ai),
        ("RCP-SENT-005", "trust_domain", &receipt.trust_domain),
    ];

    identity_fields
        .into_iter()
        .filter(|(_, _, value)| value.is_empty() || *value == NA || *value == TBD)
        .map(|(code, path, value)| {
            Fault::new(
                code,
                Layer::Sentinel,
                path,
                format!("{path} must be a real principal, got {value:?}"),
            )
            .with_hint("identity and routing fields may not be empty, \"NA\", or \"TBD\"")
        })
        .collect()
}

fn check_phase(receipt: &Receipt) -> Vec<Fault> {
    match receipt.phase {
        Phase::Accepted => check_accepted(receipt),
        Phase::Complete => check_complete(receipt),
        Phase::Escalate => check_escalate(receipt),
    }
}

fn check_accepted(receipt: &Receipt) -> Vec<Fault> {
    let mut faults = Vec::new();

    if receipt.status != Status::Na {
        faults.push(Fault::new(
            "RCP-PHASE-101",
            Layer::Phase,
            "status",
            "status must be \"NA\" for accepted phase",
        ));
    }
    if receipt.completed_at.is_some() {
        faults.push(Fault::new(
            "RCP-PHASE-102",
            Layer::Phase,
            "completed_at",
            "completed_at must be null for accepted phase",
        ));
    }
    if receipt.task_summary == TBD {
        faults.push(
            Fault::new(
                "RCP-PHASE-103",
                Layer::Phase,
                "task_summary",
                "task_summary must not be \"TBD\" for accepted phase",
            )
            .with_hint("an obligation cannot be accepted without a concrete summary"),
        );
    }
    if receipt.outcome_kind != OutcomeKind::Na {
        faults.push(Fault::new(
            "RCP-PHASE-104",
            Layer::Phase,
            "outcome_kind",
            "outcome_kind must be \"NA\" for accepted phase",
        ));
    }
    for (code, path, value) in [
        ("RCP-PHASE-105", "artifact_pointer", &receipt.artifact_pointer),
        ("RCP-PHASE-106", "artifact_location", &receipt.artifact_location),
        ("RCP-PHASE-107", "artifact_mime", &receipt.artifact_mime),
    ] {
        if value != NA {
            faults.push(Fault::new(
                code,
                Layer::Phase,
                path,
                format!("{path} must be \"NA\" for accepted phase"),
            ));
        }
    }
    if receipt.escalation_class != EscalationClass::Na {
        faults.push(Fault::new(
            "RCP-PHASE-108",
            Layer::Phase,
            "escalation_class",
            "escalation_class must be \"NA\" for accepted phase",
        ));
    }
    if receipt.escalation_to != NA {
        faults.push(Fault::new(
            "RCP-PHASE-109",
            Layer::Phase,
            "escalation_to",
            "escalation_to must be \"NA\" for accepted phase",
        ));
    }
    if receipt.retry_requested {
        faults.push(Fault::new(
            "RCP-PHASE-110",
            Layer::Phase,
            "retry_requested",
            "retry_requested must be false for accepted phase",
        ));
    }

    faults
}

fn check_complete(receipt: &Receipt) -> Vec<Fault> {
    let mut faults = Vec::new();

    if !receipt.status.is_terminal() {
        faults.push(Fault::new(
            "RCP-PHASE-201",
            Layer::Phase,
            "status",
            "status must be \"success\", \"failure\", or \"canceled\" for complete phase",
        ));
    }
    if receipt.completed_at.is_none() {
        faults.push(Fault::new(
            "RCP-PHASE-202",
            Layer::Phase,
            "completed_at",
            "completed_at is required for complete phase",
        ));
    }
    if receipt.outcome_kind == OutcomeKind::Na {
        faults.push(Fault::new(
            "RCP-PHASE-203",
            Layer::Phase,
            "outcome_kind",
            "outcome_kind must not be \"NA\" for complete phase",
        ));
    }
    if receipt.escalation_class != EscalationClass::Na {
        faults.push(Fault::new(
            "RCP-PHASE-204",
            Layer::Phase,
            "escalation_class",
            "escalation_class must be \"NA\" for complete phase",
        ));
    }
    if receipt.outcome_kind.requires_artifact() {
        for (code, path, value) in [
            ("RCP-PHASE-205", "artifact_pointer", &receipt.artifact_pointer),
            ("RCP-PHASE-206", "artifact_location", &receipt.artifact_location),
            ("RCP-PHASE-207", "artifact_mime", &receipt.artifact_mime),
        ] {
            if value == NA {
                faults.push(
                    Fault::new(
                        code,
                        Layer::Phase,
                        path,
                        format!(
                            "{path} is required when outcome_kind is \"{}\"",
                            receipt.outcome_kind.as_str()
                        ),
                    )
                    .with_hint("artifact outcomes must carry a resolvable pointer"),
                );
            }
        }
    }

    faults
}

fn check_escalate(receipt: &Receipt) -> Vec<Fault> {
    let mut faults = Vec::new();

    if receipt.status != Status::Na {
        faults.push(Fault::new(
            "RCP-PHASE-301",
            Layer::Phase,
            "status",
            "status must be \"NA\" for escalate phase",
        ));
    }
    if receipt.escalation_class == EscalationClass::Na {
        faults.push(Fault::new(
            "RCP-PHASE-302",
            Layer::Phase,
            "escalation_class",
            "escalation_class must name a reason category for escalate phase",
        ));
    }
    if receipt.escalation_reason == NA || receipt.escalation_reason == TBD {
        faults.push(Fault::new(
            "RCP-PHASE-303",
            Layer::Phase,
            "escalation_reason",
            "escalation_reason must be provided for escalate phase",
        ));
    }
    if receipt.escalation_to == NA || receipt.escalation_to.is_empty() {
        faults.push(Fault::new(
            "RCP-PHASE-304",
            Layer::Phase,
            "escalation_to",
            "escalation_to is required for escalate phase",
        ));
    }

    faults
}

fn check_routing(receipt: &Receipt) -> Vec<Fault> {
    if receipt.phase == Phase::Escalate && receipt.recipient_ai != receipt.escalation_to {
        return vec![
            Fault::new(
                "RCP-ROUTE-001",
                Layer::Routing,
                "recipient_ai",
                format!(
                    "recipient_ai ({:?}) must equal escalation_to ({:?}) for escalate phase",
                    receipt.recipient_ai, receipt.escalation_to
                ),
            )
            .with_hint("an escalation is routed to the principal it transfers the obligation to"),
        ];
    }
    Vec::new()
}

fn check_retry(receipt: &Receipt) -> Vec<Fault> {
    if receipt.retry_requested && receipt.attempt < 1 {
        return vec![Fault::new(
            "RCP-RETRY-001",
            Layer::Retry,
            "attempt",
            "attempt must be >= 1 when retry_requested is true",
        )];
    }
    Vec::new()
}
