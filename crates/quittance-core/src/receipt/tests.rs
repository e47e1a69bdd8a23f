//! Tests for the receipt model and validation pipeline.

use chrono::Utc;
use proptest::prelude::*;

use super::{
    EscalationClass, OutcomeKind, Phase, Receipt, ReceiptDraft, Status, validate, NA, TBD,
};

fn accepted_receipt() -> Receipt {
    ReceiptDraft::accepted("T-1", "code.generate", "summarize the repo")
        .from_principal("planner")
        .for_principal("user:alice")
        .source_system("delegate")
        .recipient_ai("worker.x")
        .into_receipt("acme")
}

fn complete_receipt(kind: OutcomeKind) -> Receipt {
    let mut draft = ReceiptDraft::complete(
        "T-1",
        "code.generate",
        "summarize the repo",
        Status::Success,
        kind,
    )
    .from_principal("planner")
    .for_principal("user:alice")
    .source_system("asyncgate")
    .recipient_ai("worker.x");
    if kind.requires_artifact() {
        draft = draft.artifact("pointer://a/b", "depot", "text/plain", "sha256:00", 12);
    }
    draft.into_receipt("acme")
}

fn escalate_receipt() -> Receipt {
    ReceiptDraft::escalate(
        "T-1",
        "code.generate",
        "summarize the repo",
        EscalationClass::Capability,
        "needs GPU",
        "fallback.y",
    )
    .from_principal("planner")
    .for_principal("user:alice")
    .source_system("asyncgate")
    .into_receipt("acme")
}

// =============================================================================
// Normalization
// =============================================================================

#[test]
fn draft_assigns_receipt_id_when_absent() {
    let receipt = accepted_receipt();
    assert!(!receipt.receipt_id.is_empty());
    assert_eq!(receipt.tenant_id, "acme");
    assert!(receipt.stored_at.is_none());
}

#[test]
fn draft_keeps_client_receipt_id() {
    let receipt = ReceiptDraft::accepted("T-1", "t", "s")
        .receipt_id("r-client-1")
        .from_principal("p")
        .for_principal("p")
        .source_system("s")
        .recipient_ai("w")
        .into_receipt("acme");
    assert_eq!(receipt.receipt_id, "r-client-1");
}

#[test]
fn generated_ids_sort_by_creation_order() {
    let a = super::generate_receipt_id();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let b = super::generate_receipt_id();
    assert!(a < b, "UUIDv7 ids must be lexicographically ordered: {a} vs {b}");
}

#[test]
fn draft_body_cannot_smuggle_tenant_id() {
    // A tenant_id in the request body is dropped at deserialization; the
    // draft has no such field and the gate's tenant wins.
    let draft: ReceiptDraft = serde_json::from_value(serde_json::json!({
        "tenant_id": "globex",
        "task_id": "T-1",
        "phase": "accepted",
        "task_type": "t",
        "task_summary": "s",
        "from_principal": "p",
        "for_principal": "p",
        "source_system": "s",
        "recipient_ai": "w",
    }))
    .unwrap();
    let receipt = draft.into_receipt("acme");
    assert_eq!(receipt.tenant_id, "acme");
}

// =============================================================================
// Phase invariants
// =============================================================================

#[test]
fn accepted_receipt_passes() {
    assert!(validate(&accepted_receipt()).is_ok());
}

#[test]
fn accepted_rejects_terminal_status() {
    let mut receipt = accepted_receipt();
    receipt.status = Status::Success;
    let failure = validate(&receipt).unwrap_err();
    assert_eq!(failure.faults[0].code, "RCP-PHASE-101");
}

#[test]
fn accepted_rejects_completed_at() {
    let mut receipt = accepted_receipt();
    receipt.completed_at = Some(Utc::now());
    let failure = validate(&receipt).unwrap_err();
    assert_eq!(failure.faults[0].code, "RCP-PHASE-102");
}

#[test]
fn accepted_rejects_tbd_summary() {
    let mut receipt = accepted_receipt();
    receipt.task_summary = TBD.to_owned();
    let failure = validate(&receipt).unwrap_err();
    assert_eq!(failure.faults[0].code, "RCP-PHASE-103");
}

#[test]
fn accepted_rejects_artifact_fields() {
    let mut receipt = accepted_receipt();
    receipt.artifact_pointer = "pointer://x".to_owned();
    receipt.artifact_mime = "text/plain".to_owned();
    let failure = validate(&receipt).unwrap_err();
    let codes: Vec<&str> = failure.faults.iter().map(|f| f.code.as_str()).collect();
    assert!(codes.contains(&"RCP-PHASE-105"));
    assert!(codes.contains(&"RCP-PHASE-107"));
}

#[test]
fn accepted_rejects_retry_requested() {
    let mut receipt = accepted_receipt();
    receipt.retry_requested = true;
    receipt.attempt = 1;
    let failure = validate(&receipt).unwrap_err();
    assert_eq!(failure.faults[0].code, "RCP-PHASE-110");
}

#[test]
fn complete_receipt_passes() {
    assert!(validate(&complete_receipt(OutcomeKind::ResponseText)).is_ok());
    assert!(validate(&complete_receipt(OutcomeKind::ArtifactPointer)).is_ok());
    assert!(validate(&complete_receipt(OutcomeKind::None)).is_ok());
}

#[test]
fn complete_rejects_na_status() {
    let mut receipt = complete_receipt(OutcomeKind::None);
    receipt.status = Status::Na;
    let failure = validate(&receipt).unwrap_err();
    assert_eq!(failure.faults[0].code, "RCP-PHASE-201");
}

#[test]
fn complete_rejects_missing_completed_at() {
    let mut receipt = complete_receipt(OutcomeKind::None);
    receipt.completed_at = None;
    let failure = validate(&receipt).unwrap_err();
    assert_eq!(failure.faults[0].code, "RCP-PHASE-202");
}

#[test]
fn complete_rejects_na_outcome_kind() {
    let mut receipt = complete_receipt(OutcomeKind::None);
    receipt.outcome_kind = OutcomeKind::Na;
    let failure = validate(&receipt).unwrap_err();
    assert_eq!(failure.faults[0].code, "RCP-PHASE-203");
}

#[test]
fn artifact_outcome_requires_pointer() {
    let mut receipt = complete_receipt(OutcomeKind::ArtifactPointer);
    receipt.artifact_pointer = NA.to_owned();
    let failure = validate(&receipt).unwrap_err();
    assert_eq!(failure.faults[0].code, "RCP-PHASE-205");
}

#[test]
fn mixed_outcome_requires_all_artifact_fields() {
    let mut receipt = complete_receipt(OutcomeKind::Mixed);
    receipt.artifact_location = NA.to_owned();
    receipt.artifact_mime = NA.to_owned();
    let failure = validate(&receipt).unwrap_err();
    assert_eq!(failure.faults.len(), 2);
}

#[test]
fn escalate_receipt_passes() {
    assert!(validate(&escalate_receipt()).is_ok());
}

#[test]
fn escalate_rejects_na_class() {
    let mut receipt = escalate_receipt();
    receipt.escalation_class = EscalationClass::Na;
    let failure = validate(&receipt).unwrap_err();
    assert_eq!(failure.faults[0].code, "RCP-PHASE-302");
}

#[test]
fn escalate_rejects_tbd_reason() {
    let mut receipt = escalate_receipt();
    receipt.escalation_reason = TBD.to_owned();
    let failure = validate(&receipt).unwrap_err();
    assert_eq!(failure.faults[0].code, "RCP-PHASE-303");
}

// =============================================================================
// Routing invariant
// =============================================================================

#[test]
fn escalate_routing_mismatch_rejected() {
    let mut receipt = escalate_receipt();
    receipt.recipient_ai = "somebody.else".to_owned();
    let failure = validate(&receipt).unwrap_err();
    assert_eq!(failure.faults.len(), 1);
    assert_eq!(failure.faults[0].code, "RCP-ROUTE-001");
    assert_eq!(failure.faults[0].path, "recipient_ai");
}

#[test]
fn escalate_builder_satisfies_routing_by_construction() {
    let receipt = escalate_receipt();
    assert_eq!(receipt.recipient_ai, receipt.escalation_to);
}

// =============================================================================
// Sentinels and structure
// =============================================================================

#[test]
fn sentinel_values_rejected_in_identity_fields() {
    let mut receipt = accepted_receipt();
    receipt.from_principal = NA.to_owned();
    receipt.trust_domain = TBD.to_owned();
    let failure = validate(&receipt).unwrap_err();
    let codes: Vec<&str> = failure.faults.iter().map(|f| f.code.as_str()).collect();
    assert_eq!(codes, vec!["RCP-SENT-001", "RCP-SENT-005"]);
}

#[test]
fn empty_identity_field_rejected() {
    let mut receipt = accepted_receipt();
    receipt.recipient_ai = String::new();
    let failure = validate(&receipt).unwrap_err();
    assert_eq!(failure.faults[0].code, "RCP-SENT-004");
}

#[test]
fn structural_faults_collected_together() {
    let mut receipt = accepted_receipt();
    receipt.task_id = String::new();
    receipt.task_type = String::new();
    receipt.inputs = serde_json::json!([1, 2, 3]);
    let failure = validate(&receipt).unwrap_err();
    assert_eq!(failure.faults.len(), 3);
    assert!(failure.faults.iter().all(|f| f.layer == super::Layer::Structural));
}

#[test]
fn oversized_inputs_rejected_as_size_fault() {
    let mut receipt = accepted_receipt();
    let blob = "x".repeat(70 * 1024);
    receipt.inputs = serde_json::json!({ "blob": blob });
    let failure = validate(&receipt).unwrap_err();
    assert_eq!(failure.faults[0].code, "RCP-SIZE-001");
    assert!(failure.exceeded_size_limit());
}

#[test]
fn oversized_metadata_rejected() {
    let mut receipt = accepted_receipt();
    receipt.metadata = serde_json::json!({ "blob": "m".repeat(17 * 1024) });
    let failure = validate(&receipt).unwrap_err();
    assert_eq!(failure.faults[0].code, "RCP-SIZE-002");
}

#[test]
fn structural_short_circuits_before_phase() {
    // A receipt with both a structural fault and a phase fault reports only
    // the structural class.
    let mut receipt = accepted_receipt();
    receipt.task_type = String::new();
    receipt.status = Status::Success;
    let failure = validate(&receipt).unwrap_err();
    assert!(failure.faults.iter().all(|f| f.layer == super::Layer::Structural));
}

// =============================================================================
// Retry coherence
// =============================================================================

#[test]
fn retry_requested_requires_attempt() {
    let mut receipt = escalate_receipt();
    receipt.retry_requested = true;
    receipt.attempt = 0;
    let failure = validate(&receipt).unwrap_err();
    assert_eq!(failure.faults[0].code, "RCP-RETRY-001");
}

#[test]
fn retry_requested_with_attempt_passes() {
    let mut receipt = escalate_receipt();
    receipt.retry_requested = true;
    receipt.attempt = 1;
    assert!(validate(&receipt).is_ok());
}

// =============================================================================
// Fingerprints and serde round trips
// =============================================================================

#[test]
fn fingerprint_ignores_server_fields() {
    let mut a = accepted_receipt();
    let mut b = a.clone();
    a.stored_at = Some(Utc::now());
    b.archived_at = Some(Utc::now());
    assert_eq!(a.content_fingerprint(true), b.content_fingerprint(true));
}

#[test]
fn fingerprint_detects_content_drift() {
    let a = accepted_receipt();
    let mut b = a.clone();
    b.task_summary = "something else".to_owned();
    assert_ne!(a.content_fingerprint(true), b.content_fingerprint(true));
}

#[test]
fn fingerprint_without_id_matches_regenerated_id() {
    let a = accepted_receipt();
    let mut b = a.clone();
    b.receipt_id = super::generate_receipt_id();
    assert_ne!(a.content_fingerprint(true), b.content_fingerprint(true));
    assert_eq!(a.content_fingerprint(false), b.content_fingerprint(false));
}

#[test]
fn receipt_serializes_enums_to_wire_strings() {
    let value = serde_json::to_value(escalate_receipt()).unwrap();
    assert_eq!(value["phase"], "escalate");
    assert_eq!(value["status"], "NA");
    assert_eq!(value["escalation_class"], "capability");
    assert_eq!(value["outcome_kind"], "NA");
}

#[test]
fn enum_parse_round_trips() {
    for phase in [Phase::Accepted, Phase::Complete, Phase::Escalate] {
        assert_eq!(Phase::parse(phase.as_str()), Some(phase));
    }
    for status in [Status::Na, Status::Success, Status::Failure, Status::Canceled] {
        assert_eq!(Status::parse(status.as_str()), Some(status));
    }
    for kind in [
        OutcomeKind::Na,
        OutcomeKind::None,
        OutcomeKind::ResponseText,
        OutcomeKind::ArtifactPointer,
        OutcomeKind::Mixed,
    ] {
        assert_eq!(OutcomeKind::parse(kind.as_str()), Some(kind));
    }
    for class in [
        EscalationClass::Na,
        EscalationClass::Owner,
        EscalationClass::Capability,
        EscalationClass::Trust,
        EscalationClass::Policy,
        EscalationClass::Scope,
        EscalationClass::Other,
    ] {
        assert_eq!(EscalationClass::parse(class.as_str()), Some(class));
    }
    assert_eq!(Phase::parse("bogus"), None);
    assert_eq!(Status::parse(""), None);
}

// =============================================================================
// Properties
// =============================================================================

fn principal_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9.:-]{0,30}"
}

proptest! {
    #[test]
    fn valid_accepted_receipts_always_pass(
        from in principal_strategy(),
        for_p in principal_strategy(),
        source in principal_strategy(),
        recipient in principal_strategy(),
        attempt in 0u32..100,
    ) {
        let receipt = ReceiptDraft::accepted("T-prop", "kind", "a summary")
            .from_principal(&from)
            .for_principal(&for_p)
            .source_system(&source)
            .recipient_ai(&recipient)
            .attempt(attempt)
            .into_receipt("acme");
        prop_assert!(validate(&receipt).is_ok());
    }

    #[test]
    fn escalate_with_mismatched_routing_always_rejected(
        recipient in principal_strategy(),
        target in principal_strategy(),
    ) {
        prop_assume!(recipient != target);
        let mut receipt = ReceiptDraft::escalate(
            "T-prop", "kind", "a summary",
            EscalationClass::Policy, "reason", &target,
        )
        .from_principal("p")
        .for_principal("p")
        .source_system("s")
        .into_receipt("acme");
        receipt.recipient_ai = recipient;
        let failure = validate(&receipt).unwrap_err();
        prop_assert_eq!(failure.faults[0].code.as_str(), "RCP-ROUTE-001");
    }
}
