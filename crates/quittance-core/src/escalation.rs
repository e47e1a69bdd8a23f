//! Escalation-class derivation from failure reasons.
//!
//! Workers reporting a failure may name the class explicitly; when they
//! don't, a `class:` prefix on the reason string is honored, and anything
//! else lands in `other`.

use crate::receipt::EscalationClass;

/// Reason string the reaper uses for expiry escalations.
pub const LEASE_EXPIRED_REASON: &str = "lease_expired";

/// Reason string the reaper uses when quarantining a malformed task row.
pub const REAPER_MALFORMED_REASON: &str = "reaper_malformed";

/// Reason string for a worker voluntarily handing a task back.
pub const VOLUNTARY_RELEASE_REASON: &str = "voluntary_release";

/// Derives an escalation class from a failure reason.
///
/// Reasons of the form `"<class>: detail"` map to the named class
/// (`policy`, `capability`, `trust`, `scope`, `owner`, `other`); anything
/// else is `other`.
#[must_use]
pub fn class_from_reason(reason: &str) -> EscalationClass {
    reason
        .split_once(':')
        .map(|(prefix, _)| prefix.trim())
        .and_then(EscalationClass::parse)
        .filter(|class| *class != EscalationClass::Na)
        .unwrap_or(EscalationClass::Other)
}

#[cfg(test)]
mod tests {
    use super::{EscalationClass, class_from_reason};

    #[test]
    fn prefixed_reasons_map_to_their_class() {
        assert_eq!(
            class_from_reason("capability: needs GPU"),
            EscalationClass::Capability
        );
        assert_eq!(
            class_from_reason("policy: output too large"),
            EscalationClass::Policy
        );
        assert_eq!(class_from_reason("trust: unsigned input"), EscalationClass::Trust);
        assert_eq!(class_from_reason("scope: out of charter"), EscalationClass::Scope);
        assert_eq!(class_from_reason("owner: needs sign-off"), EscalationClass::Owner);
    }

    #[test]
    fn unprefixed_or_unknown_reasons_are_other() {
        assert_eq!(class_from_reason("disk full"), EscalationClass::Other);
        assert_eq!(class_from_reason("weird: thing"), EscalationClass::Other);
        assert_eq!(class_from_reason(""), EscalationClass::Other);
    }

    #[test]
    fn na_prefix_never_derives() {
        assert_eq!(class_from_reason("NA: whatever"), EscalationClass::Other);
    }
}
