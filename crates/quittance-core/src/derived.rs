//! Task status derived from receipt history.
//!
//! Status is always a query, never a column: receipts are append-only, so
//! the state of an obligation is computed from which phases exist. The fold
//! deliberately looks for existence rather than sequence, so receipts
//! submitted out of band (or out of order) still derive a sane answer.

use serde::{Deserialize, Serialize};

use crate::receipt::Phase;

/// The derived state of an obligation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivedStatus {
    /// At least one `complete` receipt exists.
    Resolved,
    /// At least one `escalate` receipt exists and no `complete`.
    Escalated,
    /// An `accepted` receipt exists and nothing terminal.
    Open,
    /// No receipts, or none of the above.
    Unknown,
}

impl DerivedStatus {
    /// Canonical wire string for this derived status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::Escalated => "escalated",
            Self::Open => "open",
            Self::Unknown => "unknown",
        }
    }

    /// Folds the phases present in a task's receipt history into its
    /// derived status.
    pub fn from_phases(phases: impl IntoIterator<Item = Phase>) -> Self {
        let mut has_accepted = false;
        let mut has_escalate = false;
        for phase in phases {
            match phase {
                Phase::Complete => return Self::Resolved,
                Phase::Escalate => has_escalate = true,
                Phase::Accepted => has_accepted = true,
            }
        }
        if has_escalate {
            Self::Escalated
        } else if has_accepted {
            Self::Open
        } else {
            Self::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DerivedStatus, Phase};

    #[test]
    fn any_complete_resolves() {
        assert_eq!(
            DerivedStatus::from_phases([Phase::Accepted, Phase::Escalate, Phase::Complete]),
            DerivedStatus::Resolved
        );
        // Order does not matter: a complete that arrived before the
        // accepted still resolves.
        assert_eq!(
            DerivedStatus::from_phases([Phase::Complete, Phase::Accepted]),
            DerivedStatus::Resolved
        );
    }

    #[test]
    fn escalate_without_complete_escalates() {
        assert_eq!(
            DerivedStatus::from_phases([Phase::Accepted, Phase::Escalate]),
            DerivedStatus::Escalated
        );
        assert_eq!(
            DerivedStatus::from_phases([Phase::Escalate]),
            DerivedStatus::Escalated
        );
    }

    #[test]
    fn accepted_alone_is_open() {
        assert_eq!(
            DerivedStatus::from_phases([Phase::Accepted]),
            DerivedStatus::Open
        );
    }

    #[test]
    fn empty_history_is_unknown() {
        assert_eq!(
            DerivedStatus::from_phases(Vec::<Phase>::new()),
            DerivedStatus::Unknown
        );
    }
}
