//! Error mapping for the HTTP surface.
//!
//! Every failure maps to a stable kind and an HTTP status; validation
//! failures carry the full fault list so a caller can fix every field in
//! one round trip. Responses never leak internal details: store errors
//! surface as a bare 503, internal errors as a bare 500.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use quittance_core::lease::LeaseError;
use quittance_core::receipt::ValidationFailure;

use crate::store::{LedgerError, StoreError, TaskError};

/// Errors surfaced by the HTTP surface.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    /// The receipt or task failed schema or invariant checks.
    #[error(transparent)]
    Validation(ValidationFailure),

    /// `(tenant_id, receipt_id)` collides with different content.
    #[error("duplicate receipt id: {receipt_id}")]
    Duplicate {
        /// The colliding receipt id.
        receipt_id: String,
    },

    /// A different receipt holds this idempotency key.
    #[error("dedupe key conflict: {dedupe_key:?}")]
    DedupeConflict {
        /// The colliding key.
        dedupe_key: String,
    },

    /// A receipt, task, or lease identifier is unknown within the tenant.
    #[error("{what} not found: {id}")]
    NotFound {
        /// What kind of thing is missing.
        what: &'static str,
        /// The missing identifier.
        id: String,
    },

    /// A lease-bound operation was refused.
    #[error(transparent)]
    Lease(LeaseError),

    /// A completion arrived after the lease died; the receipt was appended
    /// anyway and the flip refused.
    #[error("late completion on lease {lease_id}; receipt {receipt_id} appended")]
    LateCompletion {
        /// The dead lease.
        lease_id: String,
        /// The appended receipt.
        receipt_id: String,
    },

    /// The provenance graph contains a cycle.
    #[error("provenance cycle at receipt {receipt_id}")]
    ChainCycle {
        /// Where the traversal bit its own tail.
        receipt_id: String,
    },

    /// No credentials, or credentials that fail verification.
    #[error("invalid or missing authentication")]
    Unauthenticated,

    /// Credentials verified but map to no tenant.
    #[error("authenticated subject resolves to no tenant")]
    TenantUnresolved,

    /// The caller exceeded its rate limit.
    #[error("rate limit exceeded")]
    RateLimited,

    /// The store is unreachable; retry with backoff.
    #[error("store unavailable")]
    StoreUnavailable,

    /// Unclassified failure. Should be rare.
    #[error("internal error")]
    Internal,
}

impl ApiError {
    /// The HTTP status for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(failure) => {
                if failure.exceeded_size_limit() {
                    StatusCode::PAYLOAD_TOO_LARGE
                } else {
                    StatusCode::BAD_REQUEST
                }
            }
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Duplicate { .. }
            | Self::DedupeConflict { .. }
            | Self::Lease(_)
            | Self::LateCompletion { .. }
            | Self::ChainCycle { .. } => StatusCode::CONFLICT,
            Self::Unauthenticated | Self::TenantUnresolved => StatusCode::UNAUTHORIZED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The stable error kind carried in the response body.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(failure) => {
                if failure.exceeded_size_limit() {
                    "size_limit_exceeded"
                } else {
                    "validation_failed"
                }
            }
            Self::Duplicate { .. } => "duplicate_receipt_id",
            Self::DedupeConflict { .. } => "dedupe_conflict",
            Self::NotFound { .. } => "not_found",
            Self::Lease(LeaseError::Expired { .. }) => "lease_expired",
            Self::Lease(LeaseError::NotOwned { .. }) => "lease_not_owned",
            Self::Lease(LeaseError::Released { .. }) => "lease_released",
            Self::Lease(LeaseError::NotFound { .. }) => "lease_not_found",
            Self::Lease(_) => "lease_error",
            Self::LateCompletion { .. } => "late_completion",
            Self::ChainCycle { .. } => "provenance_cycle",
            Self::Unauthenticated => "unauthenticated",
            Self::TenantUnresolved => "tenant_unresolved",
            Self::RateLimited => "rate_limited",
            Self::StoreUnavailable => "store_unavailable",
            Self::Internal => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            Self::Validation(failure) => json!({
                "error": self.kind(),
                "details": failure.faults,
            }),
            Self::Duplicate { receipt_id } => json!({
                "error": self.kind(),
                "receipt_id": receipt_id,
                "message": "a receipt with this id already exists with different content",
            }),
            Self::DedupeConflict { dedupe_key } => json!({
                "error": self.kind(),
                "dedupe_key": dedupe_key,
            }),
            Self::NotFound { what, id } => json!({
                "error": self.kind(),
                "message": format!("{what} not found: {id}"),
            }),
            Self::LateCompletion { lease_id, receipt_id } => json!({
                "error": self.kind(),
                "lease_id": lease_id,
                "receipt_id": receipt_id,
                "message": "lease no longer active; receipt appended for reconciliation",
            }),
            Self::ChainCycle { receipt_id } => json!({
                "error": self.kind(),
                "receipt_id": receipt_id,
            }),
            // No internal detail crosses the boundary for the rest.
            _ => json!({ "error": self.kind(), "message": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Validation(failure) => Self::Validation(failure),
            LedgerError::DuplicateReceipt { receipt_id } => Self::Duplicate { receipt_id },
            LedgerError::DedupeConflict { dedupe_key, .. } => Self::DedupeConflict { dedupe_key },
            LedgerError::NotFound { receipt_id } => Self::NotFound {
                what: "receipt",
                id: receipt_id,
            },
            LedgerError::ChainCycle { receipt_id } => Self::ChainCycle { receipt_id },
            LedgerError::Store(store) => store.into(),
        }
    }
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::NotFound { task_id } => Self::NotFound {
                what: "task",
                id: task_id,
            },
            TaskError::LeaseNotFound { lease_id } => Self::NotFound {
                what: "lease",
                id: lease_id,
            },
            TaskError::Lease(lease) => Self::Lease(lease),
            TaskError::LateCompletion { lease_id, receipt_id } => Self::LateCompletion {
                lease_id,
                receipt_id,
            },
            TaskError::Validation(failure) => Self::Validation(failure),
            TaskError::DedupeConflict { dedupe_key } => Self::DedupeConflict { dedupe_key },
            TaskError::Store(store) => store.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "store failure reached the transport edge");
        Self::StoreUnavailable
    }
}

#[cfg(test)]
mod tests {
    use quittance_core::receipt::{Fault, Layer};

    use super::*;

    fn fault(code: &str) -> Fault {
        Fault {
            code: code.to_owned(),
            layer: Layer::Structural,
            path: "inputs".to_owned(),
            message: "too big".to_owned(),
            hint: None,
        }
    }

    #[test]
    fn size_faults_map_to_413() {
        let err = ApiError::Validation(ValidationFailure {
            faults: vec![fault("RCP-SIZE-001")],
        });
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(err.kind(), "size_limit_exceeded");
    }

    #[test]
    fn plain_validation_maps_to_400() {
        let err = ApiError::Validation(ValidationFailure {
            faults: vec![fault("RCP-STRUCT-001")],
        });
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn taxonomy_statuses() {
        assert_eq!(
            ApiError::Unauthenticated.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::TenantUnresolved.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::RateLimited.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::StoreUnavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::Duplicate {
                receipt_id: "r".to_owned()
            }
            .status_code(),
            StatusCode::CONFLICT
        );
    }
}
