//! Shared daemon state threaded through the HTTP surface.

use std::sync::Arc;

use axum::http::HeaderMap;

use quittance_core::config::EngineConfig;

use crate::config::DaemonConfig;
use crate::http::auth::{AccessGate, TenantScope};
use crate::http::error::ApiError;
use crate::http::rate_limit::RateLimiter;
use crate::store::{ReceiptLedger, Store, TaskStore};

/// Everything a handler needs: the stores, the engine knobs, the access
/// gate, and the rate limiter.
pub struct AppState {
    /// The shared database handle.
    pub store: Store,

    /// The receipt ledger.
    pub ledger: ReceiptLedger,

    /// The task queue and lease engine.
    pub tasks: TaskStore,

    /// Engine tuning knobs.
    pub engine: EngineConfig,

    /// The access gate.
    pub gate: AccessGate,

    /// Per-tenant rate limiter.
    pub limiter: RateLimiter,
}

/// Handler state handle.
pub type SharedState = Arc<AppState>;

impl AppState {
    /// Assembles the daemon state over an opened store.
    #[must_use]
    pub fn new(store: Store, config: &DaemonConfig) -> Self {
        Self {
            ledger: store.ledger(),
            tasks: store.tasks(),
            store,
            engine: config.engine.clone(),
            gate: AccessGate::new(&config.auth),
            limiter: RateLimiter::new(config.rate_limit.clone()),
        }
    }

    /// Resolves the caller to a tenant scope and charges its rate budget.
    /// Every handler calls this before touching a store.
    ///
    /// # Errors
    ///
    /// [`ApiError::Unauthenticated`], [`ApiError::TenantUnresolved`], or
    /// [`ApiError::RateLimited`].
    pub fn authorize(&self, headers: &HeaderMap) -> Result<TenantScope, ApiError> {
        let scope = self.gate.resolve(headers)?;
        self.limiter.check(&scope.tenant_id)?;
        Ok(scope)
    }
}
