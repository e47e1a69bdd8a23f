//! The access gate: authenticated identity to tenant scope.
//!
//! Every request authenticates with either an `X-API-Key` header or an
//! `Authorization: Bearer <token>` header. The token maps strictly
//! server-side to a tenant; whatever tenant the request body claims is
//! ignored long before it gets here. Token comparison is constant-time.

use axum::http::HeaderMap;
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;

use super::error::ApiError;
use crate::config::AuthConfig;

/// Header carrying a bare API key.
const API_KEY_HEADER: &str = "x-api-key";

/// Header carrying a bearer token.
const AUTHORIZATION_HEADER: &str = "authorization";

/// The tenant scope resolved for one request. Threaded into every store
/// call; no code path reaches the ledger or the task store without it.
#[derive(Debug, Clone)]
pub struct TenantScope {
    /// The resolved tenant.
    pub tenant_id: String,

    /// Tenant-level retry handler for system escalations, if configured.
    pub retry_principal: Option<String>,
}

struct GateEntry {
    token: SecretString,
    tenant_id: String,
    retry_principal: Option<String>,
}

/// Maps authenticated subjects to tenant scopes.
pub struct AccessGate {
    entries: Vec<GateEntry>,
}

impl AccessGate {
    /// Builds the gate from the daemon's auth configuration.
    #[must_use]
    pub fn new(auth: &AuthConfig) -> Self {
        let entries = auth
            .tokens
            .iter()
            .map(|entry| GateEntry {
                token: entry.token.clone(),
                tenant_id: entry.tenant_id.clone(),
                retry_principal: entry.retry_principal.clone(),
            })
            .collect();
        Self { entries }
    }

    /// Resolves the request headers to a tenant scope.
    ///
    /// # Errors
    ///
    /// - [`ApiError::Unauthenticated`] when no credential is presented.
    /// - [`ApiError::TenantUnresolved`] when the credential maps to no
    ///   tenant.
    pub fn resolve(&self, headers: &HeaderMap) -> Result<TenantScope, ApiError> {
        let candidate = extract_token(headers).ok_or(ApiError::Unauthenticated)?;

        for entry in &self.entries {
            let known = entry.token.expose_secret().as_bytes();
            if known.ct_eq(candidate.as_bytes()).into() {
                return Ok(TenantScope {
                    tenant_id: entry.tenant_id.clone(),
                    retry_principal: entry.retry_principal.clone(),
                });
            }
        }
        Err(ApiError::TenantUnresolved)
    }
}

/// Pulls the presented token out of the headers: `X-API-Key` first, then
/// `Authorization: Bearer`.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(key) = headers.get(API_KEY_HEADER) {
        if let Ok(value) = key.to_str() {
            if !value.is_empty() {
                return Some(value.to_owned());
            }
        }
    }
    if let Some(auth) = headers.get(AUTHORIZATION_HEADER) {
        if let Ok(value) = auth.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                if !token.is_empty() {
                    return Some(token.to_owned());
                }
            }
        }
    }
    None
}
