//! Engine tuning knobs.
//!
//! These are the recognized options of the coordination engine itself;
//! transport-level settings (bind address, auth tokens, rate limits) live
//! with the daemon. Receipts being single-writer is a discipline of the
//! ledger, not a knob, so it does not appear here.

use serde::{Deserialize, Serialize};

/// Default initial lease duration, in seconds.
pub const DEFAULT_LEASE_TTL_SECONDS: u64 = 900;

/// Default cap on total lease lifetime across renewals, in seconds.
pub const DEFAULT_MAX_LEASE_LIFETIME_SECONDS: u64 = 7200;

/// Default reaper sweep cadence, in seconds.
pub const DEFAULT_REAPER_INTERVAL_SECONDS: u64 = 30;

/// Default retry budget per task.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default bound on provenance chain traversal depth.
pub const DEFAULT_QUERY_DEPTH_CAP: usize = 1000;

/// Default principal for system escalations when neither the task nor the
/// tenant configures one.
pub const DEFAULT_RETRY_PRINCIPAL: &str = "retry-handler";

const fn lease_ttl_default() -> u64 {
    DEFAULT_LEASE_TTL_SECONDS
}

const fn max_lease_lifetime_default() -> u64 {
    DEFAULT_MAX_LEASE_LIFETIME_SECONDS
}

const fn reaper_interval_default() -> u64 {
    DEFAULT_REAPER_INTERVAL_SECONDS
}

const fn max_attempts_default() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

const fn query_depth_cap_default() -> usize {
    DEFAULT_QUERY_DEPTH_CAP
}

fn retry_principal_default() -> String {
    DEFAULT_RETRY_PRINCIPAL.to_owned()
}

/// Tuning knobs for the task/lease engine and query layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Initial lease duration; heartbeats extend by this much from now.
    pub lease_ttl_seconds: u64,

    /// Hard cap on lease lifetime via renewals, measured from grant.
    pub max_lease_lifetime_seconds: u64,

    /// Reaper sweep cadence.
    pub reaper_interval_seconds: u64,

    /// Retry budget applied to tasks that don't override it.
    pub default_max_attempts: u32,

    /// Bound on provenance chain traversal.
    pub query_depth_cap: usize,

    /// Principal system escalations route to when no task- or tenant-level
    /// retry handler is configured.
    pub default_retry_principal: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lease_ttl_seconds: lease_ttl_default(),
            max_lease_lifetime_seconds: max_lease_lifetime_default(),
            reaper_interval_seconds: reaper_interval_default(),
            default_max_attempts: max_attempts_default(),
            query_depth_cap: query_depth_cap_default(),
            default_retry_principal: retry_principal_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::EngineConfig;

    #[test]
    fn defaults_match_contract() {
        let config = EngineConfig::default();
        assert_eq!(config.lease_ttl_seconds, 900);
        assert_eq!(config.max_lease_lifetime_seconds, 7200);
        assert_eq!(config.reaper_interval_seconds, 30);
        assert_eq!(config.default_max_attempts, 3);
        assert_eq!(config.query_depth_cap, 1000);
        assert_eq!(config.default_retry_principal, "retry-handler");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: EngineConfig = toml::from_str("lease_ttl_seconds = 2").unwrap();
        assert_eq!(config.lease_ttl_seconds, 2);
        assert_eq!(config.default_max_attempts, 3);
    }
}
