//! Per-tenant rate limiting.
//!
//! A sliding-window limiter keyed by tenant. Thread-safe behind an
//! `RwLock`; cleanup runs every Nth request to drop tenants with no recent
//! traffic, and a hard cap on tracked keys bounds memory regardless of how
//! many distinct tenants (or attackers guessing tokens) show up.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Deserialize;

use super::error::ApiError;

const fn max_requests_default() -> u32 {
    120
}

const fn window_secs_default() -> u64 {
    60
}

const fn cleanup_interval_default() -> u64 {
    100
}

const fn max_tracked_keys_default() -> usize {
    10_000
}

/// Configuration for the rate limiter.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum requests allowed per key within the window.
    pub max_requests: u32,

    /// Sliding window size in seconds.
    pub window_secs: u64,

    /// Run cleanup every N requests.
    pub cleanup_interval: u64,

    /// Hard cap on tracked keys; at the cap, unknown keys are refused.
    pub max_tracked_keys: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: max_requests_default(),
            window_secs: window_secs_default(),
            cleanup_interval: cleanup_interval_default(),
            max_tracked_keys: max_tracked_keys_default(),
        }
    }
}

/// Sliding-window limiter keyed by tenant.
pub struct RateLimiter {
    config: RateLimitConfig,
    state: RwLock<HashMap<String, Vec<Instant>>>,
    request_count: AtomicU64,
}

impl RateLimiter {
    /// Creates a limiter with the given configuration.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: RwLock::new(HashMap::new()),
            request_count: AtomicU64::new(0),
        }
    }

    /// Records a request for `key` and decides whether it is allowed.
    ///
    /// # Errors
    ///
    /// [`ApiError::RateLimited`] when the key exceeded its window budget or
    /// the tracked-key cap is full.
    pub fn check(&self, key: &str) -> Result<(), ApiError> {
        let count = self.request_count.fetch_add(1, Ordering::Relaxed);
        if self.config.cleanup_interval > 0 && count % self.config.cleanup_interval == 0 {
            self.cleanup();
        }

        let now = Instant::now();
        let window = std::time::Duration::from_secs(self.config.window_secs);
        let mut state = self.state.write().unwrap();

        if !state.contains_key(key) && state.len() >= self.config.max_tracked_keys {
            drop(state);
            self.cleanup();
            state = self.state.write().unwrap();
            if !state.contains_key(key) && state.len() >= self.config.max_tracked_keys {
                return Err(ApiError::RateLimited);
            }
        }

        let timestamps = state.entry(key.to_owned()).or_default();
        timestamps.retain(|t| now.duration_since(*t) < window);
        if timestamps.len() >= self.config.max_requests as usize {
            tracing::warn!(key, "rate limit exceeded");
            return Err(ApiError::RateLimited);
        }
        timestamps.push(now);
        Ok(())
    }

    /// Drops keys with no requests inside the window.
    fn cleanup(&self) {
        let window = std::time::Duration::from_secs(self.config.window_secs);
        let now = Instant::now();
        let mut state = self.state.write().unwrap();
        state.retain(|_, timestamps| {
            timestamps.retain(|t| now.duration_since(*t) < window);
            !timestamps.is_empty()
        });
    }
}
