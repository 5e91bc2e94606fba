//! Spam protection gate.
//!
//! Tier-1 spam protection for submissions: honeypot field, submission
//! timing window, JavaScript token shape, and a per-IP rate limit. Checks
//! run in fixed order and short-circuit on the first failure. The token is
//! a heuristic bot filter, not an auth credential; its randomness is never
//! re-verified server-side.

use crate::config::SpamConfig;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Hidden field that must stay empty; bots that auto-fill forms trip it.
pub const HONEYPOT_FIELD: &str = "_talkform_website";
/// Unix seconds recorded when the conversation opened.
pub const TIMESTAMP_FIELD: &str = "_talkform_timestamp";
/// Hex token generated client-side when the conversation opened.
pub const TOKEN_FIELD: &str = "_talkform_token";

/// Outcome of one validation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpamCheckResult {
    pub valid: bool,
    pub error: Option<String>,
}

impl SpamCheckResult {
    fn pass() -> Self {
        Self { valid: true, error: None }
    }

    fn reject(message: &str) -> Self {
        Self {
            valid: false,
            error: Some(message.to_string()),
        }
    }
}

/// Shared, time-windowed counter store for the per-IP rate limit.
///
/// `increment` is the whole contract: one atomic read-modify-write that
/// starts a window at 1 on first use (or after expiry) and returns the
/// count including this call. Callers compare the returned count against
/// their limit, so concurrent submissions from one IP can never undercount.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn increment(&self, key: &str, window_seconds: u64, now: u64) -> u64;
}

/// In-process rate limiter: a mutex-guarded map of key -> (count, expiry).
/// The window is fixed from the first submission; expired entries are
/// evicted on the next increment, whichever key triggers it.
pub struct MemoryRateLimiter {
    inner: Mutex<HashMap<String, (u64, u64)>>,
}

impl Default for MemoryRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    async fn tracked_keys(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimiter {
    async fn increment(&self, key: &str, window_seconds: u64, now: u64) -> u64 {
        let mut g = self.inner.lock().await;
        // Evict all expired windows while we hold the lock; otherwise every
        // distinct key ever seen stays in the map forever.
        g.retain(|_, (_, expires_at)| *expires_at > now);
        match g.get_mut(key) {
            Some((count, _)) => {
                *count += 1;
                *count
            }
            None => {
                g.insert(key.to_string(), (1, now + window_seconds));
                1
            }
        }
    }
}

/// The spam gate: stateless per call apart from the shared rate-limit store.
pub struct SpamGate {
    config: SpamConfig,
    limiter: Arc<dyn RateLimitStore>,
}

impl SpamGate {
    pub fn new(config: SpamConfig, limiter: Arc<dyn RateLimitStore>) -> Self {
        Self { config, limiter }
    }

    /// Validate a submission payload against all protection measures.
    pub async fn validate(&self, data: &Map<String, Value>, ip: &str) -> SpamCheckResult {
        self.validate_at(data, ip, unix_now()).await
    }

    /// Validation with an explicit clock, so tests control elapsed time and
    /// window expiry.
    pub async fn validate_at(
        &self,
        data: &Map<String, Value>,
        ip: &str,
        now: u64,
    ) -> SpamCheckResult {
        if !self.config.enabled {
            return SpamCheckResult::pass();
        }

        let result = self.check_honeypot(data);
        if !result.valid {
            return result;
        }
        let result = self.check_timing(data, now);
        if !result.valid {
            return result;
        }
        let result = self.check_token(data);
        if !result.valid {
            return result;
        }
        self.check_rate_limit(ip, now).await
    }

    fn check_honeypot(&self, data: &Map<String, Value>) -> SpamCheckResult {
        let filled = data
            .get(HONEYPOT_FIELD)
            .map(|v| !crate::forms::answer_to_string(v).is_empty())
            .unwrap_or(false);
        if filled {
            log::info!("spam detected: honeypot field filled");
            return SpamCheckResult::reject("Invalid submission detected.");
        }
        SpamCheckResult::pass()
    }

    fn check_timing(&self, data: &Map<String, Value>, now: u64) -> SpamCheckResult {
        let Some(timestamp) = data.get(TIMESTAMP_FIELD).and_then(as_unix_seconds) else {
            log::info!("spam detected: missing timestamp");
            return SpamCheckResult::reject("Invalid submission detected.");
        };
        let elapsed = now.saturating_sub(timestamp);
        if elapsed < self.config.min_submission_seconds {
            log::info!("spam detected: submission too fast ({}s)", elapsed);
            return SpamCheckResult::reject("Please take your time filling out the form.");
        }
        if elapsed > self.config.max_submission_seconds {
            log::info!("spam detected: submission expired ({}s)", elapsed);
            return SpamCheckResult::reject(
                "Your session has expired. Please refresh and try again.",
            );
        }
        SpamCheckResult::pass()
    }

    fn check_token(&self, data: &Map<String, Value>) -> SpamCheckResult {
        let token = data
            .get(TOKEN_FIELD)
            .map(crate::forms::answer_to_string)
            .unwrap_or_default();
        if token.is_empty() {
            log::info!("spam detected: missing JS token");
            return SpamCheckResult::reject("JavaScript is required for this form.");
        }
        if token.len() < 16 || !token.chars().all(|c| c.is_ascii_alphanumeric()) {
            log::info!("spam detected: invalid JS token format");
            return SpamCheckResult::reject("Invalid submission detected.");
        }
        SpamCheckResult::pass()
    }

    async fn check_rate_limit(&self, ip: &str, now: u64) -> SpamCheckResult {
        let key = rate_limit_key(ip);
        let count = self
            .limiter
            .increment(&key, self.config.rate_limit_window_seconds, now)
            .await;
        if count > self.config.rate_limit_max_submissions {
            log::info!("rate limit exceeded for IP {} ({} submissions)", ip, count);
            return SpamCheckResult::reject("Too many submissions. Please try again later.");
        }
        SpamCheckResult::pass()
    }
}

/// Counter key: hex SHA-256 of the IP, so raw addresses never sit in the store.
fn rate_limit_key(ip: &str) -> String {
    let digest = Sha256::digest(ip.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn as_unix_seconds(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
