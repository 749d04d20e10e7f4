use crate::config::LoginRateLimitConfig;
use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Limits applied by the login rate limiter, resolved from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_attempts: u32,
    pub window: Duration,
    pub block_duration: Duration,
}

impl From<&LoginRateLimitConfig> for RateLimitPolicy {
    fn from(config: &LoginRateLimitConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            window: config.window(),
            block_duration: config.block_duration(),
        }
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        RateLimitPolicy::from(&LoginRateLimitConfig::default())
    }
}

/// Attempt counter for a single identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitEntry {
    pub identifier: String,
    pub attempts: u32,
    pub window_start: DateTime<Utc>,
    pub last_attempt: DateTime<Utc>,
    pub blocked_until: Option<DateTime<Utc>>,
}

impl RateLimitEntry {
    pub fn new(identifier: &str, now: DateTime<Utc>) -> Self {
        Self {
            identifier: identifier.to_string(),
            attempts: 0,
            window_start: now,
            last_attempt: now,
            blocked_until: None,
        }
    }

    pub fn is_blocked(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.is_some_and(|until| now < until)
    }

    /// An entry expires when its block elapses or, if it was never blocked, when its window closes.
    /// Expired entries are equivalent to no entry at all.
    pub fn is_expired(&self, now: DateTime<Utc>, policy: &RateLimitPolicy) -> bool {
        match self.blocked_until {
            Some(until) => now >= until,
            None => now - self.window_start >= policy.window,
        }
    }

    pub fn status(&self, now: DateTime<Utc>, policy: &RateLimitPolicy) -> RateLimitStatus {
        if self.is_expired(now, policy) {
            return RateLimitStatus::open(policy);
        }

        match self.blocked_until {
            Some(until) => RateLimitStatus {
                is_blocked: true,
                remaining_attempts: 0,
                reset_time: Some(until),
            },
            None => RateLimitStatus {
                is_blocked: false,
                remaining_attempts: policy.max_attempts.saturating_sub(self.attempts),
                reset_time: Some(self.window_start + policy.window),
            },
        }
    }
}

/// Result of a limiter check or recorded attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RateLimitStatus {
    pub is_blocked: bool,
    pub remaining_attempts: u32,
    pub reset_time: Option<DateTime<Utc>>,
}

impl RateLimitStatus {
    pub fn open(policy: &RateLimitPolicy) -> Self {
        Self {
            is_blocked: false,
            remaining_attempts: policy.max_attempts,
            reset_time: None,
        }
    }
}
