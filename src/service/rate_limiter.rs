use crate::config::LoginRateLimitConfig;
use crate::error::app_error::AppError;
use crate::models::rate_limit::{RateLimitEntry, RateLimitPolicy, RateLimitStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Backing store for limiter entries. Every mutation on one identifier must be atomic.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn get(&self, identifier: &str) -> Result<Option<RateLimitEntry>, AppError>;

    /// Applies one attempt under the store's per-key atomicity and returns the updated entry.
    async fn record_attempt(&self, identifier: &str, now: DateTime<Utc>, policy: &RateLimitPolicy) -> Result<RateLimitEntry, AppError>;

    async fn remove(&self, identifier: &str) -> Result<(), AppError>;

    /// Drops entries that no longer influence decisions. Returns how many were removed.
    async fn remove_expired(&self, now: DateTime<Utc>, policy: &RateLimitPolicy) -> Result<usize, AppError>;
}

/// Counts one attempt against `entry`.
///
/// Expired entries restart with a fresh window, so the first attempt of a window always counts
/// as 1. Attempts made while a block is active are not counted.
pub(crate) fn apply_attempt(entry: Option<RateLimitEntry>, identifier: &str, now: DateTime<Utc>, policy: &RateLimitPolicy) -> RateLimitEntry {
    let mut entry = match entry {
        Some(entry) if !entry.is_expired(now, policy) => entry,
        _ => RateLimitEntry::new(identifier, now),
    };

    if entry.is_blocked(now) {
        return entry;
    }

    entry.attempts += 1;
    entry.last_attempt = now;
    if entry.attempts >= policy.max_attempts {
        entry.blocked_until = Some(now + policy.block_duration);
    }

    entry
}

#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    entries: Mutex<HashMap<String, RateLimitEntry>>,
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn get(&self, identifier: &str) -> Result<Option<RateLimitEntry>, AppError> {
        let entries = self.entries.lock().await;
        Ok(entries.get(identifier).cloned())
    }

    async fn record_attempt(&self, identifier: &str, now: DateTime<Utc>, policy: &RateLimitPolicy) -> Result<RateLimitEntry, AppError> {
        let mut entries = self.entries.lock().await;
        let updated = apply_attempt(entries.remove(identifier), identifier, now, policy);
        entries.insert(identifier.to_string(), updated.clone());
        Ok(updated)
    }

    async fn remove(&self, identifier: &str) -> Result<(), AppError> {
        self.entries.lock().await.remove(identifier);
        Ok(())
    }

    async fn remove_expired(&self, now: DateTime<Utc>, policy: &RateLimitPolicy) -> Result<usize, AppError> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now, policy));
        Ok(before - entries.len())
    }
}

/// Per-identifier login attempt limiter.
///
/// Constructed explicitly and handed to request handlers through Rocket state; the periodic
/// sweep is owned by [`crate::service::maintenance::Maintenance`].
pub struct RateLimiter {
    policy: RateLimitPolicy,
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    pub fn new(config: &LoginRateLimitConfig, store: Arc<dyn RateLimitStore>) -> Self {
        Self {
            policy: RateLimitPolicy::from(config),
            store,
        }
    }

    pub fn in_memory(config: &LoginRateLimitConfig) -> Self {
        Self::new(config, Arc::new(InMemoryRateLimitStore::default()))
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub async fn check(&self, identifier: &str) -> Result<RateLimitStatus, AppError> {
        self.check_at(identifier, Utc::now()).await
    }

    pub async fn check_at(&self, identifier: &str, now: DateTime<Utc>) -> Result<RateLimitStatus, AppError> {
        let status = match self.store.get(identifier).await? {
            Some(entry) => entry.status(now, &self.policy),
            None => RateLimitStatus::open(&self.policy),
        };
        Ok(status)
    }

    pub async fn record_attempt(&self, identifier: &str) -> Result<RateLimitStatus, AppError> {
        self.record_attempt_at(identifier, Utc::now()).await
    }

    pub async fn record_attempt_at(&self, identifier: &str, now: DateTime<Utc>) -> Result<RateLimitStatus, AppError> {
        let entry = self.store.record_attempt(identifier, now, &self.policy).await?;
        let status = entry.status(now, &self.policy);

        if status.is_blocked && entry.attempts == self.policy.max_attempts && entry.last_attempt == now {
            tracing::warn!(
                identifier = %identifier,
                attempts = entry.attempts,
                blocked_until = ?entry.blocked_until,
                "sign-in identifier blocked"
            );
        }

        Ok(status)
    }

    pub async fn reset(&self, identifier: &str) -> Result<(), AppError> {
        self.store.remove(identifier).await
    }

    pub async fn cleanup(&self) -> Result<usize, AppError> {
        self.cleanup_at(Utc::now()).await
    }

    pub async fn cleanup_at(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        self.store.remove_expired(now, &self.policy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn limiter() -> RateLimiter {
        RateLimiter::in_memory(&LoginRateLimitConfig::default())
    }

    const ID: &str = "a1b2c3:alice@example.com";

    #[tokio::test]
    async fn nth_attempt_blocks_with_zero_remaining() {
        let limiter = limiter();
        let now = Utc::now();

        for expected_remaining in (1..5).rev() {
            let status = limiter.record_attempt_at(ID, now).await.unwrap();
            assert!(!status.is_blocked);
            assert_eq!(status.remaining_attempts, expected_remaining);
        }

        let status = limiter.record_attempt_at(ID, now).await.unwrap();
        assert!(status.is_blocked);
        assert_eq!(status.remaining_attempts, 0);
        assert_eq!(status.reset_time, Some(now + Duration::minutes(30)));
    }

    #[tokio::test]
    async fn check_after_block_elapses_is_full_reset() {
        let limiter = limiter();
        let now = Utc::now();
        for _ in 0..5 {
            limiter.record_attempt_at(ID, now).await.unwrap();
        }
        assert!(limiter.check_at(ID, now + Duration::minutes(29)).await.unwrap().is_blocked);

        let later = now + Duration::minutes(30);
        let status = limiter.check_at(ID, later).await.unwrap();
        assert!(!status.is_blocked);
        assert_eq!(status.remaining_attempts, 5);
        assert_eq!(status.reset_time, None);

        let status = limiter.record_attempt_at(ID, later).await.unwrap();
        assert_eq!(status.remaining_attempts, 4);
    }

    #[tokio::test]
    async fn reset_restores_full_allowance() {
        let limiter = limiter();
        for _ in 0..5 {
            limiter.record_attempt(ID).await.unwrap();
        }
        limiter.reset(ID).await.unwrap();

        let status = limiter.check(ID).await.unwrap();
        assert!(!status.is_blocked);
        assert_eq!(status.remaining_attempts, 5);
    }

    #[tokio::test]
    async fn attempt_at_exact_window_expiry_starts_fresh_window() {
        let limiter = limiter();
        let start = Utc::now();
        limiter.record_attempt_at(ID, start).await.unwrap();
        limiter.record_attempt_at(ID, start).await.unwrap();

        let boundary = start + Duration::minutes(15);
        let status = limiter.record_attempt_at(ID, boundary).await.unwrap();
        assert_eq!(status.remaining_attempts, 4);
        assert_eq!(status.reset_time, Some(boundary + Duration::minutes(15)));
    }

    #[tokio::test]
    async fn check_does_not_mutate() {
        let limiter = limiter();
        let now = Utc::now();
        for _ in 0..3 {
            assert_eq!(limiter.check_at(ID, now).await.unwrap().remaining_attempts, 5);
        }
        limiter.record_attempt_at(ID, now).await.unwrap();
        for _ in 0..3 {
            assert_eq!(limiter.check_at(ID, now).await.unwrap().remaining_attempts, 4);
        }
    }

    #[tokio::test]
    async fn attempts_while_blocked_do_not_extend_block() {
        let limiter = limiter();
        let now = Utc::now();
        for _ in 0..5 {
            limiter.record_attempt_at(ID, now).await.unwrap();
        }
        let later = now + Duration::minutes(10);
        let status = limiter.record_attempt_at(ID, later).await.unwrap();
        assert!(status.is_blocked);
        assert_eq!(status.reset_time, Some(now + Duration::minutes(30)));
    }

    #[tokio::test]
    async fn cleanup_removes_only_expired_entries() {
        let limiter = limiter();
        let now = Utc::now();
        limiter.record_attempt_at("stale", now).await.unwrap();
        for _ in 0..5 {
            limiter.record_attempt_at("blocked", now).await.unwrap();
        }
        limiter.record_attempt_at("fresh", now + Duration::minutes(14)).await.unwrap();

        let removed = limiter.cleanup_at(now + Duration::minutes(20)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(limiter.check_at("blocked", now + Duration::minutes(20)).await.unwrap().is_blocked);
        assert_eq!(limiter.check_at("fresh", now + Duration::minutes(20)).await.unwrap().remaining_attempts, 4);
    }

    #[tokio::test]
    async fn identifiers_are_independent() {
        let limiter = limiter();
        for _ in 0..5 {
            limiter.record_attempt("fp1:a@example.com").await.unwrap();
        }
        assert!(limiter.check("fp1:a@example.com").await.unwrap().is_blocked);
        assert!(!limiter.check("fp2:a@example.com").await.unwrap().is_blocked);
    }

    #[tokio::test]
    async fn concurrent_attempts_are_all_counted() {
        let limiter = Arc::new(RateLimiter::in_memory(&LoginRateLimitConfig {
            max_attempts: 100,
            ..LoginRateLimitConfig::default()
        }));

        let mut handles = Vec::new();
        for _ in 0..40 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.record_attempt(ID).await.unwrap() }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(limiter.check(ID).await.unwrap().remaining_attempts, 60);
    }

    proptest! {
        #[test]
        fn blocks_exactly_on_nth_attempt(max_attempts in 1u32..20, spacing_secs in 0i64..40) {
            let policy = RateLimitPolicy { max_attempts, ..RateLimitPolicy::default() };
            let start = Utc::now();
            let mut entry = None;

            for n in 1..=max_attempts {
                let now = start + Duration::seconds(spacing_secs * (n as i64 - 1));
                let updated = apply_attempt(entry.take(), ID, now, &policy);
                let status = updated.status(now, &policy);
                prop_assert_eq!(status.is_blocked, n == max_attempts);
                prop_assert_eq!(status.remaining_attempts, max_attempts - n);
                entry = Some(updated);
            }
        }
    }
}
