use crate::config::{AccountLockConfig, UnlockConfig};
use crate::error::app_error::AppError;
use crate::models::account_lock::{AccountLockState, FailureRecord, PersistReason};
use crate::models::audit::audit_events;
use crate::service::audit::security_event;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::distr::{Alphanumeric, SampleString};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

const UNLOCK_TOKEN_LENGTH: usize = 32;

/// Account profile columns the lock manager reads and writes.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Missing rows read as a clear state.
    async fn load_lock_state(&self, account_id: &Uuid) -> Result<AccountLockState, AppError>;

    async fn save_lock_state(&self, account_id: &Uuid, state: &AccountLockState) -> Result<(), AppError>;

    async fn clear_lock_state(&self, account_id: &Uuid) -> Result<(), AppError>;

    async fn store_unlock_token(&self, account_id: &Uuid, token_hash: &str, expires_at: DateTime<Utc>) -> Result<(), AppError>;

    /// Clears the lock state and the token when `token_hash` matches an unexpired token.
    async fn consume_unlock_token(&self, account_id: &Uuid, token_hash: &str, now: DateTime<Utc>) -> Result<bool, AppError>;
}

/// Decides whether a failure count must be written through to the profile store.
pub fn should_persist(new_count: u32, last_persisted: Option<DateTime<Utc>>, now: DateTime<Utc>, config: &AccountLockConfig) -> Option<PersistReason> {
    if new_count <= 1 {
        return Some(PersistReason::Baseline);
    }
    if new_count >= config.threshold {
        return Some(PersistReason::Threshold);
    }
    if config.checkpoint_interval > 0 && new_count % config.checkpoint_interval == 0 {
        return Some(PersistReason::Checkpoint);
    }
    match last_persisted {
        None => Some(PersistReason::Fallback),
        Some(at) if now - at > config.fallback_window() => Some(PersistReason::Fallback),
        Some(_) => None,
    }
}

pub(crate) fn hash_unlock_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[derive(Debug, Clone, Copy)]
struct PendingFailures {
    count: u32,
    updated_at: DateTime<Utc>,
}

/// Failed-attempt tracking and lockout for accounts.
///
/// Only some failures are written to the profile store (see [`should_persist`]). The others live
/// in an in-process ledger so the count keeps climbing between checkpoints.
pub struct AccountLockManager {
    config: AccountLockConfig,
    unlock_token_ttl: Duration,
    store: Arc<dyn ProfileStore>,
    ledger: Mutex<HashMap<Uuid, PendingFailures>>,
}

impl AccountLockManager {
    pub fn new(config: &AccountLockConfig, unlock: &UnlockConfig, store: Arc<dyn ProfileStore>) -> Self {
        Self {
            config: config.clone(),
            unlock_token_ttl: unlock.token_ttl(),
            store,
            ledger: Mutex::new(HashMap::new()),
        }
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        tokio::time::timeout(self.config.store_timeout(), fut)
            .await
            .map_err(|_| AppError::Timeout(operation))?
    }

    pub fn remaining_before_lock(&self, failed_attempts: u32) -> u32 {
        self.config.threshold.saturating_sub(failed_attempts)
    }

    pub async fn load(&self, account_id: &Uuid) -> Result<AccountLockState, AppError> {
        self.bounded("profile_store.load", self.store.load_lock_state(account_id)).await
    }

    pub async fn record_failure(&self, account_id: &Uuid) -> Result<FailureRecord, AppError> {
        self.record_failure_at(account_id, Utc::now()).await
    }

    pub async fn record_failure_at(&self, account_id: &Uuid, now: DateTime<Utc>) -> Result<FailureRecord, AppError> {
        let state = self.load(account_id).await?;
        let persisted_count = state.effective_failures(now);
        let fallback = self.config.fallback_window();

        let new_count = {
            let mut ledger = self.ledger.lock().await;
            let pending = ledger
                .get(account_id)
                .filter(|p| !state.lock_elapsed(now) && now - p.updated_at <= fallback)
                .map(|p| p.count)
                .unwrap_or(0);

            let new_count = persisted_count.max(pending) + 1;
            ledger.insert(*account_id, PendingFailures { count: new_count, updated_at: now });
            new_count
        };

        let last_persisted = if state.lock_elapsed(now) { None } else { state.last_failed_update };
        let reason = should_persist(new_count, last_persisted, now, &self.config);
        let locked_until = (new_count >= self.config.threshold).then(|| now + self.config.lock_duration());

        if let Some(reason) = reason {
            let next = AccountLockState {
                failed_attempts: new_count as i32,
                locked_until,
                last_failed_update: Some(now),
                unlocked_at: state.unlocked_at,
            };
            self.bounded("profile_store.save", self.store.save_lock_state(account_id, &next)).await?;

            tracing::debug!(account_id = %account_id, failed_attempts = new_count, reason = reason.as_str(), "persisted failed attempt count");
        }

        if let Some(until) = locked_until {
            self.ledger.lock().await.remove(account_id);
            security_event(
                audit_events::ACCOUNT_LOCKED,
                false,
                Some(account_id),
                None,
                Some(serde_json::json!({ "failed_attempts": new_count, "locked_until": until })),
            );
        }

        Ok(FailureRecord {
            failed_attempts: new_count,
            locked_until,
            persisted: reason,
        })
    }

    /// Resets the account after a successful credential check. Returns whether a write was issued.
    pub async fn clear(&self, account_id: &Uuid, state: &AccountLockState) -> Result<bool, AppError> {
        let had_pending = self.ledger.lock().await.remove(account_id).is_some();
        if state.is_clear() {
            if had_pending {
                tracing::debug!(account_id = %account_id, "dropped unpersisted failures after successful sign-in");
            }
            return Ok(false);
        }

        self.bounded("profile_store.clear", self.store.clear_lock_state(account_id)).await?;
        Ok(true)
    }

    /// Issues an unlock token for a currently locked account. Unlocked accounts get `None`.
    pub async fn request_unlock(&self, account_id: &Uuid) -> Result<Option<String>, AppError> {
        let now = Utc::now();
        let state = self.load(account_id).await?;
        if !state.is_locked(now) {
            return Ok(None);
        }

        let token = Alphanumeric.sample_string(&mut rand::rng(), UNLOCK_TOKEN_LENGTH);
        let expires_at = now + self.unlock_token_ttl;
        self.bounded(
            "profile_store.store_unlock_token",
            self.store.store_unlock_token(account_id, &hash_unlock_token(&token), expires_at),
        )
        .await?;

        security_event(audit_events::ACCOUNT_UNLOCK_REQUESTED, true, Some(account_id), None, None);
        Ok(Some(token))
    }

    pub async fn apply_unlock(&self, account_id: &Uuid, token: &str) -> Result<bool, AppError> {
        let token_hash = hash_unlock_token(token.trim());
        let unlocked = self
            .bounded(
                "profile_store.consume_unlock_token",
                self.store.consume_unlock_token(account_id, &token_hash, Utc::now()),
            )
            .await?;

        if unlocked {
            self.ledger.lock().await.remove(account_id);
            security_event(
                audit_events::ACCOUNT_UNLOCKED,
                true,
                Some(account_id),
                None,
                Some(serde_json::json!({"method": "email_token"})),
            );
        }

        Ok(unlocked)
    }

    /// Forgets ledger entries too old to influence the next count.
    pub async fn prune_ledger(&self, now: DateTime<Utc>) -> usize {
        let fallback = self.config.fallback_window();
        let mut ledger = self.ledger.lock().await;
        let before = ledger.len();
        ledger.retain(|_, pending| now - pending.updated_at <= fallback);
        before - ledger.len()
    }
}
