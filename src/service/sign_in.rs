use crate::error::app_error::AppError;
use crate::models::account_lock::{AccountLockState, LockStatus};
use crate::models::audit::audit_events;
use crate::models::directory::{ExistingAccountInfo, social_conflict_message};
use crate::models::rate_limit::RateLimitStatus;
use crate::models::sign_in::{SignInOutcome, SignUpCheckResponse, TwoFactorMethod};
use crate::service::account_existence::AccountExistenceResolver;
use crate::service::account_lock::AccountLockManager;
use crate::service::audit::security_event;
use crate::service::rate_limiter::RateLimiter;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedCredentials {
    pub user_id: Uuid,
}

/// Checks an email/password pair.
///
/// Wrong credentials are reported as [`AppError::InvalidCredentials`]; any other error means the
/// verifier could not answer.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, email: &str, password: &str) -> Result<VerifiedCredentials, AppError>;
}

#[async_trait]
pub trait TwoFactorDispatcher: Send + Sync {
    /// The second factor the account has to present, if any.
    async fn challenge_for(&self, user_id: &Uuid) -> Result<Option<TwoFactorMethod>, AppError>;
}

/// CAPTCHA state of the submitting session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptchaGate {
    NotRequired,
    Verified,
    Unverified,
}

#[derive(Debug, Clone, Copy)]
pub struct SignInAttempt<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub fingerprint: &'a str,
    pub captcha: CaptchaGate,
}

impl SignInAttempt<'_> {
    pub fn identifier(&self) -> String {
        limiter_identifier(self.fingerprint, self.email)
    }
}

/// Limiter key for one client and one email.
pub fn limiter_identifier(fingerprint: &str, email: &str) -> String {
    format!("{}:{}", fingerprint, normalize_email(email))
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Account behind an email whose identifier is rate limited, kept until the block ends.
#[derive(Debug, Clone, Copy)]
struct BlockedAccount {
    user_id: Option<Uuid>,
    until: DateTime<Utc>,
}

/// Runs one sign-in submission through the limiter, CAPTCHA gate, lock check and credential check.
pub struct SignInService {
    rate_limiter: Arc<RateLimiter>,
    lock_manager: Arc<AccountLockManager>,
    resolver: Arc<AccountExistenceResolver>,
    verifier: Arc<dyn CredentialVerifier>,
    two_factor: Arc<dyn TwoFactorDispatcher>,
    collapse_credential_errors: bool,
    blocked_accounts: Mutex<HashMap<String, BlockedAccount>>,
}

impl SignInService {
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        lock_manager: Arc<AccountLockManager>,
        resolver: Arc<AccountExistenceResolver>,
        verifier: Arc<dyn CredentialVerifier>,
        two_factor: Arc<dyn TwoFactorDispatcher>,
        collapse_credential_errors: bool,
    ) -> Self {
        Self {
            rate_limiter,
            lock_manager,
            resolver,
            verifier,
            two_factor,
            collapse_credential_errors,
            blocked_accounts: Mutex::new(HashMap::new()),
        }
    }

    /// Attempts already counted against this email from this client in the current window.
    pub async fn prior_attempts(&self, email: &str, fingerprint: &str) -> u32 {
        match self.rate_limiter.check(&limiter_identifier(fingerprint, email)).await {
            Ok(status) => self.rate_limiter.policy().max_attempts.saturating_sub(status.remaining_attempts),
            Err(err) => {
                tracing::warn!(error = %err, "rate limiter unavailable while reading prior attempts");
                0
            }
        }
    }

    /// Never fails: internal errors come back as [`SignInOutcome::OtherError`] with the attempt recorded.
    pub async fn sign_in(&self, attempt: &SignInAttempt<'_>) -> SignInOutcome {
        match self.run(attempt).await {
            Ok(outcome) => outcome,
            Err(err) => self.unexpected(attempt, err).await,
        }
    }

    async fn run(&self, attempt: &SignInAttempt<'_>) -> Result<SignInOutcome, AppError> {
        let now = Utc::now();
        let email = normalize_email(attempt.email);
        let identifier = attempt.identifier();

        let status = self.rate_limiter.check(&identifier).await?;
        if status.is_blocked
            && let Some(outcome) = self.blocked(&email, &identifier, attempt.fingerprint, &status, now).await
        {
            return Ok(outcome);
        }

        if attempt.captcha == CaptchaGate::Unverified {
            security_event(audit_events::CAPTCHA_REQUIRED, false, None, Some(attempt.fingerprint), None);
            return Ok(SignInOutcome::CaptchaRequired);
        }

        let account = self.resolver.resolve(&email).await;
        if !account.is_known() {
            tracing::warn!(error_kind = ?account.error_kind, "account lookup inconclusive, failing sign-in as retryable");
            self.rate_limiter.record_attempt(&identifier).await?;
            return Ok(SignInOutcome::OtherError);
        }

        let lock_state = match account.user_id {
            Some(user_id) => Some(self.lock_manager.load(&user_id).await?),
            None => None,
        };
        if let (Some(user_id), Some(state)) = (account.user_id, &lock_state)
            && let LockStatus::Locked { until } = state.status(now)
        {
            security_event(audit_events::ACCOUNT_LOCK_REJECTED, false, Some(&user_id), Some(attempt.fingerprint), None);
            return Ok(SignInOutcome::AccountLocked { reset_time: until });
        }

        if account.is_social_only() {
            self.rate_limiter.record_attempt(&identifier).await?;
            let providers = account.social_providers();
            security_event(
                audit_events::SOCIAL_LOGIN_CONFLICT,
                false,
                account.user_id.as_ref(),
                Some(attempt.fingerprint),
                Some(serde_json::json!({ "providers": providers })),
            );
            return Ok(SignInOutcome::SocialLoginConflict { providers });
        }

        match self.verifier.verify(&email, attempt.password).await {
            Ok(verified) => self.succeed(attempt, &identifier, &account, lock_state, verified, now).await,
            Err(AppError::InvalidCredentials) => self.reject(attempt, &identifier, &account, now).await,
            Err(err) => Err(err),
        }
    }

    /// Answers a rate-limited submission.
    ///
    /// `None` means the block started before the account was unlocked by email: the limiter entry
    /// is dropped and the submission goes through the normal checks.
    async fn blocked(&self, email: &str, identifier: &str, fingerprint: &str, status: &RateLimitStatus, now: DateTime<Utc>) -> Option<SignInOutcome> {
        let reset_time = status.reset_time.unwrap_or(now);

        if let Some(user_id) = self.blocked_account(email, reset_time, now).await {
            match self.lock_manager.load(&user_id).await {
                Ok(state) => {
                    if let LockStatus::Locked { until } = state.status(now) {
                        security_event(audit_events::ACCOUNT_LOCK_REJECTED, false, Some(&user_id), Some(fingerprint), None);
                        return Some(SignInOutcome::AccountLocked { reset_time: until });
                    }

                    let blocked_since = reset_time - self.rate_limiter.policy().block_duration;
                    if state.unlocked_after(blocked_since, now) {
                        match self.rate_limiter.reset(identifier).await {
                            Ok(()) => {
                                self.blocked_accounts.lock().await.remove(email);
                                tracing::info!(account_id = %user_id, "rate limit block lifted by account unlock");
                                return None;
                            }
                            Err(err) => tracing::warn!(error = %err, account_id = %user_id, "failed to lift rate limit block after unlock"),
                        }
                    }
                }
                Err(err) => tracing::warn!(error = %err, "lock state unavailable while rate limited"),
            }
        }

        security_event(audit_events::RATE_LIMITED, false, None, Some(fingerprint), None);
        Some(SignInOutcome::RateLimited { reset_time })
    }

    /// Resolves the account behind a blocked email once per block instead of once per request.
    async fn blocked_account(&self, email: &str, until: DateTime<Utc>, now: DateTime<Utc>) -> Option<Uuid> {
        if let Some(cached) = self.blocked_accounts.lock().await.get(email).filter(|c| now < c.until) {
            return cached.user_id;
        }

        let account = self.resolver.resolve(email).await;
        if account.is_known() {
            let mut cache = self.blocked_accounts.lock().await;
            cache.retain(|_, c| now < c.until);
            cache.insert(
                email.to_string(),
                BlockedAccount {
                    user_id: account.user_id,
                    until,
                },
            );
        }
        account.user_id
    }

    async fn reject(&self, attempt: &SignInAttempt<'_>, identifier: &str, account: &ExistingAccountInfo, now: DateTime<Utc>) -> Result<SignInOutcome, AppError> {
        let status = self.rate_limiter.record_attempt(identifier).await?;

        let mut remaining = status.remaining_attempts;
        if let Some(user_id) = account.user_id {
            let record = match self.lock_manager.record_failure(&user_id).await {
                Ok(record) => record,
                Err(err) => {
                    tracing::error!(error = %err, error_detail = ?err, account_id = %user_id, "failed to record account failure");
                    return Ok(SignInOutcome::OtherError);
                }
            };

            security_event(
                audit_events::LOGIN_FAILED,
                false,
                Some(&user_id),
                Some(attempt.fingerprint),
                Some(serde_json::json!({ "failed_attempts": record.failed_attempts })),
            );

            if let Some(until) = record.locked_until {
                return Ok(SignInOutcome::AccountLocked { reset_time: until });
            }
            remaining = remaining.min(self.lock_manager.remaining_before_lock(record.failed_attempts));
        } else {
            security_event(audit_events::LOGIN_FAILED, false, None, Some(attempt.fingerprint), None);
        }

        if status.is_blocked {
            return Ok(SignInOutcome::RateLimited {
                reset_time: status.reset_time.unwrap_or(now),
            });
        }

        let outcome = if account.exists || self.collapse_credential_errors {
            SignInOutcome::IncorrectPassword { remaining_attempts: remaining }
        } else {
            SignInOutcome::EmailNotFound { remaining_attempts: remaining }
        };
        Ok(outcome)
    }

    async fn succeed(
        &self,
        attempt: &SignInAttempt<'_>,
        identifier: &str,
        account: &ExistingAccountInfo,
        lock_state: Option<AccountLockState>,
        verified: VerifiedCredentials,
        now: DateTime<Utc>,
    ) -> Result<SignInOutcome, AppError> {
        let user_id = verified.user_id;
        let state = match lock_state {
            Some(state) if account.user_id == Some(user_id) => state,
            _ => self.lock_manager.load(&user_id).await?,
        };
        if let LockStatus::Locked { until } = state.status(now) {
            security_event(audit_events::ACCOUNT_LOCK_REJECTED, false, Some(&user_id), Some(attempt.fingerprint), None);
            return Ok(SignInOutcome::AccountLocked { reset_time: until });
        }

        if let Err(err) = self.lock_manager.clear(&user_id, &state).await {
            tracing::warn!(error = %err, account_id = %user_id, "failed to clear account lock state after sign-in");
        }
        if let Err(err) = self.rate_limiter.reset(identifier).await {
            tracing::warn!(error = %err, "failed to reset rate limiter after sign-in");
        }

        let two_factor = match self.two_factor.challenge_for(&user_id).await {
            Ok(method) => method,
            Err(err) => {
                tracing::error!(error = %err, error_detail = ?err, account_id = %user_id, "two-factor lookup failed");
                return Ok(SignInOutcome::OtherError);
            }
        };

        let event = if two_factor.is_some() {
            audit_events::LOGIN_REQUIRES_2FA
        } else {
            audit_events::LOGIN_SUCCESS
        };
        security_event(event, true, Some(&user_id), Some(attempt.fingerprint), None);

        Ok(SignInOutcome::Success { user_id, two_factor })
    }

    async fn unexpected(&self, attempt: &SignInAttempt<'_>, err: AppError) -> SignInOutcome {
        tracing::error!(error = %err, error_detail = ?err, fingerprint = attempt.fingerprint, "sign-in failed unexpectedly");
        if let Err(record_err) = self.rate_limiter.record_attempt(&attempt.identifier()).await {
            tracing::warn!(error = %record_err, "could not record attempt after unexpected failure");
        }
        security_event(audit_events::LOGIN_FAILED, false, None, Some(attempt.fingerprint), None);
        SignInOutcome::OtherError
    }

    /// Password sign-up pre-flight. Only a social-only registration is ever revealed.
    pub async fn check_sign_up(&self, email: &str, fingerprint: &str) -> Result<SignUpCheckResponse, AppError> {
        let status = self.rate_limiter.record_attempt(&format!("sign-up:{}", fingerprint)).await?;
        if status.is_blocked {
            security_event(audit_events::RATE_LIMITED, false, None, Some(fingerprint), Some(serde_json::json!({"flow": "sign_up"})));
            return Err(AppError::TooManyRequests);
        }

        let account = self.resolver.resolve(&normalize_email(email)).await;
        if account.is_social_only() {
            let providers = account.social_providers();
            return Ok(SignUpCheckResponse {
                allowed: false,
                message: social_conflict_message(&providers),
                providers,
            });
        }

        Ok(SignUpCheckResponse {
            allowed: true,
            providers: Vec::new(),
            message: "You can continue with email and password.".to_string(),
        })
    }
}
