use crate::config::UnlockConfig;
use crate::error::app_error::AppError;
use crate::models::audit::audit_events;
use crate::models::unlock::{UNLOCK_REQUEST_MESSAGE, UnlockResponse};
use crate::service::account_existence::AccountExistenceResolver;
use crate::service::account_lock::AccountLockManager;
use crate::service::audit::security_event;
use crate::service::email::UnlockMailer;
use crate::service::rate_limiter::RateLimiter;
use crate::service::sign_in::normalize_email;
use std::sync::Arc;
use uuid::Uuid;

/// Out-of-band unlock by emailed link.
pub struct UnlockService {
    lock_manager: Arc<AccountLockManager>,
    resolver: Arc<AccountExistenceResolver>,
    rate_limiter: Arc<RateLimiter>,
    mailer: Arc<dyn UnlockMailer>,
    unlock_url: String,
}

impl UnlockService {
    pub fn new(
        config: &UnlockConfig,
        lock_manager: Arc<AccountLockManager>,
        resolver: Arc<AccountExistenceResolver>,
        rate_limiter: Arc<RateLimiter>,
        mailer: Arc<dyn UnlockMailer>,
    ) -> Self {
        Self {
            lock_manager,
            resolver,
            rate_limiter,
            mailer,
            unlock_url: config.frontend_unlock_url.clone(),
        }
    }

    /// Always answers with the same message, whatever the state of the account.
    pub async fn request(&self, email: &str, fingerprint: &str) -> Result<UnlockResponse, AppError> {
        let status = self.rate_limiter.record_attempt(&format!("unlock:{}", fingerprint)).await?;
        if status.is_blocked {
            security_event(audit_events::RATE_LIMITED, false, None, Some(fingerprint), Some(serde_json::json!({"flow": "unlock"})));
            return Err(AppError::TooManyRequests);
        }

        let email = normalize_email(email);
        if let Some(user_id) = self.resolver.resolve(&email).await.user_id {
            match self.lock_manager.request_unlock(&user_id).await {
                Ok(Some(token)) => {
                    let link = format!("{}?token={}&user={}", self.unlock_url, urlencoding::encode(&token), user_id);
                    if let Err(err) = self.mailer.send_unlock_email(&email, &link).await {
                        tracing::error!(error = %err, account_id = %user_id, "failed to send unlock email");
                    }
                }
                Ok(None) => tracing::debug!(account_id = %user_id, "unlock requested for an account that is not locked"),
                Err(err) => tracing::error!(error = %err, account_id = %user_id, "failed to issue unlock token"),
            }
        }

        Ok(UnlockResponse {
            message: UNLOCK_REQUEST_MESSAGE.to_string(),
        })
    }

    pub async fn apply(&self, user: &str, token: &str) -> Result<UnlockResponse, AppError> {
        let user_id = Uuid::parse_str(user).map_err(|e| AppError::uuid("Invalid user ID", e))?;

        if self.lock_manager.apply_unlock(&user_id, token).await? {
            Ok(UnlockResponse {
                message: "Account unlocked successfully. You can now sign in.".to_string(),
            })
        } else {
            Err(AppError::BadRequest("Invalid or expired unlock token".to_string()))
        }
    }
}
