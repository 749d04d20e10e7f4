use crate::models::directory::{AuthProvider, social_conflict_message};
use chrono::{DateTime, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use uuid::Uuid;
use validator::Validate;

/// Sign-in form submission
#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct SignInRequest {
    #[validate(email, length(max = 254))]
    pub email: String,
    #[validate(length(min = 1, max = 1024))]
    pub password: String,
    /// Answer to the CAPTCHA question, once one has been presented
    #[validate(length(max = 16))]
    pub captcha_answer: Option<String>,
}

/// Second factor the client must present before the session is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TwoFactorMethod {
    Totp,
}

/// One result per sign-in submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignInOutcome {
    Success {
        user_id: Uuid,
        two_factor: Option<TwoFactorMethod>,
    },
    IncorrectPassword {
        remaining_attempts: u32,
    },
    EmailNotFound {
        remaining_attempts: u32,
    },
    AccountLocked {
        reset_time: DateTime<Utc>,
    },
    SocialLoginConflict {
        providers: Vec<AuthProvider>,
    },
    RateLimited {
        reset_time: DateTime<Utc>,
    },
    CaptchaRequired,
    OtherError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeCategory {
    Success,
    Retryable,
    Terminal,
}

impl SignInOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            SignInOutcome::Success { .. } => "success",
            SignInOutcome::IncorrectPassword { .. } => "incorrect_password",
            SignInOutcome::EmailNotFound { .. } => "email_not_found",
            SignInOutcome::AccountLocked { .. } => "account_locked",
            SignInOutcome::SocialLoginConflict { .. } => "social_login_conflict",
            SignInOutcome::RateLimited { .. } => "rate_limited",
            SignInOutcome::CaptchaRequired => "captcha_required",
            SignInOutcome::OtherError => "other_error",
        }
    }

    pub fn category(&self) -> OutcomeCategory {
        match self {
            SignInOutcome::Success { .. } => OutcomeCategory::Success,
            SignInOutcome::SocialLoginConflict { .. } => OutcomeCategory::Terminal,
            _ => OutcomeCategory::Retryable,
        }
    }

    /// Outcomes that count towards CAPTCHA escalation for the session.
    pub fn is_failed_attempt(&self) -> bool {
        matches!(
            self,
            SignInOutcome::IncorrectPassword { .. } | SignInOutcome::EmailNotFound { .. } | SignInOutcome::AccountLocked { .. } | SignInOutcome::OtherError
        )
    }

    pub fn message(&self) -> String {
        match self {
            SignInOutcome::Success { two_factor: Some(_), .. } => "Enter your verification code to finish signing in.".to_string(),
            SignInOutcome::Success { two_factor: None, .. } => "Signed in.".to_string(),
            SignInOutcome::IncorrectPassword { remaining_attempts } => {
                format!("Incorrect email or password. {} {} remaining.", remaining_attempts, plural(*remaining_attempts))
            }
            SignInOutcome::EmailNotFound { remaining_attempts } => {
                format!("No account found for this email. {} {} remaining.", remaining_attempts, plural(*remaining_attempts))
            }
            SignInOutcome::AccountLocked { reset_time } => format!(
                "This account is temporarily locked after too many failed attempts. Try again after {} or use the unlock link we can email you.",
                reset_time.format("%H:%M UTC")
            ),
            SignInOutcome::SocialLoginConflict { providers } => social_conflict_message(providers),
            SignInOutcome::RateLimited { reset_time } => {
                format!("Too many sign-in attempts. Try again after {}.", reset_time.format("%H:%M UTC"))
            }
            SignInOutcome::CaptchaRequired => "Please solve the security question to continue.".to_string(),
            SignInOutcome::OtherError => "Something went wrong while signing you in. Please try again.".to_string(),
        }
    }
}

fn plural(count: u32) -> &'static str {
    if count == 1 { "attempt" } else { "attempts" }
}

/// Body returned by the sign-in endpoint
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SignInResponse {
    pub outcome: SignInOutcome,
    pub category: OutcomeCategory,
    pub message: String,
    pub captcha_required: bool,
    pub captcha_question: Option<String>,
}

impl SignInResponse {
    pub fn new(outcome: SignInOutcome, captcha_required: bool, captcha_question: Option<String>) -> Self {
        Self {
            category: outcome.category(),
            message: outcome.message(),
            outcome,
            captcha_required,
            captcha_question,
        }
    }
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct EmailRequest {
    #[validate(email, length(max = 254))]
    pub email: String,
}

/// Pre-flight for password sign-up. Only ever reveals a social-only registration.
#[derive(Debug, Serialize, JsonSchema)]
pub struct SignUpCheckResponse {
    pub allowed: bool,
    pub providers: Vec<AuthProvider>,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_serializes_with_kind_tag() {
        let outcome = SignInOutcome::SocialLoginConflict {
            providers: vec![AuthProvider::Facebook],
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "social_login_conflict", "providers": ["facebook"]}));
        assert_eq!(outcome.kind(), "social_login_conflict");
    }

    #[test]
    fn messages_carry_one_piece_of_detail() {
        assert_eq!(
            SignInOutcome::IncorrectPassword { remaining_attempts: 1 }.message(),
            "Incorrect email or password. 1 attempt remaining."
        );
        assert!(SignInOutcome::OtherError.message().contains("try again"));
        assert!(!SignInOutcome::OtherError.message().contains("error:"));
    }

    #[test]
    fn categories() {
        assert_eq!(SignInOutcome::CaptchaRequired.category(), OutcomeCategory::Retryable);
        assert_eq!(SignInOutcome::SocialLoginConflict { providers: vec![] }.category(), OutcomeCategory::Terminal);
        assert!(!SignInOutcome::CaptchaRequired.is_failed_attempt());
        assert!(SignInOutcome::EmailNotFound { remaining_attempts: 2 }.is_failed_attempt());
    }

    #[test]
    fn request_validation_rejects_malformed_email() {
        let request = SignInRequest {
            email: "not-an-email".to_string(),
            password: "hunter2".to_string(),
            captcha_answer: None,
        };
        assert!(request.validate().is_err());
    }
}
