use crate::config::{CaptchaConfig, SignInConfig};
use crate::error::app_error::AppError;
use crate::models::audit::audit_events;
use crate::models::captcha::{CaptchaResponse, CaptchaVerdict};
use crate::models::sign_in::SignInOutcome;
use crate::service::audit::security_event;
use crate::service::captcha::{CaptchaChallenge, ChallengeProvider};
use crate::service::sign_in::CaptchaGate;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// State of one browser's sign-in form: failure tally, CAPTCHA and submission ordering.
pub struct SignInSession {
    failures: u32,
    escalation_threshold: u32,
    captcha: CaptchaChallenge,
    latest_submission: u64,
    last_seen: DateTime<Utc>,
}

impl SignInSession {
    pub fn new(captcha: CaptchaChallenge, escalation_threshold: u32, now: DateTime<Utc>) -> Self {
        Self {
            failures: 0,
            escalation_threshold,
            captcha,
            latest_submission: 0,
            last_seen: now,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Raises the failure tally to what the limiter already counted for this client, so a client
    /// that drops the session cookie still meets the CAPTCHA.
    pub fn absorb_prior_failures(&mut self, counted: u32) {
        self.failures = self.failures.max(counted);
    }

    pub fn captcha_escalated(&self) -> bool {
        self.failures >= self.escalation_threshold
    }

    /// Starts a submission and returns its sequence number.
    pub fn begin_submission(&mut self, now: DateTime<Utc>) -> u64 {
        self.latest_submission += 1;
        self.last_seen = now;
        self.latest_submission
    }

    pub fn is_current(&self, submission: u64) -> bool {
        submission == self.latest_submission
    }

    /// Evaluates the CAPTCHA requirement for a submission, checking `answer` when one was sent.
    pub fn captcha_gate(&mut self, answer: Option<&str>, now: DateTime<Utc>) -> CaptchaGate {
        if !self.captcha_escalated() {
            return CaptchaGate::NotRequired;
        }

        if let Some(answer) = answer.filter(|a| !a.trim().is_empty())
            && self.captcha.submit(answer, now) == CaptchaVerdict::Incorrect
        {
            security_event(audit_events::CAPTCHA_FAILED, false, None, None, None);
        }

        if self.captcha.consume_verification() {
            CaptchaGate::Verified
        } else {
            self.captcha.present(now);
            CaptchaGate::Unverified
        }
    }

    /// Folds a finished submission into the session. A result overtaken by a newer submission is
    /// rejected and leaves the session untouched.
    pub fn apply_outcome(&mut self, submission: u64, outcome: &SignInOutcome, now: DateTime<Utc>) -> Result<(), AppError> {
        if !self.is_current(submission) {
            return Err(AppError::Conflict("A newer sign-in attempt is in progress".to_string()));
        }

        self.last_seen = now;
        match outcome {
            SignInOutcome::Success { .. } => {
                self.failures = 0;
                self.captcha.reset();
            }
            o if o.is_failed_attempt() => self.failures += 1,
            _ => {}
        }

        if self.captcha_escalated() {
            self.captcha.present(now);
        }
        Ok(())
    }

    pub fn captcha_view(&mut self, now: DateTime<Utc>) -> CaptchaResponse {
        if self.captcha_escalated() {
            self.captcha.present(now);
        }
        CaptchaResponse {
            required: self.captcha_escalated() && !self.captcha.is_verified(),
            question: self.captcha.question().map(|q| q.prompt()),
        }
    }

    pub fn refresh_captcha(&mut self, now: DateTime<Utc>) -> CaptchaResponse {
        if self.captcha_escalated() {
            self.captcha.refresh(now);
        }
        self.captcha_view(now)
    }
}

/// In-memory sign-in sessions keyed by the id carried in the session cookie.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, Arc<Mutex<SignInSession>>>>,
    provider: Arc<dyn ChallengeProvider>,
    regenerate_delay: Duration,
    escalation_threshold: u32,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(captcha: &CaptchaConfig, sign_in: &SignInConfig, provider: Arc<dyn ChallengeProvider>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            provider,
            regenerate_delay: captcha.regenerate_delay(),
            escalation_threshold: captcha.escalation_threshold,
            ttl: sign_in.session_ttl(),
        }
    }

    /// Returns the live session for `id`, or a new one under a fresh id.
    pub async fn get_or_create(&self, id: Option<Uuid>, now: DateTime<Utc>) -> (Uuid, Arc<Mutex<SignInSession>>) {
        let mut sessions = self.sessions.lock().await;

        if let Some(id) = id
            && let Some(session) = sessions.get(&id)
        {
            let live = match session.try_lock() {
                Ok(mut s) if now - s.last_seen <= self.ttl => {
                    s.last_seen = now;
                    true
                }
                Ok(_) => false,
                Err(_) => true,
            };
            if live {
                return (id, session.clone());
            }
            sessions.remove(&id);
        }

        let id = Uuid::new_v4();
        let captcha = CaptchaChallenge::new(self.provider.clone(), self.regenerate_delay);
        let session = Arc::new(Mutex::new(SignInSession::new(captcha, self.escalation_threshold, now)));
        sessions.insert(id, session.clone());
        (id, session)
    }

    /// Drops idle sessions. Sessions busy with a request are kept.
    pub async fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.try_lock().map(|s| now - s.last_seen <= self.ttl).unwrap_or(true));
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
