use crate::models::captcha::{CaptchaOperation, CaptchaQuestion, CaptchaVerdict};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::sync::Arc;

const MAX_REGENERATION_TRIES: usize = 16;

/// Source of challenge questions.
pub trait ChallengeProvider: Send + Sync {
    fn generate(&self) -> CaptchaQuestion;
}

/// Small arithmetic questions. A placeholder for a real CAPTCHA service.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArithmeticChallenge;

impl ArithmeticChallenge {
    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> CaptchaQuestion {
        match rng.random_range(0..3) {
            0 => CaptchaQuestion::new(rng.random_range(1..=20), rng.random_range(1..=20), CaptchaOperation::Addition),
            1 => {
                let minuend = rng.random_range(10..=39);
                let subtrahend = rng.random_range(1..=minuend);
                CaptchaQuestion::new(minuend, subtrahend, CaptchaOperation::Subtraction)
            }
            _ => CaptchaQuestion::new(rng.random_range(1..=10), rng.random_range(1..=10), CaptchaOperation::Multiplication),
        }
    }
}

impl ChallengeProvider for ArithmeticChallenge {
    fn generate(&self) -> CaptchaQuestion {
        Self::generate_with(&mut rand::rng())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptchaState {
    Idle,
    Presented(CaptchaQuestion),
    Verified,
    Failed { previous: CaptchaQuestion, retry_at: DateTime<Utc> },
}

/// Per-session challenge. One question is active at a time; a wrong answer always replaces it.
pub struct CaptchaChallenge {
    state: CaptchaState,
    provider: Arc<dyn ChallengeProvider>,
    regenerate_delay: Duration,
}

impl CaptchaChallenge {
    pub fn new(provider: Arc<dyn ChallengeProvider>, regenerate_delay: Duration) -> Self {
        Self {
            state: CaptchaState::Idle,
            provider,
            regenerate_delay,
        }
    }

    pub fn state(&self) -> &CaptchaState {
        &self.state
    }

    pub fn question(&self) -> Option<&CaptchaQuestion> {
        match &self.state {
            CaptchaState::Presented(question) => Some(question),
            _ => None,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.state == CaptchaState::Verified
    }

    fn fresh_question(&self, avoid: Option<&CaptchaQuestion>) -> CaptchaQuestion {
        let mut question = self.provider.generate();
        for _ in 0..MAX_REGENERATION_TRIES {
            if avoid != Some(&question) {
                break;
            }
            question = self.provider.generate();
        }
        question
    }

    /// Makes sure a question is showing, unless the challenge is already verified.
    pub fn present(&mut self, now: DateTime<Utc>) {
        self.advance(now);
        if self.state == CaptchaState::Idle {
            self.state = CaptchaState::Presented(self.fresh_question(None));
        }
    }

    /// Moves a failed challenge on to its replacement question once the delay has passed.
    pub fn advance(&mut self, now: DateTime<Utc>) {
        if let CaptchaState::Failed { previous, retry_at } = &self.state
            && now >= *retry_at
        {
            let question = self.fresh_question(Some(previous));
            self.state = CaptchaState::Presented(question);
        }
    }

    pub fn submit(&mut self, answer: &str, now: DateTime<Utc>) -> CaptchaVerdict {
        self.advance(now);

        let question = match &self.state {
            CaptchaState::Presented(question) => question.clone(),
            CaptchaState::Failed { .. } => return CaptchaVerdict::CoolingDown,
            CaptchaState::Idle | CaptchaState::Verified => return CaptchaVerdict::NotPresented,
        };

        match answer.trim().parse::<i64>() {
            Ok(value) if question.is_answer(value) => {
                self.state = CaptchaState::Verified;
                CaptchaVerdict::Verified
            }
            _ => {
                self.state = CaptchaState::Failed {
                    previous: question,
                    retry_at: now + self.regenerate_delay,
                };
                self.advance(now);
                CaptchaVerdict::Incorrect
            }
        }
    }

    /// Explicit "new question" request. A verified challenge keeps its verification.
    pub fn refresh(&mut self, _now: DateTime<Utc>) {
        let previous = match &self.state {
            CaptchaState::Verified => return,
            CaptchaState::Presented(question) | CaptchaState::Failed { previous: question, .. } => Some(question.clone()),
            CaptchaState::Idle => None,
        };
        self.state = CaptchaState::Presented(self.fresh_question(previous.as_ref()));
    }

    /// Spends a verification. It admits exactly one credential check.
    pub fn consume_verification(&mut self) -> bool {
        if self.is_verified() {
            self.state = CaptchaState::Idle;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.state = CaptchaState::Idle;
    }
}
