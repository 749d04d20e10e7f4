use chrono::{DateTime, Utc};
use serde::Serialize;

/// Failed-attempt and lock columns stored on the account profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct AccountLockState {
    pub failed_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_failed_update: Option<DateTime<Utc>>,
    /// Last time an emailed unlock token was spent.
    pub unlocked_at: Option<DateTime<Utc>>,
}

impl AccountLockState {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }

    /// A lock that has run out. The counter it carried no longer counts.
    pub fn lock_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now >= until)
    }

    pub fn is_clear(&self) -> bool {
        self.failed_attempts == 0 && self.locked_until.is_none()
    }

    pub fn effective_failures(&self, now: DateTime<Utc>) -> u32 {
        if self.lock_elapsed(now) { 0 } else { self.failed_attempts.max(0) as u32 }
    }

    /// True when a token unlock happened after `since` and no newer lock is in force.
    pub fn unlocked_after(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        !self.is_locked(now) && self.unlocked_at.is_some_and(|at| at > since)
    }

    pub fn status(&self, now: DateTime<Utc>) -> LockStatus {
        match self.locked_until {
            Some(until) if now < until => LockStatus::Locked { until },
            _ => LockStatus::Unlocked {
                failed_attempts: self.effective_failures(now),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Unlocked { failed_attempts: u32 },
    Locked { until: DateTime<Utc> },
}

/// Why a failure was written through to the profile store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistReason {
    Baseline,
    Threshold,
    Checkpoint,
    Fallback,
}

impl PersistReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistReason::Baseline => "baseline",
            PersistReason::Threshold => "threshold",
            PersistReason::Checkpoint => "checkpoint",
            PersistReason::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureRecord {
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub persisted: Option<PersistReason>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn elapsed_lock_resets_effective_failures() {
        let now = Utc::now();
        let state = AccountLockState {
            failed_attempts: 5,
            locked_until: Some(now - Duration::minutes(1)),
            last_failed_update: Some(now - Duration::minutes(31)),
            unlocked_at: None,
        };

        assert!(!state.is_locked(now));
        assert_eq!(state.effective_failures(now), 0);
        assert_eq!(state.status(now), LockStatus::Unlocked { failed_attempts: 0 });
    }

    #[test]
    fn active_lock_reports_until() {
        let now = Utc::now();
        let until = now + Duration::minutes(10);
        let state = AccountLockState {
            failed_attempts: 5,
            locked_until: Some(until),
            last_failed_update: Some(now),
            unlocked_at: None,
        };

        assert_eq!(state.status(now), LockStatus::Locked { until });
    }

    #[test]
    fn token_unlock_counts_only_after_the_given_instant() {
        let now = Utc::now();
        let state = AccountLockState {
            unlocked_at: Some(now - Duration::minutes(5)),
            ..Default::default()
        };

        assert!(state.unlocked_after(now - Duration::minutes(10), now));
        assert!(!state.unlocked_after(now - Duration::minutes(1), now));

        let relocked = AccountLockState {
            failed_attempts: 5,
            locked_until: Some(now + Duration::minutes(30)),
            ..state
        };
        assert!(!relocked.unlocked_after(now - Duration::minutes(10), now));
    }
}
