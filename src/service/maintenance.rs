use crate::service::account_lock::AccountLockManager;
use crate::service::rate_limiter::RateLimiter;
use crate::service::session::SessionRegistry;
use chrono::Utc;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub rate_limit_entries: usize,
    pub ledger_entries: usize,
    pub sessions: usize,
}

/// Periodic sweep of expired limiter entries, stale lock ledger entries and idle sessions.
pub struct Maintenance {
    rate_limiter: Arc<RateLimiter>,
    lock_manager: Arc<AccountLockManager>,
    sessions: Arc<SessionRegistry>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Maintenance {
    pub fn new(rate_limiter: Arc<RateLimiter>, lock_manager: Arc<AccountLockManager>, sessions: Arc<SessionRegistry>, interval: Duration) -> Self {
        Self {
            rate_limiter,
            lock_manager,
            sessions,
            interval,
            task: Mutex::new(None),
        }
    }

    pub async fn sweep(&self) -> SweepReport {
        let now = Utc::now();
        let rate_limit_entries = match self.rate_limiter.cleanup_at(now).await {
            Ok(removed) => removed,
            Err(err) => {
                tracing::warn!(error = %err, "rate limiter cleanup failed");
                0
            }
        };

        let report = SweepReport {
            rate_limit_entries,
            ledger_entries: self.lock_manager.prune_ledger(now).await,
            sessions: self.sessions.prune(now).await,
        };

        if report != SweepReport::default() {
            tracing::debug!(
                rate_limit_entries = report.rate_limit_entries,
                ledger_entries = report.ledger_entries,
                sessions = report.sessions,
                "maintenance sweep removed expired state"
            );
        }
        report
    }

    /// Starts the sweep loop. The loop ends on its own once the service is dropped.
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(this) = weak.upgrade() else { break };
                this.sweep().await;
            }
        }));
        tracing::info!(interval_secs = interval.as_secs(), "maintenance task started");
    }

    pub async fn stop(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
            tracing::info!("maintenance task stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.as_ref().is_some_and(|t| !t.is_finished())
    }
}
