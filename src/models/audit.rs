/// Event types for the security audit trail
pub mod audit_events {
    // Sign-in events
    pub const LOGIN_SUCCESS: &str = "login_success";
    pub const LOGIN_FAILED: &str = "login_failed";
    pub const LOGIN_REQUIRES_2FA: &str = "login_requires_2fa";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const SOCIAL_LOGIN_CONFLICT: &str = "social_login_conflict";

    // CAPTCHA events
    pub const CAPTCHA_REQUIRED: &str = "captcha_required";
    pub const CAPTCHA_FAILED: &str = "captcha_failed";

    // Account lock events
    pub const ACCOUNT_LOCKED: &str = "account_locked";
    pub const ACCOUNT_LOCK_REJECTED: &str = "account_lock_rejected";
    pub const ACCOUNT_UNLOCK_REQUESTED: &str = "account_unlock_requested";
    pub const ACCOUNT_UNLOCKED: &str = "account_unlocked";

    // Directory health
    pub const DIRECTORY_DEGRADED: &str = "directory_degraded";
}
