use crate::config::Config;
use crate::error::app_error::AppError;
use crate::models::account_lock::AccountLockState;
use crate::models::captcha::{CaptchaOperation, CaptchaQuestion};
use crate::models::directory::{DirectoryUser, LookupTier};
use crate::models::sign_in::TwoFactorMethod;
use crate::service::account_existence::{DIRECTORY_INTERFACE_VERSION, DirectoryCapabilities, DirectoryPage, UserDirectory};
use crate::security::{Collaborators, SecurityCore};
use crate::service::account_lock::ProfileStore;
use crate::service::captcha::ChallengeProvider;
use crate::service::email::UnlockMailer;
use crate::service::rate_limiter::InMemoryRateLimitStore;
use crate::service::sign_in::{CredentialVerifier, TwoFactorDispatcher, VerifiedCredentials};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Map;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

pub fn directory_user(email: &str) -> DirectoryUser {
    DirectoryUser {
        id: Uuid::new_v4(),
        email: email.to_string(),
        metadata: Map::new(),
        created_at: Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap(),
        confirmed_at: None,
        identities: Vec::new(),
    }
}

// ── Profile store ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct StoredProfile {
    state: AccountLockState,
    unlock_token: Option<(String, DateTime<Utc>)>,
}

/// Profile store kept in memory. `writes()` counts the calls that change lock state.
#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: Mutex<HashMap<Uuid, StoredProfile>>,
    writes: AtomicUsize,
}

impl InMemoryProfileStore {
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn state(&self, account_id: &Uuid) -> AccountLockState {
        self.profiles.lock().await.get(account_id).map(|p| p.state.clone()).unwrap_or_default()
    }

    pub async fn put(&self, account_id: &Uuid, state: AccountLockState) {
        self.profiles.lock().await.entry(*account_id).or_default().state = state;
    }

    pub async fn unlock_token_hash(&self, account_id: &Uuid) -> Option<String> {
        self.profiles
            .lock()
            .await
            .get(account_id)
            .and_then(|p| p.unlock_token.as_ref().map(|(hash, _)| hash.clone()))
    }
}

#[async_trait::async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn load_lock_state(&self, account_id: &Uuid) -> Result<AccountLockState, AppError> {
        Ok(self.state(account_id).await)
    }

    async fn save_lock_state(&self, account_id: &Uuid, state: &AccountLockState) -> Result<(), AppError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.profiles.lock().await.entry(*account_id).or_default().state = state.clone();
        Ok(())
    }

    async fn clear_lock_state(&self, account_id: &Uuid) -> Result<(), AppError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some(profile) = self.profiles.lock().await.get_mut(account_id) {
            let unlocked_at = profile.state.unlocked_at;
            *profile = StoredProfile::default();
            profile.state.unlocked_at = unlocked_at;
        }
        Ok(())
    }

    async fn store_unlock_token(&self, account_id: &Uuid, token_hash: &str, expires_at: DateTime<Utc>) -> Result<(), AppError> {
        self.profiles.lock().await.entry(*account_id).or_default().unlock_token = Some((token_hash.to_string(), expires_at));
        Ok(())
    }

    async fn consume_unlock_token(&self, account_id: &Uuid, token_hash: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
        let mut profiles = self.profiles.lock().await;
        let Some(profile) = profiles.get_mut(account_id) else {
            return Ok(false);
        };
        let valid = profile
            .unlock_token
            .as_ref()
            .is_some_and(|(hash, expires_at)| hash == token_hash && *expires_at > now);
        if valid {
            self.writes.fetch_add(1, Ordering::SeqCst);
            *profile = StoredProfile::default();
            profile.state.unlocked_at = Some(now);
        }
        Ok(valid)
    }
}

/// Profile store that never answers in time.
pub struct SlowProfileStore {
    delay: Duration,
}

impl SlowProfileStore {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait::async_trait]
impl ProfileStore for SlowProfileStore {
    async fn load_lock_state(&self, _account_id: &Uuid) -> Result<AccountLockState, AppError> {
        tokio::time::sleep(self.delay).await;
        Ok(AccountLockState::default())
    }

    async fn save_lock_state(&self, _account_id: &Uuid, _state: &AccountLockState) -> Result<(), AppError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn clear_lock_state(&self, _account_id: &Uuid) -> Result<(), AppError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn store_unlock_token(&self, _account_id: &Uuid, _token_hash: &str, _expires_at: DateTime<Utc>) -> Result<(), AppError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn consume_unlock_token(&self, _account_id: &Uuid, _token_hash: &str, _now: DateTime<Utc>) -> Result<bool, AppError> {
        tokio::time::sleep(self.delay).await;
        Ok(false)
    }
}

// ── Directory ─────────────────────────────────────────────────────────────────

/// Directory over a fixed user list, with per-tier failure and hang switches.
pub struct ScriptedDirectory {
    users: Vec<DirectoryUser>,
    capabilities: DirectoryCapabilities,
    version: u32,
    failing: Vec<LookupTier>,
    hanging: Vec<LookupTier>,
    calls: [AtomicUsize; 3],
}

impl ScriptedDirectory {
    pub fn new(users: Vec<DirectoryUser>) -> Self {
        Self {
            users,
            capabilities: DirectoryCapabilities::ALL,
            version: DIRECTORY_INTERFACE_VERSION,
            failing: Vec::new(),
            hanging: Vec::new(),
            calls: Default::default(),
        }
    }

    pub fn failing(mut self, tier: LookupTier) -> Self {
        self.failing.push(tier);
        self
    }

    pub fn hanging(mut self, tier: LookupTier) -> Self {
        self.hanging.push(tier);
        self
    }

    pub fn with_capabilities(mut self, capabilities: DirectoryCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn calls(&self, tier: LookupTier) -> usize {
        self.calls[tier_index(tier)].load(Ordering::SeqCst)
    }

    pub fn user_id(&self, email: &str) -> Option<Uuid> {
        self.users.iter().find(|u| u.email.eq_ignore_ascii_case(email)).map(|u| u.id)
    }

    async fn enter(&self, tier: LookupTier) -> Result<(), AppError> {
        self.calls[tier_index(tier)].fetch_add(1, Ordering::SeqCst);
        if self.hanging.contains(&tier) {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        if self.failing.contains(&tier) {
            return Err(AppError::DirectoryUnavailable(format!("{} is down", tier.as_str())));
        }
        Ok(())
    }

    fn find(&self, email: &str) -> Option<DirectoryUser> {
        self.users.iter().find(|u| u.email.eq_ignore_ascii_case(email)).cloned()
    }
}

fn tier_index(tier: LookupTier) -> usize {
    match tier {
        LookupTier::ByEmail => 0,
        LookupTier::TableQuery => 1,
        LookupTier::PaginatedScan => 2,
    }
}

#[async_trait::async_trait]
impl UserDirectory for ScriptedDirectory {
    fn interface_version(&self) -> u32 {
        self.version
    }

    fn capabilities(&self) -> DirectoryCapabilities {
        self.capabilities
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<DirectoryUser>, AppError> {
        self.enter(LookupTier::ByEmail).await?;
        Ok(self.find(email))
    }

    async fn query_table(&self, email: &str) -> Result<Option<DirectoryUser>, AppError> {
        self.enter(LookupTier::TableQuery).await?;
        Ok(self.find(email))
    }

    async fn list_users(&self, page: u32, per_page: u32) -> Result<DirectoryPage, AppError> {
        self.enter(LookupTier::PaginatedScan).await?;
        let start = page as usize * per_page as usize;
        let users: Vec<DirectoryUser> = self.users.iter().skip(start).take(per_page as usize).cloned().collect();
        Ok(DirectoryPage {
            users,
            has_more: start + (per_page as usize) < self.users.len(),
        })
    }
}

// ── Credentials and second factor ─────────────────────────────────────────────

pub struct StubVerifier {
    accounts: StdMutex<HashMap<String, (Uuid, String)>>,
    calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl StubVerifier {
    pub fn new() -> Self {
        Self {
            accounts: StdMutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn with_account(self, id: Uuid, email: &str, password: &str) -> Self {
        self.accounts.lock().unwrap().insert(email.to_lowercase(), (id, password.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl CredentialVerifier for StubVerifier {
    async fn verify(&self, email: &str, password: &str) -> Result<VerifiedCredentials, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::DirectoryUnavailable("credential backend offline".to_string()));
        }

        let accounts = self.accounts.lock().unwrap();
        match accounts.get(&email.to_lowercase()) {
            Some((id, expected)) if expected == password => Ok(VerifiedCredentials { user_id: *id }),
            _ => Err(AppError::InvalidCredentials),
        }
    }
}

pub struct FixedTwoFactor(pub Option<TwoFactorMethod>);

#[async_trait::async_trait]
impl TwoFactorDispatcher for FixedTwoFactor {
    async fn challenge_for(&self, _user_id: &Uuid) -> Result<Option<TwoFactorMethod>, AppError> {
        Ok(self.0)
    }
}

// ── Mail ──────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingMailer {
    pub async fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl UnlockMailer for RecordingMailer {
    async fn send_unlock_email(&self, to_email: &str, unlock_link: &str) -> Result<(), AppError> {
        self.sent.lock().await.push((to_email.to_string(), unlock_link.to_string()));
        Ok(())
    }
}

// ── Challenges and wiring ─────────────────────────────────────────────────────

/// Always asks "What is 2 + 3?".
pub struct FixedChallenge;

impl ChallengeProvider for FixedChallenge {
    fn generate(&self) -> CaptchaQuestion {
        CaptchaQuestion::new(2, 3, CaptchaOperation::Addition)
    }
}

/// Core wired to in-memory doubles, for HTTP tests.
pub fn test_core(config: &Config, directory: ScriptedDirectory, verifier: StubVerifier) -> SecurityCore {
    let parts = Collaborators {
        directory: Arc::new(directory),
        profile_store: Arc::new(InMemoryProfileStore::default()),
        verifier: Arc::new(verifier),
        two_factor: Arc::new(FixedTwoFactor(None)),
        mailer: Arc::new(RecordingMailer::default()),
        rate_limit_store: Arc::new(InMemoryRateLimitStore::default()),
        challenges: Arc::new(FixedChallenge),
    };
    SecurityCore::assemble(config, parts).unwrap()
}
