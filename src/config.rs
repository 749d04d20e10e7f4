use rocket::figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_API_BASE_PATH: &str = "/api/v1";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub rate_limit: LoginRateLimitConfig,
    #[serde(default)]
    pub account_lock: AccountLockConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub captcha: CaptchaConfig,
    #[serde(default)]
    pub sign_in: SignInConfig,
    #[serde(default)]
    pub unlock: UnlockConfig,
    #[serde(default)]
    pub email: EmailConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: u64,
    pub run_migrations: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub address: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    pub base_path: String,
    pub enable_swagger: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitBackend {
    Memory,
    Redis,
}

/// Fixed-window limits applied per sign-in identifier (client fingerprint + email).
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoginRateLimitConfig {
    pub max_attempts: u32,
    pub window_seconds: u64,
    pub block_seconds: u64,
    pub cleanup_interval_seconds: u64,
    pub backend: RateLimitBackend,
    pub redis_url: String,
    pub key_prefix: String,
}

/// Persisted lockout policy. Writes are batched, see `AccountLockManager`.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AccountLockConfig {
    pub threshold: u32,
    pub lock_duration_minutes: i64,
    pub checkpoint_interval: u32,
    pub fallback_persist_minutes: i64,
    pub store_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DirectoryConfig {
    pub lookup_timeout_ms: u64,
    pub scan_page_size: u32,
    pub max_scan_pages: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CaptchaConfig {
    pub escalation_threshold: u32,
    pub regenerate_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SignInConfig {
    /// Report unknown emails with the same message as a wrong password.
    pub collapse_credential_errors: bool,
    pub session_ttl_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UnlockConfig {
    pub token_ttl_seconds: i64,
    pub frontend_unlock_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_address: String,
    pub from_name: String,
    pub enabled: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/signin_shield".to_string(),
            max_connections: 16,
            min_connections: 4,
            acquire_timeout: 5,
            run_migrations: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            address: "127.0.0.1".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:5173".to_string()],
            allow_credentials: true,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_API_BASE_PATH.to_string(),
            enable_swagger: true,
        }
    }
}

impl Default for LoginRateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window_seconds: 15 * 60,
            block_seconds: 30 * 60,
            cleanup_interval_seconds: 60,
            backend: RateLimitBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "signin:rl".to_string(),
        }
    }
}

impl Default for AccountLockConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            lock_duration_minutes: 30,
            checkpoint_interval: 3,
            fallback_persist_minutes: 60,
            store_timeout_ms: 2_000,
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            lookup_timeout_ms: 2_000,
            scan_page_size: 200,
            max_scan_pages: 10,
        }
    }
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: 2,
            regenerate_delay_ms: 800,
        }
    }
}

impl Default for SignInConfig {
    fn default() -> Self {
        Self {
            collapse_credential_errors: false,
            session_ttl_seconds: 30 * 60,
        }
    }
}

impl Default for UnlockConfig {
    fn default() -> Self {
        Self {
            token_ttl_seconds: 3600,
            frontend_unlock_url: "http://localhost:5173/unlock".to_string(),
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: "localhost".to_string(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: String::new(),
            from_address: "security@salespulse.app".to_string(),
            from_name: "SalesPulse Security".to_string(),
            enabled: false,
        }
    }
}

impl LoginRateLimitConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_seconds.max(1) as i64)
    }

    pub fn block_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.block_seconds.max(1) as i64)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds.max(1))
    }
}

impl AccountLockConfig {
    pub fn lock_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.lock_duration_minutes)
    }

    pub fn fallback_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.fallback_persist_minutes)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl DirectoryConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

impl UnlockConfig {
    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_ttl_seconds)
    }
}

impl CaptchaConfig {
    pub fn regenerate_delay(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.regenerate_delay_ms as i64)
    }
}

impl SignInConfig {
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_ttl_seconds as i64)
    }
}

impl Config {
    /// Load configuration from multiple sources in priority order:
    /// 1. Built-in defaults
    /// 2. SigninShield.toml (base configuration file)
    /// 3. Environment variables (prefixed with SIGNIN_, sections split on `__`)
    /// 4. DATABASE_URL environment variable
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("SigninShield.toml"))
            // e.g. SIGNIN_RATE_LIMIT__MAX_ATTEMPTS=10
            .merge(Env::prefixed("SIGNIN_").split("__"))
            .merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "database.url".into()))
    }
}
