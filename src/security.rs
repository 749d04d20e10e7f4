use crate::config::{Config, RateLimitBackend};
use crate::database::postgres_repository::PostgresRepository;
use crate::database::redis_rate_limit::RedisRateLimitStore;
use crate::error::app_error::AppError;
use crate::service::account_existence::{AccountExistenceResolver, UserDirectory};
use crate::service::account_lock::{AccountLockManager, ProfileStore};
use crate::service::captcha::{ArithmeticChallenge, ChallengeProvider};
use crate::service::email::{EmailService, UnlockMailer};
use crate::service::maintenance::Maintenance;
use crate::service::rate_limiter::{InMemoryRateLimitStore, RateLimitStore, RateLimiter};
use crate::service::session::SessionRegistry;
use crate::service::sign_in::{CredentialVerifier, SignInService, TwoFactorDispatcher};
use crate::service::unlock::UnlockService;
use rocket::fairing::AdHoc;
use sqlx::PgPool;
use std::sync::Arc;

/// External systems the sign-in core talks to.
pub struct Collaborators {
    pub directory: Arc<dyn UserDirectory>,
    pub profile_store: Arc<dyn ProfileStore>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub two_factor: Arc<dyn TwoFactorDispatcher>,
    pub mailer: Arc<dyn UnlockMailer>,
    pub rate_limit_store: Arc<dyn RateLimitStore>,
    pub challenges: Arc<dyn ChallengeProvider>,
}

/// Services shared by the request handlers, managed as Rocket state.
#[derive(Clone)]
pub struct SecurityCore {
    pub sign_in: Arc<SignInService>,
    pub unlock: Arc<UnlockService>,
    pub sessions: Arc<SessionRegistry>,
    pub maintenance: Arc<Maintenance>,
}

impl SecurityCore {
    pub fn assemble(config: &Config, parts: Collaborators) -> Result<Self, AppError> {
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit, parts.rate_limit_store));
        let lock_manager = Arc::new(AccountLockManager::new(&config.account_lock, &config.unlock, parts.profile_store));
        let resolver = Arc::new(AccountExistenceResolver::new(&config.directory, parts.directory)?);
        let sessions = Arc::new(SessionRegistry::new(&config.captcha, &config.sign_in, parts.challenges));

        let sign_in = Arc::new(SignInService::new(
            limiter.clone(),
            lock_manager.clone(),
            resolver.clone(),
            parts.verifier,
            parts.two_factor,
            config.sign_in.collapse_credential_errors,
        ));
        let unlock = Arc::new(UnlockService::new(
            &config.unlock,
            lock_manager.clone(),
            resolver,
            limiter.clone(),
            parts.mailer,
        ));
        let maintenance = Arc::new(Maintenance::new(
            limiter,
            lock_manager,
            sessions.clone(),
            config.rate_limit.cleanup_interval(),
        ));

        Ok(Self {
            sign_in,
            unlock,
            sessions,
            maintenance,
        })
    }
}

async fn rate_limit_store(config: &Config) -> Result<Arc<dyn RateLimitStore>, AppError> {
    match config.rate_limit.backend {
        RateLimitBackend::Memory => Ok(Arc::new(InMemoryRateLimitStore::default())),
        RateLimitBackend::Redis => {
            let store = RedisRateLimitStore::connect(&config.rate_limit.redis_url, &config.rate_limit.key_prefix).await?;
            Ok(Arc::new(store))
        }
    }
}

async fn postgres_core(config: &Config, pool: PgPool) -> Result<SecurityCore, AppError> {
    let repo = Arc::new(PostgresRepository { pool });
    let parts = Collaborators {
        directory: repo.clone(),
        profile_store: repo.clone(),
        verifier: repo.clone(),
        two_factor: repo,
        mailer: Arc::new(EmailService::new(config.email.clone(), config.unlock.token_ttl())),
        rate_limit_store: rate_limit_store(config).await?,
        challenges: Arc::new(ArithmeticChallenge),
    };
    SecurityCore::assemble(config, parts)
}

/// Builds the core on top of the Postgres pool staged by [`crate::db::stage_db`] and starts the
/// maintenance sweep.
pub fn stage_security(config: Config) -> AdHoc {
    AdHoc::try_on_ignite("Sign-in security core", |rocket| async move {
        let Some(pool) = rocket.state::<PgPool>().cloned() else {
            tracing::error!("database pool missing, cannot build the security core");
            return Err(rocket);
        };

        match postgres_core(&config, pool).await {
            Ok(core) => {
                core.maintenance.start().await;
                tracing::info!(backend = ?config.rate_limit.backend, "security core initialized");
                Ok(rocket.manage(core))
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to initialize security core");
                Err(rocket)
            }
        }
    })
}

pub fn stage_maintenance_shutdown() -> AdHoc {
    AdHoc::on_shutdown("Stop maintenance sweep", |rocket| {
        Box::pin(async move {
            if let Some(core) = rocket.state::<SecurityCore>() {
                core.maintenance.stop().await;
            }
        })
    })
}
