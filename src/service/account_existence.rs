use crate::config::DirectoryConfig;
use crate::error::app_error::AppError;
use crate::models::audit::audit_events;
use crate::models::directory::{AuthProvider, DirectoryUser, ExistingAccountInfo, LookupErrorKind, LookupTier};
use crate::service::audit::security_event;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

/// Version of the [`UserDirectory`] contract this resolver speaks.
pub const DIRECTORY_INTERFACE_VERSION: u32 = 1;

/// Lookup tiers a directory implementation actually serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryCapabilities {
    pub by_email: bool,
    pub table_query: bool,
    pub paginated_scan: bool,
}

impl DirectoryCapabilities {
    pub const ALL: DirectoryCapabilities = DirectoryCapabilities {
        by_email: true,
        table_query: true,
        paginated_scan: true,
    };

    pub fn supports(&self, tier: LookupTier) -> bool {
        match tier {
            LookupTier::ByEmail => self.by_email,
            LookupTier::TableQuery => self.table_query,
            LookupTier::PaginatedScan => self.paginated_scan,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DirectoryPage {
    pub users: Vec<DirectoryUser>,
    pub has_more: bool,
}

/// Identity backend consulted by [`AccountExistenceResolver`].
///
/// Tiers a directory does not declare in [`UserDirectory::capabilities`] are never called.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    fn interface_version(&self) -> u32 {
        DIRECTORY_INTERFACE_VERSION
    }

    fn capabilities(&self) -> DirectoryCapabilities;

    async fn find_by_email(&self, email: &str) -> Result<Option<DirectoryUser>, AppError>;

    async fn query_table(&self, _email: &str) -> Result<Option<DirectoryUser>, AppError> {
        Err(AppError::DirectoryUnavailable("table query not supported".to_string()))
    }

    /// `page` is zero based.
    async fn list_users(&self, _page: u32, _per_page: u32) -> Result<DirectoryPage, AppError> {
        Err(AppError::DirectoryUnavailable("paginated scan not supported".to_string()))
    }
}

enum TierResult {
    Found(DirectoryUser),
    NotFound,
    ScanLimitReached,
}

/// Providers an account signs in with, strongest evidence first.
pub fn classify_providers(user: &DirectoryUser) -> BTreeSet<AuthProvider> {
    let explicit = explicit_providers(user);
    if !explicit.is_empty() {
        return explicit;
    }

    if let Some(provider) = user.avatar_url().and_then(provider_from_avatar) {
        return BTreeSet::from([provider]);
    }

    // Identity records only settle it when one names a social provider. An `email` identity alone
    // is no evidence against the heuristics below.
    let from_identities: BTreeSet<AuthProvider> = user.identities.iter().filter_map(|i| AuthProvider::from_slug(&i.provider)).collect();
    if from_identities.iter().any(AuthProvider::is_social) {
        return from_identities;
    }

    let confirmed_on_creation = user.email_verified() && user.confirmed_at == Some(user.created_at);
    if user.avatar_url().is_some() || confirmed_on_creation {
        return BTreeSet::from([AuthProvider::UnknownSocial]);
    }

    BTreeSet::from([AuthProvider::Password])
}

fn explicit_providers(user: &DirectoryUser) -> BTreeSet<AuthProvider> {
    let mut providers = BTreeSet::new();
    if let Some(provider) = user.metadata_str("provider").and_then(AuthProvider::from_slug) {
        providers.insert(provider);
    }
    if let Some(Value::Array(list)) = user.metadata.get("providers") {
        providers.extend(list.iter().filter_map(Value::as_str).filter_map(AuthProvider::from_slug));
    }
    providers
}

const AVATAR_PATTERNS: &[(&str, AuthProvider)] = &[
    ("googleusercontent.com", AuthProvider::Google),
    ("ggpht.com", AuthProvider::Google),
    ("fbcdn.net", AuthProvider::Facebook),
    ("fbsbx.com", AuthProvider::Facebook),
    ("graph.facebook.com", AuthProvider::Facebook),
    ("githubusercontent.com", AuthProvider::Github),
    ("twimg.com", AuthProvider::Twitter),
    ("licdn.com", AuthProvider::Linkedin),
    ("cdn.discordapp.com", AuthProvider::Discord),
    ("graph.microsoft.com", AuthProvider::Microsoft),
];

fn provider_from_avatar(url: &str) -> Option<AuthProvider> {
    let url = url.to_ascii_lowercase();
    AVATAR_PATTERNS.iter().find(|(fragment, _)| url.contains(fragment)).map(|(_, provider)| *provider)
}

/// Cascading "does this email exist" lookup.
///
/// The next tier is tried only when the current one errors, times out or is not supported.
/// A "not found" answer from any tier is final.
pub struct AccountExistenceResolver {
    config: DirectoryConfig,
    directory: Arc<dyn UserDirectory>,
}

impl AccountExistenceResolver {
    pub fn new(config: &DirectoryConfig, directory: Arc<dyn UserDirectory>) -> Result<Self, AppError> {
        let found = directory.interface_version();
        if found != DIRECTORY_INTERFACE_VERSION {
            return Err(AppError::UnsupportedDirectory {
                found,
                expected: DIRECTORY_INTERFACE_VERSION,
            });
        }

        Ok(Self {
            config: config.clone(),
            directory,
        })
    }

    pub async fn resolve(&self, email: &str) -> ExistingAccountInfo {
        let email = email.trim().to_lowercase();
        let capabilities = self.directory.capabilities();
        let mut failed_tiers = Vec::new();

        for tier in LookupTier::ALL {
            if !capabilities.supports(tier) {
                tracing::debug!(tier = tier.as_str(), "directory tier not supported, skipping");
                continue;
            }

            match self.run_tier(tier, &email).await {
                Ok(TierResult::Found(user)) => {
                    let providers = classify_providers(&user);
                    return ExistingAccountInfo::found(user.id, providers, tier);
                }
                Ok(TierResult::NotFound) => return ExistingAccountInfo::not_found(tier),
                Ok(TierResult::ScanLimitReached) => {
                    tracing::warn!(max_scan_pages = self.config.max_scan_pages, "directory scan hit its page cap without a match");
                    return ExistingAccountInfo::unknown(LookupErrorKind::ScanLimitReached);
                }
                Err(err) => {
                    tracing::warn!(tier = tier.as_str(), error = %err, error_detail = ?err, "directory lookup tier failed");
                    failed_tiers.push(tier.as_str());
                }
            }
        }

        security_event(
            audit_events::DIRECTORY_DEGRADED,
            false,
            None,
            None,
            Some(serde_json::json!({ "failed_tiers": failed_tiers })),
        );
        ExistingAccountInfo::unknown(LookupErrorKind::DirectoryUnavailable)
    }

    async fn bounded<T, F>(&self, tier: LookupTier, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        tokio::time::timeout(self.config.lookup_timeout(), fut)
            .await
            .map_err(|_| AppError::Timeout(tier.as_str()))?
    }

    async fn run_tier(&self, tier: LookupTier, email: &str) -> Result<TierResult, AppError> {
        let user = match tier {
            LookupTier::ByEmail => self.bounded(tier, self.directory.find_by_email(email)).await?,
            LookupTier::TableQuery => self.bounded(tier, self.directory.query_table(email)).await?,
            LookupTier::PaginatedScan => return self.scan(email).await,
        };

        Ok(user.map(TierResult::Found).unwrap_or(TierResult::NotFound))
    }

    async fn scan(&self, email: &str) -> Result<TierResult, AppError> {
        tracing::warn!(email_domain = email.rsplit('@').next().unwrap_or("-"), "falling back to full directory scan");

        let per_page = self.config.scan_page_size.max(1);
        for page in 0..self.config.max_scan_pages {
            let batch = self.bounded(LookupTier::PaginatedScan, self.directory.list_users(page, per_page)).await?;

            if let Some(user) = batch.users.into_iter().find(|u| u.email.trim().eq_ignore_ascii_case(email)) {
                return Ok(TierResult::Found(user));
            }
            if !batch.has_more {
                return Ok(TierResult::NotFound);
            }
        }

        Ok(TierResult::ScanLimitReached)
    }
}
