use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Identity system an account signs in through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthProvider {
    Password,
    Google,
    Facebook,
    Github,
    Twitter,
    Microsoft,
    Apple,
    Linkedin,
    Discord,
    /// Social sign-in whose provider could not be determined.
    #[serde(rename = "unknown")]
    UnknownSocial,
}

impl AuthProvider {
    /// Maps a provider slug as stored by the identity backend.
    pub fn from_slug(slug: &str) -> Option<Self> {
        let provider = match slug.trim().to_ascii_lowercase().as_str() {
            "" => return None,
            "email" | "password" | "credentials" => AuthProvider::Password,
            "google" => AuthProvider::Google,
            "facebook" => AuthProvider::Facebook,
            "github" => AuthProvider::Github,
            "twitter" | "x" => AuthProvider::Twitter,
            "azure" | "microsoft" => AuthProvider::Microsoft,
            "apple" => AuthProvider::Apple,
            "linkedin" | "linkedin_oidc" => AuthProvider::Linkedin,
            "discord" => AuthProvider::Discord,
            _ => AuthProvider::UnknownSocial,
        };
        Some(provider)
    }

    pub fn is_social(&self) -> bool {
        !matches!(self, AuthProvider::Password)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AuthProvider::Password => "email and password",
            AuthProvider::Google => "Google",
            AuthProvider::Facebook => "Facebook",
            AuthProvider::Github => "GitHub",
            AuthProvider::Twitter => "X (Twitter)",
            AuthProvider::Microsoft => "Microsoft",
            AuthProvider::Apple => "Apple",
            AuthProvider::Linkedin => "LinkedIn",
            AuthProvider::Discord => "Discord",
            AuthProvider::UnknownSocial => "a social login provider",
        }
    }
}

impl fmt::Display for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub provider: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Account record as returned by any directory tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub id: Uuid,
    pub email: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub identities: Vec<UserIdentity>,
}

impl DirectoryUser {
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn avatar_url(&self) -> Option<&str> {
        self.metadata_str("avatar_url").or_else(|| self.metadata_str("picture"))
    }

    pub fn email_verified(&self) -> bool {
        self.metadata.get("email_verified").and_then(Value::as_bool).unwrap_or(false)
    }
}

/// Directory lookup strategy, ordered by cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupTier {
    ByEmail,
    TableQuery,
    PaginatedScan,
}

impl LookupTier {
    pub const ALL: [LookupTier; 3] = [LookupTier::ByEmail, LookupTier::TableQuery, LookupTier::PaginatedScan];

    pub fn as_str(&self) -> &'static str {
        match self {
            LookupTier::ByEmail => "by_email",
            LookupTier::TableQuery => "table_query",
            LookupTier::PaginatedScan => "paginated_scan",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupErrorKind {
    /// Every supported tier failed or timed out.
    DirectoryUnavailable,
    /// The capped scan ended without a match or an end-of-directory page.
    ScanLimitReached,
}

/// Answer to "does this email exist, and through which providers".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExistingAccountInfo {
    pub exists: bool,
    pub providers: BTreeSet<AuthProvider>,
    pub user_id: Option<Uuid>,
    pub error_kind: Option<LookupErrorKind>,
    pub resolved_by: Option<LookupTier>,
}

impl ExistingAccountInfo {
    pub fn found(user_id: Uuid, providers: BTreeSet<AuthProvider>, tier: LookupTier) -> Self {
        Self {
            exists: true,
            providers,
            user_id: Some(user_id),
            error_kind: None,
            resolved_by: Some(tier),
        }
    }

    pub fn not_found(tier: LookupTier) -> Self {
        Self {
            exists: false,
            providers: BTreeSet::new(),
            user_id: None,
            error_kind: None,
            resolved_by: Some(tier),
        }
    }

    pub fn unknown(kind: LookupErrorKind) -> Self {
        Self {
            exists: false,
            providers: BTreeSet::new(),
            user_id: None,
            error_kind: Some(kind),
            resolved_by: None,
        }
    }

    pub fn is_known(&self) -> bool {
        self.error_kind.is_none()
    }

    pub fn is_social_only(&self) -> bool {
        self.exists && !self.providers.is_empty() && !self.providers.contains(&AuthProvider::Password)
    }

    pub fn social_providers(&self) -> Vec<AuthProvider> {
        self.providers.iter().copied().filter(AuthProvider::is_social).collect()
    }
}

/// Message for a password flow hitting a social-only account. Names the providers and nothing else.
pub fn social_conflict_message(providers: &[AuthProvider]) -> String {
    let named: Vec<&str> = providers
        .iter()
        .filter(|p| **p != AuthProvider::UnknownSocial && p.is_social())
        .map(AuthProvider::display_name)
        .collect();

    let via = match named.as_slice() {
        [] => AuthProvider::UnknownSocial.display_name().to_string(),
        [one] => (*one).to_string(),
        [init @ .., last] => format!("{} or {}", init.join(", "), last),
    };

    format!("This email is linked to {via}. Please continue with {via} instead of a password.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_map_to_providers() {
        assert_eq!(AuthProvider::from_slug("google"), Some(AuthProvider::Google));
        assert_eq!(AuthProvider::from_slug("EMAIL"), Some(AuthProvider::Password));
        assert_eq!(AuthProvider::from_slug("linkedin_oidc"), Some(AuthProvider::Linkedin));
        assert_eq!(AuthProvider::from_slug("keycloak"), Some(AuthProvider::UnknownSocial));
        assert_eq!(AuthProvider::from_slug("  "), None);
    }

    #[test]
    fn providers_serialize_as_slugs() {
        let json = serde_json::to_value(vec![AuthProvider::Facebook, AuthProvider::UnknownSocial]).unwrap();
        assert_eq!(json, serde_json::json!(["facebook", "unknown"]));
    }

    #[test]
    fn social_only_requires_no_password_provider() {
        let id = Uuid::new_v4();
        let social = ExistingAccountInfo::found(id, BTreeSet::from([AuthProvider::Google]), LookupTier::ByEmail);
        let mixed = ExistingAccountInfo::found(id, BTreeSet::from([AuthProvider::Google, AuthProvider::Password]), LookupTier::ByEmail);

        assert!(social.is_social_only());
        assert!(!mixed.is_social_only());
        assert!(!ExistingAccountInfo::not_found(LookupTier::ByEmail).is_social_only());
    }

    #[test]
    fn conflict_message_names_providers() {
        assert_eq!(
            social_conflict_message(&[AuthProvider::Facebook]),
            "This email is linked to Facebook. Please continue with Facebook instead of a password."
        );
        assert!(social_conflict_message(&[AuthProvider::Google, AuthProvider::Github]).contains("Google or GitHub"));
        assert!(social_conflict_message(&[AuthProvider::UnknownSocial]).contains("a social login provider"));
    }
}
