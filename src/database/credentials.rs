use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::service::sign_in::{CredentialVerifier, VerifiedCredentials};
use argon2::Argon2;
use async_trait::async_trait;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use std::sync::LazyLock;
use uuid::Uuid;

/// A real Argon2 hash computed once, used as a timing decoy so that unknown emails and
/// social-only accounts cost the same as a wrong password.
static DUMMY_HASH: LazyLock<Option<String>> = LazyLock::new(|| {
    let salt = SaltString::from_b64("c2lnbmluc2hpZWxkZHVtbXk").ok()?;
    Argon2::default().hash_password(b"dummy-never-matches", &salt).ok().map(|h| h.to_string())
});

#[derive(Debug, sqlx::FromRow)]
struct CredentialRow {
    id: Uuid,
    password_hash: Option<String>,
}

pub(crate) fn verify_password_hash(stored_hash: &str, password: &str) -> Result<(), AppError> {
    let password_hash = PasswordHash::new(stored_hash).map_err(|e| AppError::password_hash("Failed to parse stored password hash", e))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &password_hash)
        .map_err(|_| AppError::InvalidCredentials)
}

fn dummy_verify(password: &str) {
    if let Some(hash) = DUMMY_HASH.as_deref().and_then(|h| PasswordHash::new(h).ok()) {
        let _ = Argon2::default().verify_password(password.as_bytes(), &hash);
    }
}

#[async_trait]
impl CredentialVerifier for PostgresRepository {
    async fn verify(&self, email: &str, password: &str) -> Result<VerifiedCredentials, AppError> {
        let row = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT id, password_hash
            FROM users
            WHERE lower(email) = lower($1)
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        match row.and_then(|r| r.password_hash.map(|hash| (r.id, hash))) {
            Some((user_id, hash)) => {
                verify_password_hash(&hash, password)?;
                Ok(VerifiedCredentials { user_id })
            }
            None => {
                dummy_verify(password);
                Err(AppError::InvalidCredentials)
            }
        }
    }
}
