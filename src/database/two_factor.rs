use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::sign_in::TwoFactorMethod;
use crate::service::sign_in::TwoFactorDispatcher;
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
impl TwoFactorDispatcher for PostgresRepository {
    async fn challenge_for(&self, user_id: &Uuid) -> Result<Option<TwoFactorMethod>, AppError> {
        let enabled = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT is_enabled
            FROM two_factor_auth
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(enabled.unwrap_or(false).then_some(TwoFactorMethod::Totp))
    }
}
