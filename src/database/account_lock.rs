use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::account_lock::AccountLockState;
use crate::service::account_lock::ProfileStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
impl ProfileStore for PostgresRepository {
    async fn load_lock_state(&self, account_id: &Uuid) -> Result<AccountLockState, AppError> {
        let state = sqlx::query_as::<_, AccountLockState>(
            r#"
            SELECT failed_attempts, locked_until, last_failed_update, unlocked_at
            FROM account_security
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(state.unwrap_or_default())
    }

    async fn save_lock_state(&self, account_id: &Uuid, state: &AccountLockState) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO account_security (account_id, failed_attempts, locked_until, last_failed_update)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (account_id)
            DO UPDATE SET
                failed_attempts = EXCLUDED.failed_attempts,
                locked_until = EXCLUDED.locked_until,
                last_failed_update = EXCLUDED.last_failed_update,
                updated_at = now()
            "#,
        )
        .bind(account_id)
        .bind(state.failed_attempts)
        .bind(state.locked_until)
        .bind(state.last_failed_update)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear_lock_state(&self, account_id: &Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE account_security
            SET failed_attempts = 0,
                locked_until = NULL,
                last_failed_update = NULL,
                unlock_token_hash = NULL,
                unlock_token_expires_at = NULL,
                updated_at = now()
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn store_unlock_token(&self, account_id: &Uuid, token_hash: &str, expires_at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE account_security
            SET unlock_token_hash = $1,
                unlock_token_expires_at = $2,
                updated_at = now()
            WHERE account_id = $3
            "#,
        )
        .bind(token_hash)
        .bind(expires_at)
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn consume_unlock_token(&self, account_id: &Uuid, token_hash: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
        // Single statement so a token can only be spent once.
        let result = sqlx::query(
            r#"
            UPDATE account_security
            SET failed_attempts = 0,
                locked_until = NULL,
                last_failed_update = NULL,
                unlock_token_hash = NULL,
                unlock_token_expires_at = NULL,
                unlocked_at = $3,
                updated_at = now()
            WHERE account_id = $1
              AND unlock_token_hash = $2
              AND unlock_token_expires_at > $3
            "#,
        )
        .bind(account_id)
        .bind(token_hash)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    #[ignore = "requires database"]
    async fn test_save_then_load_lock_state() {
        let repo = PostgresRepository::connect_for_tests().await;
        let (account, _) = repo.insert_test_user("lock", None).await;
        assert!(repo.load_lock_state(&account).await.unwrap().is_clear());

        let now = Utc::now();
        let state = AccountLockState {
            failed_attempts: 3,
            locked_until: None,
            last_failed_update: Some(now),
            unlocked_at: None,
        };
        repo.save_lock_state(&account, &state).await.unwrap();

        let loaded = repo.load_lock_state(&account).await.unwrap();
        assert_eq!(loaded.failed_attempts, 3);
        assert_eq!(loaded.locked_until, None);
        assert!(loaded.last_failed_update.is_some());
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn test_consume_unlock_token_only_once() {
        let repo = PostgresRepository::connect_for_tests().await;
        let (account, _) = repo.insert_test_user("unlock", None).await;
        let now = Utc::now();
        let locked = AccountLockState {
            failed_attempts: 5,
            locked_until: Some(now + Duration::minutes(30)),
            last_failed_update: Some(now),
            unlocked_at: None,
        };
        repo.save_lock_state(&account, &locked).await.unwrap();
        repo.store_unlock_token(&account, "token-hash", now + Duration::hours(1)).await.unwrap();

        assert!(!repo.consume_unlock_token(&account, "other-hash", now).await.unwrap());
        assert!(repo.consume_unlock_token(&account, "token-hash", now).await.unwrap());
        assert!(!repo.consume_unlock_token(&account, "token-hash", now).await.unwrap());

        let state = repo.load_lock_state(&account).await.unwrap();
        assert!(state.is_clear());
        assert!(state.unlocked_at.is_some());
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn test_expired_unlock_token_is_refused() {
        let repo = PostgresRepository::connect_for_tests().await;
        let (account, _) = repo.insert_test_user("expired", None).await;
        let now = Utc::now();
        repo.save_lock_state(&account, &AccountLockState::default()).await.unwrap();
        repo.store_unlock_token(&account, "token-hash", now - Duration::minutes(1)).await.unwrap();

        assert!(!repo.consume_unlock_token(&account, "token-hash", now).await.unwrap());
    }
}
