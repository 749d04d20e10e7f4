use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::directory::{DirectoryUser, UserIdentity};
use crate::service::account_existence::{DirectoryCapabilities, DirectoryPage, UserDirectory};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::types::Json;
use uuid::Uuid;

const USER_COLUMNS: &str = r#"
    u.id,
    u.email,
    u.metadata,
    u.created_at,
    u.confirmed_at,
    COALESCE(
        (SELECT jsonb_agg(jsonb_build_object('provider', i.provider, 'created_at', i.created_at))
         FROM user_identities i
         WHERE i.user_id = u.id),
        '[]'::jsonb
    ) AS identities
"#;

#[derive(Debug, sqlx::FromRow)]
struct DirectoryUserRow {
    id: Uuid,
    email: String,
    metadata: Json<Map<String, Value>>,
    created_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
    identities: Json<Vec<UserIdentity>>,
}

impl From<DirectoryUserRow> for DirectoryUser {
    fn from(row: DirectoryUserRow) -> Self {
        DirectoryUser {
            id: row.id,
            email: row.email,
            metadata: row.metadata.0,
            created_at: row.created_at,
            confirmed_at: row.confirmed_at,
            identities: row.identities.0,
        }
    }
}

#[async_trait]
impl UserDirectory for PostgresRepository {
    fn capabilities(&self) -> DirectoryCapabilities {
        DirectoryCapabilities::ALL
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<DirectoryUser>, AppError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users u WHERE lower(u.email) = lower($1)");
        let row = sqlx::query_as::<_, DirectoryUserRow>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(DirectoryUser::from))
    }

    async fn query_table(&self, email: &str) -> Result<Option<DirectoryUser>, AppError> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM legacy_user_lookup l JOIN users u ON u.id = l.user_id WHERE lower(l.email) = lower($1) LIMIT 1"
        );
        let row = sqlx::query_as::<_, DirectoryUserRow>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(DirectoryUser::from))
    }

    async fn list_users(&self, page: u32, per_page: u32) -> Result<DirectoryPage, AppError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users u ORDER BY u.created_at, u.id LIMIT $1 OFFSET $2");
        let rows = sqlx::query_as::<_, DirectoryUserRow>(&query)
            .bind(i64::from(per_page) + 1)
            .bind(i64::from(page) * i64::from(per_page))
            .fetch_all(&self.pool)
            .await?;

        let has_more = rows.len() > per_page as usize;
        let users = rows.into_iter().take(per_page as usize).map(DirectoryUser::from).collect();
        Ok(DirectoryPage { users, has_more })
    }
}
