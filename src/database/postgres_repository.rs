use sqlx::PgPool;

/// Postgres-backed profile store, user directory, credential verifier and 2FA lookup.
#[derive(Clone)]
pub struct PostgresRepository {
    pub pool: PgPool,
}

#[cfg(test)]
impl PostgresRepository {
    /// Repository on `DATABASE_URL` with the migrations applied.
    pub(crate) async fn connect_for_tests() -> Self {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a test database");
        let pool = PgPool::connect(&url).await.expect("database reachable");
        sqlx::migrate!("./migrations").run(&pool).await.expect("migrations apply");
        Self { pool }
    }

    /// Inserts a user under a unique address derived from `local_part`.
    pub(crate) async fn insert_test_user(&self, local_part: &str, password_hash: Option<&str>) -> (uuid::Uuid, String) {
        let email = format!("{}+{}@example.com", local_part, uuid::Uuid::new_v4().simple());
        let id = sqlx::query_scalar::<_, uuid::Uuid>("INSERT INTO users (email, password_hash) VALUES ($1, $2) RETURNING id")
            .bind(&email)
            .bind(password_hash)
            .fetch_one(&self.pool)
            .await
            .expect("insert user");
        (id, email)
    }
}
