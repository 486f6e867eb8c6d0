use sqlx::SqlitePool;

use crate::db::models::User;

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn fetch(&self, username: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            "SELECT username, display_name, email FROM user WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
    }

    /// Insert `user` unless a row with its username already exists.
    pub async fn create_if_missing(&self, user: &User) -> Result<bool, sqlx::Error> {
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO user (username, display_name, email) VALUES (?, ?, ?)",
        )
        .bind(&user.username)
        .bind(&user.display_name)
        .bind(&user.email)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(inserted == 1)
    }

    pub async fn update(&self, user: &User) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE user SET display_name = ?, email = ? WHERE username = ?")
            .bind(&user.display_name)
            .bind(&user.email)
            .bind(&user.username)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
