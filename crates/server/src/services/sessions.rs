use std::sync::Arc;

use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use super::clock::Clock;

/// Issues, validates and revokes opaque session tokens.
///
/// A session is a `(username, token)` row stamped with its creation time; it
/// is expired once `now - created > ttl`. Any number of sessions may be live
/// for one user.
#[derive(Clone)]
pub struct SessionManager {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
}

impl SessionManager {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>, ttl_ms: i64) -> Self {
        Self { pool, clock, ttl_ms }
    }

    fn generate_token(username: &str) -> String {
        let nonce: u64 = rand::random();
        let mut hasher = Sha256::new();
        hasher.update(nonce.to_le_bytes());
        hasher.update(username.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub async fn issue(&self, username: &str) -> Result<String, sqlx::Error> {
        let token = Self::generate_token(username);

        sqlx::query("REPLACE INTO user_session (username, token, created) VALUES (?, ?, ?)")
            .bind(username)
            .bind(&token)
            .bind(self.clock.now_millis())
            .execute(&self.pool)
            .await?;

        Ok(token)
    }

    /// Sweep every expired session, then report whether the pair is live.
    pub async fn validate(&self, username: &str, token: &str) -> Result<bool, sqlx::Error> {
        let oldest_live = self.clock.now_millis() - self.ttl_ms;

        let swept = sqlx::query("DELETE FROM user_session WHERE created < ?")
            .bind(oldest_live)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if swept > 0 {
            tracing::debug!(swept, "expired sessions removed");
        }

        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM user_session WHERE username = ? AND token = ?",
        )
        .bind(username)
        .bind(token)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    pub async fn revoke(&self, username: &str, token: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM user_session WHERE username = ? AND token = ?")
            .bind(username)
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
