//! Shared helpers for unit tests.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::db::Database;
use crate::services::clock::Clock;

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// A migrated database in a file under `temp_dir`.
pub async fn test_db(temp_dir: &tempfile::TempDir) -> Database {
    let path = temp_dir.path().join("db").join("summa.db");
    let url = format!("sqlite:{}?mode=rwc", path.display());
    let db = Database::connect(&url)
        .await
        .expect("Failed to open test database");
    db.run_migrations()
        .await
        .expect("Failed to migrate test database");
    db
}

pub async fn insert_user(db: &Database, username: &str) {
    sqlx::query("INSERT INTO user (username, display_name, email) VALUES (?, ?, ?)")
        .bind(username)
        .bind(format!("{username} display"))
        .bind(format!("{username}@example.com"))
        .execute(&db.pool)
        .await
        .expect("Failed to insert test user");
}
