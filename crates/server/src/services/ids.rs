//! Snippet identifier allocation.
//!
//! An identifier is the creation time in milliseconds written in base 36 with
//! its digits reversed, so the fastest-changing digit comes first and
//! consecutive snippets land in different fan-out directories. Collisions are
//! resolved by stepping the timestamp back one millisecond at a time.

use std::sync::Arc;

use sqlx::SqliteConnection;

use super::clock::Clock;

const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Reversed upper-case base-36 rendering of `ms`.
pub fn encode_id(ms: i64) -> String {
    let mut n = ms.unsigned_abs();
    let mut out = String::new();
    // Emitting least significant digit first yields the reversed string.
    loop {
        out.push(DIGITS[(n % 36) as usize] as char);
        n /= 36;
        if n == 0 {
            break;
        }
    }
    out
}

#[derive(Clone)]
pub struct IdAllocator {
    clock: Arc<dyn Clock>,
}

impl IdAllocator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Claim a fresh identifier by inserting the snippet row under it.
    ///
    /// The probe and the insert are the same statement, so two creations in
    /// the same millisecond can never both claim one id. Must be called on the
    /// connection of the transaction that inserts the rest of the snippet.
    /// Returns the identifier and the timestamp it encodes.
    pub async fn claim(
        &self,
        conn: &mut SqliteConnection,
        username: &str,
        description: &str,
    ) -> Result<(String, i64), sqlx::Error> {
        let mut ms = self.clock.now_millis();
        loop {
            let id = encode_id(ms);
            let inserted = sqlx::query(
                "INSERT OR IGNORE INTO snippet (snippet_id, username, description, created, updated) VALUES (?, ?, ?, ?, 0)",
            )
            .bind(&id)
            .bind(username)
            .bind(description)
            .bind(ms)
            .execute(&mut *conn)
            .await?
            .rows_affected();

            if inserted == 1 {
                return Ok((id, ms));
            }

            tracing::debug!(id = %id, "snippet id already taken, stepping back");
            ms -= 1;
        }
    }
}
