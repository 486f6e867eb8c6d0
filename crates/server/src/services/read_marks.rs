// Read-marks: a (snippet, user) row means the user has seen the snippet's
// current state. Any change to a snippet drops all of its marks.

use sqlx::SqliteConnection;

pub async fn mark_read_by(
    conn: &mut SqliteConnection,
    snippet_id: &str,
    username: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("REPLACE INTO snippet_view (snippet_id, username) VALUES (?, ?)")
        .bind(snippet_id)
        .bind(username)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn mark_unread(conn: &mut SqliteConnection, snippet_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM snippet_view WHERE snippet_id = ?")
        .bind(snippet_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
