use std::sync::Arc;

use sqlx::SqlitePool;

use super::clock::Clock;
use super::markdown::MarkdownRenderer;
use super::read_marks;
use crate::db::models::Comment;

const SELECT_COMMENT: &str = r#"
    SELECT c.comment_id AS id, c.snippet_id, c.username, u.display_name,
           c.markdown, c.html, c.created, c.updated
    FROM snippet_comment c
    JOIN user u ON u.username = c.username
"#;

/// Comment rows and their rendered-HTML cache. Every change to a comment
/// marks its snippet unread for everyone except the author.
#[derive(Clone)]
pub struct CommentStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    renderer: Arc<dyn MarkdownRenderer>,
}

impl CommentStore {
    pub fn new(
        pool: SqlitePool,
        clock: Arc<dyn Clock>,
        renderer: Arc<dyn MarkdownRenderer>,
    ) -> Self {
        Self {
            pool,
            clock,
            renderer,
        }
    }

    pub async fn fetch(&self, id: i64) -> Result<Option<Comment>, sqlx::Error> {
        sqlx::query_as::<_, Comment>(&format!("{SELECT_COMMENT} WHERE c.comment_id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Comments of one snippet in creation order.
    pub async fn list_for_snippet(&self, snippet_id: &str) -> Result<Vec<Comment>, sqlx::Error> {
        sqlx::query_as::<_, Comment>(&format!(
            "{SELECT_COMMENT} WHERE c.snippet_id = ? ORDER BY c.created, c.comment_id"
        ))
        .bind(snippet_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn create(
        &self,
        snippet_id: &str,
        username: &str,
        markdown: &str,
    ) -> Result<Comment, sqlx::Error> {
        let html = self.renderer.render(markdown);
        let mut tx = self.pool.begin().await?;

        let id = sqlx::query(
            "INSERT INTO snippet_comment (snippet_id, username, markdown, html, created, updated) VALUES (?, ?, ?, ?, ?, 0)",
        )
        .bind(snippet_id)
        .bind(username)
        .bind(markdown)
        .bind(&html)
        .bind(self.clock.now_millis())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        read_marks::mark_unread(&mut tx, snippet_id).await?;
        read_marks::mark_read_by(&mut tx, snippet_id, username).await?;

        let comment = sqlx::query_as::<_, Comment>(&format!("{SELECT_COMMENT} WHERE c.comment_id = ?"))
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(comment)
    }

    /// Replace the source text, regenerating the HTML cache.
    pub async fn update(&self, id: i64, markdown: &str) -> Result<Option<Comment>, sqlx::Error> {
        let html = self.renderer.render(markdown);
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE snippet_comment SET markdown = ?, html = ?, updated = ? WHERE comment_id = ?",
        )
        .bind(markdown)
        .bind(&html)
        .bind(self.clock.now_millis())
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated == 0 {
            return Ok(None);
        }

        let comment = sqlx::query_as::<_, Comment>(&format!("{SELECT_COMMENT} WHERE c.comment_id = ?"))
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        read_marks::mark_unread(&mut tx, &comment.snippet_id).await?;
        read_marks::mark_read_by(&mut tx, &comment.snippet_id, &comment.username).await?;

        tx.commit().await?;
        Ok(Some(comment))
    }

    pub async fn delete(&self, id: i64) -> Result<bool, sqlx::Error> {
        let deleted = sqlx::query("DELETE FROM snippet_comment WHERE comment_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }
}
