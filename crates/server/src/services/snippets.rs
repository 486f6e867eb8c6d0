//! The snippet repository: metadata rows in SQLite and file contents in a
//! per-snippet git repository, kept in step.
//!
//! The metadata transaction always commits before the repository is touched,
//! so a row never points at a repository that was never created. When the
//! repository step then fails, the metadata change is compensated:
//!
//! * create deletes the rows it inserted (and the partial directory);
//! * update restores the previous description, timestamp and file rows and
//!   resets the working tree and index to the last commit.
//!
//! Writers of one snippet are serialised through [`StorageService::lock`].

use std::sync::Arc;

use sqlx::{SqliteConnection, SqlitePool};

use super::clock::Clock;
use super::comments::CommentStore;
use super::ids::IdAllocator;
use super::read_marks;
use super::storage::{Author, StorageService};
use crate::db::models::{Snippet, SnippetFile, SnippetSummary, User};
use crate::error::{AppError, Result};

const SELECT_SNIPPET: &str = r#"
    SELECT s.snippet_id AS id, s.username, u.display_name, s.description, s.created, s.updated
    FROM snippet s
    JOIN user u ON u.username = s.username
"#;

const SELECT_SUMMARY: &str = r#"
    SELECT s.snippet_id AS id, s.username, u.display_name, s.description, s.created, s.updated,
           (SELECT COUNT(*) FROM snippet_file f WHERE f.snippet_id = s.snippet_id) AS num_files,
           (SELECT COUNT(*) FROM snippet_comment c WHERE c.snippet_id = s.snippet_id) AS num_comments
    FROM snippet s
    JOIN user u ON u.username = s.username
"#;

/// Orderings a listing may request. Only these expressions ever reach the
/// `ORDER BY` clause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SnippetOrder {
    CommentsAsc,
    CommentsDesc,
    FilesAsc,
    FilesDesc,
    CreatedAsc,
    CreatedDesc,
    UpdatedAsc,
    UpdatedDesc,
    DescriptionAsc,
    DescriptionDesc,
    /// Most recently updated first, then most recently created.
    #[default]
    Recent,
}

impl SnippetOrder {
    /// Case-insensitive lookup of a request key such as `createdAsc`.
    pub fn parse(key: &str) -> Option<Self> {
        let order = match key.to_ascii_lowercase().as_str() {
            "commentsasc" => Self::CommentsAsc,
            "commentsdesc" => Self::CommentsDesc,
            "filesasc" => Self::FilesAsc,
            "filesdesc" => Self::FilesDesc,
            "createdasc" => Self::CreatedAsc,
            "createddesc" => Self::CreatedDesc,
            "updatedasc" => Self::UpdatedAsc,
            "updateddesc" => Self::UpdatedDesc,
            "descriptionasc" => Self::DescriptionAsc,
            "descriptiondesc" => Self::DescriptionDesc,
            _ => return None,
        };
        Some(order)
    }

    /// Unknown or missing keys fall back to [`SnippetOrder::Recent`].
    pub fn from_key(key: Option<&str>) -> Self {
        key.and_then(Self::parse).unwrap_or_default()
    }

    fn sql(self) -> &'static str {
        match self {
            Self::CommentsAsc => "num_comments, s.snippet_id",
            Self::CommentsDesc => "num_comments DESC, s.snippet_id",
            Self::FilesAsc => "num_files, s.snippet_id",
            Self::FilesDesc => "num_files DESC, s.snippet_id",
            Self::CreatedAsc => "s.created",
            Self::CreatedDesc => "s.created DESC",
            Self::UpdatedAsc => "s.updated, s.created",
            Self::UpdatedDesc => "s.updated DESC, s.created DESC",
            Self::DescriptionAsc => "s.description, s.snippet_id",
            Self::DescriptionDesc => "s.description DESC, s.snippet_id",
            Self::Recent => "s.updated DESC, s.created DESC",
        }
    }
}

/// Validated input for create and update.
#[derive(Debug, Clone)]
pub struct NewSnippet {
    pub description: String,
    pub files: Vec<SnippetFile>,
}

fn commit_author(user: &User) -> Author {
    let name = if user.display_name.trim().is_empty() {
        user.username.clone()
    } else {
        user.display_name.clone()
    };
    let email = if user.email.trim().is_empty() {
        format!("{}@localhost", user.username)
    } else {
        user.email.clone()
    };
    Author { name, email }
}

fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

async fn insert_files(
    conn: &mut SqliteConnection,
    snippet_id: &str,
    files: &[SnippetFile],
) -> std::result::Result<(), sqlx::Error> {
    for file in files {
        sqlx::query("INSERT INTO snippet_file (snippet_id, filename, language) VALUES (?, ?, ?)")
            .bind(snippet_id)
            .bind(&file.filename)
            .bind(&file.language)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn delete_rows(
    conn: &mut SqliteConnection,
    snippet_id: &str,
) -> std::result::Result<u64, sqlx::Error> {
    for query in [
        "DELETE FROM snippet_view WHERE snippet_id = ?",
        "DELETE FROM snippet_comment WHERE snippet_id = ?",
        "DELETE FROM snippet_file WHERE snippet_id = ?",
    ] {
        sqlx::query(query).bind(snippet_id).execute(&mut *conn).await?;
    }

    let deleted = sqlx::query("DELETE FROM snippet WHERE snippet_id = ?")
        .bind(snippet_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    Ok(deleted)
}

#[derive(Clone)]
pub struct SnippetRepository {
    pool: SqlitePool,
    storage: StorageService,
    ids: IdAllocator,
    clock: Arc<dyn Clock>,
    comments: CommentStore,
    limit_default: i64,
    limit_max: i64,
}

impl SnippetRepository {
    pub fn new(
        pool: SqlitePool,
        storage: StorageService,
        clock: Arc<dyn Clock>,
        comments: CommentStore,
        limit_default: i64,
        limit_max: i64,
    ) -> Self {
        Self {
            pool,
            storage,
            ids: IdAllocator::new(Arc::clone(&clock)),
            clock,
            comments,
            limit_default,
            limit_max,
        }
    }

    pub async fn exists(&self, id: &str) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM snippet WHERE snippet_id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    pub async fn is_owned_by(&self, id: &str, username: &str) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM snippet WHERE snippet_id = ? AND username = ?",
        )
        .bind(id)
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(count == 1)
    }

    /// Create a snippet owned by `author` and return its new id.
    pub async fn create(&self, snippet: NewSnippet, author: &User) -> Result<String> {
        let mut tx = self.pool.begin().await?;
        let (id, _) = self
            .ids
            .claim(&mut tx, &author.username, &snippet.description)
            .await?;
        insert_files(&mut tx, &id, &snippet.files).await?;
        read_marks::mark_read_by(&mut tx, &id, &author.username).await?;
        tx.commit().await?;

        let _guard = self.storage.lock(&id).await;
        let storage = self.storage.clone();
        let repo_id = id.clone();
        let signature = commit_author(author);
        let files = snippet.files;
        let materialized = tokio::task::spawn_blocking(move || {
            storage.create_repo(&repo_id, &signature, &files)
        })
        .await
        .map_err(AppError::from)
        .and_then(|r| r.map_err(AppError::from));

        if let Err(e) = materialized {
            tracing::warn!(snippet_id = %id, "repository creation failed, removing metadata");
            let mut conn = self.pool.acquire().await?;
            if let Err(cleanup) = delete_rows(&mut conn, &id).await {
                tracing::warn!(snippet_id = %id, "failed to remove metadata: {cleanup}");
            }
            return Err(e);
        }

        tracing::info!(snippet_id = %id, username = %author.username, "snippet created");
        Ok(id)
    }

    /// Replace description and the whole file set of an existing snippet.
    /// Ownership must already have been checked by the caller.
    pub async fn update(&self, id: &str, snippet: NewSnippet, author: &User) -> Result<Snippet> {
        let _guard = self.storage.lock(id).await;

        let prior = self
            .fetch_row(id)
            .await?
            .ok_or_else(|| AppError::NotFound("No such snippet".to_string()))?;
        let prior_files = self.file_rows(id).await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE snippet SET description = ?, updated = ? WHERE snippet_id = ?")
            .bind(&snippet.description)
            .bind(self.clock.now_millis())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM snippet_file WHERE snippet_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        insert_files(&mut tx, id, &snippet.files).await?;
        read_marks::mark_unread(&mut tx, id).await?;
        read_marks::mark_read_by(&mut tx, id, &author.username).await?;
        tx.commit().await?;

        let old_names: Vec<String> = prior_files.iter().map(|f| f.filename.clone()).collect();
        let introduced: Vec<String> = snippet
            .files
            .iter()
            .filter(|f| !old_names.contains(&f.filename))
            .map(|f| f.filename.clone())
            .collect();

        let storage = self.storage.clone();
        let repo_id = id.to_string();
        let signature = commit_author(author);
        let files = snippet.files;
        let committed = tokio::task::spawn_blocking(move || {
            storage.replace_files(&repo_id, &signature, &old_names, &files)
        })
        .await
        .map_err(AppError::from)
        .and_then(|r| r.map_err(AppError::from));

        if let Err(e) = committed {
            tracing::warn!(snippet_id = %id, "repository update failed, restoring previous state");
            self.restore(&prior, &prior_files, introduced).await;
            return Err(e);
        }

        self.fetch(id)
            .await?
            .ok_or_else(|| AppError::NotFound("No such snippet".to_string()))
    }

    /// Best-effort compensation for a failed update.
    async fn restore(&self, prior: &Snippet, prior_files: &[SnippetFile], introduced: Vec<String>) {
        let restored: std::result::Result<(), sqlx::Error> = async {
            let mut tx = self.pool.begin().await?;
            sqlx::query("UPDATE snippet SET description = ?, updated = ? WHERE snippet_id = ?")
                .bind(&prior.description)
                .bind(prior.updated)
                .bind(&prior.id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM snippet_file WHERE snippet_id = ?")
                .bind(&prior.id)
                .execute(&mut *tx)
                .await?;
            insert_files(&mut tx, &prior.id, prior_files).await?;
            tx.commit().await
        }
        .await;
        if let Err(e) = restored {
            tracing::warn!(snippet_id = %prior.id, "failed to restore metadata: {e}");
        }

        let storage = self.storage.clone();
        let repo_id = prior.id.clone();
        match tokio::task::spawn_blocking(move || storage.restore_head(&repo_id, &introduced)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(snippet_id = %prior.id, "failed to reset repository: {e}"),
            Err(e) => tracing::warn!(snippet_id = %prior.id, "failed to reset repository: {e}"),
        }
    }

    /// Delete the snippet with its files, comments and read-marks. The
    /// repository directory is removed afterwards; failing to remove it is
    /// only logged. Returns false when there was no such snippet.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let _guard = self.storage.lock(id).await;

        let mut tx = self.pool.begin().await?;
        let deleted = delete_rows(&mut tx, id).await?;
        tx.commit().await?;

        if deleted == 0 {
            return Ok(false);
        }

        let storage = self.storage.clone();
        let repo_id = id.to_string();
        match tokio::task::spawn_blocking(move || storage.delete_repo(&repo_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(snippet_id = %id, "failed to remove repository: {e}"),
            Err(e) => tracing::warn!(snippet_id = %id, "failed to remove repository: {e}"),
        }

        tracing::info!(snippet_id = %id, "snippet deleted");
        Ok(true)
    }

    async fn fetch_row(&self, id: &str) -> Result<Option<Snippet>> {
        let row = sqlx::query_as::<_, Snippet>(&format!("{SELECT_SNIPPET} WHERE s.snippet_id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn file_rows(&self, id: &str) -> Result<Vec<SnippetFile>> {
        let files = sqlx::query_as::<_, SnippetFile>(
            "SELECT filename, language FROM snippet_file WHERE snippet_id = ? ORDER BY filename",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(files)
    }

    /// The snippet with its files, contents read from the working tree in
    /// filename order.
    pub async fn fetch(&self, id: &str) -> Result<Option<Snippet>> {
        let Some(mut snippet) = self.fetch_row(id).await? else {
            return Ok(None);
        };

        let files = self.file_rows(id).await?;
        let storage = self.storage.clone();
        let repo_id = id.to_string();
        snippet.files = tokio::task::spawn_blocking(move || storage.read_files(&repo_id, files)).await??;

        Ok(Some(snippet))
    }

    /// [`fetch`](Self::fetch) plus ordered comments and commit history.
    pub async fn fetch_with_comments(&self, id: &str) -> Result<Option<Snippet>> {
        let Some(mut snippet) = self.fetch(id).await? else {
            return Ok(None);
        };

        snippet.comments = self.comments.list_for_snippet(id).await?;

        let storage = self.storage.clone();
        let repo_id = id.to_string();
        snippet.revisions = tokio::task::spawn_blocking(move || storage.revisions(&repo_id)).await??;

        Ok(Some(snippet))
    }

    pub async fn mark_read_by(&self, id: &str, username: &str) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        read_marks::mark_read_by(&mut conn, id, username).await?;
        Ok(())
    }

    /// A page of snippets. `start` is 1-based and clamped to 1; `limit`
    /// falls back to the default below 1, and the result is capped at the
    /// maximum.
    pub async fn list_paged(
        &self,
        start: i64,
        limit: i64,
        order: SnippetOrder,
        username: Option<&str>,
    ) -> Result<Vec<SnippetSummary>> {
        let start = start.max(1);
        let limit = if limit < 1 { self.limit_default } else { limit }.min(self.limit_max);

        let filter = if username.is_some() {
            "WHERE s.username = ?"
        } else {
            ""
        };
        let sql = format!(
            "{SELECT_SUMMARY} {filter} ORDER BY {} LIMIT ? OFFSET ?",
            order.sql()
        );

        let mut query = sqlx::query_as::<_, SnippetSummary>(&sql);
        if let Some(username) = username {
            query = query.bind(username);
        }
        let snippets = query
            .bind(limit)
            .bind(start - 1)
            .fetch_all(&self.pool)
            .await?;
        Ok(snippets)
    }

    /// Snippets whose description or any filename contains `term`,
    /// ignoring ASCII case.
    pub async fn search(&self, term: &str, order: SnippetOrder) -> Result<Vec<SnippetSummary>> {
        let pattern = like_pattern(term);
        let sql = format!(
            r#"{SELECT_SUMMARY}
            WHERE s.description LIKE ? ESCAPE '\'
               OR EXISTS (SELECT 1 FROM snippet_file f
                          WHERE f.snippet_id = s.snippet_id AND f.filename LIKE ? ESCAPE '\')
            ORDER BY {}"#,
            order.sql()
        );

        let snippets = sqlx::query_as::<_, SnippetSummary>(&sql)
            .bind(&pattern)
            .bind(&pattern)
            .fetch_all(&self.pool)
            .await?;
        Ok(snippets)
    }

    /// Snippets `username` has not seen since they last changed.
    pub async fn unread(&self, username: &str) -> Result<Vec<SnippetSummary>> {
        let sql = format!(
            r#"{SELECT_SUMMARY}
            WHERE NOT EXISTS (SELECT 1 FROM snippet_view v
                              WHERE v.snippet_id = s.snippet_id AND v.username = ?)
            ORDER BY {}"#,
            SnippetOrder::Recent.sql()
        );

        let snippets = sqlx::query_as::<_, SnippetSummary>(&sql)
            .bind(username)
            .fetch_all(&self.pool)
            .await?;
        Ok(snippets)
    }
}
