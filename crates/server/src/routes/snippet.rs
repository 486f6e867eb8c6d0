use std::collections::HashSet;

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    api::{ApiData, ApiResponse, Flag},
    db::models::{Snippet, SnippetFile},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    services::snippets::NewSnippet,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/snippet", post(get_snippet))
        .route("/snippet/create", post(create_snippet))
        .route("/snippet/update", post(update_snippet))
        .route("/snippet/delete", post(delete_snippet))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub mark_read: Option<Flag>,
}

/// Create and update payload. `files` stays untyped until validation so that
/// a bad entry is reported as a conflict on that entry's field.
#[derive(Debug, Default, Deserialize)]
pub struct SnippetPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub files: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IdRequest {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SnippetResponse {
    pub snippet: Snippet,
}

#[derive(Debug, Serialize)]
pub struct CreateResponse {
    pub id: String,
}

fn require_id(id: Option<String>) -> Result<String> {
    id.map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing snippet id".to_string()))
}

/// A bare name in the repository root. `.git` would collide with the
/// repository's own metadata directory.
fn valid_filename(name: &str) -> bool {
    name != "."
        && name != ".."
        && !name.eq_ignore_ascii_case(".git")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn string_field<'a>(entry: &'a Value, index: usize, field: &str) -> Result<&'a str> {
    entry
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::conflict(format!("file[{index}].{field}")))
}

/// Check a create/update payload and normalise it: filename and language are
/// trimmed, contents are kept byte for byte.
pub fn validate_snippet(description: Option<String>, files: Option<Value>) -> Result<NewSnippet> {
    let description = description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .ok_or_else(|| AppError::conflict("description"))?;

    let entries = match files {
        Some(Value::Array(entries)) if !entries.is_empty() => entries,
        _ => return Err(AppError::conflict("files")),
    };

    let mut seen = HashSet::new();
    let mut files = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let filename = string_field(entry, i, "filename")?.trim();
        let language = string_field(entry, i, "language")?.trim();
        let contents = string_field(entry, i, "contents")?;

        if !valid_filename(filename) || !seen.insert(filename.to_ascii_lowercase()) {
            return Err(AppError::conflict(format!("file[{i}].filename")));
        }

        files.push(SnippetFile {
            filename: filename.to_string(),
            language: language.to_string(),
            contents: contents.to_string(),
        });
    }

    Ok(NewSnippet { description, files })
}

/// 404 when the snippet is gone, 403 when `username` does not own it.
async fn require_owner(state: &AppState, id: &str, username: &str) -> Result<()> {
    if !state.snippets.exists(id).await? {
        return Err(AppError::NotFound("No such snippet".to_string()));
    }
    if !state.snippets.is_owned_by(id, username).await? {
        return Err(AppError::Forbidden(
            "You do not have permission to modify this snippet".to_string(),
        ));
    }
    Ok(())
}

async fn get_snippet(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiData(body): ApiData<FetchRequest>,
) -> Result<Json<ApiResponse<SnippetResponse>>> {
    let id = require_id(body.id)?;

    let snippet = state
        .snippets
        .fetch_with_comments(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("No such snippet".to_string()))?;

    if body.mark_read.as_ref().is_some_and(Flag::is_set) {
        state
            .snippets
            .mark_read_by(&id, &auth.user.username)
            .await?;
    }

    Ok(Json(ApiResponse::ok(SnippetResponse { snippet })))
}

async fn create_snippet(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiData(body): ApiData<SnippetPayload>,
) -> Result<Json<ApiResponse<CreateResponse>>> {
    let snippet = validate_snippet(body.description, body.files)?;
    let id = state.snippets.create(snippet, &auth.user).await?;
    Ok(Json(ApiResponse::ok(CreateResponse { id })))
}

async fn update_snippet(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiData(body): ApiData<SnippetPayload>,
) -> Result<Json<ApiResponse<SnippetResponse>>> {
    let id = require_id(body.id)?;
    require_owner(&state, &id, &auth.user.username).await?;

    let update = validate_snippet(body.description, body.files)?;
    let snippet = state.snippets.update(&id, update, &auth.user).await?;

    Ok(Json(ApiResponse::ok(SnippetResponse { snippet })))
}

async fn delete_snippet(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiData(body): ApiData<IdRequest>,
) -> Result<Json<ApiResponse>> {
    let id = require_id(body.id)?;
    require_owner(&state, &id, &auth.user.username).await?;

    if !state.snippets.delete(&id).await? {
        return Err(AppError::NotFound("No such snippet".to_string()));
    }

    Ok(Json(ApiResponse::empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conflict_field(result: Result<NewSnippet>) -> String {
        match result {
            Err(AppError::Conflict { field }) => field,
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_payload_is_normalised() {
        let snippet = validate_snippet(
            Some(" demo ".to_string()),
            Some(json!([{"filename": " main.go ", "language": " go", "contents": "  package main\n"}])),
        )
        .unwrap();

        assert_eq!(snippet.description, "demo");
        assert_eq!(snippet.files[0].filename, "main.go");
        assert_eq!(snippet.files[0].language, "go");
        assert_eq!(snippet.files[0].contents, "  package main\n");
    }

    #[test]
    fn test_description_and_files_are_required() {
        let files = json!([{"filename": "a", "language": "b", "contents": "c"}]);
        assert_eq!(conflict_field(validate_snippet(None, Some(files.clone()))), "description");
        assert_eq!(
            conflict_field(validate_snippet(Some("  ".to_string()), Some(files))),
            "description"
        );
        assert_eq!(conflict_field(validate_snippet(Some("d".to_string()), None)), "files");
        assert_eq!(
            conflict_field(validate_snippet(Some("d".to_string()), Some(json!([])))),
            "files"
        );
        assert_eq!(
            conflict_field(validate_snippet(Some("d".to_string()), Some(json!({"a": 1})))),
            "files"
        );
    }

    #[test]
    fn test_entry_fields_are_reported_by_index() {
        let files = json!([
            {"filename": "ok.txt", "language": "text", "contents": "x"},
            {"filename": "b.txt", "language": " ", "contents": "x"},
        ]);
        assert_eq!(
            conflict_field(validate_snippet(Some("d".to_string()), Some(files))),
            "file[1].language"
        );

        let files = json!([{"filename": "a.txt", "language": "text", "contents": 7}]);
        assert_eq!(
            conflict_field(validate_snippet(Some("d".to_string()), Some(files))),
            "file[0].contents"
        );
    }

    #[test]
    fn test_filenames_must_be_safe_and_unique() {
        for bad in ["../etc/passwd", "a b.txt", ".", "..", "dir/file", ".git", ".GIT"] {
            let files = json!([{"filename": bad, "language": "text", "contents": "x"}]);
            assert_eq!(
                conflict_field(validate_snippet(Some("d".to_string()), Some(files))),
                "file[0].filename",
                "{bad} accepted"
            );
        }

        let files = json!([
            {"filename": "Main.go", "language": "go", "contents": "x"},
            {"filename": "main.GO", "language": "go", "contents": "y"},
        ]);
        assert_eq!(
            conflict_field(validate_snippet(Some("d".to_string()), Some(files))),
            "file[1].filename"
        );
    }
}
