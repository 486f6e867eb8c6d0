use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::{
    api::{ApiData, ApiResponse},
    db::models::Comment,
    error::{AppError, Result},
    middleware::auth::AuthUser,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/comment/create", post(create_comment))
        .route("/comment/update", post(update_comment))
        .route("/comment/delete", post(delete_comment))
}

/// Comment ids travel as numbers or as decimal strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CommentId {
    Number(i64),
    Text(String),
}

impl CommentId {
    fn resolve(id: Option<CommentId>) -> Result<i64> {
        let invalid = || AppError::BadRequest("Missing or invalid comment id".to_string());
        match id.ok_or_else(invalid)? {
            CommentId::Number(n) => Ok(n),
            CommentId::Text(s) => s.trim().parse().map_err(|_| invalid()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateCommentRequest {
    #[serde(default, alias = "snippetId")]
    pub snippet_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateCommentRequest {
    #[serde(default)]
    pub id: Option<CommentId>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteCommentRequest {
    #[serde(default)]
    pub id: Option<CommentId>,
}

#[derive(Debug, Serialize)]
pub struct CommentResponse {
    pub comment: Comment,
}

fn require_message(message: Option<String>) -> Result<String> {
    message
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| AppError::conflict("message"))
}

/// The comment, provided it exists (404) and `username` wrote it (403).
async fn require_author(state: &AppState, id: i64, username: &str) -> Result<Comment> {
    let comment = state
        .comments
        .fetch(id)
        .await?
        .ok_or_else(|| AppError::NotFound("No such comment".to_string()))?;
    if comment.username != username {
        return Err(AppError::Forbidden(
            "You do not have permission to modify this comment".to_string(),
        ));
    }
    Ok(comment)
}

async fn create_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiData(body): ApiData<CreateCommentRequest>,
) -> Result<Json<ApiResponse<CommentResponse>>> {
    let snippet_id = body
        .snippet_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing snippet id".to_string()))?;

    if !state.snippets.exists(&snippet_id).await? {
        return Err(AppError::NotFound("No such snippet".to_string()));
    }
    let message = require_message(body.message)?;

    let comment = state
        .comments
        .create(&snippet_id, &auth.user.username, &message)
        .await?;

    Ok(Json(ApiResponse::ok(CommentResponse { comment })))
}

async fn update_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiData(body): ApiData<UpdateCommentRequest>,
) -> Result<Json<ApiResponse<CommentResponse>>> {
    let id = CommentId::resolve(body.id)?;
    require_author(&state, id, &auth.user.username).await?;
    let message = require_message(body.message)?;

    let comment = state
        .comments
        .update(id, &message)
        .await?
        .ok_or_else(|| AppError::NotFound("No such comment".to_string()))?;

    Ok(Json(ApiResponse::ok(CommentResponse { comment })))
}

async fn delete_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiData(body): ApiData<DeleteCommentRequest>,
) -> Result<Json<ApiResponse>> {
    let id = CommentId::resolve(body.id)?;
    require_author(&state, id, &auth.user.username).await?;

    state.comments.delete(id).await?;

    Ok(Json(ApiResponse::empty()))
}
