use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::{
    api::{ApiData, ApiResponse},
    db::models::SnippetSummary,
    error::{AppError, Result},
    middleware::auth::AuthUser,
    services::snippets::SnippetOrder,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/snippets", post(list_snippets))
        .route("/snippets/search", post(search_snippets))
        .route("/snippets/unread", post(unread_snippets))
}

/// `start` and `limit` are plain JSON numbers; fractions are truncated.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequest {
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub limit: Option<f64>,
    #[serde(default)]
    pub order_by: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl ListRequest {
    /// `(start, limit)` for the repository, which applies the clamping.
    fn page(&self) -> (i64, i64) {
        (
            self.start.map_or(1, |s| s.trunc() as i64),
            self.limit.map_or(0, |l| l.trunc() as i64),
        )
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[serde(default)]
    pub term: Option<String>,
    #[serde(default)]
    pub order_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SnippetsResponse {
    pub snippets: Vec<SnippetSummary>,
}

async fn list_snippets(
    State(state): State<AppState>,
    _auth: AuthUser,
    ApiData(body): ApiData<ListRequest>,
) -> Result<Json<ApiResponse<SnippetsResponse>>> {
    let order = SnippetOrder::from_key(body.order_by.as_deref());
    let username = body.username.as_deref().map(str::trim).filter(|u| !u.is_empty());
    let (start, limit) = body.page();

    let snippets = state
        .snippets
        .list_paged(start, limit, order, username)
        .await?;

    Ok(Json(ApiResponse::ok(SnippetsResponse { snippets })))
}

async fn search_snippets(
    State(state): State<AppState>,
    _auth: AuthUser,
    ApiData(body): ApiData<SearchRequest>,
) -> Result<Json<ApiResponse<SnippetsResponse>>> {
    let term = body
        .term
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::conflict("term"))?;
    let order = SnippetOrder::from_key(body.order_by.as_deref());

    let snippets = state.snippets.search(term, order).await?;

    Ok(Json(ApiResponse::ok(SnippetsResponse { snippets })))
}

async fn unread_snippets(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<ApiResponse<SnippetsResponse>>> {
    let snippets = state.snippets.unread(&auth.user.username).await?;
    Ok(Json(ApiResponse::ok(SnippetsResponse { snippets })))
}
