use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::{
    api::{ApiData, ApiResponse},
    db::models::User,
    error::{AppError, Result},
    middleware::auth::AuthUser,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/profile", post(get_profile))
        .route("/profile/update", post(update_profile))
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileRequest {
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user: User,
}

async fn get_profile(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiData(body): ApiData<ProfileRequest>,
) -> Result<Json<ApiResponse<ProfileResponse>>> {
    let username = body
        .username
        .filter(|u| !u.trim().is_empty())
        .unwrap_or(auth.user.username);

    let user = state
        .users
        .fetch(&username)
        .await?
        .ok_or_else(|| AppError::NotFound("No such user".to_string()))?;

    Ok(Json(ApiResponse::ok(ProfileResponse { user })))
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::conflict(field))
}

async fn update_profile(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiData(body): ApiData<UpdateProfileRequest>,
) -> Result<Json<ApiResponse>> {
    let user = User {
        username: auth.user.username,
        display_name: required(body.display_name, "displayName")?,
        email: required(body.email, "email")?,
    };

    state.users.update(&user).await?;

    Ok(Json(ApiResponse::empty()))
}
