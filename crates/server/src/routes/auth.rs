use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;

use crate::{
    api::{ApiResponse, Envelope},
    db::models::User,
    error::{AppError, Result},
    middleware::auth::AuthUser,
    AppState,
};

/// Reachable without a session.
pub fn public_router() -> Router<AppState> {
    Router::new().route("/auth/signin", post(signin))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/auth/signout", post(signout))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInResponse {
    pub user: User,
    pub need_email: bool,
}

async fn signin(
    State(state): State<AppState>,
    envelope: Envelope,
) -> Result<Json<ApiResponse<SignInResponse>>> {
    let authenticator = state.authenticator.clone();
    let Envelope {
        username, password, ..
    } = envelope;
    let identity =
        tokio::task::spawn_blocking(move || authenticator.authenticate(&username, &password))
            .await?
            .ok_or_else(|| AppError::Unauthorized("Invalid authorization credentials".to_string()))?;

    if state.users.create_if_missing(&identity).await? {
        tracing::info!(username = %identity.username, "new user registered");
    }

    let user = state
        .users
        .fetch(&identity.username)
        .await?
        .ok_or_else(|| AppError::Internal(format!("user {} vanished", identity.username)))?;
    let token = state.sessions.issue(&user.username).await?;

    let need_email = user.email.trim().is_empty();
    Ok(Json(
        ApiResponse::ok(SignInResponse { user, need_email }).with_token(token),
    ))
}

async fn signout(State(state): State<AppState>, auth: AuthUser) -> Result<Json<ApiResponse>> {
    state
        .sessions
        .revoke(&auth.user.username, &auth.token)
        .await?;
    Ok(Json(ApiResponse::empty()))
}
