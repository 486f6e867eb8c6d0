use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{
    api::{Envelope, MAX_REQUEST_BYTES},
    db::models::User,
    error::{AppError, Result},
    AppState,
};

const INVALID_SESSION: &str = "Invalid or expired session token";

/// The caller resolved by [`session_gate`].
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

/// Every API endpoint is POST only, and that is checked before anything else.
pub async fn require_post(request: Request, next: Next) -> Response {
    if request.method() != Method::POST {
        return AppError::MethodNotAllowed.into_response();
    }
    next.run(request).await
}

/// Resolve the envelope's `username`/`token` pair to a live session, or
/// reject the request with 401. The body is buffered so the handler can
/// still decode it.
pub async fn session_gate(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_REQUEST_BYTES)
        .await
        .map_err(|_| AppError::BadRequest("Could not read request body".to_string()))?;
    let envelope = Envelope::parse(&bytes)?;

    let invalid = || AppError::Unauthorized(INVALID_SESSION.to_string());
    if envelope.username.is_empty() || envelope.token.is_empty() {
        return Err(invalid());
    }

    let user = state
        .users
        .fetch(&envelope.username)
        .await?
        .ok_or_else(invalid)?;
    if !state.sessions.validate(&user.username, &envelope.token).await? {
        return Err(invalid());
    }

    let mut request = Request::from_parts(parts, Body::from(bytes));
    request.extensions_mut().insert(AuthUser {
        user,
        token: envelope.token,
    });

    Ok(next.run(request).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized(INVALID_SESSION.to_string()))
    }
}
