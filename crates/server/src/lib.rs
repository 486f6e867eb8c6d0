use std::sync::Arc;

use axum::{middleware as axum_middleware, Router};
use tower_http::{services::ServeDir, trace::TraceLayer};

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod services;

#[cfg(test)]
pub mod testutil;

use config::Config;
use db::Database;
use error::AppError;
use services::{
    auth::Authenticator, clock::Clock, comments::CommentStore, markdown::ParagraphRenderer,
    sessions::SessionManager, snippets::SnippetRepository, storage::StorageService,
    users::UserStore,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub users: UserStore,
    pub sessions: SessionManager,
    pub snippets: SnippetRepository,
    pub comments: CommentStore,
    pub authenticator: Arc<dyn Authenticator>,
}

impl AppState {
    pub fn new(
        db: Database,
        config: Config,
        storage: StorageService,
        clock: Arc<dyn Clock>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        let pool = db.pool;
        let comments = CommentStore::new(pool.clone(), clock.clone(), Arc::new(ParagraphRenderer));
        let snippets = SnippetRepository::new(
            pool.clone(),
            storage,
            clock.clone(),
            comments.clone(),
            config.snippets_limit_default,
            config.snippets_limit_max,
        );

        Self {
            users: UserStore::new(pool.clone()),
            sessions: SessionManager::new(pool, clock, config.session_ttl_ms),
            snippets,
            comments,
            authenticator,
            config,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    // Everything except sign-in needs a live session
    let protected_routes = Router::new()
        .merge(routes::auth::router())
        .merge(routes::profile::router())
        .merge(routes::snippet::router())
        .merge(routes::snippets::router())
        .merge(routes::comments::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::session_gate,
        ));

    let api_router = Router::new()
        .merge(routes::auth::public_router())
        .merge(protected_routes)
        .fallback(invalid_endpoint)
        .layer(axum_middleware::from_fn(middleware::auth::require_post));

    Router::new()
        .nest("/api", api_router)
        .fallback_service(ServeDir::new(&state.config.web_root))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn invalid_endpoint() -> AppError {
    AppError::NotFound("Invalid API endpoint".to_string())
}
