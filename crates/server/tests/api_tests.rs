use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use summa_server::{
    build_router,
    config::Config,
    db::{models::User, Database},
    services::{auth::Authenticator, clock::SystemClock, storage::StorageService},
    AppState,
};

/// Accepts any known user whose password is "secret".
struct StaticAuthenticator;

impl Authenticator for StaticAuthenticator {
    fn authenticate(&self, username: &str, password: &str) -> Option<User> {
        if password != "secret" || !matches!(username, "alice" | "bob") {
            return None;
        }
        Some(User {
            username: username.to_string(),
            display_name: format!("{username} display"),
            email: if username == "alice" {
                "alice@example.com".to_string()
            } else {
                String::new()
            },
        })
    }
}

struct TestApp {
    _dir: tempfile::TempDir,
    router: Router,
}

async fn setup() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        database_url: format!("sqlite:{}?mode=rwc", dir.path().join("summa.db").display()),
        git_root: dir.path().join("git").display().to_string(),
        web_root: dir.path().join("web").display().to_string(),
        ..Config::default()
    };

    let db = Database::connect(&config.database_url).await.unwrap();
    db.run_migrations().await.unwrap();
    let storage = StorageService::new(&config.git_root);
    storage.init().unwrap();

    let state = AppState::new(
        db,
        config,
        storage,
        Arc::new(SystemClock),
        Arc::new(StaticAuthenticator),
    );

    TestApp {
        _dir: dir,
        router: build_router(state),
    }
}

impl TestApp {
    async fn send(&self, method: &str, path: &str, body: String) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.send("POST", path, body.to_string()).await
    }

    async fn sign_in(&self, username: &str) -> Session {
        let (status, json) = self
            .post(
                "/api/auth/signin",
                json!({"username": username, "password": "secret"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{json}");
        Session {
            username: username.to_string(),
            token: json["token"].as_str().unwrap().to_string(),
        }
    }

    async fn call(&self, session: &Session, path: &str, data: Value) -> (StatusCode, Value) {
        self.post(
            path,
            json!({"username": session.username, "token": session.token, "data": data}),
        )
        .await
    }

    async fn create_snippet(&self, session: &Session, description: &str) -> String {
        let (status, json) = self
            .call(
                session,
                "/api/snippet/create",
                json!({
                    "description": description,
                    "files": [{"filename": "main.go", "language": "go", "contents": "package main"}],
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{json}");
        json["data"]["id"].as_str().unwrap().to_string()
    }
}

struct Session {
    username: String,
    token: String,
}

fn ids(json: &Value) -> Vec<String> {
    json["data"]["snippets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_create_fetch_delete_round_trip() {
    let app = setup().await;
    let alice = app.sign_in("alice").await;

    let id = app.create_snippet(&alice, "hello").await;
    assert!((2..=12).contains(&id.len()), "unexpected id {id}");

    let (status, json) = app.call(&alice, "/api/snippet", json!({"id": id})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    let files = json["data"]["snippet"]["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["filename"], "main.go");
    assert_eq!(files[0]["contents"], "package main");
    assert_eq!(json["data"]["snippet"]["displayName"], "alice display");
    assert_eq!(json["data"]["snippet"]["revisions"].as_array().unwrap().len(), 1);

    let (status, _) = app.call(&alice, "/api/snippet/delete", json!({"id": id})).await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = app.call(&alice, "/api/snippet", json!({"id": id})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["status"], "error");
}

#[tokio::test]
async fn test_sign_in_reports_missing_email() {
    let app = setup().await;

    let (status, json) = app
        .post(
            "/api/auth/signin",
            json!({"username": "bob", "password": "secret"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["needEmail"], true);
    assert_eq!(json["data"]["user"]["username"], "bob");
    assert_eq!(json["token"].as_str().unwrap().len(), 64);

    let (status, json) = app
        .post(
            "/api/auth/signin",
            json!({"username": "bob", "password": "wrong"}),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "Invalid authorization credentials");
}

#[tokio::test]
async fn test_requests_without_live_session_are_rejected() {
    let app = setup().await;
    let alice = app.sign_in("alice").await;

    let forged = Session {
        username: "alice".to_string(),
        token: "0".repeat(64),
    };
    let (status, json) = app.call(&forged, "/api/snippets/unread", json!({})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "Invalid or expired session token");

    let stranger = Session {
        username: "mallory".to_string(),
        token: alice.token.clone(),
    };
    let (status, _) = app.call(&stranger, "/api/snippets/unread", json!({})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.call(&alice, "/api/auth/signout", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.call(&alice, "/api/snippets/unread", json!({})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_method_is_checked_before_routing() {
    let app = setup().await;

    let (status, json) = app.send("GET", "/api/snippet", String::new()).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(json["status"], "error");

    let (status, _) = app.send("GET", "/api/no/such/endpoint", String::new()).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    let (status, json) = app.post("/api/no/such/endpoint", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "Invalid API endpoint");
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let app = setup().await;

    let (status, json) = app.send("POST", "/api/auth/signin", "{oops".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Malformed JSON request data");

    let (status, _) = app.send("POST", "/api/snippets", "{oops".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_files_name_the_conflicting_field() {
    let app = setup().await;
    let alice = app.sign_in("alice").await;

    let (status, json) = app
        .call(
            &alice,
            "/api/snippet/create",
            json!({
                "description": "bad",
                "files": [
                    {"filename": "ok.go", "language": "go", "contents": "x"},
                    {"filename": "../escape", "language": "go", "contents": "x"},
                ],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["data"]["field"], "file[1].filename");

    let (status, json) = app
        .call(
            &alice,
            "/api/snippet/create",
            json!({
                "description": "shadows the repository",
                "files": [{"filename": ".git", "language": "text", "contents": "x"}],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["data"]["field"], "file[0].filename");

    let (status, json) = app
        .call(&alice, "/api/snippet/create", json!({"description": "no files"}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["data"]["field"], "files");

    let (status, json) = app.call(&alice, "/api/snippets", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(ids(&json).is_empty());
}

#[tokio::test]
async fn test_only_the_owner_may_modify_a_snippet() {
    let app = setup().await;
    let alice = app.sign_in("alice").await;
    let bob = app.sign_in("bob").await;
    let id = app.create_snippet(&alice, "mine").await;

    let update = json!({
        "id": id,
        "description": "stolen",
        "files": [{"filename": "x.txt", "language": "text", "contents": "x"}],
    });
    let (status, _) = app.call(&bob, "/api/snippet/update", update.clone()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.call(&bob, "/api/snippet/delete", json!({"id": id})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.call(&bob, "/api/snippet/delete", json!({"id": "ZZZZZZ"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = app
        .call(
            &alice,
            "/api/snippet/update",
            json!({
                "id": id,
                "description": "mine",
                "files": [{"filename": ".Git", "language": "text", "contents": "x"}],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["data"]["field"], "file[0].filename");
    let (_, json) = app.call(&alice, "/api/snippet", json!({"id": id})).await;
    assert_eq!(json["data"]["snippet"]["files"][0]["filename"], "main.go");

    let (status, json) = app.call(&alice, "/api/snippet/update", update).await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["data"]["snippet"]["description"], "stolen");
    let files = json["data"]["snippet"]["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["filename"], "x.txt");
}

#[tokio::test]
async fn test_unread_feed_follows_changes() {
    let app = setup().await;
    let alice = app.sign_in("alice").await;
    let bob = app.sign_in("bob").await;
    let id = app.create_snippet(&alice, "news").await;

    let (_, json) = app.call(&alice, "/api/snippets/unread", json!({})).await;
    assert!(ids(&json).is_empty());
    let (_, json) = app.call(&bob, "/api/snippets/unread", json!({})).await;
    assert_eq!(ids(&json), vec![id.clone()]);

    let (status, _) = app
        .call(&bob, "/api/snippet", json!({"id": id, "markRead": "yes"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, json) = app.call(&bob, "/api/snippets/unread", json!({})).await;
    assert!(ids(&json).is_empty());

    let (status, json) = app
        .call(
            &alice,
            "/api/comment/create",
            json!({"snippet_id": id, "message": "updated notes"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["data"]["comment"]["html"], "<p>updated notes</p>\n");

    let (_, json) = app.call(&bob, "/api/snippets/unread", json!({})).await;
    assert_eq!(ids(&json), vec![id.clone()]);
    let (_, json) = app.call(&alice, "/api/snippets/unread", json!({})).await;
    assert!(ids(&json).is_empty());
}

#[tokio::test]
async fn test_comment_permissions() {
    let app = setup().await;
    let alice = app.sign_in("alice").await;
    let bob = app.sign_in("bob").await;
    let id = app.create_snippet(&alice, "discuss").await;

    let (status, _) = app
        .call(
            &bob,
            "/api/comment/create",
            json!({"snippet_id": "ZZZZZZ", "message": "hello"}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = app
        .call(&bob, "/api/comment/create", json!({"snippet_id": id, "message": "  "}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["data"]["field"], "message");

    let (_, json) = app
        .call(&bob, "/api/comment/create", json!({"snippet_id": id, "message": "first"}))
        .await;
    let comment_id = json["data"]["comment"]["id"].as_i64().unwrap();

    let (status, _) = app
        .call(&alice, "/api/comment/update", json!({"id": comment_id, "message": "edited"}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app
        .call(&alice, "/api/comment/delete", json!({"id": comment_id.to_string()}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = app
        .call(&bob, "/api/comment/update", json!({"id": comment_id, "message": "edited"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["comment"]["markdown"], "edited");
    assert!(json["data"]["comment"]["updated"].as_i64().unwrap() > 0);

    let (status, _) = app
        .call(&bob, "/api/comment/delete", json!({"id": comment_id.to_string()}))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .call(&bob, "/api/comment/delete", json!({"id": comment_id}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, json) = app.call(&alice, "/api/snippet", json!({"id": id})).await;
    assert!(json["data"]["snippet"].get("comments").is_none());
}

#[tokio::test]
async fn test_listing_order_falls_back_silently() {
    let app = setup().await;
    let alice = app.sign_in("alice").await;
    let first = app.create_snippet(&alice, "first").await;
    let second = app.create_snippet(&alice, "second").await;

    let (status, json) = app
        .call(&alice, "/api/snippets", json!({"orderBy": "createdAsc"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    let listed = ids(&json);
    assert_eq!(listed.len(), 2);
    assert!(listed.contains(&first) && listed.contains(&second));
    assert_eq!(json["data"]["snippets"][0]["numFiles"], 1);

    let (status, json) = app
        .call(&alice, "/api/snippets", json!({"orderBy": "bogus", "limit": 1}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&json).len(), 1);

    let (status, json) = app
        .call(
            &alice,
            "/api/snippets/search",
            json!({"term": "SECOND", "orderBy": "descriptionDesc"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&json), vec![second]);

    let (status, json) = app
        .call(&alice, "/api/snippets/search", json!({"term": " "}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["data"]["field"], "term");
}

#[tokio::test]
async fn test_profile_lookup_and_update() {
    let app = setup().await;
    let alice = app.sign_in("alice").await;
    let bob = app.sign_in("bob").await;

    let (status, json) = app.call(&bob, "/api/profile", json!({"username": "alice"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["user"]["email"], "alice@example.com");

    let (status, _) = app.call(&bob, "/api/profile", json!({"username": "nobody"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = app
        .call(&bob, "/api/profile/update", json!({"displayName": "Bob", "email": " "}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["data"]["field"], "email");

    let (status, _) = app
        .call(
            &bob,
            "/api/profile/update",
            json!({"displayName": " Bob ", "email": "bob@example.com"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, json) = app.call(&alice, "/api/profile", json!({"username": "bob"})).await;
    assert_eq!(json["data"]["user"]["displayName"], "Bob");
    assert_eq!(json["data"]["user"]["email"], "bob@example.com");
}
