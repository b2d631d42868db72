#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use shram_messaging::api::AppState;
use shram_messaging::config::AppConfig;
use shram_messaging::database::{DbPool, create_pool};
use shram_messaging::server::build_router;

pub const T0: &str = "2026-01-01T00:00:00.000000Z";

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
}

impl TestApp {
    pub async fn new() -> Self {
        let db = create_pool("sqlite::memory:", 1)
            .await
            .expect("in-memory pool");
        let state = Arc::new(AppState::new(db, AppConfig::for_tests("test-secret")));
        Self {
            router: build_router(state.clone()),
            state,
        }
    }

    pub fn db(&self) -> &DbPool {
        &self.state.db
    }

    pub fn token(&self, user_id: &str) -> String {
        self.state
            .jwt_service
            .generate_token(user_id)
            .expect("token")
    }

    pub async fn get(&self, uri: &str, user_id: Option<&str>) -> (StatusCode, Value) {
        let mut request = Request::builder().method("GET").uri(uri);
        if let Some(user_id) = user_id {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", self.token(user_id)));
        }
        self.call(request.body(Body::empty()).unwrap()).await
    }

    pub async fn post(&self, uri: &str, user_id: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token(user_id)))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.call(request).await
    }

    async fn call(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn add_user(&self, id: &str, full_name: &str) {
        sqlx::query(
            "INSERT INTO users (id, email, stakeholder_type, full_name, created_at)
             VALUES (?, ?, 'individual', ?, ?)",
        )
        .bind(id)
        .bind(format!("{}@example.org", id))
        .bind(full_name)
        .bind(T0)
        .execute(self.db().as_ref())
        .await
        .unwrap();
    }

    pub async fn connect(&self, a: &str, b: &str) {
        sqlx::query(
            "INSERT INTO connections (requester_id, recipient_id, status, created_at)
             VALUES (?, ?, 'accepted', ?)",
        )
        .bind(a)
        .bind(b)
        .bind(T0)
        .execute(self.db().as_ref())
        .await
        .unwrap();
    }

    pub async fn add_community(&self, id: &str, name: &str, members: &[&str]) {
        sqlx::query(
            "INSERT INTO communities (id, name, description, sdg, creator_id, created_at)
             VALUES (?, ?, '', NULL, ?, ?)",
        )
        .bind(id)
        .bind(name)
        .bind(members[0])
        .bind(T0)
        .execute(self.db().as_ref())
        .await
        .unwrap();

        for member in members {
            sqlx::query(
                "INSERT INTO community_members (community_id, user_id, joined_at) VALUES (?, ?, ?)",
            )
            .bind(id)
            .bind(member)
            .bind(T0)
            .execute(self.db().as_ref())
            .await
            .unwrap();
        }
    }
}

/// Users `a`, `b`, `c`, `x`; `a` and `b` connected; community `g` with
/// members `a`, `b`, `c`.
pub async fn seeded_app() -> TestApp {
    let app = TestApp::new().await;
    for (id, name) in [("a", "Asha"), ("b", "Bilal"), ("c", "Chen"), ("x", "Xavier")] {
        app.add_user(id, name).await;
    }
    app.connect("a", "b").await;
    app.add_community("g", "Clean Water", &["a", "b", "c"]).await;
    app
}
