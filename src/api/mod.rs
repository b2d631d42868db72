pub mod messages;

use axum::{Json, Router, routing::get};
use serde_json::json;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::database::DbPool;
use crate::utils::helpers::now_timestamp;
use crate::utils::jwt::JwtService;
use crate::websocket::rooms::RoomRegistry;

pub struct AppState {
    pub db: DbPool,
    pub jwt_service: Arc<JwtService>,
    pub rooms: Arc<RoomRegistry>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(db: DbPool, config: AppConfig) -> Self {
        Self {
            db,
            jwt_service: Arc::new(JwtService::new(&config.secret_key)),
            rooms: Arc::new(RoomRegistry::new()),
            config: Arc::new(config),
        }
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "OK",
        "timestamp": now_timestamp(),
    }))
}

pub fn routes(state: Arc<AppState>) -> Router {
    let ws_route = Router::new()
        .route(
            "/ws",
            axum::routing::get(crate::websocket::handlers::ws_handler),
        )
        .with_state(state.clone());

    let protected_routes = Router::new()
        .nest("/messages", messages::routes(state.clone()))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::auth::auth_middleware,
        ));

    Router::new()
        .merge(ws_route)
        .route("/health", get(health_check))
        .merge(protected_routes)
}
