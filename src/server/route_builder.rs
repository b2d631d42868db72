use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{Method, header},
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::api::AppState;
use crate::config::AppConfig;
use crate::database;

/// Request bodies only ever carry one message.
const MAX_BODY_BYTES: usize = 64 * 1024;

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = if state.config.cors_allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
    } else {
        CorsLayer::new()
    };

    Router::new()
        .nest("/api", crate::api::routes(state))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub async fn register_routes(config: AppConfig) -> anyhow::Result<Router> {
    let db = database::create_pool(&config.database_url, config.database_max_connections).await?;

    tracing::info!("Database connected and migrations applied");

    let state = Arc::new(AppState::new(db, config));
    Ok(build_router(state))
}
