use axum::{Json, http::HeaderMap};
use serde::{Deserialize, Serialize};

use crate::utils::error::{AppError, AppResult};

/// Success envelope shared by every messaging endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

pub fn json_success<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data,
    })
}

pub fn extract_user_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(crate::middleware::auth::AUTH_USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Caller identity as stamped by the auth middleware.
pub fn require_user_id(headers: &HeaderMap) -> AppResult<String> {
    extract_user_id(headers).ok_or_else(|| AppError::Auth("Not authenticated".to_string()))
}

/// Current time in a fixed-width RFC 3339 form so stored timestamps sort
/// lexicographically.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
