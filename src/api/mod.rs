pub mod auth;
pub mod server;
pub mod users;

use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Handler error: status plus `{"detail": ...}` body / 接口错误
pub type ApiError = (StatusCode, Json<Value>);

pub fn error_detail(status: StatusCode, detail: &str) -> ApiError {
    (status, Json(json!({ "detail": detail })))
}

/// Error with a machine code and a human reason, e.g. password validation
pub fn error_reason(status: StatusCode, code: &str, reason: &str) -> ApiError {
    (status, Json(json!({ "detail": { "code": code, "reason": reason } })))
}

pub fn internal_error(e: impl std::fmt::Display) -> ApiError {
    tracing::error!("Internal error: {}", e);
    error_detail(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
}

/// Build the HTTP router / 构建路由
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(server::health_check))
        .route("/auth/jwt/login", post(auth::login))
        .route("/auth/jwt/logout", post(auth::logout))
        .route("/auth/register", post(auth::register))
        .route("/auth/forgot-password", post(auth::forgot_password))
        .route("/auth/reset-password", post(auth::reset_password))
        .route("/auth/request-verify-token", post(auth::request_verify_token))
        .route("/auth/verify", post(auth::verify))
        .route("/auth/users/me", get(users::get_me).patch(users::update_me))
        .route(
            "/auth/users/:id",
            get(users::get_user)
                .patch(users::update_user)
                .delete(users::delete_user),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
