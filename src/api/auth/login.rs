use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Form, Json,
};
use std::sync::Arc;

use crate::api::{error_detail, internal_error, ApiError};
use crate::auth::{current_user, encode_token, verify_password, Claims, UserRequirements, AUTH_AUDIENCE};
use crate::db;
use crate::state::AppState;
use super::types::*;

/// POST /auth/jwt/login - 登录并签发访问令牌
pub async fn login(
    State(state): State<Arc<AppState>>,
    Form(req): Form<LoginRequest>,
) -> Result<Json<BearerResponse>, ApiError> {
    let bad_credentials = || error_detail(StatusCode::BAD_REQUEST, "LOGIN_BAD_CREDENTIALS");

    let user = db::find_user_by_email(&state.db, &req.username)
        .await
        .map_err(internal_error)?
        .ok_or_else(bad_credentials)?;

    if !verify_password(&req.password, &user.hashed_password) || !user.is_active {
        tracing::debug!("Login rejected for {}", req.username);
        return Err(bad_credentials());
    }

    let claims = Claims::new(&user.id, AUTH_AUDIENCE, state.config.auth.jwt_lifetime);
    let access_token = encode_token(&claims, &state.config.auth.secret).map_err(internal_error)?;

    tracing::info!("User {} logged in", user.id);
    Ok(Json(BearerResponse {
        access_token,
        token_type: "bearer".to_string(),
    }))
}

/// POST /auth/jwt/logout
///
/// A JWT cannot be revoked, it stays valid until it expires. The route only
/// checks the caller is authenticated.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let user = current_user(&headers, &state, UserRequirements::active()).await?;
    tracing::info!("User {} logged out", user.id);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_login_flow() {
        let state = test_state().await;
        send(&state, json_request("POST", "/auth/register", None, json!({"email": "a@b.com", "password": "test1"}))).await;

        let (status, body) = send(&state, login_request("a@b.com", "test1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["token_type"], "bearer");
        let token = body["access_token"].as_str().unwrap().to_string();

        let (status, _) = send(&state, bare_request("POST", "/auth/jwt/logout", Some(&token))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_login_bad_credentials() {
        let state = test_state().await;
        send(&state, json_request("POST", "/auth/register", None, json!({"email": "a@b.com", "password": "test1"}))).await;

        let (status, body) = send(&state, login_request("a@b.com", "test2")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "LOGIN_BAD_CREDENTIALS");

        let (status, body) = send(&state, login_request("wrong_username", "test1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "LOGIN_BAD_CREDENTIALS");
    }

    #[tokio::test]
    async fn test_inactive_user_cannot_login() {
        let state = test_state().await;
        let (_, body) = send(&state, json_request("POST", "/auth/register", None, json!({"email": "a@b.com", "password": "test1"}))).await;
        let id = body["id"].as_str().unwrap();

        let mut user = crate::db::find_user_by_id(&state.db, id).await.unwrap().unwrap();
        user.is_active = false;
        crate::db::save_user(&state.db, &mut user).await.unwrap();

        let (status, _) = send(&state, login_request("a@b.com", "test1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_logout_requires_token() {
        let state = test_state().await;
        let (status, _) = send(&state, bare_request("POST", "/auth/jwt/logout", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&state, bare_request("POST", "/auth/jwt/logout", Some("garbage"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
