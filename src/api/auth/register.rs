use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::{error_detail, error_reason, internal_error, ApiError};
use crate::auth::{hash_password, validate_password};
use crate::db;
use crate::state::AppState;
use sc2sentry_backend::models::{UserCreate, UserRead};

/// Minimal shape check, the address is proven by the verify flow
pub fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

/// POST /auth/register - 注册新用户
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UserCreate>,
) -> Result<(StatusCode, Json<UserRead>), ApiError> {
    let email = req.email.trim();
    if !is_valid_email(email) {
        return Err(error_detail(StatusCode::UNPROCESSABLE_ENTITY, "INVALID_EMAIL"));
    }

    if let Err(reason) = validate_password(&req.password, email) {
        return Err(error_reason(StatusCode::BAD_REQUEST, "REGISTER_INVALID_PASSWORD", reason));
    }

    // 检查邮箱是否已存在
    if db::find_user_by_email(&state.db, email)
        .await
        .map_err(internal_error)?
        .is_some()
    {
        return Err(error_detail(StatusCode::BAD_REQUEST, "REGISTER_USER_ALREADY_EXISTS"));
    }

    let hashed = hash_password(&req.password, state.config.auth.bcrypt_cost).map_err(internal_error)?;
    // 并发注册同一邮箱时由唯一约束兜底
    let user = db::insert_user(&state.db, email, &hashed)
        .await
        .map_err(|e| {
            if db::is_unique_violation(&e) {
                error_detail(StatusCode::BAD_REQUEST, "REGISTER_USER_ALREADY_EXISTS")
            } else {
                internal_error(e)
            }
        })?;

    tracing::info!("User {} has registered", user.id);
    Ok((StatusCode::CREATED, Json(UserRead::from(user))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::*;
    use serde_json::json;

    #[test]
    fn test_is_valid_email() {
        assert!(is_valid_email("player@sc2.com"));
        assert!(!is_valid_email("wrong_username"));
        assert!(!is_valid_email("@sc2.com"));
        assert!(!is_valid_email("player@localhost"));
        assert!(!is_valid_email("pla yer@sc2.com"));
    }

    #[tokio::test]
    async fn test_register_and_duplicate() {
        let state = test_state().await;

        let (status, body) = send(
            &state,
            json_request("POST", "/auth/register", None, json!({"email": "new@player.com", "password": "test1"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["email"], "new@player.com");
        assert_eq!(body["is_active"], true);
        assert_eq!(body["is_verified"], false);
        assert_eq!(body["is_superuser"], false);
        assert!(body.get("hashed_password").is_none());

        let (status, body) = send(
            &state,
            json_request("POST", "/auth/register", None, json!({"email": "NEW@player.com", "password": "test1"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "REGISTER_USER_ALREADY_EXISTS");
    }

    #[tokio::test]
    async fn test_concurrent_registrations_yield_one_account() {
        let state = test_state().await;
        let body = json!({"email": "race@player.com", "password": "test1"});

        let (first, second) = tokio::join!(
            send(&state, json_request("POST", "/auth/register", None, body.clone())),
            send(&state, json_request("POST", "/auth/register", None, body.clone())),
        );

        let mut statuses = vec![first.0, second.0];
        statuses.sort();
        assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::BAD_REQUEST]);
        let rejected = if first.0 == StatusCode::BAD_REQUEST { first.1 } else { second.1 };
        assert_eq!(rejected["detail"], "REGISTER_USER_ALREADY_EXISTS");
    }

    #[tokio::test]
    async fn test_register_cannot_grant_superuser() {
        let state = test_state().await;
        let (status, body) = send(
            &state,
            json_request(
                "POST",
                "/auth/register",
                None,
                json!({"email": "sneaky@player.com", "password": "test1", "is_superuser": true}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["is_superuser"], false);
    }

    #[tokio::test]
    async fn test_register_rejects_bad_input() {
        let state = test_state().await;

        let (status, body) = send(
            &state,
            json_request("POST", "/auth/register", None, json!({"email": "me@player.com", "password": "me@player.com!"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"]["code"], "REGISTER_INVALID_PASSWORD");

        let (status, _) = send(
            &state,
            json_request("POST", "/auth/register", None, json!({"email": "not-an-email", "password": "test1"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
