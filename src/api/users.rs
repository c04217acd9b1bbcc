use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{error_detail, error_reason, internal_error, ApiError};
use crate::auth::{current_user, hash_password, validate_password, UserRequirements};
use crate::db;
use crate::models::{User, UserRead, UserUpdate};
use crate::state::AppState;

/// Requirements of the `/users/me` routes
fn self_requirements(state: &AppState) -> UserRequirements {
    UserRequirements::active().verified(state.config.auth.users_require_verification)
}

/// Apply `update` to `user` and persist it / 应用更新并保存
///
/// A changed email drops the verified flag; a new password is validated and hashed.
async fn apply_update(state: &AppState, user: &mut User, update: UserUpdate) -> Result<(), ApiError> {
    if let Some(email) = update.email.map(|e| e.trim().to_string()) {
        if !email.eq_ignore_ascii_case(&user.email) {
            if !super::auth::is_valid_email(&email) {
                return Err(error_detail(StatusCode::UNPROCESSABLE_ENTITY, "INVALID_EMAIL"));
            }
            if db::find_user_by_email(&state.db, &email)
                .await
                .map_err(internal_error)?
                .is_some()
            {
                return Err(error_detail(StatusCode::BAD_REQUEST, "UPDATE_USER_EMAIL_ALREADY_EXISTS"));
            }
            user.email = email;
            user.is_verified = false;
        }
    }

    if let Some(password) = update.password {
        if let Err(reason) = validate_password(&password, &user.email) {
            return Err(error_reason(StatusCode::BAD_REQUEST, "UPDATE_USER_INVALID_PASSWORD", reason));
        }
        user.hashed_password = hash_password(&password, state.config.auth.bcrypt_cost).map_err(internal_error)?;
    }

    if let Some(active) = update.is_active {
        user.is_active = active;
    }
    if let Some(superuser) = update.is_superuser {
        user.is_superuser = superuser;
    }
    if let Some(verified) = update.is_verified {
        user.is_verified = verified;
    }

    db::save_user(&state.db, user).await.map_err(|e| {
        if db::is_unique_violation(&e) {
            error_detail(StatusCode::BAD_REQUEST, "UPDATE_USER_EMAIL_ALREADY_EXISTS")
        } else {
            internal_error(e)
        }
    })
}

/// Load the target of an admin route; malformed ids are simply not found
async fn load_user(state: &AppState, id: &str) -> Result<User, ApiError> {
    let not_found = || error_detail(StatusCode::NOT_FOUND, "Not Found");
    if Uuid::parse_str(id).is_err() {
        return Err(not_found());
    }
    db::find_user_by_id(&state.db, id)
        .await
        .map_err(internal_error)?
        .ok_or_else(not_found)
}

/// GET /auth/users/me - 获取当前用户
pub async fn get_me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<UserRead>, ApiError> {
    let user = current_user(&headers, &state, self_requirements(&state)).await?;
    Ok(Json(UserRead::from(user)))
}

/// PATCH /auth/users/me - 更新当前用户
pub async fn update_me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(update): Json<UserUpdate>,
) -> Result<Json<UserRead>, ApiError> {
    let mut user = current_user(&headers, &state, self_requirements(&state)).await?;
    apply_update(&state, &mut user, update.into_safe()).await?;
    tracing::info!("User {} has been updated", user.id);
    Ok(Json(UserRead::from(user)))
}

/// GET /auth/users/:id (superuser)
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<UserRead>, ApiError> {
    current_user(&headers, &state, self_requirements(&state).superuser()).await?;
    let user = load_user(&state, &id).await?;
    Ok(Json(UserRead::from(user)))
}

/// PATCH /auth/users/:id (superuser)
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(update): Json<UserUpdate>,
) -> Result<Json<UserRead>, ApiError> {
    let admin = current_user(&headers, &state, self_requirements(&state).superuser()).await?;
    let mut user = load_user(&state, &id).await?;
    apply_update(&state, &mut user, update).await?;
    tracing::info!("User {} updated by {}", user.id, admin.id);
    Ok(Json(UserRead::from(user)))
}

/// DELETE /auth/users/:id (superuser)
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let admin = current_user(&headers, &state, self_requirements(&state).superuser()).await?;
    let user = load_user(&state, &id).await?;
    db::delete_user(&state.db, &user.id).await.map_err(internal_error)?;
    tracing::info!("User {} deleted by {}", user.id, admin.id);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::*;
    use axum::http::StatusCode;
    use serde_json::json;

    async fn promote(state: &std::sync::Arc<crate::state::AppState>, id: &str) {
        let mut user = crate::db::find_user_by_id(&state.db, id).await.unwrap().unwrap();
        user.is_superuser = true;
        crate::db::save_user(&state.db, &mut user).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_me() {
        let state = test_state().await;
        let (id, token) = verified_user(&state, "me@player.com", "test1").await;

        let (status, body) = send(&state, bare_request("GET", "/auth/users/me", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], id.as_str());
        assert_eq!(body["email"], "me@player.com");

        let (status, _) = send(&state, bare_request("GET", "/auth/users/me", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unverified_user_is_forbidden() {
        let state = test_state().await;
        send(&state, json_request("POST", "/auth/register", None, json!({"email": "new@player.com", "password": "test1"}))).await;
        let (_, body) = send(&state, login_request("new@player.com", "test1")).await;
        let token = body["access_token"].as_str().unwrap().to_string();

        let (status, _) = send(&state, bare_request("GET", "/auth/users/me", Some(&token))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_other_user_info_is_forbidden() {
        let state = test_state().await;
        let (_, token) = verified_user(&state, "a@player.com", "test1").await;
        let (other_id, _) = verified_user(&state, "b@player.com", "test1").await;

        let (status, _) = send(&state, bare_request("GET", &format!("/auth/users/{}", other_id), Some(&token))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_update_me_ignores_privileged_fields() {
        let state = test_state().await;
        let (_, token) = verified_user(&state, "me@player.com", "test1").await;

        let (status, body) = send(
            &state,
            json_request("PATCH", "/auth/users/me", Some(&token), json!({"is_superuser": true, "password": "test2"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_superuser"], false);

        let (status, _) = send(&state, login_request("me@player.com", "test2")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_update_me_email() {
        let state = test_state().await;
        let (_, token) = verified_user(&state, "me@player.com", "test1").await;
        verified_user(&state, "taken@player.com", "test1").await;

        let (status, body) = send(
            &state,
            json_request("PATCH", "/auth/users/me", Some(&token), json!({"email": "taken@player.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "UPDATE_USER_EMAIL_ALREADY_EXISTS");

        let (status, body) = send(
            &state,
            json_request("PATCH", "/auth/users/me", Some(&token), json!({"email": "fresh@player.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "fresh@player.com");
        assert_eq!(body["is_verified"], false);
    }

    #[tokio::test]
    async fn test_superuser_manages_users() {
        let state = test_state().await;
        let (admin_id, admin_token) = verified_user(&state, "admin@player.com", "test1").await;
        promote(&state, &admin_id).await;
        let (user_id, _) = verified_user(&state, "user@player.com", "test1").await;

        let uri = format!("/auth/users/{}", user_id);
        let (status, body) = send(&state, bare_request("GET", &uri, Some(&admin_token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "user@player.com");

        let (status, body) = send(&state, json_request("PATCH", &uri, Some(&admin_token), json!({"is_active": false}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_active"], false);

        let (status, _) = send(&state, bare_request("DELETE", &uri, Some(&admin_token))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&state, bare_request("GET", &uri, Some(&admin_token))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&state, bare_request("GET", "/auth/users/not-a-uuid", Some(&admin_token))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
