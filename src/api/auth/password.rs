use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use serde_json::Value;
use std::sync::Arc;

use crate::api::{error_detail, error_reason, internal_error, ApiError};
use crate::auth::{
    decode_token, encode_token, hash_password, password_fingerprint, validate_password, Claims,
    RESET_PASSWORD_AUDIENCE,
};
use crate::db;
use crate::state::AppState;
use sc2sentry_backend::models::User;
use super::types::*;

/// Hook run once a reset token exists. Nothing is mailed: the token is logged.
fn on_after_forgot_password(user: &User, token: &str) {
    tracing::info!("User {} has forgot their password. Reset token: {}", user.id, token);
}

/// POST /auth/forgot-password - 申请密码重置令牌
///
/// Always 202, so the response does not reveal whether the account exists.
pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ForgotPasswordRequest>,
) -> Result<StatusCode, ApiError> {
    let user = db::find_user_by_email(&state.db, req.email.trim())
        .await
        .map_err(internal_error)?;

    if let Some(user) = user.filter(|u| u.is_active) {
        let mut claims = Claims::new(
            &user.id,
            RESET_PASSWORD_AUDIENCE,
            state.config.auth.reset_password_token_lifetime,
        );
        claims.password_fgpt = Some(password_fingerprint(&user.hashed_password));
        let token = encode_token(&claims, &state.config.auth.secret).map_err(internal_error)?;
        on_after_forgot_password(&user, &token);
    }

    Ok(StatusCode::ACCEPTED)
}

/// POST /auth/reset-password - 使用令牌重置密码
pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<Value>, ApiError> {
    let bad_token = || error_detail(StatusCode::BAD_REQUEST, "RESET_PASSWORD_BAD_TOKEN");

    let claims = decode_token(&req.token, &state.config.auth.secret, RESET_PASSWORD_AUDIENCE)
        .map_err(|_| bad_token())?;

    let mut user = db::find_user_by_id(&state.db, &claims.sub)
        .await
        .map_err(internal_error)?
        .ok_or_else(bad_token)?;

    // 令牌签发后密码已变更则失效
    if claims.password_fgpt.as_deref() != Some(password_fingerprint(&user.hashed_password).as_str()) {
        return Err(bad_token());
    }
    if !user.is_active {
        return Err(bad_token());
    }

    if let Err(reason) = validate_password(&req.password, &user.email) {
        return Err(error_reason(StatusCode::BAD_REQUEST, "RESET_PASSWORD_INVALID_PASSWORD", reason));
    }

    user.hashed_password = hash_password(&req.password, state.config.auth.bcrypt_cost).map_err(internal_error)?;
    db::save_user(&state.db, &mut user).await.map_err(internal_error)?;

    tracing::info!("User {} has reset their password", user.id);
    Ok(Json(Value::Null))
}
