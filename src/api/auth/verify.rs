use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::{error_detail, internal_error, ApiError};
use crate::auth::{decode_token, encode_token, Claims, VERIFY_USER_AUDIENCE};
use crate::db;
use crate::state::AppState;
use sc2sentry_backend::models::{User, UserRead};
use super::types::*;

fn on_after_request_verify(user: &User, token: &str) {
    tracing::info!("Verification requested for user {}. Verification token: {}", user.id, token);
}

/// POST /auth/request-verify-token - 申请邮箱验证令牌
///
/// 202 whether or not a token was issued.
pub async fn request_verify_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VerifyTokenRequest>,
) -> Result<StatusCode, ApiError> {
    let user = db::find_user_by_email(&state.db, req.email.trim())
        .await
        .map_err(internal_error)?;

    if let Some(user) = user.filter(|u| u.is_active && !u.is_verified) {
        let mut claims = Claims::new(
            &user.id,
            VERIFY_USER_AUDIENCE,
            state.config.auth.verification_token_lifetime,
        );
        claims.email = Some(user.email.clone());
        let token = encode_token(&claims, &state.config.auth.secret).map_err(internal_error)?;
        on_after_request_verify(&user, &token);
    }

    Ok(StatusCode::ACCEPTED)
}

/// POST /auth/verify - 验证邮箱
pub async fn verify(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<UserRead>, ApiError> {
    let bad_token = || error_detail(StatusCode::BAD_REQUEST, "VERIFY_USER_BAD_TOKEN");

    let claims = decode_token(&req.token, &state.config.auth.secret, VERIFY_USER_AUDIENCE)
        .map_err(|_| bad_token())?;
    let email = claims.email.as_deref().ok_or_else(bad_token)?;

    // 令牌中的邮箱必须仍属于同一用户
    let mut user = db::find_user_by_email(&state.db, email)
        .await
        .map_err(internal_error)?
        .ok_or_else(bad_token)?;
    if user.id != claims.sub {
        return Err(bad_token());
    }

    if user.is_verified {
        return Err(error_detail(StatusCode::BAD_REQUEST, "VERIFY_USER_ALREADY_VERIFIED"));
    }

    user.is_verified = true;
    db::save_user(&state.db, &mut user).await.map_err(internal_error)?;

    tracing::info!("User {} has been verified", user.id);
    Ok(Json(UserRead::from(user)))
}
