//! Authentication helpers / 认证辅助
//!
//! Passwords are bcrypt hashes. Every token is an HS256 JWT signed with
//! `auth.secret`; the `aud` claim keeps login, reset and verification tokens
//! from being used in place of one another.

use axum::http::{header, HeaderMap, StatusCode};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::api::{error_detail, ApiError};
use crate::db;
use crate::state::AppState;
use sc2sentry_backend::models::User;

pub const AUTH_AUDIENCE: &str = "sc2sentry:auth";
pub const RESET_PASSWORD_AUDIENCE: &str = "sc2sentry:reset";
pub const VERIFY_USER_AUDIENCE: &str = "sc2sentry:verify";

/// JWT claims / JWT声明
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: String,
    pub aud: String,
    /// Expiration (Unix timestamp)
    pub exp: i64,
    /// Address being verified (verification tokens)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Fingerprint of the password hash at issue time (reset tokens)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_fgpt: Option<String>,
}

impl Claims {
    /// Huge lifetimes saturate at the largest timestamp instead of wrapping
    pub fn new(sub: &str, aud: &str, lifetime_secs: u64) -> Self {
        let lifetime = i64::try_from(lifetime_secs).unwrap_or(i64::MAX);
        Self {
            sub: sub.to_string(),
            aud: aud.to_string(),
            exp: Utc::now().timestamp().saturating_add(lifetime),
            email: None,
            password_fgpt: None,
        }
    }
}

pub fn encode_token(claims: &Claims, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Verify signature, expiry and audience / 校验签名、过期时间与受众
pub fn decode_token(token: &str, secret: &str, audience: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[audience]);
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)?;
    Ok(data.claims)
}

pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, cost)
}

/// Malformed hashes count as a mismatch
pub fn verify_password(password: &str, hashed: &str) -> bool {
    bcrypt::verify(password, hashed).unwrap_or(false)
}

/// Changes whenever the password does, which makes reset tokens single-use
pub fn password_fingerprint(hashed_password: &str) -> String {
    hex::encode(Sha256::digest(hashed_password.as_bytes()))
}

/// Password policy: reject empty passwords and passwords containing the account email / 密码校验
pub fn validate_password(password: &str, email: &str) -> Result<(), &'static str> {
    if password.is_empty() {
        return Err("Password should not be empty");
    }
    if !email.is_empty() && password.to_lowercase().contains(&email.to_lowercase()) {
        return Err("Password should not contain e-mail");
    }
    Ok(())
}

// 从 Authorization 头中提取 Bearer token
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim().to_string())
    } else {
        None
    }
}

/// What a route demands of the caller / 路由对当前用户的要求
#[derive(Debug, Clone, Copy, Default)]
pub struct UserRequirements {
    pub active: bool,
    pub verified: bool,
    pub superuser: bool,
}

impl UserRequirements {
    pub fn active() -> Self {
        Self {
            active: true,
            ..Self::default()
        }
    }

    pub fn verified(mut self, required: bool) -> Self {
        self.verified = required;
        self
    }

    pub fn superuser(mut self) -> Self {
        self.superuser = true;
        self
    }
}

/// Resolve the bearer token to a user / 获取当前用户
///
/// Missing/invalid token, unknown or (when required) inactive user → 401;
/// unverified or non-superuser when required → 403.
pub async fn current_user(
    headers: &HeaderMap,
    state: &AppState,
    requirements: UserRequirements,
) -> Result<User, ApiError> {
    let unauthorized = || error_detail(StatusCode::UNAUTHORIZED, "Unauthorized");

    let token = extract_bearer_token(headers).ok_or_else(unauthorized)?;
    let claims = decode_token(&token, &state.config.auth.secret, AUTH_AUDIENCE).map_err(|e| {
        tracing::debug!("Rejected access token: {}", e);
        unauthorized()
    })?;

    let user = db::find_user_by_id(&state.db, &claims.sub)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load user {}: {}", claims.sub, e);
            error_detail(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        })?
        .ok_or_else(unauthorized)?;

    if requirements.active && !user.is_active {
        return Err(unauthorized());
    }
    if requirements.verified && !user.is_verified {
        return Err(error_detail(StatusCode::FORBIDDEN, "Forbidden"));
    }
    if requirements.superuser && !user.is_superuser {
        return Err(error_detail(StatusCode::FORBIDDEN, "Forbidden"));
    }

    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "test-secret";

    #[test]
    fn test_token_round_trip() {
        let claims = Claims::new("user-1", AUTH_AUDIENCE, 3600);
        let token = encode_token(&claims, SECRET).unwrap();

        let decoded = decode_token(&token, SECRET, AUTH_AUDIENCE).unwrap();
        assert_eq!(decoded.sub, "user-1");
        assert!(decoded.email.is_none());
    }

    #[test]
    fn test_token_audience_and_secret_are_checked() {
        let token = encode_token(&Claims::new("user-1", RESET_PASSWORD_AUDIENCE, 3600), SECRET).unwrap();

        assert!(decode_token(&token, SECRET, AUTH_AUDIENCE).is_err());
        assert!(decode_token(&token, "other-secret", RESET_PASSWORD_AUDIENCE).is_err());
        assert!(decode_token(&token, SECRET, RESET_PASSWORD_AUDIENCE).is_ok());
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let mut claims = Claims::new("user-1", AUTH_AUDIENCE, 0);
        claims.exp = Utc::now().timestamp() - 3600;
        let token = encode_token(&claims, SECRET).unwrap();
        assert!(decode_token(&token, SECRET, AUTH_AUDIENCE).is_err());
    }

    #[test]
    fn test_huge_lifetime_saturates() {
        let claims = Claims::new("user-1", AUTH_AUDIENCE, u64::MAX);
        assert_eq!(claims.exp, i64::MAX);

        let claims = Claims::new("user-1", AUTH_AUDIENCE, i64::MAX as u64 - 1);
        assert_eq!(claims.exp, i64::MAX);
        assert!(Claims::new("user-1", AUTH_AUDIENCE, 60).exp > Utc::now().timestamp());
    }

    #[test]
    fn test_password_hashing() {
        let hashed = hash_password("test1", 4).unwrap();
        assert!(verify_password("test1", &hashed));
        assert!(!verify_password("test2", &hashed));
        assert!(!verify_password("test1", "not-a-bcrypt-hash"));
        assert_ne!(password_fingerprint(&hashed), password_fingerprint(&hash_password("test1", 4).unwrap()));
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("test1", "a@b.com").is_ok());
        assert!(validate_password("", "a@b.com").is_err());
        assert!(validate_password("xxA@B.comxx", "a@b.com").is_err());
    }

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(extract_bearer_token(&headers).as_deref(), Some("abc.def"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer "));
        assert_eq!(extract_bearer_token(&headers), None);
    }
}
