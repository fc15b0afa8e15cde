//! Supabase access token authentication.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

/// Audience Supabase puts on tokens of signed-in users.
pub const SUPABASE_AUDIENCE: &str = "authenticated";

/// Decoded Supabase access token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupabaseClaims {
    /// User ID
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    pub exp: i64,
}

/// Authenticated user extracted from request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: String,
    pub email: Option<String>,
}

impl TryFrom<SupabaseClaims> for AuthUser {
    type Error = ApiError;

    fn try_from(claims: SupabaseClaims) -> Result<Self, Self::Error> {
        let uid = claims
            .sub
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ApiError::unauthorized("Could not extract user ID from token"))?;
        Ok(Self {
            uid,
            email: claims.email,
        })
    }
}

/// Verifies HS256 tokens signed with the project's JWT secret.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[SUPABASE_AUDIENCE]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Build from `SUPABASE_JWT_SECRET`.
    pub fn from_env() -> Result<Self, ApiError> {
        let secret = std::env::var("SUPABASE_JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ApiError::internal("SUPABASE_JWT_SECRET not set"))?;
        Ok(Self::new(&secret))
    }

    pub fn verify_token(&self, token: &str) -> Result<SupabaseClaims, ApiError> {
        decode::<SupabaseClaims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => ApiError::unauthorized("Token has expired"),
                _ => {
                    debug!("Token validation failed: {}", e);
                    ApiError::unauthorized(format!("Invalid token: {}", e))
                }
            })
    }
}

/// Axum extractor for authenticated user.
#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Not authenticated"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("Invalid Authorization header format"))?;

        let claims = state.jwt.verify_token(token.trim())?;
        AuthUser::try_from(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-secret";

    fn token(claims: serde_json::Value) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn in_an_hour() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[test]
    fn test_valid_token_yields_user() {
        let claims = JwtVerifier::new(SECRET)
            .verify_token(&token(json!({
                "sub": "user-1",
                "email": "a@b.c",
                "aud": "authenticated",
                "exp": in_an_hour(),
            })))
            .unwrap();
        let user = AuthUser::try_from(claims).unwrap();
        assert_eq!(user.uid, "user-1");
        assert_eq!(user.email.as_deref(), Some("a@b.c"));
    }

    #[test]
    fn test_expired_token_is_reported() {
        let err = JwtVerifier::new(SECRET)
            .verify_token(&token(json!({
                "sub": "user-1",
                "aud": "authenticated",
                "exp": chrono::Utc::now().timestamp() - 3600,
            })))
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(ref m) if m == "Token has expired"));
    }

    #[test]
    fn test_wrong_audience_is_rejected() {
        let err = JwtVerifier::new(SECRET)
            .verify_token(&token(json!({
                "sub": "user-1",
                "aud": "anon",
                "exp": in_an_hour(),
            })))
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(ref m) if m.starts_with("Invalid token")));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        assert!(JwtVerifier::new("other")
            .verify_token(&token(json!({
                "sub": "user-1",
                "aud": "authenticated",
                "exp": in_an_hour(),
            })))
            .is_err());
    }

    #[test]
    fn test_missing_subject_is_rejected() {
        let claims = JwtVerifier::new(SECRET)
            .verify_token(&token(json!({
                "aud": "authenticated",
                "exp": in_an_hour(),
            })))
            .unwrap();
        let err = AuthUser::try_from(claims).unwrap_err();
        assert!(
            matches!(err, ApiError::Unauthorized(ref m) if m == "Could not extract user ID from token")
        );
    }
}
