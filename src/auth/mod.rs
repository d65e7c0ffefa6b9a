//! Bearer-token authentication.
//!
//! Tokens are issued elsewhere; this module only verifies HS256 JWTs and turns
//! them into an [`AuthenticatedUser`]. The `sub` claim carries the user id and
//! the optional `role` claim grants administrator access.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::errors::ServiceError;

pub const ADMIN_ROLE: &str = "ADMIN";

/// Claim structure for JWT tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Subject (user ID)
    #[serde(default)]
    pub role: Option<String>,
    pub exp: i64, // Expiration time
    #[serde(default)]
    pub iat: Option<i64>,
}

/// Verifies bearer tokens against the configured secret
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<AuthenticatedUser, ServiceError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    ServiceError::Unauthorized("token expired".to_string())
                }
                _ => ServiceError::Unauthorized("invalid token".to_string()),
            })?
            .claims;

        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| ServiceError::Unauthorized("invalid token subject".to_string()))?;

        Ok(AuthenticatedUser {
            user_id,
            role: claims.role,
        })
    }
}

/// Authenticated user data extracted from the JWT token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub role: Option<String>,
}

impl AuthenticatedUser {
    /// Check if the user is an admin
    pub fn is_admin(&self) -> bool {
        self.role
            .as_deref()
            .map_or(false, |role| role.eq_ignore_ascii_case(ADMIN_ROLE))
    }

    pub fn require_admin(&self) -> Result<(), ServiceError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "administrator role required".to_string(),
            ))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<JwtVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized("missing bearer token".to_string()))?;

        let token = header_value
            .strip_prefix("Bearer ")
            .or_else(|| header_value.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ServiceError::Unauthorized("missing bearer token".to_string()))?;

        let verifier = Arc::<JwtVerifier>::from_ref(state);
        let user = verifier.verify(token)?;
        debug!(user_id = %user.user_id, "authenticated request");
        Ok(user)
    }
}
