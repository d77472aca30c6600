//! Caller authentication.
//!
//! Callers present an HS256 JWT in the `token` cookie or an
//! `Authorization: Bearer` header. The raw token is kept on the [`Caller`]
//! so it can be forwarded to the cart service.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use domain::Contact;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use saga::{Caller, Role};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ApiError;
use crate::state::AppState;

const TOKEN_COOKIE: &str = "token";

/// Claims carried by a caller token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub id: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Expiry as Unix seconds. Tokens without one never expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

#[derive(Debug, Error, PartialEq)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingToken,

    #[error("Token expired")]
    Expired,

    #[error("Invalid token: {0}")]
    Invalid(String),
}

/// Validates caller tokens with a shared HS256 secret.
#[derive(Clone)]
pub struct JwtAuth {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuth {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => {
                    tracing::debug!(error = %e, "token rejected");
                    AuthError::Invalid(e.to_string())
                }
            })
    }

    /// Resolves the caller behind a request's headers.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Caller, AuthError> {
        let token = extract_token(headers).ok_or(AuthError::MissingToken)?;
        let claims = self.validate(&token)?;
        Ok(
            Caller::new(claims.id, claims.role, token).with_contact(Contact {
                email: claims.email,
                username: claims.username,
            }),
        )
    }
}

impl std::fmt::Debug for JwtAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAuth").finish_non_exhaustive()
    }
}

/// Returns the token from the `token` cookie, else from a Bearer header.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == TOKEN_COOKIE)
        .map(|(_, value)| value.trim().to_string());

    from_cookie.filter(|t| !t.is_empty()).or_else(|| {
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    })
}

/// An authenticated caller, extracted from request headers.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Caller);

impl Authenticated {
    /// Rejects callers whose role is not in `roles`.
    pub fn require(self, roles: &[Role]) -> Result<Caller, ApiError> {
        if roles.contains(&self.0.role) {
            Ok(self.0)
        } else {
            tracing::debug!(user_id = %self.0.user_id, role = %self.0.role, "role not allowed");
            Err(ApiError::Forbidden(format!(
                "Role {} may not perform this action",
                self.0.role
            )))
        }
    }
}

impl FromRequestParts<Arc<AppState>> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        state
            .auth
            .authenticate(&parts.headers)
            .map(Authenticated)
            .map_err(ApiError::Auth)
    }
}
