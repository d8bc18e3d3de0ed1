//! Bearer token extraction and validation.
//!
//! The relay holds no user accounts: a single shared bearer token gates
//! access to every dataset. With no AUTH_TOKEN configured (local
//! development), requests are admitted anonymously.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};

use crate::AppState;

/// Authenticated caller extracted from the request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The presented bearer token
    #[allow(dead_code)]
    pub token: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        match auth_header {
            Some(header) if header.starts_with("Bearer ") => {
                let token = header.trim_start_matches("Bearer ").to_string();

                if token.is_empty() {
                    return Err((StatusCode::UNAUTHORIZED, "Empty bearer token"));
                }

                if let Some(ref expected) = state.config.auth_token {
                    if &token != expected {
                        return Err((StatusCode::UNAUTHORIZED, "Invalid bearer token"));
                    }
                }

                Ok(AuthUser { token })
            }
            Some(_) => Err((
                StatusCode::UNAUTHORIZED,
                "Invalid authorization header format",
            )),
            None => {
                if state.config.auth_token.is_none() {
                    // No token configured, allow anonymous access
                    Ok(AuthUser {
                        token: "anonymous".to_string(),
                    })
                } else {
                    Err((StatusCode::UNAUTHORIZED, "Missing authorization header"))
                }
            }
        }
    }
}
