//! Authentication middleware.
//!
//! Only the holder of the configured secret may mutate the map. The secret
//! is passed as a Bearer token. Without a configured secret every caller is
//! accepted.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::AppError;
use crate::AppState;

/// Caller allowed to act with authority privileges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityUser {
    /// The bearer token, or "anonymous" when no secret is configured
    pub token: String,
}

impl FromRequestParts<AppState> for AuthorityUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        authorize(auth_header, state.config.auth_secret.as_deref())
    }
}

/// Check an `Authorization` header value against the configured secret.
pub(crate) fn authorize(header: Option<&str>, secret: Option<&str>) -> Result<AuthorityUser, AppError> {
    let Some(secret) = secret else {
        return Ok(AuthorityUser {
            token: "anonymous".to_string(),
        });
    };

    let token = header
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    if token != secret {
        tracing::warn!("Rejected mutation with invalid bearer token");
        return Err(AppError::Unauthorized);
    }

    Ok(AuthorityUser {
        token: token.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_access_without_secret() {
        let user = authorize(None, None).unwrap();
        assert_eq!(user.token, "anonymous");
    }

    #[test]
    fn secret_must_match() {
        assert!(authorize(Some("Bearer s3cret"), Some("s3cret")).is_ok());
        assert!(matches!(
            authorize(Some("Bearer wrong"), Some("s3cret")),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            authorize(Some("s3cret"), Some("s3cret")),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            authorize(None, Some("s3cret")),
            Err(AppError::Unauthorized)
        ));
    }
}
