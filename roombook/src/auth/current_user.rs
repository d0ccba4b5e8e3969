use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use tracing::{instrument, trace};

use crate::{
    AppState,
    auth::session,
    config::AuthConfig,
    errors::{Error, Result},
    types::{Role, UserId},
};

/// The authenticated caller, as carried in the access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: UserId,
    pub name: String,
    pub role: Role,
}

/// Caller that may be anonymous. Used by read endpoints where authentication only changes what is
/// revealed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaybeUser(pub Option<CurrentUser>);

/// Extract the bearer token from the `Authorization` header.
/// Returns:
/// - None: header absent or not a bearer credential
/// - Some(Ok(token)): bearer token found
/// - Some(Err(error)): header present but not valid ASCII
fn bearer_token(parts: &Parts) -> Option<Result<&str>> {
    let header = parts.headers.get(header::AUTHORIZATION)?;

    let value = match header.to_str() {
        Ok(value) => value,
        Err(e) => {
            return Some(Err(Error::BadRequest {
                message: format!("Invalid authorization header: {e}"),
            }));
        }
    };

    value.strip_prefix("Bearer ").map(|token| Ok(token.trim()))
}

#[instrument(skip(parts, config))]
fn authenticate(parts: &Parts, config: &AuthConfig) -> Result<CurrentUser> {
    match bearer_token(parts) {
        Some(Ok(token)) => session::verify_access_token(token, config),
        Some(Err(e)) => Err(e),
        None => Err(Error::Unauthenticated { message: None }),
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let user = authenticate(parts, &state.config.auth)?;
        trace!(user_id = user.id, role = %user.role, "Authenticated request");
        Ok(user)
    }
}

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        // A bad or expired token downgrades to anonymous rather than failing the request
        match authenticate(parts, &state.config.auth) {
            Ok(user) => Ok(MaybeUser(Some(user))),
            Err(Error::Internal { operation }) => Err(Error::Internal { operation }),
            Err(e) => {
                trace!("Continuing anonymously: {e}");
                Ok(MaybeUser(None))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_config;
    use chrono::Utc;

    fn parts_with(authorization: Option<&str>) -> Parts {
        let mut builder = axum::http::Request::builder().uri("/api/v1/reservations");
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn user() -> CurrentUser {
        CurrentUser {
            id: 7,
            name: "staffer".to_string(),
            role: Role::Staff,
        }
    }

    #[test]
    fn test_valid_bearer_token_authenticates() {
        let config = create_test_config();
        let token = session::issue_access_token(&user(), &config.auth, Utc::now()).unwrap();

        let parts = parts_with(Some(&format!("Bearer {token}")));
        assert_eq!(authenticate(&parts, &config.auth).unwrap(), user());
    }

    #[test]
    fn test_missing_header_is_unauthenticated() {
        let config = create_test_config();
        let err = authenticate(&parts_with(None), &config.auth).unwrap_err();
        assert!(matches!(err, Error::Unauthenticated { message: None }));
        assert_eq!(err.user_message(), "unauthorized");
    }

    #[test]
    fn test_non_bearer_scheme_is_unauthenticated() {
        let config = create_test_config();
        let err = authenticate(&parts_with(Some("Basic dXNlcjpwYXNz")), &config.auth).unwrap_err();
        assert!(matches!(err, Error::Unauthenticated { .. }));
    }

    #[test]
    fn test_tampered_token_is_unauthenticated() {
        let config = create_test_config();
        let token = session::issue_access_token(&user(), &config.auth, Utc::now()).unwrap();
        let tampered = format!("Bearer {token}x");

        let err = authenticate(&parts_with(Some(&tampered)), &config.auth).unwrap_err();
        assert!(matches!(err, Error::Unauthenticated { .. }));
    }
}
