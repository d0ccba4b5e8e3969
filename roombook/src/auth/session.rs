//! Access token creation and verification.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::{auth::current_user::CurrentUser, config::AuthConfig, errors::Error, types::Role};

/// Access token claims
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String, // Subject (user ID, decimal)
    pub name: String,
    pub role: Role,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

impl AccessClaims {
    pub fn new(user: &CurrentUser, config: &AuthConfig, now: DateTime<Utc>) -> Self {
        let ttl = chrono::Duration::from_std(config.access_token_ttl).unwrap_or(chrono::Duration::hours(1));

        Self {
            sub: user.id.to_string(),
            name: user.name.clone(),
            role: user.role,
            iss: config.issuer.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        }
    }
}

impl TryFrom<AccessClaims> for CurrentUser {
    type Error = Error;

    fn try_from(claims: AccessClaims) -> Result<Self, Error> {
        let id = claims.sub.parse().map_err(|_| Error::Unauthenticated {
            message: Some("invalid token subject".to_string()),
        })?;

        Ok(Self {
            id,
            name: claims.name,
            role: claims.role,
        })
    }
}

fn secret(config: &AuthConfig) -> Result<&[u8], Error> {
    config
        .jwt_secret
        .as_deref()
        .map(str::as_bytes)
        .ok_or_else(|| Error::Internal {
            operation: "access tokens: jwt_secret is required".to_string(),
        })
}

/// Sign an access token for `user`, valid from `now` for the configured TTL.
pub fn issue_access_token(user: &CurrentUser, config: &AuthConfig, now: DateTime<Utc>) -> Result<String, Error> {
    let claims = AccessClaims::new(user, config, now);
    let key = EncodingKey::from_secret(secret(config)?);

    encode(&Header::new(Algorithm::HS256), &claims, &key).map_err(|e| Error::Internal {
        operation: format!("create JWT: {e}"),
    })
}

/// Verify signature, expiry and issuer, and return the user the token was issued to.
pub fn verify_access_token(token: &str, config: &AuthConfig) -> Result<CurrentUser, Error> {
    let key = DecodingKey::from_secret(secret(config)?);
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[config.issuer.as_str()]);
    validation.set_required_spec_claims(&["exp", "iss", "sub"]);

    let token_data = decode::<AccessClaims>(token, &key, &validation).map_err(|e| match e.kind() {
        // Client errors (401) - malformed tokens, invalid claims, expired tokens
        jsonwebtoken::errors::ErrorKind::InvalidToken
        | jsonwebtoken::errors::ErrorKind::InvalidSignature
        | jsonwebtoken::errors::ErrorKind::ExpiredSignature
        | jsonwebtoken::errors::ErrorKind::MissingRequiredClaim(_)
        | jsonwebtoken::errors::ErrorKind::InvalidIssuer
        | jsonwebtoken::errors::ErrorKind::InvalidAudience
        | jsonwebtoken::errors::ErrorKind::InvalidSubject
        | jsonwebtoken::errors::ErrorKind::ImmatureSignature
        | jsonwebtoken::errors::ErrorKind::Base64(_)
        | jsonwebtoken::errors::ErrorKind::Json(_)
        | jsonwebtoken::errors::ErrorKind::Utf8(_)
        | jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => Error::Unauthenticated { message: None },

        // Server errors (500) - key issues, internal failures
        jsonwebtoken::errors::ErrorKind::InvalidEcdsaKey
        | jsonwebtoken::errors::ErrorKind::InvalidRsaKey(_)
        | jsonwebtoken::errors::ErrorKind::RsaFailedSigning
        | jsonwebtoken::errors::ErrorKind::InvalidAlgorithmName
        | jsonwebtoken::errors::ErrorKind::InvalidKeyFormat
        | jsonwebtoken::errors::ErrorKind::MissingAlgorithm
        | jsonwebtoken::errors::ErrorKind::Crypto(_) => Error::Internal {
            operation: format!("JWT verification: {e}"),
        },

        _ => Error::Internal {
            operation: format!("JWT verification (unknown error): {e}"),
        },
    })?;

    CurrentUser::try_from(token_data.claims)
}
