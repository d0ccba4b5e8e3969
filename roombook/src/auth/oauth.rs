//! OAuth2 authorization-code login against the campus identity provider.
//!
//! The flow is split across two requests. `/oauth/login` generates a random `state`, stores it in
//! a short-lived signed cookie and redirects to the provider. `/oauth/callback` checks the
//! returned `state` against that cookie, exchanges the code for a provider token, fetches the
//! profile and hands it back to the handler, which maps it onto a local account.

use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, header};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::prelude::RngExt;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::{Url, form_urlencoded};

use crate::config::{AuthConfig, OAuthConfig};
use crate::errors::{Error, Result};

const STATE_BYTES: usize = 32;
const STATE_ISSUER: &str = "oauth-state";

/// Generate an unguessable `state` value: 32 random bytes, hex encoded.
pub fn generate_state() -> String {
    let bytes: [u8; STATE_BYTES] = rand::rng().random();
    hex::encode(bytes)
}

#[derive(Debug, Serialize, Deserialize)]
struct StateClaims {
    state: String,
    iss: String,
    exp: i64,
}

/// Profile returned by the provider's user-info endpoint. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProviderUser {
    pub email: String,
    pub login: String,
    #[serde(rename = "staff?", default)]
    pub staff: bool,
    #[serde(default)]
    pub campus_users: Vec<CampusUser>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CampusUser {
    pub campus_id: i64,
    #[serde(default)]
    pub is_primary: bool,
}

impl ProviderUser {
    /// Whether the user's primary campus is `campus_id`.
    pub fn is_primary_campus(&self, campus_id: i64) -> bool {
        self.campus_users.iter().any(|c| c.campus_id == campus_id && c.is_primary)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct OAuthProvider {
    config: OAuthConfig,
    http: reqwest::Client,
}

impl OAuthProvider {
    pub fn new(config: OAuthConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Provider URL the browser is sent to for `state`.
    pub fn authorize_url(&self, state: &str) -> Url {
        let mut url = self.config.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", self.config.redirect_uri.as_str())
            .append_pair("response_type", "code")
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("state", state);
        url
    }

    /// `Set-Cookie` value carrying a signed copy of `state`.
    pub fn state_cookie(&self, state: &str, auth: &AuthConfig, now: DateTime<Utc>) -> Result<HeaderValue> {
        let ttl = chrono::Duration::from_std(self.config.state_ttl).unwrap_or(chrono::Duration::minutes(10));
        let claims = StateClaims {
            state: state.to_string(),
            iss: STATE_ISSUER.to_string(),
            exp: (now + ttl).timestamp(),
        };
        let key = EncodingKey::from_secret(state_secret(auth)?);
        let signed = encode(&Header::new(Algorithm::HS256), &claims, &key).map_err(|e| Error::Internal {
            operation: format!("sign OAuth state: {e}"),
        })?;

        self.cookie_header(&signed, self.config.state_ttl)
    }

    /// `Set-Cookie` value that removes the state cookie.
    pub fn clear_state_cookie(&self) -> Result<HeaderValue> {
        self.cookie_header("", Duration::ZERO)
    }

    fn cookie_header(&self, value: &str, max_age: Duration) -> Result<HeaderValue> {
        let secure = if self.config.redirect_uri.scheme() == "https" { "; Secure" } else { "" };
        let cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
            self.config.state_cookie_name,
            value,
            max_age.as_secs(),
            secure
        );
        HeaderValue::from_str(&cookie).map_err(|e| Error::Internal {
            operation: format!("build state cookie: {e}"),
        })
    }

    /// Check the `state` returned by the provider against the signed cookie set at login.
    pub fn verify_state(&self, headers: &HeaderMap, returned: Option<&str>, auth: &AuthConfig) -> Result<()> {
        let forbidden = || Error::Forbidden {
            message: "invalid or missing state".to_string(),
        };

        let returned = returned.filter(|s| !s.is_empty()).ok_or_else(forbidden)?;
        let signed = read_cookie(headers, &self.config.state_cookie_name).ok_or_else(forbidden)?;

        let key = DecodingKey::from_secret(state_secret(auth)?);
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[STATE_ISSUER]);
        validation.set_required_spec_claims(&["exp", "iss"]);

        let claims = decode::<StateClaims>(&signed, &key, &validation)
            .map_err(|e| {
                debug!("Rejected OAuth state cookie: {e}");
                forbidden()
            })?
            .claims;

        if claims.state != returned {
            return Err(forbidden());
        }
        Ok(())
    }

    /// Trade an authorization code for a provider access token.
    #[instrument(skip(self, code), err)]
    pub async fn exchange_code(&self, code: &str) -> Result<String> {
        let body: String = form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "authorization_code")
            .append_pair("code", code)
            .append_pair("redirect_uri", self.config.redirect_uri.as_str())
            .append_pair("client_id", &self.config.client_id)
            .append_pair("client_secret", &self.config.client_secret)
            .finish();

        let response = self
            .http
            .post(self.config.token_url.clone())
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| upstream_error("exchange authorization code", &e))?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "Identity provider rejected the authorization code");
            return Err(Error::Upstream {
                operation: "failed to exchange token".to_string(),
                timed_out: false,
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| upstream_error("decode token response", &e))?;
        Ok(token.access_token)
    }

    /// Fetch the profile of the user who owns `access_token`.
    #[instrument(skip(self, access_token), err)]
    pub async fn fetch_user(&self, access_token: &str) -> Result<ProviderUser> {
        let response = self
            .http
            .get(self.config.user_info_url.clone())
            .bearer_auth(access_token)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| upstream_error("fetch user info", &e))?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!(%status, "Identity provider user info request failed");
            return Err(Error::Upstream {
                operation: "failed to get user info".to_string(),
                timed_out: false,
            });
        }

        response.json().await.map_err(|e| upstream_error("decode user info", &e))
    }
}

fn state_secret(auth: &AuthConfig) -> Result<&[u8]> {
    auth.jwt_secret.as_deref().map(str::as_bytes).ok_or_else(|| Error::Internal {
        operation: "OAuth state: jwt_secret is required".to_string(),
    })
}

fn upstream_error(operation: &str, e: &reqwest::Error) -> Error {
    if e.is_timeout() {
        warn!("Identity provider timed out during {operation}");
        Error::Upstream {
            operation: "identity provider timed out".to_string(),
            timed_out: true,
        }
    } else {
        warn!("Identity provider request failed during {operation}: {e}");
        Error::Upstream {
            operation: format!("failed to {operation}"),
            timed_out: false,
        }
    }
}

/// Find a cookie by name in the request's `Cookie` headers.
fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_config, install_crypto_provider, test_oauth_config};
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_string_contains, header as header_matcher, method, path},
    };

    fn provider(server_uri: &str) -> OAuthProvider {
        install_crypto_provider();
        OAuthProvider::new(test_oauth_config(server_uri), reqwest::Client::new())
    }

    fn cookie_headers(set_cookie: &HeaderValue) -> HeaderMap {
        // Browsers send back only `name=value`
        let pair = set_cookie.to_str().unwrap().split(';').next().unwrap().to_string();
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, format!("other=1; {pair}").parse().unwrap());
        headers
    }

    #[test]
    fn test_generated_state_is_random_hex() {
        let a = generate_state();
        let b = generate_state();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_authorize_url_carries_client_and_state() {
        let provider = provider("http://provider.test");
        let url = provider.authorize_url("abc123");

        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "test-client");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["scope"], "public");
        assert_eq!(pairs["state"], "abc123");
        assert_eq!(pairs["redirect_uri"], "http://localhost:8080/oauth/callback");
    }

    #[test]
    fn test_state_round_trips_through_cookie() {
        let config = create_test_config();
        let provider = provider("http://provider.test");

        let cookie = provider.state_cookie("abc123", &config.auth, Utc::now()).unwrap();
        let raw = cookie.to_str().unwrap();
        assert!(raw.starts_with("roombook_oauth_state="));
        assert!(raw.contains("HttpOnly"));
        assert!(raw.contains("Max-Age=600"));

        let headers = cookie_headers(&cookie);
        provider.verify_state(&headers, Some("abc123"), &config.auth).unwrap();
    }

    #[test]
    fn test_state_mismatch_is_forbidden() {
        let config = create_test_config();
        let provider = provider("http://provider.test");
        let headers = cookie_headers(&provider.state_cookie("abc123", &config.auth, Utc::now()).unwrap());

        let err = provider.verify_state(&headers, Some("zzz999"), &config.auth).unwrap_err();
        assert!(matches!(err, Error::Forbidden { ref message } if message == "invalid or missing state"));

        let err = provider.verify_state(&headers, None, &config.auth).unwrap_err();
        assert!(matches!(err, Error::Forbidden { .. }));

        let err = provider.verify_state(&HeaderMap::new(), Some("abc123"), &config.auth).unwrap_err();
        assert!(matches!(err, Error::Forbidden { .. }));
    }

    #[test]
    fn test_expired_state_cookie_is_forbidden() {
        let config = create_test_config();
        let provider = provider("http://provider.test");
        let issued = Utc::now() - chrono::Duration::hours(1);
        let headers = cookie_headers(&provider.state_cookie("abc123", &config.auth, issued).unwrap());

        let err = provider.verify_state(&headers, Some("abc123"), &config.auth).unwrap_err();
        assert!(matches!(err, Error::Forbidden { .. }));
    }

    #[test]
    fn test_primary_campus_check() {
        let user: ProviderUser = serde_json::from_value(serde_json::json!({
            "email": "maija@student.hive.fi",
            "login": "maija",
            "staff?": false,
            "campus_users": [
                { "campus_id": 1, "is_primary": false },
                { "campus_id": 13, "is_primary": true }
            ],
            "wallet": 120
        }))
        .unwrap();

        assert!(user.is_primary_campus(13));
        assert!(!user.is_primary_campus(1));
        assert!(!user.staff);
    }

    #[tokio::test]
    async fn test_exchange_code_posts_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(header_matcher("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=the-code"))
            .and(body_string_contains("client_secret=test-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "provider-token",
                "token_type": "bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = provider(&server.uri()).exchange_code("the-code").await.unwrap();
        assert_eq!(token, "provider-token");
    }

    #[tokio::test]
    async fn test_exchange_code_rejection_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = provider(&server.uri()).exchange_code("bad").await.unwrap_err();
        assert!(matches!(err, Error::Upstream { timed_out: false, .. }));
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/me"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let mut config = test_oauth_config(&server.uri());
        config.request_timeout = Duration::from_millis(100);
        install_crypto_provider();
        let provider = OAuthProvider::new(config, reqwest::Client::new());

        let err = provider.fetch_user("token").await.unwrap_err();
        assert!(matches!(err, Error::Upstream { timed_out: true, .. }));
        assert_eq!(err.status_code(), axum::http::StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_fetch_user_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/me"))
            .and(header_matcher("authorization", "Bearer provider-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "email": "staff@hive.fi",
                "login": "staffer",
                "staff?": true,
                "campus_users": [{ "campus_id": 13, "is_primary": true }]
            })))
            .mount(&server)
            .await;

        let user = provider(&server.uri()).fetch_user("provider-token").await.unwrap();
        assert_eq!(user.login, "staffer");
        assert!(user.staff);
    }
}
