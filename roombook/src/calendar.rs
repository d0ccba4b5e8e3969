//! External calendar integration.
//!
//! The booking engine only sees the [`CalendarClient`] trait. The production implementation,
//! [`GoogleCalendar`], talks to the Google Calendar v3 REST API as a service account: it signs an
//! RS256 JWT assertion with the account's private key, trades it for a short-lived access token at
//! the account's `token_uri`, and caches that token until shortly before it expires.
//!
//! When no `calendar` section is configured, [`DisabledCalendar`] is injected instead.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, StatusCode, header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument};
use url::Url;

use crate::config::CalendarConfig;

/// Refresh cached access tokens this long before Google says they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
/// Lifetime requested for each signed assertion (Google's maximum).
const ASSERTION_TTL_SECS: i64 = 3600;
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// What gets written to the shared room calendar for one reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    pub owner_name: String,
    pub room_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl CalendarEvent {
    pub fn summary(&self) -> String {
        format!("[{}] {} meeting room", self.owner_name, self.room_name)
    }
}

#[async_trait]
pub trait CalendarClient: Send + Sync {
    /// False for the no-op client; callers skip dispatching work to it.
    fn enabled(&self) -> bool {
        true
    }

    /// Create the event and return the provider's event id.
    async fn create_event(&self, event: &CalendarEvent) -> anyhow::Result<String>;

    /// Delete a previously created event. Deleting an event that no longer exists succeeds.
    async fn delete_event(&self, event_id: &str) -> anyhow::Result<()>;
}

/// Used when the calendar integration is not configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCalendar;

#[async_trait]
impl CalendarClient for DisabledCalendar {
    fn enabled(&self) -> bool {
        false
    }

    async fn create_event(&self, _event: &CalendarEvent) -> anyhow::Result<String> {
        Err(anyhow!("calendar integration is disabled"))
    }

    async fn delete_event(&self, _event_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The fields of a Google service-account JSON key that we use.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    pub token_uri: Url,
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read calendar credentials file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid service account JSON in {}", path.display()))
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug)]
struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventDateTime {
    date_time: String,
    time_zone: String,
}

#[derive(Debug, Serialize)]
struct EventBody {
    summary: String,
    description: &'static str,
    start: EventDateTime,
    end: EventDateTime,
}

#[derive(Debug, Deserialize)]
struct CreatedEvent {
    #[serde(default)]
    id: String,
}

pub struct GoogleCalendar {
    client: Client,
    client_email: String,
    token_uri: Url,
    signing_key: EncodingKey,
    calendar_id: String,
    scope: String,
    api_base_url: Url,
    timezone: Tz,
    token: Mutex<Option<CachedToken>>,
}

impl GoogleCalendar {
    /// Load the service account key named by the config. Events are written in `timezone`.
    pub fn from_config(config: &CalendarConfig, timezone: Tz) -> anyhow::Result<Self> {
        let key = ServiceAccountKey::from_file(&config.credentials_file)?;
        Self::new(key, config, timezone)
    }

    pub fn new(key: ServiceAccountKey, config: &CalendarConfig, timezone: Tz) -> anyhow::Result<Self> {
        let signing_key =
            EncodingKey::from_rsa_pem(key.private_key.as_bytes()).context("service account private key is not a valid RSA PEM")?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build calendar HTTP client")?;

        Ok(Self {
            client,
            client_email: key.client_email,
            token_uri: key.token_uri,
            signing_key,
            calendar_id: config.calendar_id.clone(),
            scope: config.scope.clone(),
            api_base_url: config.api_base_url.clone(),
            timezone,
            token: Mutex::new(None),
        })
    }

    /// Valid access token, fetching a new one if the cached one is missing or about to expire.
    async fn access_token(&self) -> anyhow::Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| Instant::now() < t.refresh_at) {
            return Ok(token.access_token.clone());
        }

        let fresh = self.fetch_token().await?;
        let access_token = fresh.access_token.clone();
        *cached = Some(fresh);
        Ok(access_token)
    }

    #[instrument(skip(self), fields(account = %self.client_email), err)]
    async fn fetch_token(&self) -> anyhow::Result<CachedToken> {
        let iat = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: &self.scope,
            aud: self.token_uri.as_str(),
            iat,
            exp: iat + ASSERTION_TTL_SECS,
        };
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .context("failed to sign service account assertion")?;

        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", JWT_BEARER_GRANT)
            .append_pair("assertion", &assertion)
            .finish();

        let requested_at = Instant::now();
        let response = self
            .client
            .post(self.token_uri.clone())
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(form)
            .send()
            .await
            .context("token request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("token endpoint returned {status}: {body}"));
        }

        let token: TokenResponse = response.json().await.context("invalid token response")?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        debug!(expires_in = token.expires_in, "Obtained calendar access token");

        Ok(CachedToken {
            access_token: token.access_token,
            refresh_at: requested_at + lifetime,
        })
    }

    /// `{api_base_url}/calendars/{calendar_id}/events[/{event_id}]`, with each segment escaped.
    fn events_url(&self, event_id: Option<&str>) -> anyhow::Result<Url> {
        let mut url = self.api_base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow!("calendar api_base_url cannot be a base URL"))?;
            segments.pop_if_empty().extend(["calendars", self.calendar_id.as_str(), "events"]);
            if let Some(id) = event_id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    fn event_time(&self, at: DateTime<Utc>) -> EventDateTime {
        EventDateTime {
            date_time: at.with_timezone(&self.timezone).to_rfc3339(),
            time_zone: self.timezone.name().to_string(),
        }
    }
}

#[async_trait]
impl CalendarClient for GoogleCalendar {
    #[instrument(skip(self, event), fields(room = %event.room_name), err)]
    async fn create_event(&self, event: &CalendarEvent) -> anyhow::Result<String> {
        let token = self.access_token().await?;
        let body = EventBody {
            summary: event.summary(),
            description: "Created via BookMe",
            start: self.event_time(event.start_time),
            end: self.event_time(event.end_time),
        };

        let response = self
            .client
            .post(self.events_url(None)?)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .context("calendar insert request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("calendar insert returned {status}: {body}"));
        }

        let created: CreatedEvent = response.json().await.context("invalid calendar insert response")?;
        if created.id.is_empty() {
            return Err(anyhow!("calendar insert returned no event id"));
        }

        Ok(created.id)
    }

    #[instrument(skip(self), err)]
    async fn delete_event(&self, event_id: &str) -> anyhow::Result<()> {
        let token = self.access_token().await?;
        let response = self
            .client
            .delete(self.events_url(Some(event_id))?)
            .bearer_auth(token)
            .send()
            .await
            .context("calendar delete request failed")?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                debug!(event_id, "Calendar event already gone");
                Ok(())
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(anyhow!("calendar delete returned {status}: {body}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{body_partial_json, body_string_contains, header as header_is, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_KEY: &str = include_str!("../testdata/service_account_key.pem");

    fn calendar_for(server: &MockServer) -> GoogleCalendar {
        crate::test_utils::install_crypto_provider();
        let key = ServiceAccountKey {
            client_email: "bookme@project.iam.gserviceaccount.com".to_string(),
            private_key: TEST_KEY.to_string(),
            token_uri: Url::parse(&format!("{}/token", server.uri())).unwrap(),
        };
        let config = CalendarConfig {
            credentials_file: "unused.json".into(),
            calendar_id: "rooms@group.calendar.google.com".to_string(),
            scope: "https://www.googleapis.com/auth/calendar".to_string(),
            api_base_url: Url::parse(&format!("{}/calendar/v3/", server.uri())).unwrap(),
        };
        GoogleCalendar::new(key, &config, chrono_tz::Europe::Helsinki).unwrap()
    }

    async fn mount_token(server: &MockServer, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "test-token",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    fn event() -> CalendarEvent {
        CalendarEvent {
            owner_name: "mmeikalainen".to_string(),
            room_name: "big".to_string(),
            start_time: Utc.with_ymd_and_hms(2026, 2, 10, 8, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2026, 2, 10, 9, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_summary_names_owner_and_room() {
        assert_eq!(event().summary(), "[mmeikalainen] big meeting room");
    }

    #[tokio::test]
    async fn test_create_event_posts_local_times_and_returns_id() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("POST"))
            .and(path_regex(r"^/calendar/v3/calendars/.+/events$"))
            .and(header_is("authorization", "Bearer test-token"))
            .and(body_partial_json(serde_json::json!({
                "summary": "[mmeikalainen] big meeting room",
                "description": "Created via BookMe",
                "start": { "dateTime": "2026-02-10T10:00:00+02:00", "timeZone": "Europe/Helsinki" },
                "end": { "dateTime": "2026-02-10T11:30:00+02:00", "timeZone": "Europe/Helsinki" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "evt-1" })))
            .expect(1)
            .mount(&server)
            .await;

        let calendar = calendar_for(&server);
        let id = calendar.create_event(&event()).await.unwrap();
        assert_eq!(id, "evt-1");
    }

    #[tokio::test]
    async fn test_access_token_is_cached() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("POST"))
            .and(path_regex(r"/events$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "evt" })))
            .expect(2)
            .mount(&server)
            .await;

        let calendar = calendar_for(&server);
        calendar.create_event(&event()).await.unwrap();
        calendar.create_event(&event()).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_event_surfaces_api_errors() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("POST"))
            .and(path_regex(r"/events$"))
            .respond_with(ResponseTemplate::new(403).set_body_string("insufficient permissions"))
            .mount(&server)
            .await;

        let err = calendar_for(&server).create_event(&event()).await.unwrap_err();
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn test_token_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let err = calendar_for(&server).create_event(&event()).await.unwrap_err();
        assert!(format!("{err:#}").contains("invalid_grant"));
    }

    #[tokio::test]
    async fn test_delete_event_treats_missing_as_success() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;

        Mock::given(method("DELETE"))
            .and(path_regex(r"/events/evt-gone$"))
            .respond_with(ResponseTemplate::new(410))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path_regex(r"/events/evt-live$"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path_regex(r"/events/evt-broken$"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let calendar = calendar_for(&server);
        calendar.delete_event("evt-gone").await.unwrap();
        calendar.delete_event("evt-live").await.unwrap();
        assert!(calendar.delete_event("evt-broken").await.is_err());
    }

    #[test]
    fn test_service_account_key_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("google.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "type": "service_account",
                "client_email": "bookme@project.iam.gserviceaccount.com",
                "private_key": TEST_KEY,
                "token_uri": "https://oauth2.googleapis.com/token"
            })
            .to_string(),
        )
        .unwrap();

        let key = ServiceAccountKey::from_file(&path).unwrap();
        assert_eq!(key.client_email, "bookme@project.iam.gserviceaccount.com");
        assert_eq!(key.token_uri.as_str(), "https://oauth2.googleapis.com/token");

        assert!(ServiceAccountKey::from_file(&dir.path().join("missing.json")).is_err());
    }

    #[tokio::test]
    async fn test_disabled_calendar() {
        assert!(!DisabledCalendar.enabled());
        assert!(DisabledCalendar.create_event(&event()).await.is_err());
        DisabledCalendar.delete_event("anything").await.unwrap();
    }
}
