//! Test utilities for integration testing.

use std::sync::{Arc, Mutex, Once};

use anyhow::bail;
use async_trait::async_trait;
use axum_test::TestServer;
use chrono::{DateTime, TimeZone, Utc};
use rand::prelude::RngExt;
use sqlx::PgPool;
use url::Url;

use crate::{
    Application, Integrations,
    auth::{current_user::CurrentUser, session},
    calendar::{CalendarClient, CalendarEvent},
    clock::ManualClock,
    config::{Config, OAuthConfig},
    db::{
        handlers::{Repository, Users},
        models::{rooms::RoomDBResponse, users::{UserCreateDBRequest, UserDBResponse}},
    },
    email::{Confirmation, Mailer},
    errors::Error,
    side_effects::SideEffects,
    types::Role,
};

/// Install the process-wide rustls provider that `reqwest` clients need. Safe to call repeatedly.
pub fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        // Err only means a provider is already installed
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

/// A running test application plus handles on everything it talks to.
pub struct TestApp {
    pub server: TestServer,
    pub calendar: Arc<RecordingCalendar>,
    pub mailer: Arc<RecordingMailer>,
    pub clock: ManualClock,
    pub side_effects: SideEffects,
}

/// The instant test apps start at: Monday 2026-02-09, 14:00 in Helsinki.
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 9, 12, 0, 0).unwrap()
}

pub async fn create_test_app(pool: PgPool) -> TestApp {
    create_test_app_with_config(pool, create_test_config()).await
}

pub async fn create_test_app_with_config(pool: PgPool, config: Config) -> TestApp {
    install_crypto_provider();
    let calendar = Arc::new(RecordingCalendar::default());
    let mailer = Arc::new(RecordingMailer::default());
    let clock = ManualClock::new(test_now());

    let integrations = Integrations {
        calendar: calendar.clone(),
        mailer: mailer.clone(),
        clock: Arc::new(clock.clone()),
    };

    let app = Application::new_with_pool(config, pool, integrations).expect("Failed to create application");
    let (server, side_effects) = app.into_test_server();

    TestApp {
        server,
        calendar,
        mailer,
        clock,
        side_effects,
    }
}

pub fn create_test_config() -> Config {
    let mut config = Config {
        database_url: Some("postgres://localhost/roombook_test".to_string()),
        ..Default::default()
    };
    config.auth.jwt_secret = Some("test-secret-key-for-testing-only".to_string());
    config.rate_limit.enabled = false;
    config
}

pub fn test_oauth_config(provider_uri: &str) -> OAuthConfig {
    let url = |path: &str| Url::parse(&format!("{provider_uri}{path}")).unwrap();
    OAuthConfig {
        client_id: "test-client".to_string(),
        client_secret: "test-secret".to_string(),
        authorize_url: url("/oauth/authorize"),
        token_url: url("/oauth/token"),
        user_info_url: url("/v2/me"),
        redirect_uri: Url::parse("http://localhost:8080/oauth/callback").unwrap(),
        redirect_token_uri: Url::parse("http://localhost:5173/auth/callback").unwrap(),
        scopes: vec!["public".to_string()],
        required_campus_id: Some(13),
        state_ttl: std::time::Duration::from_secs(10 * 60),
        state_cookie_name: "roombook_oauth_state".to_string(),
        request_timeout: std::time::Duration::from_secs(5),
    }
}

pub async fn create_test_user(pool: &PgPool, role: Role) -> UserDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    let mut users_repo = Users::new(&mut conn);
    let suffix: u64 = rand::rng().random();
    let name = format!("testuser_{suffix:x}");

    users_repo
        .create(&UserCreateDBRequest {
            email: format!("{name}@example.com"),
            name,
            role,
        })
        .await
        .expect("Failed to create test user")
}

/// Returns the room with this name, creating it if needed. `big` and `small` are seeded.
pub async fn create_test_room(pool: &PgPool, name: &str) -> RoomDBResponse {
    sqlx::query_as::<_, RoomDBResponse>(
        "INSERT INTO rooms (name) VALUES ($1) ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name RETURNING id, name",
    )
    .bind(name)
    .fetch_one(pool)
    .await
    .expect("Failed to create test room")
}

/// Authorization header carrying a valid access token for `user` under [`create_test_config`].
pub fn auth_header(user: &UserDBResponse) -> (String, String) {
    let current = CurrentUser {
        id: user.id,
        name: user.name.clone(),
        role: user.role,
    };
    let token = session::issue_access_token(&current, &create_test_config().auth, Utc::now()).expect("Failed to issue token");
    ("authorization".to_string(), format!("Bearer {token}"))
}

/// Calendar that remembers what it was asked to do. Event ids are `event-1`, `event-2`, ...
#[derive(Debug, Default)]
pub struct RecordingCalendar {
    fail: bool,
    created: Mutex<Vec<CalendarEvent>>,
    deleted: Mutex<Vec<String>>,
}

impl RecordingCalendar {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn created(&self) -> Vec<CalendarEvent> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl CalendarClient for RecordingCalendar {
    async fn create_event(&self, event: &CalendarEvent) -> anyhow::Result<String> {
        if self.fail {
            bail!("calendar unavailable");
        }
        let mut created = self.created.lock().unwrap();
        created.push(event.clone());
        Ok(format!("event-{}", created.len()))
    }

    async fn delete_event(&self, event_id: &str) -> anyhow::Result<()> {
        if self.fail {
            bail!("calendar unavailable");
        }
        self.deleted.lock().unwrap().push(event_id.to_string());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingMailer {
    fail: bool,
    sent: Mutex<Vec<Confirmation>>,
}

impl RecordingMailer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<Confirmation> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_confirmation(&self, confirmation: &Confirmation) -> Result<(), Error> {
        if self.fail {
            return Err(Error::Internal {
                operation: "send confirmation: SMTP unavailable".to_string(),
            });
        }
        self.sent.lock().unwrap().push(confirmation.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::install_crypto_provider;

    #[test]
    fn test_http_clients_build_after_provider_install() {
        install_crypto_provider();
        install_crypto_provider();

        assert!(rustls::crypto::CryptoProvider::get_default().is_some());
        reqwest::Client::builder().build().expect("client builds with a provider installed");
    }
}
