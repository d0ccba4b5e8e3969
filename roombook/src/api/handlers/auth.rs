use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, instrument};

use crate::{
    AppState,
    auth::{
        current_user::CurrentUser,
        oauth::{self, OAuthProvider},
        session,
    },
    db::{handlers::Users, models::users::UserCreateDBRequest},
    errors::{Error, Result},
    types::Role,
};

/// Query parameters the provider appends to the callback URL
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

fn provider(state: &AppState) -> Result<&Arc<OAuthProvider>> {
    state.oauth.as_ref().ok_or_else(|| Error::Internal {
        operation: "handle OAuth login: auth.oauth is not configured".to_string(),
    })
}

fn redirect(location: &str, cookie: HeaderValue) -> Result<Response> {
    let location = HeaderValue::from_str(location).map_err(|e| Error::Internal {
        operation: format!("build redirect location: {e}"),
    })?;
    Ok((StatusCode::FOUND, [(header::LOCATION, location), (header::SET_COOKIE, cookie)]).into_response())
}

/// Send the browser to the identity provider.
///
/// Signed tokens use wall-clock time since their expiry is checked against it.
#[instrument(skip(state))]
pub async fn login(State(state): State<AppState>) -> Result<Response> {
    let provider = provider(&state)?;

    let oauth_state = oauth::generate_state();
    let cookie = provider.state_cookie(&oauth_state, &state.config.auth, Utc::now())?;

    redirect(provider.authorize_url(&oauth_state).as_str(), cookie)
}

/// Finish the provider round trip and hand the frontend an access token.
#[instrument(skip(state, headers, query))]
pub async fn callback(State(state): State<AppState>, headers: HeaderMap, Query(query): Query<CallbackQuery>) -> Result<Response> {
    let provider = provider(&state)?;

    provider.verify_state(&headers, query.state.as_deref(), &state.config.auth)?;

    if let Some(error) = query.error {
        return Err(Error::BadRequest {
            message: format!("authorization was not granted: {error}"),
        });
    }
    let code = query.code.filter(|c| !c.is_empty()).ok_or_else(|| Error::BadRequest {
        message: "missing authorization code".to_string(),
    })?;

    let provider_token = provider.exchange_code(&code).await?;
    let profile = provider.fetch_user(&provider_token).await?;

    if let Some(campus_id) = provider.config().required_campus_id {
        if !profile.is_primary_campus(campus_id) {
            info!(login = %profile.login, "Rejected login from outside the campus");
            return Err(Error::Forbidden {
                message: "access denied: only students of this campus are allowed".to_string(),
            });
        }
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut conn)
        .find_or_create(&UserCreateDBRequest {
            name: profile.login.clone(),
            email: profile.email.clone(),
            role: if profile.staff { Role::Staff } else { Role::Student },
        })
        .await?;

    let current_user = CurrentUser {
        id: user.id,
        name: user.name,
        role: user.role,
    };
    let token = session::issue_access_token(&current_user, &state.config.auth, Utc::now())?;
    info!(user_id = current_user.id, role = %current_user.role, "User logged in");

    let mut target = provider.config().redirect_token_uri.clone();
    target
        .query_pairs_mut()
        .append_pair("token", &token)
        .append_pair("intra", &current_user.name)
        .append_pair("role", &current_user.role.as_str().to_lowercase());

    redirect(target.as_str(), provider.clear_state_cookie()?)
}
