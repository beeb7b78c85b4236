use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{AppendHeaders, Html, IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use sr_common::api::AuthStatusResponse;
use tracing::{info, warn};
use uuid::Uuid;

use crate::SharedState;
use crate::auth::{MaybeSession, OAUTH_STATE_COOKIE, SESSION_COOKIE, cookie_value, issue_session};
use crate::error::{ApiError, PageError};
use crate::views;

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

pub async fn login(State(state): State<SharedState>) -> Result<Response, PageError> {
    let csrf = Uuid::new_v4().simple().to_string();
    let url = state.identity.authorization_url(&csrf)?;

    Ok((
        AppendHeaders([(SET_COOKIE, state.config.session.state_cookie(&csrf))]),
        Redirect::to(&url),
    )
        .into_response())
}

pub async fn callback(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, PageError> {
    if let Some(error) = query.error.as_deref() {
        return Err(ApiError::Unauthorized(format!("provider returned {error}")).into());
    }

    let expected = cookie_value(&headers, OAUTH_STATE_COOKIE);
    if expected.is_none() || expected != query.state.as_deref() {
        return Err(ApiError::Unauthorized("sign-in state mismatch".into()).into());
    }

    let code = query.code.as_deref().unwrap_or_default();
    let identity = state.identity.authenticate(code).await?;
    let clear_state = state.config.session.expired_cookie(OAUTH_STATE_COOKIE);

    if !state.identity.authorize(&identity.email) {
        warn!(email = %identity.email, "sign-in by a non-admin");
        return Ok((
            StatusCode::FORBIDDEN,
            AppendHeaders([(SET_COOKIE, clear_state)]),
            Html(views::forbidden_page(&identity.email)),
        )
            .into_response());
    }

    let token = issue_session(&state.config.session, &identity)?;
    info!(email = %identity.email, "admin session started");

    Ok((
        AppendHeaders([
            (SET_COOKIE, state.config.session.session_cookie(&token)),
            (SET_COOKIE, clear_state),
        ]),
        Redirect::to("/admin"),
    )
        .into_response())
}

pub async fn logout(State(state): State<SharedState>) -> Response {
    (
        AppendHeaders([(SET_COOKIE, state.config.session.expired_cookie(SESSION_COOKIE))]),
        Redirect::to("/"),
    )
        .into_response()
}

pub async fn auth_status(
    State(state): State<SharedState>,
    MaybeSession(identity): MaybeSession,
) -> Json<AuthStatusResponse> {
    let response = match identity {
        Some(identity) => AuthStatusResponse {
            authenticated: true,
            is_admin: state.identity.authorize(&identity.email),
            user: Some(identity),
        },
        None => AuthStatusResponse {
            authenticated: false,
            is_admin: false,
            user: None,
        },
    };
    Json(response)
}
