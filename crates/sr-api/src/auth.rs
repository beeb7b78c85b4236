//! Admin sessions: a signed HS256 token in an `HttpOnly` cookie, issued
//! after the identity provider callback.

use axum::async_trait;
use axum::extract::FromRef;
use axum::extract::FromRequestParts;
use axum::http::header::COOKIE;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sr_common::identity::{AdminAllowList, VerifiedIdentity};
use tracing::debug;

use crate::error::ApiError;
use crate::views;

pub const SESSION_COOKIE: &str = "sr_session";
pub const OAUTH_STATE_COOKIE: &str = "sr_oauth_state";
pub const MIN_SESSION_SECRET_LEN: usize = 32;

const SESSION_TTL_HOURS: i64 = 8;
const OAUTH_STATE_TTL_SECS: i64 = 600;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub secret: String,
    pub cookie_secure: bool,
    pub ttl: Duration,
}

impl SessionConfig {
    pub fn new(secret: String, cookie_secure: bool) -> Self {
        Self {
            secret,
            cookie_secure,
            ttl: Duration::hours(SESSION_TTL_HOURS),
        }
    }

    fn cookie(&self, name: &str, value: &str, max_age_secs: i64) -> String {
        let mut cookie =
            format!("{name}={value}; Path=/; Max-Age={max_age_secs}; HttpOnly; SameSite=Lax");
        if self.cookie_secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    pub fn session_cookie(&self, token: &str) -> String {
        self.cookie(SESSION_COOKIE, token, self.ttl.num_seconds())
    }

    pub fn state_cookie(&self, state: &str) -> String {
        self.cookie(OAUTH_STATE_COOKIE, state, OAUTH_STATE_TTL_SECS)
    }

    pub fn expired_cookie(&self, name: &str) -> String {
        self.cookie(name, "", 0)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    iat: usize,
    exp: usize,
}

pub fn issue_session(config: &SessionConfig, identity: &VerifiedIdentity) -> Result<String, ApiError> {
    let now = Utc::now();
    let claims = Claims {
        sub: identity.email.clone(),
        name: identity.name.clone(),
        iat: now.timestamp().max(0) as usize,
        exp: (now + config.ttl).timestamp().max(0) as usize,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
    .map_err(|err| ApiError::Internal(format!("failed to sign session: {err}")))
}

pub fn verify_session(config: &SessionConfig, token: &str) -> Result<VerifiedIdentity, ApiError> {
    let validation = Validation::new(Algorithm::HS256);

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &validation,
    )
    .map_err(|err| ApiError::Unauthorized(format!("invalid session: {err}")))?;

    Ok(VerifiedIdentity {
        email: data.claims.sub,
        name: data.claims.name,
    })
}

/// Value of the named cookie from the `Cookie` request headers.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

fn session_from_parts(parts: &Parts, config: &SessionConfig) -> Option<VerifiedIdentity> {
    let token = cookie_value(&parts.headers, SESSION_COOKIE)?;
    match verify_session(config, token) {
        Ok(identity) => Some(identity),
        Err(err) => {
            debug!(error = %err, "ignoring session cookie");
            None
        }
    }
}

/// Signed-in user, if any. Never rejects.
#[derive(Debug, Clone)]
pub struct MaybeSession(pub Option<VerifiedIdentity>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeSession
where
    SessionConfig: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = SessionConfig::from_ref(state);
        Ok(MaybeSession(session_from_parts(parts, &config)))
    }
}

/// Signed-in admin for the JSON routes: 401 without a session, 403 when
/// the email is not on the allow-list.
#[derive(Debug, Clone)]
pub struct AdminUser {
    pub identity: VerifiedIdentity,
}

fn require_admin<S>(parts: &Parts, state: &S) -> Result<VerifiedIdentity, AdminRejection>
where
    SessionConfig: FromRef<S>,
    AdminAllowList: FromRef<S>,
{
    let config = SessionConfig::from_ref(state);
    let identity = session_from_parts(parts, &config).ok_or(AdminRejection::SignedOut)?;

    if !AdminAllowList::from_ref(state).contains(&identity.email) {
        return Err(AdminRejection::NotAdmin(identity.email));
    }
    Ok(identity)
}

enum AdminRejection {
    SignedOut,
    NotAdmin(String),
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    SessionConfig: FromRef<S>,
    AdminAllowList: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match require_admin(parts, state) {
            Ok(identity) => Ok(AdminUser { identity }),
            Err(AdminRejection::SignedOut) => {
                Err(ApiError::Unauthorized("missing or expired session".into()))
            }
            Err(AdminRejection::NotAdmin(email)) => {
                Err(ApiError::Forbidden(format!("{email} is not an admin")))
            }
        }
    }
}

/// Signed-in admin for the HTML routes. Signed-out browsers are sent to
/// `/login`; other users get a 403 page.
#[derive(Debug, Clone)]
pub struct AdminPage {
    pub identity: VerifiedIdentity,
}

pub enum AdminPageRejection {
    Login,
    Forbidden(String),
}

impl IntoResponse for AdminPageRejection {
    fn into_response(self) -> Response {
        match self {
            AdminPageRejection::Login => Redirect::to("/login").into_response(),
            AdminPageRejection::Forbidden(email) => {
                (StatusCode::FORBIDDEN, Html(views::forbidden_page(&email))).into_response()
            }
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminPage
where
    SessionConfig: FromRef<S>,
    AdminAllowList: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AdminPageRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match require_admin(parts, state) {
            Ok(identity) => Ok(AdminPage { identity }),
            Err(AdminRejection::SignedOut) => Err(AdminPageRejection::Login),
            Err(AdminRejection::NotAdmin(email)) => Err(AdminPageRejection::Forbidden(email)),
        }
    }
}
