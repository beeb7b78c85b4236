//! Admin sign-in: an OAuth authorization code is exchanged for a verified
//! email, which must appear on the configured allow-list.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::referral::normalize_email;

pub const GOOGLE_AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_USERINFO_ENDPOINT: &str = "https://openidconnect.googleapis.com/v1/userinfo";
const OAUTH_SCOPES: &str = "openid email profile";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("authentication failed: {0}")]
    AuthFailure(String),
    #[error("sign-in is not configured")]
    NotConfigured,
}

/// An email address the identity provider has confirmed the user controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    pub email: String,
    pub name: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Where to send the browser to start sign-in.
    fn authorization_url(&self, state: &str) -> Result<String, IdentityError>;

    async fn exchange_code(&self, code: &str) -> Result<VerifiedIdentity, IdentityError>;
}

#[derive(Debug, Clone)]
pub struct GoogleOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub auth_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
}

impl GoogleOAuthConfig {
    pub fn new(client_id: String, client_secret: String, redirect_url: String) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_url,
            auth_endpoint: GOOGLE_AUTH_ENDPOINT.to_string(),
            token_endpoint: GOOGLE_TOKEN_ENDPOINT.to_string(),
            userinfo_endpoint: GOOGLE_USERINFO_ENDPOINT.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<bool>,
    name: Option<String>,
}

/// Google OAuth 2.0 authorization-code flow.
pub struct GoogleIdentityProvider {
    http: Client,
    config: GoogleOAuthConfig,
}

impl GoogleIdentityProvider {
    pub fn new(config: GoogleOAuthConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self { http, config })
    }

    async fn access_token(&self, code: &str) -> Result<String, IdentityError> {
        let response = self
            .http
            .post(&self.config.token_endpoint)
            .form(&[
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_url.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|err| IdentityError::AuthFailure(format!("token request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IdentityError::AuthFailure(format!(
                "token endpoint returned {status}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| IdentityError::AuthFailure(format!("unexpected token response: {err}")))?;
        Ok(token.access_token)
    }

    async fn user_info(&self, access_token: &str) -> Result<UserInfo, IdentityError> {
        let response = self
            .http
            .get(&self.config.userinfo_endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| IdentityError::AuthFailure(format!("userinfo request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IdentityError::AuthFailure(format!(
                "userinfo endpoint returned {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|err| IdentityError::AuthFailure(format!("unexpected userinfo response: {err}")))
    }
}

#[async_trait]
impl IdentityProvider for GoogleIdentityProvider {
    fn authorization_url(&self, state: &str) -> Result<String, IdentityError> {
        let url = Url::parse_with_params(
            &self.config.auth_endpoint,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_url.as_str()),
                ("response_type", "code"),
                ("scope", OAUTH_SCOPES),
                ("state", state),
                ("prompt", "select_account"),
            ],
        )
        .map_err(|err| IdentityError::AuthFailure(format!("invalid auth endpoint: {err}")))?;

        Ok(url.into())
    }

    #[instrument(skip_all)]
    async fn exchange_code(&self, code: &str) -> Result<VerifiedIdentity, IdentityError> {
        if code.trim().is_empty() {
            return Err(IdentityError::AuthFailure("missing authorization code".into()));
        }

        let access_token = self.access_token(code).await?;
        let info = self.user_info(&access_token).await?;

        let email = info
            .email
            .filter(|email| !email.trim().is_empty())
            .ok_or_else(|| IdentityError::AuthFailure("provider returned no email".into()))?;
        if info.email_verified != Some(true) {
            return Err(IdentityError::AuthFailure("email is not verified".into()));
        }

        Ok(VerifiedIdentity {
            email: normalize_email(&email),
            name: info.name,
        })
    }
}

/// Provider used when no OAuth client is configured; every sign-in fails.
pub struct DisabledIdentityProvider;

#[async_trait]
impl IdentityProvider for DisabledIdentityProvider {
    fn authorization_url(&self, _state: &str) -> Result<String, IdentityError> {
        Err(IdentityError::NotConfigured)
    }

    async fn exchange_code(&self, _code: &str) -> Result<VerifiedIdentity, IdentityError> {
        Err(IdentityError::NotConfigured)
    }
}

/// Fixed code-to-identity table for tests and local development.
#[derive(Default)]
pub struct StaticIdentityProvider {
    identities: HashMap<String, VerifiedIdentity>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_code(mut self, code: &str, email: &str) -> Self {
        self.identities.insert(
            code.to_string(),
            VerifiedIdentity {
                email: normalize_email(email),
                name: None,
            },
        );
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    fn authorization_url(&self, state: &str) -> Result<String, IdentityError> {
        Ok(format!("/auth/callback?code=dev&state={state}"))
    }

    async fn exchange_code(&self, code: &str) -> Result<VerifiedIdentity, IdentityError> {
        self.identities
            .get(code)
            .cloned()
            .ok_or_else(|| IdentityError::AuthFailure("unknown authorization code".into()))
    }
}

/// Admin email addresses, compared case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminAllowList {
    emails: BTreeSet<String>,
}

impl AdminAllowList {
    pub fn new<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let emails = emails
            .into_iter()
            .map(|email| normalize_email(email.as_ref()))
            .filter(|email| !email.is_empty())
            .collect();
        Self { emails }
    }

    /// Parses a comma separated list, ignoring blanks.
    pub fn parse(raw: &str) -> Self {
        Self::new(raw.split(','))
    }

    pub fn contains(&self, email: &str) -> bool {
        self.emails.contains(&normalize_email(email))
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }

    pub fn len(&self) -> usize {
        self.emails.len()
    }
}

/// Couples a provider with the allow-list.
#[derive(Clone)]
pub struct IdentityGate {
    provider: Arc<dyn IdentityProvider>,
    admins: AdminAllowList,
}

impl IdentityGate {
    pub fn new(provider: Arc<dyn IdentityProvider>, admins: AdminAllowList) -> Self {
        Self { provider, admins }
    }

    pub fn authorization_url(&self, state: &str) -> Result<String, IdentityError> {
        self.provider.authorization_url(state)
    }

    pub async fn authenticate(&self, code: &str) -> Result<VerifiedIdentity, IdentityError> {
        match self.provider.exchange_code(code).await {
            Ok(identity) => {
                info!(email = %identity.email, "sign-in verified");
                Ok(identity)
            }
            Err(err) => {
                warn!(error = %err, "sign-in rejected");
                Err(err)
            }
        }
    }

    pub fn authorize(&self, email: &str) -> bool {
        self.admins.contains(email)
    }

    pub fn admins(&self) -> &AdminAllowList {
        &self.admins
    }
}
