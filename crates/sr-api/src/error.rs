use axum::{
    Json,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use serde::Serialize;
use std::{borrow::Cow, future::Future};
use thiserror::Error;
use tracing::{error, warn};

use sr_common::identity::IdentityError;
use sr_common::store::StoreError;
use sr_common::submission::SubmissionError;
use sr_common::workflow::WorkflowError;

use crate::views;

tokio::task_local! {
    static REQUEST_ID: String;
}

fn sanitize_message(message: &str) -> String {
    const MAX_LEN: usize = 240;

    let mut cleaned = message
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .replace(['\n', '\r'], " ");

    cleaned = cleaned
        .split_whitespace()
        .map(|token| {
            if token.contains("://") {
                "[redacted-url]".to_string()
            } else if let Some((base, _)) = token.split_once('?') {
                if base.is_empty() {
                    "[redacted-query]".to_string()
                } else {
                    format!("{base}?[redacted]")
                }
            } else if token.starts_with('/') || token.contains('\\') {
                "[redacted-path]".to_string()
            } else {
                token.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    if cleaned.len() > MAX_LEN {
        let mut cut = MAX_LEN;
        while !cleaned.is_char_boundary(cut) {
            cut -= 1;
        }
        cleaned.truncate(cut);
        cleaned.push_str("...");
    }

    if cleaned.trim().is_empty() {
        "unexpected error".to_string()
    } else {
        cleaned
    }
}

pub async fn with_request_id<Fut, T>(request_id: Option<String>, fut: Fut) -> T
where
    Fut: Future<Output = T>,
{
    if let Some(request_id) = request_id {
        REQUEST_ID.scope(request_id, fut).await
    } else {
        fut.await
    }
}

pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(|value| value.clone()).ok()
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("too many requests: {0}")]
    TooManyRequests(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("internal server error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
    request_id: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let request_id = current_request_id();
        self.log(request_id.as_deref());

        let body = Json(ErrorResponse {
            code,
            message: self.public_message().into_owned(),
            request_id,
        });

        (status, body).into_response()
    }
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::TooManyRequests(_) => "too_many_requests",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
            ApiError::StoreUnavailable(_) => "store_unavailable",
            ApiError::PersistenceFailure(_) => "persistence_failure",
            ApiError::Config(_) => "invalid_configuration",
            ApiError::Internal(_) => "internal_error",
        }
    }

    pub fn public_message(&self) -> Cow<'static, str> {
        match self {
            ApiError::BadRequest(msg) => Cow::Owned(sanitize_message(msg)),
            ApiError::Unauthorized(_) => Cow::Borrowed("unauthorized"),
            ApiError::Forbidden(_) => Cow::Borrowed("forbidden"),
            ApiError::NotFound(msg) => Cow::Owned(sanitize_message(msg)),
            ApiError::Conflict(msg) => Cow::Owned(sanitize_message(msg)),
            ApiError::TooManyRequests(_) => Cow::Borrowed("too many requests"),
            ApiError::ServiceUnavailable(_) => Cow::Borrowed("service unavailable"),
            ApiError::StoreUnavailable(_) => {
                Cow::Borrowed("referral data is temporarily unavailable")
            }
            ApiError::PersistenceFailure(_) => {
                Cow::Borrowed("the change could not be saved, please try again")
            }
            ApiError::Config(_) | ApiError::Internal(_) => Cow::Borrowed("internal server error"),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::StoreUnavailable(_) | ApiError::PersistenceFailure(_) => {
                StatusCode::BAD_GATEWAY
            }
            ApiError::Config(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn log(&self, request_id: Option<&str>) {
        let status = self.status_code();
        let request_id = request_id.unwrap_or("");
        if status.is_server_error() {
            error!(code = self.code(), status = %status, request_id, error = %self, "api_error");
        } else {
            warn!(code = self.code(), status = %status, request_id, error = %self, "api_error");
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(id) => ApiError::NotFound(format!("referral not found: {id}")),
            StoreError::DuplicateId(id) => {
                ApiError::Conflict(format!("referral id already exists: {id}"))
            }
            other => ApiError::StoreUnavailable(other.to_string()),
        }
    }
}

impl From<WorkflowError> for ApiError {
    fn from(value: WorkflowError) -> Self {
        match value {
            WorkflowError::NotFound(id) => ApiError::NotFound(format!("referral not found: {id}")),
            err @ (WorkflowError::InvalidTransition { .. }
            | WorkflowError::EligibilityNotReached { .. }) => ApiError::Conflict(err.to_string()),
            err @ (WorkflowError::MissingRequiredField { .. }
            | WorkflowError::InvalidDate { .. }) => ApiError::BadRequest(err.to_string()),
            err @ (WorkflowError::StoreRead(_) | WorkflowError::StoreWrite(_)) => {
                ApiError::StoreUnavailable(err.to_string())
            }
            err @ WorkflowError::PersistenceFailure(_) => {
                ApiError::PersistenceFailure(err.to_string())
            }
        }
    }
}

impl From<SubmissionError> for ApiError {
    fn from(value: SubmissionError) -> Self {
        match value {
            err @ SubmissionError::Validation { .. } => ApiError::BadRequest(err.to_string()),
            SubmissionError::Store(err) => err.into(),
        }
    }
}

impl From<IdentityError> for ApiError {
    fn from(value: IdentityError) -> Self {
        match value {
            IdentityError::AuthFailure(reason) => ApiError::Unauthorized(reason),
            IdentityError::NotConfigured => {
                ApiError::ServiceUnavailable("admin sign-in is not configured".into())
            }
        }
    }
}

/// [`ApiError`] rendered as an HTML page for the browser routes.
#[derive(Debug)]
pub struct PageError(pub ApiError);

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        self.0.log(current_request_id().as_deref());

        let body = views::error_page(status, &self.0.public_message());
        (status, Html(body)).into_response()
    }
}

impl From<ApiError> for PageError {
    fn from(value: ApiError) -> Self {
        PageError(value)
    }
}

impl From<StoreError> for PageError {
    fn from(value: StoreError) -> Self {
        PageError(value.into())
    }
}

impl From<WorkflowError> for PageError {
    fn from(value: WorkflowError) -> Self {
        PageError(value.into())
    }
}

impl From<IdentityError> for PageError {
    fn from(value: IdentityError) -> Self {
        PageError(value.into())
    }
}
