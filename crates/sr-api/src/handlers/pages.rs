use axum::{
    Form,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use sr_common::reporting::lookup as lookup_referrals;
use sr_common::submission::{SubmissionError, SubmitReferralRequest, submit_referral};

use crate::SharedState;
use crate::error::PageError;
use crate::views;

#[derive(Debug, Default, Deserialize)]
pub struct LookupQuery {
    #[serde(default)]
    q: String,
}

pub async fn index() -> Html<String> {
    Html(views::submission_form(&SubmitReferralRequest::default(), None))
}

pub async fn submit(
    State(state): State<SharedState>,
    Form(form): Form<SubmitReferralRequest>,
) -> Result<Response, PageError> {
    let values = form.clone();
    match submit_referral(state.store.as_ref(), form, Utc::now()).await {
        Ok(referral) => Ok((
            StatusCode::CREATED,
            Html(views::submission_confirmation(&referral)),
        )
            .into_response()),
        Err(err @ SubmissionError::Validation { .. }) => Ok((
            StatusCode::BAD_REQUEST,
            Html(views::submission_form(&values, Some(&err.to_string()))),
        )
            .into_response()),
        Err(SubmissionError::Store(err)) => Err(err.into()),
    }
}

pub async fn lookup(
    State(state): State<SharedState>,
    Query(query): Query<LookupQuery>,
) -> Result<Html<String>, PageError> {
    let q = query.q.trim();
    if q.is_empty() {
        return Ok(Html(views::lookup_page("", None)));
    }

    let referrals = state.store.list_all().await?;
    let summary = lookup_referrals(&referrals, q);
    Ok(Html(views::lookup_page(q, Some(&summary))))
}
