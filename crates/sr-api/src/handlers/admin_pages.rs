use axum::{
    Form,
    extract::{Path, Query, State},
    response::{Html, IntoResponse, Redirect, Response},
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use sr_common::api::ReferralFilter;
use sr_common::reporting::{dashboard_stats, weekly_summary};
use sr_common::workflow::TransitionFields;
use sr_common::{ReferralId, ReferralStatus};
use tracing::warn;

use super::parse_referral_id;
use crate::SharedState;
use crate::auth::AdminPage;
use crate::error::{ApiError, PageError};
use crate::views;

fn detail_path(id: &ReferralId) -> String {
    format!("/admin/referrals/{id}")
}

pub async fn dashboard(
    State(state): State<SharedState>,
    admin: AdminPage,
) -> Result<Html<String>, PageError> {
    let referrals = state.store.list_all().await?;
    let stats = dashboard_stats(&referrals);
    let summary = weekly_summary(&referrals, Utc::now());
    Ok(Html(views::admin_dashboard(&admin.identity, &stats, &summary)))
}

pub async fn list(
    State(state): State<SharedState>,
    admin: AdminPage,
    Query(filter): Query<ReferralFilter>,
) -> Result<Html<String>, PageError> {
    let referrals = state.store.list_all().await?;
    let selected = filter.apply(&referrals);
    Ok(Html(views::admin_list(&admin.identity, &filter, &selected)))
}

pub async fn detail(
    State(state): State<SharedState>,
    admin: AdminPage,
    Path(id): Path<String>,
) -> Result<Html<String>, PageError> {
    let id = parse_referral_id(&id)?;
    let referral = state.store.find_by_id(&id).await?;
    Ok(Html(views::admin_detail(&admin.identity, &referral, None)))
}

/// Status form as posted by the detail page. Date inputs arrive as empty
/// strings when left blank.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StatusForm {
    status: String,
    hire_date: String,
    paid_date: String,
    override_workflow: Option<String>,
}

fn form_date(field: &str, raw: &str) -> Result<Option<NaiveDate>, ApiError> {
    match raw.trim() {
        "" => Ok(None),
        value => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| ApiError::BadRequest(format!("{field} must be a date (YYYY-MM-DD)"))),
    }
}

impl StatusForm {
    fn target(&self) -> Result<ReferralStatus, ApiError> {
        self.status
            .trim()
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("unknown status: {}", self.status)))
    }

    fn fields(&self) -> Result<TransitionFields, ApiError> {
        Ok(TransitionFields {
            hire_date: form_date("hire_date", &self.hire_date)?,
            paid_date: form_date("paid_date", &self.paid_date)?,
            override_workflow: self
                .override_workflow
                .as_deref()
                .is_some_and(|value| matches!(value, "true" | "on" | "1")),
        })
    }
}

pub async fn change_status(
    State(state): State<SharedState>,
    admin: AdminPage,
    Path(id): Path<String>,
    Form(form): Form<StatusForm>,
) -> Result<Response, PageError> {
    let id = parse_referral_id(&id)?;
    let target = form.target()?;
    let fields = form.fields()?;

    let result = state
        .workflow
        .transition_by_id(&id, target, &admin.identity.email, Utc::now(), &fields)
        .await;

    match result {
        Ok(_) => Ok(Redirect::to(&detail_path(&id)).into_response()),
        Err(err) => {
            let message = err.to_string();
            let err = ApiError::from(err);
            if !matches!(err, ApiError::Conflict(_) | ApiError::BadRequest(_)) {
                return Err(err.into());
            }

            warn!(referral_id = %id, error = %message, "status change rejected");
            let referral = state.store.find_by_id(&id).await?;
            Ok((
                err.status_code(),
                Html(views::admin_detail(&admin.identity, &referral, Some(&message))),
            )
                .into_response())
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NotesForm {
    admin_notes: String,
}

pub async fn save_notes(
    State(state): State<SharedState>,
    admin: AdminPage,
    Path(id): Path<String>,
    Form(form): Form<NotesForm>,
) -> Result<Redirect, PageError> {
    let id = parse_referral_id(&id)?;
    state
        .workflow
        .update_admin_notes(&id, &form.admin_notes, &admin.identity.email)
        .await?;
    Ok(Redirect::to(&detail_path(&id)))
}

async fn set_archived(state: &SharedState, id: &str, archived: bool) -> Result<Redirect, PageError> {
    let id = parse_referral_id(id)?;
    state.workflow.set_archived(&id, archived).await?;
    Ok(Redirect::to(&detail_path(&id)))
}

pub async fn archive(
    State(state): State<SharedState>,
    _admin: AdminPage,
    Path(id): Path<String>,
) -> Result<Redirect, PageError> {
    set_archived(&state, &id, true).await
}

pub async fn unarchive(
    State(state): State<SharedState>,
    _admin: AdminPage,
    Path(id): Path<String>,
) -> Result<Redirect, PageError> {
    set_archived(&state, &id, false).await
}
