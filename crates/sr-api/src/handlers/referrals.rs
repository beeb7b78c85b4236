use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::Deserialize;
use sr_common::api::{
    LookupResponse, PublicReferral, StaffLookupResponse, StatusesResponse, SubmitReferralResponse,
};
use sr_common::reporting::{referrer_summary, staff_profile};
use sr_common::submission::{SubmitReferralRequest, submit_referral};
use sr_common::ReferralStatus;

use super::parse_referral_id;
use crate::SharedState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct EmailQuery {
    #[serde(default)]
    email: String,
}

impl EmailQuery {
    fn required(&self) -> Result<&str, ApiError> {
        match self.email.trim() {
            "" => Err(ApiError::BadRequest("email is required".into())),
            email => Ok(email),
        }
    }
}

pub async fn submit(
    State(state): State<SharedState>,
    Json(payload): Json<SubmitReferralRequest>,
) -> Result<(StatusCode, Json<SubmitReferralResponse>), ApiError> {
    let referral = submit_referral(state.store.as_ref(), payload, Utc::now()).await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitReferralResponse {
            success: true,
            referral_id: referral.referral_id,
            bonus_amount: referral.bonus_amount,
        }),
    ))
}

pub async fn lookup(
    State(state): State<SharedState>,
    Query(query): Query<EmailQuery>,
) -> Result<Json<LookupResponse>, ApiError> {
    let email = query.required()?;
    let referrals = state.store.list_all().await?;
    let summary = referrer_summary(&referrals, email);
    Ok(Json(LookupResponse::from(&summary)))
}

pub async fn get_referral(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<PublicReferral>, ApiError> {
    let id = parse_referral_id(&id)?;
    let referral = state.store.find_by_id(&id).await?;
    Ok(Json(PublicReferral::from(&referral)))
}

pub async fn staff_lookup(
    State(state): State<SharedState>,
    Query(query): Query<EmailQuery>,
) -> Result<Json<StaffLookupResponse>, ApiError> {
    let email = query.required()?;
    let referrals = state.store.list_all().await?;

    let response = match staff_profile(&referrals, email) {
        Some(profile) => StaffLookupResponse {
            found: true,
            name: Some(profile.name),
            school: Some(profile.school),
        },
        None => StaffLookupResponse {
            found: false,
            name: None,
            school: None,
        },
    };
    Ok(Json(response))
}

pub async fn statuses() -> Json<StatusesResponse> {
    Json(StatusesResponse {
        statuses: ReferralStatus::ALL.to_vec(),
    })
}
