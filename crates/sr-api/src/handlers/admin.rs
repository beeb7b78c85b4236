use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::Utc;
use sr_common::api::{AdminReferralList, AdminReferralPatch, ReferralFilter};
use sr_common::reporting::{DashboardStats, dashboard_stats, weekly_summary};
use sr_common::Referral;
use tracing::info;

use super::parse_referral_id;
use crate::SharedState;
use crate::auth::AdminUser;
use crate::error::ApiError;

pub async fn list_referrals(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Query(filter): Query<ReferralFilter>,
) -> Result<Json<AdminReferralList>, ApiError> {
    let referrals = state.store.list_all().await?;
    let selected = filter.apply(&referrals).into_iter().cloned().collect();
    Ok(Json(AdminReferralList {
        referrals: selected,
    }))
}

pub async fn get_referral(
    State(state): State<SharedState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<Json<Referral>, ApiError> {
    let id = parse_referral_id(&id)?;
    Ok(Json(state.store.find_by_id(&id).await?))
}

/// Applies a status transition and/or replaces the admin notes. Both land in
/// one store write, so a failure leaves neither applied.
pub async fn update_referral(
    State(state): State<SharedState>,
    admin: AdminUser,
    Path(id): Path<String>,
    Json(patch): Json<AdminReferralPatch>,
) -> Result<Json<Referral>, ApiError> {
    let id = parse_referral_id(&id)?;
    if patch.is_empty() {
        return Err(ApiError::BadRequest(
            "expected a status or admin_notes to update".into(),
        ));
    }
    if patch.status.is_none() && (patch.hire_date.is_some() || patch.paid_date.is_some()) {
        return Err(ApiError::BadRequest(
            "hire_date and paid_date are only accepted with a status change".into(),
        ));
    }

    let referral = state
        .workflow
        .update_referral(
            &id,
            patch.status,
            patch.admin_notes.as_deref(),
            &admin.identity.email,
            Utc::now(),
            &patch.transition_fields(),
        )
        .await?;
    Ok(Json(referral))
}

async fn set_archived(
    state: &SharedState,
    admin: &AdminUser,
    id: &str,
    archived: bool,
) -> Result<Json<Referral>, ApiError> {
    let id = parse_referral_id(id)?;
    let referral = state.workflow.set_archived(&id, archived).await?;
    info!(referral_id = %id, archived, actor = %admin.identity.email, "archive requested");
    Ok(Json(referral))
}

pub async fn archive(
    State(state): State<SharedState>,
    admin: AdminUser,
    Path(id): Path<String>,
) -> Result<Json<Referral>, ApiError> {
    set_archived(&state, &admin, &id, true).await
}

pub async fn unarchive(
    State(state): State<SharedState>,
    admin: AdminUser,
    Path(id): Path<String>,
) -> Result<Json<Referral>, ApiError> {
    set_archived(&state, &admin, &id, false).await
}

pub async fn stats(
    State(state): State<SharedState>,
    _admin: AdminUser,
) -> Result<Json<DashboardStats>, ApiError> {
    let referrals = state.store.list_all().await?;
    Ok(Json(dashboard_stats(&referrals)))
}

pub async fn rollup(
    State(state): State<SharedState>,
    _admin: AdminUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let referrals = state.store.list_all().await?;
    let summary = weekly_summary(&referrals, Utc::now());
    let body = serde_json::to_value(&summary)
        .map_err(|err| ApiError::Internal(format!("failed to encode weekly summary: {err}")))?;
    Ok(Json(body))
}
