//! Status transitions and the fields derived from them.
//!
//! [`plan_transition`] is pure: it validates a move and returns the updated
//! record. [`WorkflowEngine`] pairs it with a store so that a transition is
//! computed and persisted in one call.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, SubsecRound, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::policy::{eligibility_date, program_date, PayoutMonth};
use crate::referral::{Referral, ReferralId};
use crate::status::ReferralStatus;
use crate::store::{Column, FieldUpdates, ReferralStore, StoreError};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("referral not found: {0}")]
    NotFound(ReferralId),
    #[error("cannot move a referral from {from} to {to}")]
    InvalidTransition {
        from: ReferralStatus,
        to: ReferralStatus,
    },
    #[error("{field} is required to move a referral to {status}")]
    MissingRequiredField {
        field: &'static str,
        status: ReferralStatus,
    },
    #[error("{field} is out of range: {value}")]
    InvalidDate { field: &'static str, value: NaiveDate },
    #[error("{}", eligibility_message(.eligible_on))]
    EligibilityNotReached { eligible_on: Option<NaiveDate> },
    #[error("failed to load referral: {0}")]
    StoreRead(StoreError),
    #[error("failed to save referral: {0}")]
    StoreWrite(StoreError),
    #[error("status change was not saved: {0}")]
    PersistenceFailure(StoreError),
}

fn eligibility_message(eligible_on: &Option<NaiveDate>) -> String {
    match eligible_on {
        Some(date) => format!("referral is not eligible until {date}"),
        None => "referral has no 60-day date yet".to_string(),
    }
}

/// Extra inputs a transition may need.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TransitionFields {
    #[serde(default)]
    pub hire_date: Option<NaiveDate>,
    #[serde(default)]
    pub paid_date: Option<NaiveDate>,
    /// Skips the reachability check. Required fields are still enforced.
    #[serde(default)]
    pub override_workflow: bool,
}

/// Validates a move from `referral.status` to `target` and returns the record
/// as it should be stored afterwards. Eligibility is judged on the UTC date.
pub fn plan_transition(
    referral: &Referral,
    target: ReferralStatus,
    actor: &str,
    at: DateTime<Utc>,
    fields: &TransitionFields,
) -> Result<Referral, WorkflowError> {
    plan_transition_in(referral, target, actor, at, Utc.fix(), fields)
}

/// [`plan_transition`] with eligibility judged on the date at `offset`.
pub fn plan_transition_in(
    referral: &Referral,
    target: ReferralStatus,
    actor: &str,
    at: DateTime<Utc>,
    offset: FixedOffset,
    fields: &TransitionFields,
) -> Result<Referral, WorkflowError> {
    let from = referral.status;
    if !from.can_transition_to(target) {
        // The override relaxes the forward path; it never reopens a closed referral.
        if !fields.override_workflow || from == target || from.is_absorbing() {
            return Err(WorkflowError::InvalidTransition { from, to: target });
        }
        warn!(
            referral_id = %referral.referral_id,
            from = %from,
            to = %target,
            actor,
            "admin override of status workflow"
        );
    }

    let mut next = referral.clone();

    match target {
        ReferralStatus::Hired => {
            let hire_date = fields
                .hire_date
                .ok_or(WorkflowError::MissingRequiredField {
                    field: "hire_date",
                    status: target,
                })?;
            let sixty_day_date = eligibility_date(hire_date).ok_or(WorkflowError::InvalidDate {
                field: "hire_date",
                value: hire_date,
            })?;
            let payout_month =
                PayoutMonth::following(sixty_day_date).ok_or(WorkflowError::InvalidDate {
                    field: "hire_date",
                    value: hire_date,
                })?;

            next.hire_date = Some(hire_date);
            next.sixty_day_date = Some(sixty_day_date);
            next.payout_month = Some(payout_month);
        }
        ReferralStatus::Eligible => {
            let eligible_on = referral.sixty_day_date;
            if !eligible_on.is_some_and(|date| program_date(at, offset) >= date) {
                return Err(WorkflowError::EligibilityNotReached { eligible_on });
            }
        }
        ReferralStatus::Paid => {
            let paid_date = fields
                .paid_date
                .ok_or(WorkflowError::MissingRequiredField {
                    field: "paid_date",
                    status: target,
                })?;
            next.paid_date = Some(paid_date);
        }
        _ => {}
    }

    // Only an override can move backwards; keep the derived fields consistent
    // with the state it lands on.
    if !target.has_reached_hire() && !target.is_closing() {
        next.hire_date = None;
        next.sixty_day_date = None;
        next.payout_month = None;
    }
    if target != ReferralStatus::Paid {
        next.paid_date = None;
    }

    next.status = target;
    // Stores keep whole seconds.
    next.status_updated_at = at.trunc_subsecs(0);
    next.status_updated_by = actor.to_string();
    Ok(next)
}

/// Applies workflow rules and persists the result through a [`ReferralStore`].
#[derive(Clone)]
pub struct WorkflowEngine {
    store: Arc<dyn ReferralStore>,
    program_offset: FixedOffset,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn ReferralStore>) -> Self {
        Self {
            store,
            program_offset: Utc.fix(),
        }
    }

    /// Offset whose calendar date decides when a hire becomes eligible.
    pub fn with_program_offset(mut self, offset: FixedOffset) -> Self {
        self.program_offset = offset;
        self
    }

    pub fn store(&self) -> &Arc<dyn ReferralStore> {
        &self.store
    }

    async fn load(&self, id: &ReferralId) -> Result<Referral, WorkflowError> {
        self.store.find_by_id(id).await.map_err(|err| match err {
            StoreError::NotFound(id) => WorkflowError::NotFound(id),
            other => WorkflowError::StoreRead(other),
        })
    }

    /// Validates the move, computes derived fields and writes only the changed
    /// columns. On `PersistenceFailure` the stored row is unchanged as far as
    /// the caller can tell.
    #[instrument(skip(self, referral, fields), fields(referral_id = %referral.referral_id, from = %referral.status, to = %target))]
    pub async fn apply_transition(
        &self,
        referral: &Referral,
        target: ReferralStatus,
        actor: &str,
        at: DateTime<Utc>,
        fields: &TransitionFields,
    ) -> Result<Referral, WorkflowError> {
        let next = plan_transition_in(referral, target, actor, at, self.program_offset, fields)?;
        let columns = self.persist_transition(referral, &next).await?;

        info!(actor, columns, "referral status updated");
        Ok(next)
    }

    async fn persist_transition(
        &self,
        before: &Referral,
        after: &Referral,
    ) -> Result<usize, WorkflowError> {
        let updates = FieldUpdates::diff(before, after);
        self.store
            .update_fields(&before.referral_id, &updates)
            .await
            .map_err(|err| match err {
                StoreError::NotFound(id) => WorkflowError::NotFound(id),
                other => {
                    error!(error = %other, "status change computed but not persisted");
                    WorkflowError::PersistenceFailure(other)
                }
            })?;
        Ok(updates.len())
    }

    pub async fn transition_by_id(
        &self,
        id: &ReferralId,
        target: ReferralStatus,
        actor: &str,
        at: DateTime<Utc>,
        fields: &TransitionFields,
    ) -> Result<Referral, WorkflowError> {
        let referral = self.load(id).await?;
        self.apply_transition(&referral, target, actor, at, fields)
            .await
    }

    /// Applies an optional transition and an optional notes change as one
    /// write. A failed write leaves neither in place: with a status change it
    /// is a `PersistenceFailure`, for notes alone a `StoreWrite`.
    #[instrument(skip(self, admin_notes, fields))]
    pub async fn update_referral(
        &self,
        id: &ReferralId,
        target: Option<ReferralStatus>,
        admin_notes: Option<&str>,
        actor: &str,
        at: DateTime<Utc>,
        fields: &TransitionFields,
    ) -> Result<Referral, WorkflowError> {
        let Some(target) = target else {
            return match admin_notes {
                Some(notes) => self.update_admin_notes(id, notes, actor).await,
                None => self.load(id).await,
            };
        };

        let referral = self.load(id).await?;
        let mut next =
            plan_transition_in(&referral, target, actor, at, self.program_offset, fields)?;
        if let Some(notes) = admin_notes {
            next.admin_notes = notes.trim().to_string();
        }
        let columns = self.persist_transition(&referral, &next).await?;

        info!(actor, columns, "referral status and notes updated");
        Ok(next)
    }

    /// Replaces the admin notes. Status metadata is left untouched.
    #[instrument(skip(self, notes))]
    pub async fn update_admin_notes(
        &self,
        id: &ReferralId,
        notes: &str,
        actor: &str,
    ) -> Result<Referral, WorkflowError> {
        let mut referral = self.load(id).await?;
        let notes = notes.trim();
        if referral.admin_notes == notes {
            return Ok(referral);
        }

        let updates = FieldUpdates::new().set(Column::AdminNotes, notes);
        self.store
            .update_fields(id, &updates)
            .await
            .map_err(WorkflowError::StoreWrite)?;

        info!("admin notes updated");
        referral.admin_notes = notes.to_string();
        Ok(referral)
    }

    #[instrument(skip(self))]
    pub async fn set_archived(
        &self,
        id: &ReferralId,
        archived: bool,
    ) -> Result<Referral, WorkflowError> {
        let mut referral = self.load(id).await?;
        if referral.is_archived == archived {
            return Ok(referral);
        }

        let updates =
            FieldUpdates::new().set(Column::IsArchived, crate::store::row::encode_bool(archived));
        self.store
            .update_fields(id, &updates)
            .await
            .map_err(WorkflowError::StoreWrite)?;

        info!("archive flag updated");
        referral.is_archived = archived;
        Ok(referral)
    }
}
