use chrono::{DateTime, SubsecRound, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::policy::bonus_for_position_type;
use crate::referral::{normalize_email, Referral, ReferralId, SYSTEM_ACTOR};
use crate::status::ReferralStatus;
use crate::store::{ReferralStore, StoreError};

const ID_ATTEMPTS: usize = 3;
const DEFAULT_ALREADY_APPLIED: &str = "Not yet";

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("{field}: {reason}")]
    Validation {
        field: &'static str,
        reason: &'static str,
    },
    #[error("failed to save referral: {0}")]
    Store(#[from] StoreError),
}

/// Staff-entered fields of a new referral.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SubmitReferralRequest {
    pub referrer_name: String,
    pub referrer_email: String,
    pub referrer_school: String,
    pub candidate_name: String,
    pub candidate_email: String,
    pub candidate_phone: String,
    pub position: String,
    pub position_type: String,
    pub role_fit: String,
    pub relationship: String,
    pub already_applied: String,
    pub notes: String,
}

impl SubmitReferralRequest {
    /// Checks required fields in form order and reports the first problem.
    pub fn validate(&self) -> Result<(), SubmissionError> {
        let required: [(&'static str, &str); 8] = [
            ("referrer_name", &self.referrer_name),
            ("referrer_email", &self.referrer_email),
            ("referrer_school", &self.referrer_school),
            ("candidate_name", &self.candidate_name),
            ("candidate_email", &self.candidate_email),
            ("position", &self.position),
            ("position_type", &self.position_type),
            ("relationship", &self.relationship),
        ];

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(SubmissionError::Validation {
                    field,
                    reason: "is required",
                });
            }
        }

        for (field, value) in [
            ("referrer_email", &self.referrer_email),
            ("candidate_email", &self.candidate_email),
        ] {
            if !looks_like_email(value) {
                return Err(SubmissionError::Validation {
                    field,
                    reason: "must be an email address",
                });
            }
        }

        Ok(())
    }

    /// Builds the stored record. The bonus is fixed here and never recomputed.
    /// Timestamps are kept to whole seconds, the precision every store keeps.
    pub fn into_referral(self, referral_id: ReferralId, submitted_at: DateTime<Utc>) -> Referral {
        let submitted_at = submitted_at.trunc_subsecs(0);
        let already_applied = match self.already_applied.trim() {
            "" => DEFAULT_ALREADY_APPLIED.to_string(),
            answer => answer.to_string(),
        };
        let position_type = self.position_type.trim().to_string();

        Referral {
            referral_id,
            submitted_at,
            referrer_name: self.referrer_name.trim().to_string(),
            referrer_email: normalize_email(&self.referrer_email),
            referrer_school: self.referrer_school.trim().to_string(),
            candidate_name: self.candidate_name.trim().to_string(),
            candidate_email: normalize_email(&self.candidate_email),
            candidate_phone: self.candidate_phone.trim().to_string(),
            position: self.position.trim().to_string(),
            bonus_amount: bonus_for_position_type(&position_type),
            position_type,
            role_fit: self.role_fit.trim().to_string(),
            relationship: self.relationship.trim().to_string(),
            already_applied,
            notes: self.notes.trim().to_string(),
            status: ReferralStatus::Submitted,
            status_updated_at: submitted_at,
            status_updated_by: SYSTEM_ACTOR.to_string(),
            hire_date: None,
            sixty_day_date: None,
            payout_month: None,
            paid_date: None,
            admin_notes: String::new(),
            is_archived: false,
        }
    }
}

fn looks_like_email(raw: &str) -> bool {
    let trimmed = raw.trim();
    match trimmed.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    }
}

/// Validates and stores a new referral, retrying with a fresh id if the
/// generated one is already taken.
#[instrument(skip(store, request))]
pub async fn submit_referral(
    store: &dyn ReferralStore,
    request: SubmitReferralRequest,
    submitted_at: DateTime<Utc>,
) -> Result<Referral, SubmissionError> {
    request.validate()?;

    let mut referral = request.into_referral(ReferralId::generate(), submitted_at);
    let mut attempt = 1;
    loop {
        match store.append(&referral).await {
            Ok(()) => break,
            Err(StoreError::DuplicateId(id)) if attempt < ID_ATTEMPTS => {
                warn!(referral_id = %id, attempt, "generated referral id collided");
                referral.referral_id = ReferralId::generate();
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }

    info!(
        referral_id = %referral.referral_id,
        bonus_amount = referral.bonus_amount,
        position_type = %referral.position_type,
        "referral submitted"
    );
    Ok(referral)
}
