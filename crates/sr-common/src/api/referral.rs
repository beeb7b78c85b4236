use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::PayoutMonth;
use crate::referral::{Referral, ReferralId};
use crate::reporting::ReferrerSummary;
use crate::status::ReferralStatus;

/// Referral as shown to staff. Admin notes and the archive flag stay private.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicReferral {
    pub referral_id: ReferralId,
    pub submitted_at: DateTime<Utc>,
    pub referrer_name: String,
    pub referrer_email: String,
    pub referrer_school: String,
    pub candidate_name: String,
    pub candidate_email: String,
    pub position: String,
    pub position_type: String,
    pub bonus_amount: u32,
    pub status: ReferralStatus,
    pub status_updated_at: DateTime<Utc>,
    pub hire_date: Option<NaiveDate>,
    pub sixty_day_date: Option<NaiveDate>,
    pub payout_month: Option<PayoutMonth>,
    pub paid_date: Option<NaiveDate>,
}

impl From<&Referral> for PublicReferral {
    fn from(referral: &Referral) -> Self {
        Self {
            referral_id: referral.referral_id.clone(),
            submitted_at: referral.submitted_at,
            referrer_name: referral.referrer_name.clone(),
            referrer_email: referral.referrer_email.clone(),
            referrer_school: referral.referrer_school.clone(),
            candidate_name: referral.candidate_name.clone(),
            candidate_email: referral.candidate_email.clone(),
            position: referral.position.clone(),
            position_type: referral.position_type.clone(),
            bonus_amount: referral.bonus_amount,
            status: referral.status,
            status_updated_at: referral.status_updated_at,
            hire_date: referral.hire_date,
            sixty_day_date: referral.sixty_day_date,
            payout_month: referral.payout_month,
            paid_date: referral.paid_date,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitReferralResponse {
    pub success: bool,
    pub referral_id: ReferralId,
    pub bonus_amount: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LookupResponse {
    pub referrals: Vec<PublicReferral>,
    pub total_pending: u64,
    pub total_paid: u64,
}

impl From<&ReferrerSummary<'_>> for LookupResponse {
    fn from(summary: &ReferrerSummary<'_>) -> Self {
        Self {
            referrals: summary
                .referrals
                .iter()
                .map(|referral| PublicReferral::from(*referral))
                .collect(),
            total_pending: summary.total_pending,
            total_paid: summary.total_paid,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StaffLookupResponse {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub school: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusesResponse {
    pub statuses: Vec<ReferralStatus>,
}
