use chrono::NaiveDate;
use serde::{de, Deserialize, Deserializer, Serialize};
use strum::{AsRefStr, EnumString};

use crate::identity::VerifiedIdentity;
use crate::referral::Referral;
use crate::status::ReferralStatus;
use crate::workflow::TransitionFields;

/// Body of `PATCH /api/admin/referrals/:id`. Either part may be omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AdminReferralPatch {
    pub status: Option<ReferralStatus>,
    pub hire_date: Option<NaiveDate>,
    pub paid_date: Option<NaiveDate>,
    pub admin_notes: Option<String>,
    pub override_workflow: bool,
}

impl AdminReferralPatch {
    pub fn transition_fields(&self) -> TransitionFields {
        TransitionFields {
            hire_date: self.hire_date,
            paid_date: self.paid_date,
            override_workflow: self.override_workflow,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.admin_notes.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ArchivedFilter {
    #[default]
    Exclude,
    Include,
    Only,
}

impl ArchivedFilter {
    fn admits(self, referral: &Referral) -> bool {
        match self {
            ArchivedFilter::Exclude => !referral.is_archived,
            ArchivedFilter::Include => true,
            ArchivedFilter::Only => referral.is_archived,
        }
    }
}

/// Admin list filter, newest submissions first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReferralFilter {
    #[serde(deserialize_with = "blank_status_as_none")]
    pub status: Option<ReferralStatus>,
    pub archived: ArchivedFilter,
}

/// HTML forms submit `status=` for "all statuses".
fn blank_status_as_none<'de, D>(deserializer: D) -> Result<Option<ReferralStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(label) => label.parse().map(Some).map_err(de::Error::custom),
    }
}

impl ReferralFilter {
    pub fn apply<'a>(&self, referrals: &'a [Referral]) -> Vec<&'a Referral> {
        let mut selected: Vec<&Referral> = referrals
            .iter()
            .filter(|r| self.archived.admits(r))
            .filter(|r| self.status.map_or(true, |status| r.status == status))
            .collect();
        selected.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        selected
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdminReferralList {
    pub referrals: Vec<Referral>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthStatusResponse {
    pub authenticated: bool,
    pub is_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<VerifiedIdentity>,
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::store::row::fixtures;

    #[test]
    fn patch_accepts_status_labels_and_dates() {
        let patch: AdminReferralPatch = serde_json::from_value(serde_json::json!({
            "status": "Hired",
            "hire_date": "2024-01-01",
        }))
        .unwrap();

        assert_eq!(patch.status, Some(ReferralStatus::Hired));
        assert_eq!(
            patch.transition_fields().hire_date,
            NaiveDate::from_ymd_opt(2024, 1, 1)
        );
        assert!(!patch.override_workflow);
    }

    #[test]
    fn filter_hides_archived_and_sorts_newest_first() {
        let older = fixtures::referral("AAAA0001");
        let mut newer = fixtures::referral("AAAA0002");
        newer.submitted_at = older.submitted_at + Duration::days(1);
        let mut archived = fixtures::referral("AAAA0003");
        archived.is_archived = true;
        let referrals = vec![older, newer, archived];

        let ids: Vec<&str> = ReferralFilter::default()
            .apply(&referrals)
            .into_iter()
            .map(|r| r.referral_id.as_str())
            .collect();
        assert_eq!(ids, ["AAAA0002", "AAAA0001"]);

        let only = ReferralFilter {
            archived: ArchivedFilter::Only,
            ..Default::default()
        };
        assert_eq!(only.apply(&referrals).len(), 1);
        assert_eq!("include".parse::<ArchivedFilter>(), Ok(ArchivedFilter::Include));
    }
}
