use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::policy::PayoutMonth;
use crate::status::ReferralStatus;

const REFERRAL_ID_LEN: usize = 8;
const REFERRAL_ID_MAX_LEN: usize = 36;

/// Actor recorded on rows the application writes by itself.
pub const SYSTEM_ACTOR: &str = "System";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid referral id: {0:?}")]
pub struct InvalidReferralId(pub String);

/// Short uppercase identifier handed to referrers, e.g. `3F9A0C1B`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReferralId(String);

impl ReferralId {
    pub fn generate() -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        Self(simple[..REFERRAL_ID_LEN].to_ascii_uppercase())
    }

    pub fn parse(raw: &str) -> Result<Self, InvalidReferralId> {
        let trimmed = raw.trim();
        let valid = !trimmed.is_empty()
            && trimmed.len() <= REFERRAL_ID_MAX_LEN
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-');

        if valid {
            Ok(Self(trimmed.to_ascii_uppercase()))
        } else {
            Err(InvalidReferralId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReferralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ReferralId {
    type Error = InvalidReferralId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ReferralId> for String {
    fn from(value: ReferralId) -> Self {
        value.0
    }
}

/// One staff nomination and everything the admin team has recorded on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Referral {
    pub referral_id: ReferralId,
    pub submitted_at: DateTime<Utc>,
    pub referrer_name: String,
    pub referrer_email: String,
    pub referrer_school: String,
    pub candidate_name: String,
    pub candidate_email: String,
    pub candidate_phone: String,
    pub position: String,
    pub position_type: String,
    pub role_fit: String,
    pub bonus_amount: u32,
    pub relationship: String,
    pub already_applied: String,
    pub notes: String,
    pub status: ReferralStatus,
    pub status_updated_at: DateTime<Utc>,
    pub status_updated_by: String,
    pub hire_date: Option<NaiveDate>,
    pub sixty_day_date: Option<NaiveDate>,
    pub payout_month: Option<PayoutMonth>,
    pub paid_date: Option<NaiveDate>,
    pub admin_notes: String,
    pub is_archived: bool,
}

impl Referral {
    pub fn is_referred_by(&self, email: &str) -> bool {
        self.referrer_email.eq_ignore_ascii_case(email.trim())
    }
}

/// Lower-cased, trimmed form used for every stored email.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_short_uppercase_hex() {
        let id = ReferralId::generate();
        assert_eq!(id.as_str().len(), 8);
        assert!(id
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn parse_normalizes_case_and_rejects_garbage() {
        assert_eq!(ReferralId::parse(" ab12cd34 ").unwrap().as_str(), "AB12CD34");
        assert!(ReferralId::parse("").is_err());
        assert!(ReferralId::parse("a b").is_err());
        assert!(ReferralId::parse("'; DROP").is_err());
    }

    #[test]
    fn normalize_email_lowercases_and_trims() {
        assert_eq!(normalize_email("  Jane.Doe@Example.ORG "), "jane.doe@example.org");
    }
}
