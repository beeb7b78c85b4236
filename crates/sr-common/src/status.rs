use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::{Display, EnumString};

/// Lifecycle of a referral.
///
/// The primary path runs `Submitted` through `Paid` one step at a time. The
/// three closing states (`NotHired`, `CandidateLeft`, `Ineligible`) can be
/// reached from any open state and, like `Paid`, are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString)]
pub enum ReferralStatus {
    #[strum(serialize = "Submitted")]
    Submitted,
    #[strum(serialize = "Under Review")]
    UnderReview,
    #[strum(serialize = "Candidate Applied")]
    CandidateApplied,
    #[strum(serialize = "Interviewing")]
    Interviewing,
    #[strum(serialize = "Hired")]
    Hired,
    #[strum(serialize = "Eligible")]
    Eligible,
    #[strum(serialize = "Paid")]
    Paid,
    // Older sheets record candidates who stopped responding separately.
    #[strum(to_string = "Not Hired", serialize = "Withdrawn/Non-responsive")]
    NotHired,
    // Older sheets carry the long label.
    #[strum(to_string = "Candidate Left", serialize = "Candidate Left before 60 Days")]
    CandidateLeft,
    #[strum(serialize = "Ineligible")]
    Ineligible,
}

/// Colour family used when rendering a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTone {
    Open,
    Positive,
    Closed,
}

impl ReferralStatus {
    pub const ALL: [ReferralStatus; 10] = [
        ReferralStatus::Submitted,
        ReferralStatus::UnderReview,
        ReferralStatus::CandidateApplied,
        ReferralStatus::Interviewing,
        ReferralStatus::Hired,
        ReferralStatus::Eligible,
        ReferralStatus::Paid,
        ReferralStatus::NotHired,
        ReferralStatus::CandidateLeft,
        ReferralStatus::Ineligible,
    ];

    pub const PRIMARY_PATH: [ReferralStatus; 7] = [
        ReferralStatus::Submitted,
        ReferralStatus::UnderReview,
        ReferralStatus::CandidateApplied,
        ReferralStatus::Interviewing,
        ReferralStatus::Hired,
        ReferralStatus::Eligible,
        ReferralStatus::Paid,
    ];

    pub const CLOSING: [ReferralStatus; 3] = [
        ReferralStatus::NotHired,
        ReferralStatus::CandidateLeft,
        ReferralStatus::Ineligible,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ReferralStatus::Submitted => "Submitted",
            ReferralStatus::UnderReview => "Under Review",
            ReferralStatus::CandidateApplied => "Candidate Applied",
            ReferralStatus::Interviewing => "Interviewing",
            ReferralStatus::Hired => "Hired",
            ReferralStatus::Eligible => "Eligible",
            ReferralStatus::Paid => "Paid",
            ReferralStatus::NotHired => "Not Hired",
            ReferralStatus::CandidateLeft => "Candidate Left",
            ReferralStatus::Ineligible => "Ineligible",
        }
    }

    /// Ends the referral without a payout.
    pub fn is_closing(self) -> bool {
        Self::CLOSING.contains(&self)
    }

    /// No ordinary transition leaves this state.
    pub fn is_absorbing(self) -> bool {
        self == ReferralStatus::Paid || self.is_closing()
    }

    /// Statuses whose bonus is still owed to the referrer.
    pub fn is_bonus_pending(self) -> bool {
        !self.is_absorbing()
    }

    /// Hired, Eligible or Paid: the hire fields are populated.
    pub fn has_reached_hire(self) -> bool {
        matches!(
            self,
            ReferralStatus::Hired | ReferralStatus::Eligible | ReferralStatus::Paid
        )
    }

    /// The next state on the primary path, if any.
    pub fn next(self) -> Option<ReferralStatus> {
        let position = Self::PRIMARY_PATH.iter().position(|s| *s == self)?;
        Self::PRIMARY_PATH.get(position + 1).copied()
    }

    pub fn can_transition_to(self, target: ReferralStatus) -> bool {
        if self.is_absorbing() || self == target {
            return false;
        }

        target.is_closing() || self.next() == Some(target)
    }

    /// Every state reachable from `self` without an override, in display order.
    pub fn allowed_targets(self) -> Vec<ReferralStatus> {
        Self::ALL
            .into_iter()
            .filter(|target| self.can_transition_to(*target))
            .collect()
    }

    pub fn tone(self) -> StatusTone {
        match self {
            ReferralStatus::Hired | ReferralStatus::Eligible | ReferralStatus::Paid => {
                StatusTone::Positive
            }
            status if status.is_closing() => StatusTone::Closed,
            _ => StatusTone::Open,
        }
    }
}

impl Serialize for ReferralStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for ReferralStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.trim()
            .parse::<ReferralStatus>()
            .map_err(|_| serde::de::Error::custom(format!("unknown referral status: {raw}")))
    }
}
