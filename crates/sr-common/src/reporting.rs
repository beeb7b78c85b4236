//! Aggregates computed over the full referral list.

use chrono::{DateTime, Days, Duration, Utc};
use serde::Serialize;

use crate::referral::{Referral, ReferralId};
use crate::status::ReferralStatus;

pub const NEW_REFERRAL_WINDOW_DAYS: i64 = 7;
pub const UPCOMING_ELIGIBILITY_WINDOW_DAYS: u64 = 14;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub status: ReferralStatus,
    pub count: usize,
}

/// Admin dashboard figures. Archived referrals are excluded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub total: usize,
    pub pending_review: usize,
    pub in_progress: usize,
    pub hired_pending: usize,
    pub paid_count: usize,
    pub bonuses_paid: u64,
    pub bonuses_pending: u64,
    pub not_hired: usize,
    pub by_status: Vec<StatusCount>,
}

fn bonus_total<'a>(referrals: impl IntoIterator<Item = &'a Referral>) -> u64 {
    referrals.into_iter().map(|r| u64::from(r.bonus_amount)).sum()
}

fn active(referrals: &[Referral]) -> impl Iterator<Item = &Referral> {
    referrals.iter().filter(|r| !r.is_archived)
}

fn count_in(referrals: &[Referral], statuses: &[ReferralStatus]) -> usize {
    active(referrals)
        .filter(|r| statuses.contains(&r.status))
        .count()
}

pub fn dashboard_stats(referrals: &[Referral]) -> DashboardStats {
    use ReferralStatus::*;

    let by_status = ReferralStatus::ALL
        .into_iter()
        .map(|status| StatusCount {
            status,
            count: count_in(referrals, &[status]),
        })
        .collect();

    DashboardStats {
        total: active(referrals).count(),
        pending_review: count_in(referrals, &[Submitted, UnderReview]),
        in_progress: count_in(referrals, &[CandidateApplied, Interviewing]),
        hired_pending: count_in(referrals, &[Hired, Eligible]),
        paid_count: count_in(referrals, &[Paid]),
        bonuses_paid: bonus_total(active(referrals).filter(|r| r.status == Paid)),
        bonuses_pending: bonus_total(
            active(referrals).filter(|r| matches!(r.status, Hired | Eligible)),
        ),
        not_hired: count_in(referrals, &ReferralStatus::CLOSING),
        by_status,
    }
}

/// One referrer's referrals with the bonus totals shown on the lookup page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferrerSummary<'a> {
    pub referrals: Vec<&'a Referral>,
    pub total_pending: u64,
    pub total_paid: u64,
}

pub fn referrer_summary<'a>(referrals: &'a [Referral], email: &str) -> ReferrerSummary<'a> {
    let mine: Vec<&Referral> = referrals
        .iter()
        .filter(|r| r.is_referred_by(email))
        .collect();

    ReferrerSummary {
        total_pending: bonus_total(mine.iter().copied().filter(|r| r.status.is_bonus_pending())),
        total_paid: bonus_total(
            mine.iter()
                .copied()
                .filter(|r| r.status == ReferralStatus::Paid),
        ),
        referrals: mine,
    }
}

/// Staff lookup by referral id or, when the query contains `@`, by referrer
/// email.
pub fn lookup<'a>(referrals: &'a [Referral], query: &str) -> ReferrerSummary<'a> {
    let query = query.trim();
    if query.contains('@') {
        return referrer_summary(referrals, query);
    }

    let found: Vec<&Referral> = ReferralId::parse(query)
        .ok()
        .and_then(|id| referrals.iter().find(|r| r.referral_id == id))
        .into_iter()
        .collect();

    ReferrerSummary {
        total_pending: bonus_total(found.iter().copied().filter(|r| r.status.is_bonus_pending())),
        total_paid: bonus_total(
            found
                .iter()
                .copied()
                .filter(|r| r.status == ReferralStatus::Paid),
        ),
        referrals: found,
    }
}

/// Name and school from the referrer's earliest referral, for form auto-fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaffProfile {
    pub name: String,
    pub school: String,
}

pub fn staff_profile(referrals: &[Referral], email: &str) -> Option<StaffProfile> {
    referrals
        .iter()
        .find(|r| r.is_referred_by(email))
        .map(|r| StaffProfile {
            name: r.referrer_name.clone(),
            school: r.referrer_school.clone(),
        })
}

/// Weekly roll-up for the talent team. Archived referrals are excluded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklySummary<'a> {
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub new_this_week: Vec<&'a Referral>,
    pub needs_review: Vec<&'a Referral>,
    pub interviewing: Vec<&'a Referral>,
    pub hired_waiting: Vec<&'a Referral>,
    pub upcoming_eligible: Vec<&'a Referral>,
    pub ready_for_payout: Vec<&'a Referral>,
    pub ready_for_payout_total: u64,
    pub total_pending_bonus: u64,
    pub total_paid_bonus: u64,
}

impl WeeklySummary<'_> {
    pub fn has_action_items(&self) -> bool {
        !self.needs_review.is_empty()
            || !self.ready_for_payout.is_empty()
            || !self.upcoming_eligible.is_empty()
    }
}

pub fn weekly_summary(referrals: &[Referral], now: DateTime<Utc>) -> WeeklySummary<'_> {
    use ReferralStatus::*;

    let week_ago = now - Duration::days(NEW_REFERRAL_WINDOW_DAYS);
    let today = now.date_naive();
    let horizon = today
        .checked_add_days(Days::new(UPCOMING_ELIGIBILITY_WINDOW_DAYS))
        .unwrap_or(today);

    let with_status = |status: ReferralStatus| {
        active(referrals)
            .filter(move |r| r.status == status)
            .collect::<Vec<_>>()
    };

    let ready_for_payout = with_status(Eligible);

    WeeklySummary {
        generated_at: now,
        total: active(referrals).count(),
        new_this_week: active(referrals)
            .filter(|r| r.submitted_at > week_ago)
            .collect(),
        needs_review: active(referrals)
            .filter(|r| matches!(r.status, Submitted | UnderReview))
            .collect(),
        interviewing: with_status(Interviewing),
        hired_waiting: with_status(Hired),
        upcoming_eligible: active(referrals)
            .filter(|r| r.status == Hired)
            .filter(|r| {
                r.sixty_day_date
                    .is_some_and(|date| today <= date && date <= horizon)
            })
            .collect(),
        ready_for_payout_total: bonus_total(ready_for_payout.iter().copied()),
        ready_for_payout,
        total_pending_bonus: bonus_total(
            active(referrals).filter(|r| matches!(r.status, Hired | Eligible)),
        ),
        total_paid_bonus: bonus_total(active(referrals).filter(|r| r.status == Paid)),
    }
}
