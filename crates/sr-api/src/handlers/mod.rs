pub mod admin;
pub mod admin_pages;
pub mod health;
pub mod pages;
pub mod referrals;
pub mod session;

use sr_common::ReferralId;

use crate::error::ApiError;

fn parse_referral_id(raw: &str) -> Result<ReferralId, ApiError> {
    ReferralId::parse(raw).map_err(|err| ApiError::BadRequest(err.to_string()))
}
