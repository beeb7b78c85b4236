//! Request and response bodies shared by the HTTP layer.

pub mod admin;
pub mod referral;

pub use admin::{
    AdminReferralList, AdminReferralPatch, ArchivedFilter, AuthStatusResponse, ReferralFilter,
};
pub use referral::{
    LookupResponse, PublicReferral, StaffLookupResponse, StatusesResponse,
    SubmitReferralResponse,
};
