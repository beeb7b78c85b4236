pub mod api;
pub mod db;
pub mod identity;
pub mod logging;
pub mod policy;
pub mod referral;
pub mod reporting;
pub mod status;
pub mod store;
pub mod submission;
pub mod workflow;

pub use referral::{Referral, ReferralId};
pub use status::ReferralStatus;
pub use store::{ReferralStore, StoreError};
pub use workflow::{TransitionFields, WorkflowEngine, WorkflowError};
