//! Referral persistence behind a narrow, swappable interface.
//!
//! Every backend models one table keyed by referral id whose columns are
//! listed by [`Column`]. The interface offers no transactions and no
//! optimistic locking: two admins updating the same row race and the last
//! write wins.

pub mod memory;
pub mod row;
pub mod sheets;
pub mod timing;

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::referral::{Referral, ReferralId};

pub use memory::MemoryReferralStore;
pub use sheets::{SheetsConfig, SheetsReferralStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("referral not found: {0}")]
    NotFound(ReferralId),
    #[error("referral id already exists: {0}")]
    DuplicateId(ReferralId),
    #[error("store read failed: {0}")]
    Read(String),
    #[error("store write failed: {0}")]
    Write(String),
    #[error("stored referral at {location} could not be decoded: {reason}")]
    Decode { location: String, reason: String },
}

#[async_trait]
pub trait ReferralStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;

    /// All referrals in stored order.
    async fn list_all(&self) -> Result<Vec<Referral>, StoreError>;

    /// Writes a new row. The id must not already be present.
    async fn append(&self, referral: &Referral) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: &ReferralId) -> Result<Referral, StoreError>;

    /// Overwrites only the named columns on the row matching `id`.
    async fn update_fields(&self, id: &ReferralId, fields: &FieldUpdates)
        -> Result<(), StoreError>;

    /// Cheap reachability check.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Table columns in sheet order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Column {
    ReferralId,
    SubmittedAt,
    ReferrerName,
    ReferrerEmail,
    ReferrerSchool,
    CandidateName,
    CandidateEmail,
    CandidatePhone,
    Position,
    PositionType,
    RoleFit,
    BonusAmount,
    Relationship,
    AlreadyApplied,
    Notes,
    Status,
    StatusUpdatedAt,
    StatusUpdatedBy,
    HireDate,
    SixtyDayDate,
    PayoutMonth,
    PaidDate,
    AdminNotes,
    IsArchived,
}

/// Storage type of a column, used by typed backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Timestamp,
    Date,
    Integer,
    Boolean,
}

impl Column {
    pub const ALL: [Column; 24] = [
        Column::ReferralId,
        Column::SubmittedAt,
        Column::ReferrerName,
        Column::ReferrerEmail,
        Column::ReferrerSchool,
        Column::CandidateName,
        Column::CandidateEmail,
        Column::CandidatePhone,
        Column::Position,
        Column::PositionType,
        Column::RoleFit,
        Column::BonusAmount,
        Column::Relationship,
        Column::AlreadyApplied,
        Column::Notes,
        Column::Status,
        Column::StatusUpdatedAt,
        Column::StatusUpdatedBy,
        Column::HireDate,
        Column::SixtyDayDate,
        Column::PayoutMonth,
        Column::PaidDate,
        Column::AdminNotes,
        Column::IsArchived,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Column::ReferralId => "referral_id",
            Column::SubmittedAt => "submitted_at",
            Column::ReferrerName => "referrer_name",
            Column::ReferrerEmail => "referrer_email",
            Column::ReferrerSchool => "referrer_school",
            Column::CandidateName => "candidate_name",
            Column::CandidateEmail => "candidate_email",
            Column::CandidatePhone => "candidate_phone",
            Column::Position => "position",
            Column::PositionType => "position_type",
            Column::RoleFit => "role_fit",
            Column::BonusAmount => "bonus_amount",
            Column::Relationship => "relationship",
            Column::AlreadyApplied => "already_applied",
            Column::Notes => "notes",
            Column::Status => "status",
            Column::StatusUpdatedAt => "status_updated_at",
            Column::StatusUpdatedBy => "status_updated_by",
            Column::HireDate => "hire_date",
            Column::SixtyDayDate => "sixty_day_date",
            Column::PayoutMonth => "payout_month",
            Column::PaidDate => "paid_date",
            Column::AdminNotes => "admin_notes",
            Column::IsArchived => "is_archived",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn kind(self) -> ColumnKind {
        match self {
            Column::SubmittedAt | Column::StatusUpdatedAt => ColumnKind::Timestamp,
            Column::HireDate | Column::SixtyDayDate | Column::PaidDate => ColumnKind::Date,
            Column::BonusAmount => ColumnKind::Integer,
            Column::IsArchived => ColumnKind::Boolean,
            _ => ColumnKind::Text,
        }
    }

    /// Spreadsheet column letter (`A` for the first column).
    pub fn letter(self) -> char {
        char::from(b'A' + self.index() as u8)
    }

    pub fn last() -> Column {
        Column::ALL[Column::ALL.len() - 1]
    }
}

/// A set of column writes for one row. Values use the row encoding from
/// [`row`]; an empty string clears the cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldUpdates {
    values: BTreeMap<Column, String>,
}

impl FieldUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, column: Column, value: impl Into<String>) -> Self {
        self.values.insert(column, value.into());
        self
    }

    /// Columns whose encoded value differs between `before` and `after`.
    pub fn diff(before: &Referral, after: &Referral) -> Self {
        let old = row::encode(before);
        let new = row::encode(after);

        let values = Column::ALL
            .into_iter()
            .filter(|column| old[column.index()] != new[column.index()])
            .map(|column| (column, new[column.index()].clone()))
            .collect();

        Self { values }
    }

    pub fn get(&self, column: Column) -> Option<&str> {
        self.values.get(&column).map(String::as_str)
    }

    pub fn contains(&self, column: Column) -> bool {
        self.values.contains_key(&column)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Column, &str)> {
        self.values
            .iter()
            .map(|(column, value)| (*column, value.as_str()))
    }
}
