//! Text encoding of a referral as one table row.
//!
//! Dates are `YYYY-MM-DD`, timestamps RFC 3339, booleans `TRUE`/`FALSE`, and
//! an empty cell means "not set".

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

use crate::policy::PayoutMonth;
use crate::referral::{Referral, ReferralId};
use crate::status::ReferralStatus;
use crate::store::Column;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Header row written to an empty sheet.
pub fn header() -> Vec<String> {
    Column::ALL
        .into_iter()
        .map(|column| column.name().to_string())
        .collect()
}

pub fn is_header(cells: &[String]) -> bool {
    cells
        .first()
        .is_some_and(|cell| cell.trim() == Column::ReferralId.name())
}

pub fn encode_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn encode_date(value: Option<NaiveDate>) -> String {
    value
        .map(|date| date.format(DATE_FORMAT).to_string())
        .unwrap_or_default()
}

pub fn encode_bool(value: bool) -> String {
    let encoded = if value { "TRUE" } else { "FALSE" };
    encoded.to_string()
}

pub fn encode(referral: &Referral) -> Vec<String> {
    Column::ALL
        .into_iter()
        .map(|column| match column {
            Column::ReferralId => referral.referral_id.to_string(),
            Column::SubmittedAt => encode_timestamp(&referral.submitted_at),
            Column::ReferrerName => referral.referrer_name.clone(),
            Column::ReferrerEmail => referral.referrer_email.clone(),
            Column::ReferrerSchool => referral.referrer_school.clone(),
            Column::CandidateName => referral.candidate_name.clone(),
            Column::CandidateEmail => referral.candidate_email.clone(),
            Column::CandidatePhone => referral.candidate_phone.clone(),
            Column::Position => referral.position.clone(),
            Column::PositionType => referral.position_type.clone(),
            Column::RoleFit => referral.role_fit.clone(),
            Column::BonusAmount => referral.bonus_amount.to_string(),
            Column::Relationship => referral.relationship.clone(),
            Column::AlreadyApplied => referral.already_applied.clone(),
            Column::Notes => referral.notes.clone(),
            Column::Status => referral.status.label().to_string(),
            Column::StatusUpdatedAt => encode_timestamp(&referral.status_updated_at),
            Column::StatusUpdatedBy => referral.status_updated_by.clone(),
            Column::HireDate => encode_date(referral.hire_date),
            Column::SixtyDayDate => encode_date(referral.sixty_day_date),
            Column::PayoutMonth => referral
                .payout_month
                .map(|month| month.to_string())
                .unwrap_or_default(),
            Column::PaidDate => encode_date(referral.paid_date),
            Column::AdminNotes => referral.admin_notes.clone(),
            Column::IsArchived => encode_bool(referral.is_archived),
        })
        .collect()
}

fn cell(cells: &[String], column: Column) -> &str {
    cells
        .get(column.index())
        .map(|value| value.trim())
        .unwrap_or("")
}

fn text(cells: &[String], column: Column) -> String {
    cell(cells, column).to_string()
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            // Rows written by hand in the sheet often carry a naive timestamp.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .or_else(|_| chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
                .map(|naive| naive.and_utc())
                .ok()
        })
}

fn optional_date(cells: &[String], column: Column) -> Result<Option<NaiveDate>, String> {
    let raw = cell(cells, column);
    if raw.is_empty() {
        return Ok(None);
    }

    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map(Some)
        .map_err(|err| format!("{}: {err}", column.name()))
}

/// Decodes one row. Missing trailing cells are treated as empty.
pub fn decode(cells: &[String]) -> Result<Referral, String> {
    let referral_id = ReferralId::parse(cell(cells, Column::ReferralId))
        .map_err(|err| format!("{}: {err}", Column::ReferralId.name()))?;

    let submitted_at = parse_timestamp(cell(cells, Column::SubmittedAt))
        .ok_or_else(|| format!("{}: not a timestamp", Column::SubmittedAt.name()))?;

    let status = cell(cells, Column::Status)
        .parse::<ReferralStatus>()
        .map_err(|_| {
            format!(
                "{}: unknown status {:?}",
                Column::Status.name(),
                cell(cells, Column::Status)
            )
        })?;

    let status_updated_at = match cell(cells, Column::StatusUpdatedAt) {
        "" => submitted_at,
        raw => parse_timestamp(raw)
            .ok_or_else(|| format!("{}: not a timestamp", Column::StatusUpdatedAt.name()))?,
    };

    let bonus_amount = match cell(cells, Column::BonusAmount) {
        "" => 0,
        raw => raw
            .parse::<u32>()
            .map_err(|err| format!("{}: {err}", Column::BonusAmount.name()))?,
    };

    let payout_month = match cell(cells, Column::PayoutMonth) {
        "" => None,
        raw => Some(
            raw.parse::<PayoutMonth>()
                .map_err(|err| format!("{}: {err}", Column::PayoutMonth.name()))?,
        ),
    };

    let is_archived = cell(cells, Column::IsArchived).eq_ignore_ascii_case("true");

    Ok(Referral {
        referral_id,
        submitted_at,
        referrer_name: text(cells, Column::ReferrerName),
        referrer_email: text(cells, Column::ReferrerEmail),
        referrer_school: text(cells, Column::ReferrerSchool),
        candidate_name: text(cells, Column::CandidateName),
        candidate_email: text(cells, Column::CandidateEmail),
        candidate_phone: text(cells, Column::CandidatePhone),
        position: text(cells, Column::Position),
        position_type: text(cells, Column::PositionType),
        role_fit: text(cells, Column::RoleFit),
        bonus_amount,
        relationship: text(cells, Column::Relationship),
        already_applied: text(cells, Column::AlreadyApplied),
        notes: text(cells, Column::Notes),
        status,
        status_updated_at,
        status_updated_by: text(cells, Column::StatusUpdatedBy),
        hire_date: optional_date(cells, Column::HireDate)?,
        sixty_day_date: optional_date(cells, Column::SixtyDayDate)?,
        payout_month,
        paid_date: optional_date(cells, Column::PaidDate)?,
        admin_notes: text(cells, Column::AdminNotes),
        is_archived,
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::TimeZone;

    use super::*;

    pub fn referral(id: &str) -> Referral {
        let submitted_at = Utc.with_ymd_and_hms(2024, 1, 2, 15, 30, 0).unwrap();
        Referral {
            referral_id: ReferralId::parse(id).unwrap(),
            submitted_at,
            referrer_name: "Dana Reyes".into(),
            referrer_email: "dana.reyes@school.org".into(),
            referrer_school: "Arthur Ashe".into(),
            candidate_name: "Sam Ortiz".into(),
            candidate_email: "sam.ortiz@example.com".into(),
            candidate_phone: "504-555-0100".into(),
            position: "3rd Grade ELA".into(),
            position_type: "Lead Teacher".into(),
            role_fit: String::new(),
            bonus_amount: 500,
            relationship: "Former colleague".into(),
            already_applied: "Not yet".into(),
            notes: String::new(),
            status: ReferralStatus::Submitted,
            status_updated_at: submitted_at,
            status_updated_by: "System".into(),
            hire_date: None,
            sixty_day_date: None,
            payout_month: None,
            paid_date: None,
            admin_notes: String::new(),
            is_archived: false,
        }
    }
}
