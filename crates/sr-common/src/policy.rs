//! Bonus amounts and the dates derived from a hire.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, FixedOffset, Months, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Position type that earns the larger bonus.
pub const LEAD_TEACHER_POSITION_TYPE: &str = "Lead Teacher";
pub const LEAD_TEACHER_BONUS: u32 = 500;
pub const STANDARD_BONUS: u32 = 300;

/// Days a hire must stay before the referral bonus can be paid.
pub const ELIGIBILITY_PERIOD_DAYS: u64 = 60;

/// Bonus for a referral, fixed when it is submitted.
pub fn bonus_for_position_type(position_type: &str) -> u32 {
    if position_type
        .trim()
        .eq_ignore_ascii_case(LEAD_TEACHER_POSITION_TYPE)
    {
        LEAD_TEACHER_BONUS
    } else {
        STANDARD_BONUS
    }
}

/// Hire date plus sixty days. `None` only past the end of the calendar.
pub fn eligibility_date(hire_date: NaiveDate) -> Option<NaiveDate> {
    hire_date.checked_add_days(Days::new(ELIGIBILITY_PERIOD_DAYS))
}

/// Parses a fixed UTC offset written as `+HH:MM`, `-HH:MM`, `+HH` or `Z`.
pub fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match raw.split_at_checked(1)? {
        ("+", rest) => (1, rest),
        ("-", rest) => (-1, rest),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "00"));
    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }

    let seconds = i32::try_from(hours * 3600 + minutes * 60).ok()?;
    FixedOffset::east_opt(sign * seconds)
}

/// Calendar date of `at` on the program's clock.
pub fn program_date(at: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    at.with_timezone(&offset).date_naive()
}

/// Calendar month in which a bonus is scheduled to be paid.
///
/// Payouts run in the month after the eligibility date, so a hire on
/// 2024-01-01 (eligible 2024-03-01) is paid in April 2024.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PayoutMonth {
    first_day: NaiveDate,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid payout month: {0}")]
pub struct PayoutMonthParseError(String);

impl PayoutMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|first_day| Self { first_day })
    }

    pub fn following(eligibility_date: NaiveDate) -> Option<Self> {
        let first_day = eligibility_date
            .with_day(1)?
            .checked_add_months(Months::new(1))?;
        Some(Self { first_day })
    }

    pub fn year(&self) -> i32 {
        self.first_day.year()
    }

    pub fn month(&self) -> u32 {
        self.first_day.month()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first_day
    }
}

impl fmt::Display for PayoutMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.first_day.format("%B %Y"))
    }
}

impl FromStr for PayoutMonth {
    type Err = PayoutMonthParseError;

    /// Accepts the stored `"April 2024"` form and `"2024-04"`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();

        NaiveDate::parse_from_str(&format!("01 {trimmed}"), "%d %B %Y")
            .or_else(|_| NaiveDate::parse_from_str(&format!("{trimmed}-01"), "%Y-%m-%d"))
            .map(|first_day| Self { first_day })
            .map_err(|_| PayoutMonthParseError(raw.to_string()))
    }
}

impl Serialize for PayoutMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PayoutMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_utc_offsets() {
        assert_eq!(parse_utc_offset("-05:00"), FixedOffset::west_opt(5 * 3600));
        assert_eq!(parse_utc_offset(" +05:30 "), FixedOffset::east_opt(5 * 3600 + 1800));
        assert_eq!(parse_utc_offset("+09"), FixedOffset::east_opt(9 * 3600));
        assert_eq!(parse_utc_offset("Z"), FixedOffset::east_opt(0));

        for bad in ["", "05:00", "+5:75", "+15:00", "--05:00", "EST"] {
            assert_eq!(parse_utc_offset(bad), None, "{bad:?}");
        }
    }

    #[test]
    fn program_date_follows_the_offset() {
        use chrono::TimeZone;

        let evening_in_new_york = Utc.with_ymd_and_hms(2024, 3, 1, 3, 0, 0).unwrap();
        let eastern = parse_utc_offset("-05:00").unwrap();
        assert_eq!(program_date(evening_in_new_york, eastern), date(2024, 2, 29));
        assert_eq!(
            program_date(evening_in_new_york, FixedOffset::east_opt(0).unwrap()),
            date(2024, 3, 1)
        );
    }

    #[test]
    fn lead_teacher_earns_the_larger_bonus() {
        assert_eq!(bonus_for_position_type("Lead Teacher"), 500);
        assert_eq!(bonus_for_position_type("  lead teacher "), 500);
        assert_eq!(bonus_for_position_type("Other"), 300);
        assert_eq!(bonus_for_position_type("Lead Teacher Assistant"), 300);
        assert_eq!(bonus_for_position_type(""), 300);
    }

    #[test]
    fn eligibility_is_exactly_sixty_days_after_hire() {
        // 2024 is a leap year: 31 days of January plus 29 of February.
        assert_eq!(eligibility_date(date(2024, 1, 1)), Some(date(2024, 3, 1)));
        assert_eq!(eligibility_date(date(2023, 1, 1)), Some(date(2023, 3, 2)));
        assert_eq!(eligibility_date(date(2024, 11, 15)), Some(date(2025, 1, 14)));
    }

    #[test]
    fn payout_month_is_the_month_after_eligibility() {
        let payout = PayoutMonth::following(date(2024, 3, 1)).unwrap();
        assert_eq!(payout.to_string(), "April 2024");

        let year_end = PayoutMonth::following(date(2024, 12, 31)).unwrap();
        assert_eq!((year_end.year(), year_end.month()), (2025, 1));
    }

    #[test]
    fn payout_month_parses_stored_forms() {
        let expected = PayoutMonth::new(2024, 4).unwrap();
        assert_eq!("April 2024".parse::<PayoutMonth>().unwrap(), expected);
        assert_eq!("2024-04".parse::<PayoutMonth>().unwrap(), expected);
        assert!("Aprilish".parse::<PayoutMonth>().is_err());
    }
}
