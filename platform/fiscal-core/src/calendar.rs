//! Fiscal calendar arithmetic
//!
//! A tenant's fiscal year is a 12-month period whose start month is
//! configuration. Fiscal years are labeled by the calendar year in which they
//! end (unless the start month is January, in which case fiscal year equals
//! calendar year). Fiscal month 0 is the start month; fiscal quarters group
//! fiscal months {0,1,2}..{9,10,11}.
//!
//! All civil dates resolve in a single fixed tenant-level UTC offset. The
//! reference deployment runs UTC−5 year-round; there is no DST handling here.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from fiscal calendar functions
#[derive(Debug, Error, PartialEq)]
pub enum CalendarError {
    #[error("fiscal year start month must be 1..=12, got {0}")]
    InvalidStartMonth(u32),

    #[error("invalid civil date: {0}")]
    InvalidDate(String),

    #[error("fiscal month index must be 0..=11, got {0}")]
    InvalidFiscalMonth(u32),

    #[error("fiscal quarter must be 1..=4, got {0}")]
    InvalidQuarter(u8),

    #[error("utc offset hours must be -14..=14, got {0}")]
    InvalidOffset(i32),
}

/// A fiscal quarter label: Q1..Q4 of a fiscal year
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FiscalQuarter {
    pub year: i32,
    pub quarter: u8,
}

impl std::fmt::Display for FiscalQuarter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-Q{}", self.year, self.quarter)
    }
}

/// UTC offset of the reference deployment (UTC−5, year-round)
pub fn default_offset() -> FixedOffset {
    FixedOffset::east_opt(-5 * 3600).expect("offset within chrono bounds")
}

/// Build a fixed offset from whole hours (tenant configuration)
pub fn offset_from_hours(hours: i32) -> Result<FixedOffset, CalendarError> {
    if !(-14..=14).contains(&hours) {
        return Err(CalendarError::InvalidOffset(hours));
    }
    FixedOffset::east_opt(hours * 3600).ok_or(CalendarError::InvalidOffset(hours))
}

fn ensure_start_month(start_month: u32) -> Result<(), CalendarError> {
    if !(1..=12).contains(&start_month) {
        return Err(CalendarError::InvalidStartMonth(start_month));
    }
    Ok(())
}

/// Fiscal year containing a civil date
pub fn fiscal_year(date: NaiveDate, start_month: u32) -> Result<i32, CalendarError> {
    ensure_start_month(start_month)?;
    if start_month == 1 {
        return Ok(date.year());
    }
    if date.month() >= start_month {
        Ok(date.year() + 1)
    } else {
        Ok(date.year())
    }
}

/// Fiscal month index (0..11) of a civil date; 0 is the start month
pub fn fiscal_month(date: NaiveDate, start_month: u32) -> Result<u32, CalendarError> {
    ensure_start_month(start_month)?;
    Ok((date.month() + 12 - start_month) % 12)
}

/// Fiscal quarter containing a civil date
pub fn fiscal_quarter(date: NaiveDate, start_month: u32) -> Result<FiscalQuarter, CalendarError> {
    let year = fiscal_year(date, start_month)?;
    let month = fiscal_month(date, start_month)?;
    Ok(FiscalQuarter {
        year,
        quarter: (month / 3 + 1) as u8,
    })
}

/// The three fiscal month indices composing a quarter
pub fn quarter_months(quarter: u8) -> Result<[u32; 3], CalendarError> {
    if !(1..=4).contains(&quarter) {
        return Err(CalendarError::InvalidQuarter(quarter));
    }
    let base = (quarter as u32 - 1) * 3;
    Ok([base, base + 1, base + 2])
}

/// Map (fiscal year, fiscal month index) back to a calendar (year, month)
pub fn calendar_month_of(
    fiscal_year: i32,
    fiscal_month: u32,
    start_month: u32,
) -> Result<(i32, u32), CalendarError> {
    ensure_start_month(start_month)?;
    if fiscal_month > 11 {
        return Err(CalendarError::InvalidFiscalMonth(fiscal_month));
    }
    let month = (start_month - 1 + fiscal_month) % 12 + 1;
    let year = if start_month == 1 {
        fiscal_year
    } else if month >= start_month {
        fiscal_year - 1
    } else {
        fiscal_year
    };
    Ok((year, month))
}

/// First civil day of a (fiscal year, fiscal month) in the tenant zone
pub fn first_day_of_fiscal_month(
    fiscal_year: i32,
    fiscal_month: u32,
    start_month: u32,
) -> Result<NaiveDate, CalendarError> {
    let (year, month) = calendar_month_of(fiscal_year, fiscal_month, start_month)?;
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| CalendarError::InvalidDate(format!("{year}-{month:02}-01")))
}

/// Closed civil-instant bounds of a fiscal year in the tenant zone.
///
/// The end bound is the last instant of the last day.
pub fn fiscal_year_bounds(
    year: i32,
    start_month: u32,
    tz: FixedOffset,
) -> Result<(DateTime<FixedOffset>, DateTime<FixedOffset>), CalendarError> {
    ensure_start_month(start_month)?;
    let start_calendar_year = if start_month == 1 { year } else { year - 1 };
    let start_date = NaiveDate::from_ymd_opt(start_calendar_year, start_month, 1)
        .ok_or_else(|| CalendarError::InvalidDate(format!("{start_calendar_year}-{start_month:02}-01")))?;
    let next_start = NaiveDate::from_ymd_opt(start_calendar_year + 1, start_month, 1)
        .ok_or_else(|| CalendarError::InvalidDate(format!("{}-{start_month:02}-01", start_calendar_year + 1)))?;

    let start = civil_midnight(start_date, tz);
    let end = civil_midnight(next_start, tz) - Duration::nanoseconds(1);
    Ok((start, end))
}

/// Parse a `YYYY-MM-DD` civil date
pub fn parse_civil_date(text: &str) -> Result<NaiveDate, CalendarError> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|_| CalendarError::InvalidDate(text.to_string()))
}

/// Midnight of a civil date in the tenant zone
pub fn civil_midnight(date: NaiveDate, tz: FixedOffset) -> DateTime<FixedOffset> {
    tz.from_local_datetime(&date.and_time(NaiveTime::MIN))
        .single()
        .expect("fixed offsets are unambiguous")
}

/// Calendar-month difference from `from` to `to` (negative when `to` is earlier)
pub fn months_between(from: NaiveDate, to: NaiveDate) -> i32 {
    (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_start_month_one_collapses_to_calendar_year() {
        assert_eq!(fiscal_year(date(2025, 3, 15), 1).unwrap(), 2025);
        assert_eq!(fiscal_month(date(2025, 3, 15), 1).unwrap(), 2);
        assert_eq!(
            fiscal_quarter(date(2025, 12, 31), 1).unwrap(),
            FiscalQuarter { year: 2025, quarter: 4 }
        );
    }

    #[test]
    fn test_july_start_labels_by_ending_year() {
        // July 2025 opens fiscal year 2026
        assert_eq!(fiscal_year(date(2025, 7, 1), 7).unwrap(), 2026);
        assert_eq!(fiscal_year(date(2026, 6, 30), 7).unwrap(), 2026);
        assert_eq!(fiscal_year(date(2025, 6, 30), 7).unwrap(), 2025);

        assert_eq!(fiscal_month(date(2025, 7, 1), 7).unwrap(), 0);
        assert_eq!(fiscal_month(date(2025, 12, 1), 7).unwrap(), 5);
        assert_eq!(fiscal_month(date(2026, 6, 1), 7).unwrap(), 11);
    }

    #[test]
    fn test_quarter_grouping() {
        assert_eq!(
            fiscal_quarter(date(2025, 9, 10), 7).unwrap(),
            FiscalQuarter { year: 2026, quarter: 1 }
        );
        assert_eq!(
            fiscal_quarter(date(2026, 4, 2), 7).unwrap(),
            FiscalQuarter { year: 2026, quarter: 4 }
        );
        assert_eq!(quarter_months(1).unwrap(), [0, 1, 2]);
        assert_eq!(quarter_months(4).unwrap(), [9, 10, 11]);
    }

    #[test]
    fn test_calendar_month_round_trip() {
        for fm in 0..12 {
            let (year, month) = calendar_month_of(2026, fm, 7).unwrap();
            let day = date(year, month, 1);
            assert_eq!(fiscal_year(day, 7).unwrap(), 2026);
            assert_eq!(fiscal_month(day, 7).unwrap(), fm);
        }
    }

    #[test]
    fn test_fiscal_year_bounds_cover_whole_year() {
        let tz = default_offset();
        let (start, end) = fiscal_year_bounds(2026, 7, tz).unwrap();
        assert_eq!(start.date_naive(), date(2025, 7, 1));
        assert_eq!(end.date_naive(), date(2026, 6, 30));
        assert!(start < end);

        let (jan_start, jan_end) = fiscal_year_bounds(2025, 1, tz).unwrap();
        assert_eq!(jan_start.date_naive(), date(2025, 1, 1));
        assert_eq!(jan_end.date_naive(), date(2025, 12, 31));
    }

    #[test]
    fn test_invalid_start_month_rejected() {
        assert_eq!(
            fiscal_year(date(2025, 1, 1), 0),
            Err(CalendarError::InvalidStartMonth(0))
        );
        assert_eq!(
            fiscal_month(date(2025, 1, 1), 13),
            Err(CalendarError::InvalidStartMonth(13))
        );
    }

    #[test]
    fn test_months_between() {
        assert_eq!(months_between(date(2026, 1, 11), date(2026, 3, 11)), 2);
        assert_eq!(months_between(date(2026, 3, 1), date(2026, 1, 31)), -2);
        assert_eq!(months_between(date(2025, 12, 15), date(2026, 1, 2)), 1);
    }

    #[test]
    fn test_parse_civil_date() {
        assert_eq!(parse_civil_date("2025-02-01").unwrap(), date(2025, 2, 1));
        assert!(parse_civil_date("02/01/2025").is_err());
    }
}
