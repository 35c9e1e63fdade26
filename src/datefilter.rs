//! Date-filter parser (C4)
//!
//! Normalizes the textual date filters the agent emits (`"2024-11"`,
//! `"last_week"`, `"3_days_ago"`, `"2024-11-下旬"`, ...) into inclusive
//! `(start, end)` date ranges. "Now" is always supplied by the caller —
//! never read from a global clock — so every range is testable.
//!
//! Parse failure is not an error here: the retriever treats an
//! unrecognizable filter as "no filter" and logs a warning.

use chrono::{Datelike, Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

/// Inclusive date range, both ends date-only.
pub type DateRange = (NaiveDate, NaiveDate);

static DAYS_AGO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)_days_ago$").expect("static regex"));
static MONTHS_AGO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)_months_ago$").expect("static regex"));

/// Parse a date filter against the caller's "today".
///
/// Returns `None` both for an absent filter and for one that cannot be
/// parsed; the caller decides whether the latter deserves a warning via
/// [`parse_strict`].
pub fn parse(filter: Option<&str>, today: NaiveDate) -> Option<DateRange> {
    parse_strict(filter?, today).ok().flatten()
}

/// Parse a present filter. `Ok(None)` is an explicit no-filter value
/// (`""`, `"none"`, `"null"`); `Err` carries the unrecognized input so the
/// retriever can log it before proceeding unfiltered.
pub fn parse_strict(filter: &str, today: NaiveDate) -> Result<Option<DateRange>, String> {
    let filter = filter.trim().to_lowercase();
    if filter.is_empty() || filter == "none" || filter == "null" {
        return Ok(None);
    }

    if let Some(range) = parse_relative(&filter, today)
        .or_else(|| parse_n_ago(&filter, today))
        .or_else(|| parse_dekad(&filter))
        .or_else(|| parse_absolute(&filter))
    {
        return Ok(Some(range));
    }
    Err(filter)
}

/// Does a record date (as stored, `YYYY-MM-DD` or null) fall in the range?
/// Null dates and unparsable dates never match a date filter.
pub fn date_matches(date: Option<&str>, range: &DateRange) -> bool {
    let Some(date) = date else {
        return false;
    };
    match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        Ok(d) => range.0 <= d && d <= range.1,
        Err(_) => false,
    }
}

fn parse_relative(filter: &str, today: NaiveDate) -> Option<DateRange> {
    match filter {
        "today" => Some((today, today)),
        "yesterday" => {
            let y = today - Duration::days(1);
            Some((y, y))
        }
        "last_week" => {
            // Monday..Sunday of the previous ISO week
            let weekday = today.weekday().num_days_from_monday() as i64;
            let end = today - Duration::days(weekday + 1);
            Some((end - Duration::days(6), end))
        }
        "last_month" => {
            let (year, month) = previous_month(today.year(), today.month());
            let start = NaiveDate::from_ymd_opt(year, month, 1)?;
            Some((start, last_day_of_month(year, month)?))
        }
        "last_year" => {
            let year = today.year() - 1;
            Some((
                NaiveDate::from_ymd_opt(year, 1, 1)?,
                NaiveDate::from_ymd_opt(year, 12, 31)?,
            ))
        }
        _ => None,
    }
}

fn parse_n_ago(filter: &str, today: NaiveDate) -> Option<DateRange> {
    if let Some(caps) = DAYS_AGO.captures(filter) {
        // "N_days_ago" means the last N days inclusive of today:
        // N=1 is today alone, N=2 is yesterday and today.
        let n: i64 = caps[1].parse().ok()?;
        if n == 0 {
            return None;
        }
        return Some((today - Duration::days(n - 1), today));
    }
    if let Some(caps) = MONTHS_AGO.captures(filter) {
        // From the 1st of the month N months back through yesterday
        let n: u32 = caps[1].parse().ok()?;
        if n == 0 {
            return None;
        }
        let (mut year, mut month) = (today.year(), today.month());
        for _ in 0..n {
            let (y, m) = previous_month(year, month);
            year = y;
            month = m;
        }
        let start = NaiveDate::from_ymd_opt(year, month, 1)?;
        let end = today - Duration::days(1);
        return Some((start, end));
    }
    None
}

/// Dekad filters: `YYYY-MM-上旬` (1–10), `中旬` (11–20), `下旬` (21–end).
fn parse_dekad(filter: &str) -> Option<DateRange> {
    let dekad = ["上旬", "中旬", "下旬"].iter().find(|d| filter.contains(**d))?;
    let stripped = filter.replace("上旬", "").replace("中旬", "").replace("下旬", "");
    let mut parts = stripped.split('-');
    let year: i32 = parts.next()?.trim().parse().ok()?;
    let month: u32 = parts.next()?.trim().parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    match *dekad {
        "上旬" => Some((
            NaiveDate::from_ymd_opt(year, month, 1)?,
            NaiveDate::from_ymd_opt(year, month, 10)?,
        )),
        "中旬" => Some((
            NaiveDate::from_ymd_opt(year, month, 11)?,
            NaiveDate::from_ymd_opt(year, month, 20)?,
        )),
        _ => Some((
            NaiveDate::from_ymd_opt(year, month, 21)?,
            last_day_of_month(year, month)?,
        )),
    }
}

fn parse_absolute(filter: &str) -> Option<DateRange> {
    // YYYY-MM-DD: a single day
    if let Ok(day) = NaiveDate::parse_from_str(filter, "%Y-%m-%d") {
        return Some((day, day));
    }

    let parts: Vec<&str> = filter.split('-').collect();
    match parts.as_slice() {
        // YYYY-MM: that month
        [year, month] => {
            let year: i32 = year.parse().ok()?;
            let month: u32 = month.parse().ok()?;
            if !(1..=12).contains(&month) {
                return None;
            }
            Some((
                NaiveDate::from_ymd_opt(year, month, 1)?,
                last_day_of_month(year, month)?,
            ))
        }
        // YYYY: that year, within a sane range
        [year] => {
            let year: i32 = year.parse().ok()?;
            if !(1900..=2100).contains(&year) {
                return None;
            }
            Some((
                NaiveDate::from_ymd_opt(year, 1, 1)?,
                NaiveDate::from_ymd_opt(year, 12, 31)?,
            ))
        }
        _ => None,
    }
}

fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    Some(NaiveDate::from_ymd_opt(next_year, next_month, 1)? - Duration::days(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn range(filter: &str, today: &str) -> DateRange {
        parse(Some(filter), date(today)).unwrap()
    }

    #[test]
    fn test_single_day() {
        assert_eq!(range("2024-06-02", "2025-01-01"), (date("2024-06-02"), date("2024-06-02")));
    }

    #[test]
    fn test_month() {
        assert_eq!(range("2024-03", "2025-01-01"), (date("2024-03-01"), date("2024-03-31")));
        assert_eq!(range("2024-02", "2025-01-01"), (date("2024-02-01"), date("2024-02-29")));
        assert_eq!(range("2024-12", "2025-01-01"), (date("2024-12-01"), date("2024-12-31")));
    }

    #[test]
    fn test_year() {
        assert_eq!(range("2024", "2025-01-01"), (date("2024-01-01"), date("2024-12-31")));
        assert!(parse(Some("1024"), date("2025-01-01")).is_none());
        assert!(parse(Some("9999"), date("2025-01-01")).is_none());
    }

    #[test]
    fn test_dekads() {
        assert_eq!(range("2024-11-上旬", "2025-01-01"), (date("2024-11-01"), date("2024-11-10")));
        assert_eq!(range("2024-11-中旬", "2025-01-01"), (date("2024-11-11"), date("2024-11-20")));
        assert_eq!(range("2024-11-下旬", "2025-01-01"), (date("2024-11-21"), date("2024-11-30")));
        assert_eq!(range("2024-02-下旬", "2025-01-01"), (date("2024-02-21"), date("2024-02-29")));
        assert_eq!(range("2024-12-下旬", "2025-01-01"), (date("2024-12-21"), date("2024-12-31")));
    }

    #[test]
    fn test_today_yesterday() {
        assert_eq!(range("today", "2025-03-10"), (date("2025-03-10"), date("2025-03-10")));
        assert_eq!(range("yesterday", "2025-03-10"), (date("2025-03-09"), date("2025-03-09")));
    }

    #[test]
    fn test_last_week_is_previous_iso_week() {
        // 2025-03-10 is a Monday; last week is Mon 03-03 .. Sun 03-09
        assert_eq!(range("last_week", "2025-03-10"), (date("2025-03-03"), date("2025-03-09")));
        // 2025-03-12 is a Wednesday; same previous week
        assert_eq!(range("last_week", "2025-03-12"), (date("2025-03-03"), date("2025-03-09")));
    }

    #[test]
    fn test_last_month_across_year_boundary() {
        assert_eq!(range("last_month", "2025-01-15"), (date("2024-12-01"), date("2024-12-31")));
        assert_eq!(range("last_month", "2025-03-10"), (date("2025-02-01"), date("2025-02-28")));
    }

    #[test]
    fn test_last_year() {
        assert_eq!(range("last_year", "2025-03-10"), (date("2024-01-01"), date("2024-12-31")));
    }

    #[test]
    fn test_days_ago_inclusive_of_today() {
        // N=1 is exactly today
        assert_eq!(range("1_days_ago", "2025-03-10"), (date("2025-03-10"), date("2025-03-10")));
        // N=2 is yesterday and today
        assert_eq!(range("2_days_ago", "2025-03-10"), (date("2025-03-09"), date("2025-03-10")));
        assert_eq!(range("30_days_ago", "2025-03-10"), (date("2025-02-09"), date("2025-03-10")));
    }

    #[test]
    fn test_months_ago_starts_first_of_month_ends_yesterday() {
        assert_eq!(range("3_months_ago", "2025-03-10"), (date("2024-12-01"), date("2025-03-09")));
        assert_eq!(range("1_months_ago", "2025-01-05"), (date("2024-12-01"), date("2025-01-04")));
    }

    #[test]
    fn test_case_and_whitespace_normalized() {
        assert_eq!(range("  LAST_WEEK  ", "2025-03-10"), (date("2025-03-03"), date("2025-03-09")));
    }

    #[test]
    fn test_none_like_values() {
        let today = date("2025-03-10");
        assert!(parse(None, today).is_none());
        assert!(parse(Some(""), today).is_none());
        assert!(parse(Some("none"), today).is_none());
        assert!(parse(Some("None"), today).is_none());
        assert!(parse(Some("null"), today).is_none());
    }

    #[test]
    fn test_garbage_reports_unparsed_input() {
        let err = parse_strict("下个星期", date("2025-03-10")).unwrap_err();
        assert_eq!(err, "下个星期");
        assert!(parse(Some("2024-13"), date("2025-03-10")).is_none());
        assert!(parse(Some("0_days_ago"), date("2025-03-10")).is_none());
    }

    #[test]
    fn test_start_never_after_end() {
        let today = date("2025-03-10");
        for filter in [
            "2024-06-02", "2024-03", "2024", "2024-11-上旬", "2024-11-中旬", "2024-11-下旬",
            "today", "yesterday", "last_week", "last_month", "last_year", "1_days_ago",
            "45_days_ago", "6_months_ago",
        ] {
            let (start, end) = parse(Some(filter), today).unwrap();
            assert!(start <= end, "{} produced start {} > end {}", filter, start, end);
        }
    }

    #[test]
    fn test_date_matches_boundaries() {
        let range = (date("2024-11-21"), date("2024-11-30"));
        assert!(date_matches(Some("2024-11-21"), &range));
        assert!(date_matches(Some("2024-11-25"), &range));
        assert!(date_matches(Some("2024-11-30"), &range));
        assert!(!date_matches(Some("2024-11-20"), &range));
        assert!(!date_matches(Some("2024-12-01"), &range));
        assert!(!date_matches(None, &range));
        assert!(!date_matches(Some("not-a-date"), &range));
    }
}
