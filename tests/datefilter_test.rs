//! Property tests for the date-filter parser

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;

use mnemo::datefilter::{date_matches, parse};

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Arbitrary valid date in a practical journal range.
fn any_date() -> impl Strategy<Value = NaiveDate> {
    (2000i32..=2035, 1u32..=12, 1u32..=28).prop_map(|(y, m, d)| day(y, m, d))
}

/// Filters that must always parse, whatever "today" is.
fn any_filter() -> impl Strategy<Value = String> {
    prop_oneof![
        any_date().prop_map(|d| d.format("%Y-%m-%d").to_string()),
        (2000i32..=2035, 1u32..=12).prop_map(|(y, m)| format!("{:04}-{:02}", y, m)),
        (2000i32..=2035).prop_map(|y| y.to_string()),
        (2000i32..=2035, 1u32..=12, prop_oneof!["上旬", "中旬", "下旬"])
            .prop_map(|(y, m, dekad)| format!("{:04}-{:02}-{}", y, m, dekad)),
        Just("today".to_string()),
        Just("yesterday".to_string()),
        Just("last_week".to_string()),
        Just("last_month".to_string()),
        Just("last_year".to_string()),
        (1i64..=400).prop_map(|n| format!("{}_days_ago", n)),
        (1u32..=24).prop_map(|n| format!("{}_months_ago", n)),
    ]
}

proptest! {
    /// Every parsed range is ordered: start ≤ end.
    #[test]
    fn prop_start_never_after_end(filter in any_filter(), today in any_date()) {
        let (start, end) = parse(Some(&filter), today)
            .unwrap_or_else(|| panic!("filter {:?} failed to parse", filter));
        prop_assert!(start <= end, "{}: {} > {}", filter, start, end);
    }

    /// A date matches iff it falls inside the inclusive range.
    #[test]
    fn prop_match_iff_in_range(filter in any_filter(), today in any_date(), probe in any_date()) {
        let range = parse(Some(&filter), today).unwrap();
        let expected = range.0 <= probe && probe <= range.1;
        let formatted = probe.format("%Y-%m-%d").to_string();
        prop_assert_eq!(date_matches(Some(formatted.as_str()), &range), expected);
    }

    /// `N_days_ago` always ends today and spans exactly N days.
    #[test]
    fn prop_days_ago_window(n in 1i64..=400, today in any_date()) {
        let (start, end) = parse(Some(&format!("{}_days_ago", n)), today).unwrap();
        prop_assert_eq!(end, today);
        prop_assert_eq!(end - start, Duration::days(n - 1));
    }

    /// Null dates never match any parsed range.
    #[test]
    fn prop_null_date_never_matches(filter in any_filter(), today in any_date()) {
        let range = parse(Some(&filter), today).unwrap();
        prop_assert!(!date_matches(None, &range));
    }
}

#[test]
fn test_one_day_ago_is_exactly_today() {
    let today = day(2025, 3, 10);
    assert_eq!(parse(Some("1_days_ago"), today).unwrap(), (today, today));
}

#[test]
fn test_two_days_ago_is_yesterday_and_today() {
    let today = day(2025, 3, 10);
    assert_eq!(
        parse(Some("2_days_ago"), today).unwrap(),
        (day(2025, 3, 9), today)
    );
}

#[test]
fn test_boundary_dates_match_inclusively() {
    let range = parse(Some("2024-11-中旬"), day(2025, 1, 1)).unwrap();
    assert!(date_matches(Some("2024-11-11"), &range));
    assert!(date_matches(Some("2024-11-20"), &range));
    assert!(!date_matches(Some("2024-11-10"), &range));
    assert!(!date_matches(Some("2024-11-21"), &range));
}
