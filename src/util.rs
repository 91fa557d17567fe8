use std::cmp::Ordering;

use chrono::{DateTime, Datelike, NaiveDate};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Whole calendar days from `today` to `target` (negative when past).
pub fn days_until(target: NaiveDate, today: NaiveDate) -> i64 {
    (target - today).num_days()
}

/// Remaining days to a milestone, `-1` when the date is missing or already past.
pub fn remaining_days(target: Option<NaiveDate>, today: NaiveDate) -> i64 {
    match target {
        Some(date) => {
            let days = days_until(date, today);
            if days < 0 {
                -1
            } else {
                days
            }
        }
        None => -1,
    }
}

/// `yyyy-mm` key for the month containing `date`.
pub fn month_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// Parse a backend date: plain `YYYY-MM-DD`, RFC 3339, or a naive datetime.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    // "2026-03-01T00:00:00" and "2026-03-01 00:00:00"
    raw.get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

/// Case- and accent-insensitive sort key ("Álvaro" sorts with "alvaro").
pub fn collation_key(s: &str) -> String {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Locale-aware title comparison: accent-folded first, raw text as tie-break.
pub fn compare_titles(a: &str, b: &str) -> Ordering {
    collation_key(a)
        .cmp(&collation_key(b))
        .then_with(|| a.cmp(b))
}
