//! Clinic-local calendar helpers and request-field validation.
//!
//! The clinic runs in a single locale described by a fixed UTC offset;
//! "today" and "now" always mean clinic-local wall time.

use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, Utc};
use regex::Regex;

const SECONDS_PER_HOUR: i32 = 3600;

static TIME_FORMAT: OnceLock<Option<Regex>> = OnceLock::new();
static EMAIL_FORMAT: OnceLock<Option<Regex>> = OnceLock::new();
static PHONE_FORMAT: OnceLock<Option<Regex>> = OnceLock::new();

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

/// Out-of-range offsets fall back to UTC.
pub fn clinic_offset(hours: i32) -> FixedOffset {
    hours
        .checked_mul(SECONDS_PER_HOUR)
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix())
}

pub fn to_local(instant: DateTime<Utc>, offset_hours: i32) -> NaiveDateTime {
    instant.with_timezone(&clinic_offset(offset_hours)).naive_local()
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp, which is converted to
/// the clinic-local calendar date.
pub fn parse_date(raw: &str, offset_hours: i32) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|instant| to_local(instant.with_timezone(&Utc), offset_hours).date())
}

/// Strict `HH:MM`, two digits each.
pub fn is_time_format(raw: &str) -> bool {
    cached(&TIME_FORMAT, r"^\d{2}:\d{2}$")
        .map(|re| re.is_match(raw))
        .unwrap_or(false)
}

pub fn is_valid_email(email: &str) -> bool {
    email.len() <= 254
        && cached(&EMAIL_FORMAT, r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .map(|re| re.is_match(email))
            .unwrap_or(false)
}

pub fn is_valid_phone(phone: &str) -> bool {
    cached(&PHONE_FORMAT, r"^\+?\d{6,15}$")
        .map(|re| re.is_match(phone))
        .unwrap_or(false)
}

/// Drops spaces, dashes, dots and parentheses so the same number always
/// resolves to the same patient.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_dates_land_on_the_clinic_day() {
        // 18:30 UTC on the 1st is 02:30 on the 2nd at UTC+8.
        assert_eq!(
            parse_date("2030-01-01T18:30:00Z", 8),
            NaiveDate::from_ymd_opt(2030, 1, 2)
        );
        assert_eq!(parse_date("2030-01-01", 8), NaiveDate::from_ymd_opt(2030, 1, 1));
        assert_eq!(parse_date("01/02/2030", 8), None);
    }

    #[test]
    fn time_format_is_strict() {
        assert!(is_time_format("09:30"));
        assert!(!is_time_format("9:30"));
        assert!(!is_time_format("09:30:00"));
    }

    #[test]
    fn phone_normalization() {
        assert_eq!(normalize_phone("+976 9911-2233"), "+97699112233");
        assert!(is_valid_phone(&normalize_phone("+976 9911-2233")));
        assert!(!is_valid_phone("call me"));
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("bat@example.mn"));
        assert!(!is_valid_email("bat@"));
    }

    #[test]
    fn bad_offset_falls_back_to_utc() {
        assert_eq!(clinic_offset(99).local_minus_utc(), 0);
        assert_eq!(clinic_offset(8).local_minus_utc(), 8 * 3600);
    }
}
