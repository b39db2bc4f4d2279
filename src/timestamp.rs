//! Normalizer for the sensor feed's `DD-MON-YYYY HH:MM:SS` timestamps.
//!
//! Parsing never fails loudly: anything that does not fit the shape comes
//! back as the epoch sentinel, which sorts before every real reading.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::str::FromStr;

const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// placeholder instant for unparseable input (1970-01-01 00:00:00)
pub fn sentinel() -> NaiveDateTime {
    NaiveDateTime::default()
}

/// true for the unparseable placeholder
///
/// a feed value of exactly `01-JAN-1970 00:00:00` parses to the same
/// instant and is reported here as unparseable too.
pub fn is_sentinel(instant: &NaiveDateTime) -> bool {
    *instant == sentinel()
}

/// parse `DD-MON-YYYY HH:MM:SS` into a wall-clock instant
///
/// month abbreviations are case-insensitive. a missing time segment,
/// unknown month or any non-numeric component yields [`sentinel`].
pub fn parse_timestamp(raw: &str) -> NaiveDateTime {
    let mut segments = raw.split_whitespace();
    let date = segments.next().and_then(parse_date_segment);
    let time = segments.next().and_then(parse_time_segment);

    match (date, time) {
        (Some(date), Some(time)) => date.and_time(time),
        _ => sentinel(),
    }
}

/// parse only the `DD-MON-YYYY` part; any time segment is ignored
pub fn parse_date(raw: &str) -> NaiveDate {
    raw.split_whitespace()
        .next()
        .and_then(parse_date_segment)
        .unwrap_or_default()
}

fn parse_date_segment(segment: &str) -> Option<NaiveDate> {
    let mut parts = segment.split('-');
    let day = digits::<u32>(parts.next()?)?;
    let month = month_number(parts.next()?)?;
    let year = digits::<i32>(parts.next()?)?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_time_segment(segment: &str) -> Option<NaiveTime> {
    let mut parts = segment.split(':');
    let hour = digits::<u32>(parts.next()?)?;
    let minute = digits::<u32>(parts.next()?)?;
    let second = digits::<u32>(parts.next()?)?;
    NaiveTime::from_hms_opt(hour, minute, second)
}

/// ascii digits only; `parse` alone would accept a leading sign
fn digits<T: FromStr>(part: &str) -> Option<T> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

/// 1-based month number for a three-letter abbreviation
fn month_number(abbrev: &str) -> Option<u32> {
    MONTHS
        .iter()
        .position(|m| m.eq_ignore_ascii_case(abbrev))
        .map(|index| index as u32 + 1)
}

/// header line for the newest reading, e.g. "Last reading: October 27, 2025 at 2:49 PM"
pub fn last_reading_label(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return "No date available".to_string();
    };
    let instant = parse_timestamp(raw);
    if is_sentinel(&instant) {
        return raw.to_string();
    }
    format!("Last reading: {}", instant.format("%B %-d, %Y at %-I:%M %p"))
}

/// short axis label, e.g. "Oct 27"; falls back to the raw date part
pub fn chart_label(raw: &str) -> String {
    let date = parse_date(raw);
    if date == NaiveDate::default() {
        return raw.split(' ').next().unwrap_or(raw).to_string();
    }
    date.format("%b %-d").to_string()
}
