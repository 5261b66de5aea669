//! Wall-clock helpers.
//!
//! Scheduled jobs are stored as naive `YYYY-MM-DD HH:MM:SS` strings in
//! UTC-3 wall-clock time (the operating timezone of the instance), so that
//! lexical comparison in SQL matches chronological order.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// Storage format for wall-clock timestamps.
pub const WALL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Hours between UTC and the operating wall clock.
pub const WALL_OFFSET_HOURS: i64 = -3;

/// Longest relative offset accepted by [`parse_offset`] (one year).
const MAX_OFFSET_SECS: i64 = 366 * 24 * 3600;

/// Current UTC-3 wall-clock time.
pub fn now_wall() -> NaiveDateTime {
    Utc::now().naive_utc() + Duration::hours(WALL_OFFSET_HOURS)
}

/// Format a wall-clock timestamp for storage.
pub fn format_wall(dt: &NaiveDateTime) -> String {
    dt.format(WALL_FORMAT).to_string()
}

/// Parse a stored or user-supplied wall-clock timestamp.
///
/// Accepts `YYYY-MM-DD HH:MM:SS`, the `T`-separated variant, and minute precision.
pub fn parse_wall(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim().trim_end_matches('Z');
    const FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
}

/// Parse a calendar date: ISO (`2024-01-31`) or Brazilian (`31/01/2024`, `31-01-2024`).
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"]
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
}

/// Parse a time of day: `10:00`, `10:00:30`, `10h`, `10h30`.
pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim().to_lowercase();
    if let Some(t) = ["%H:%M:%S", "%H:%M"]
        .iter()
        .find_map(|f| NaiveTime::parse_from_str(&s, f).ok())
    {
        return Some(t);
    }
    let (h, m) = s.split_once('h')?;
    let hour: u32 = h.trim().parse().ok()?;
    let minute: u32 = if m.trim().is_empty() {
        0
    } else {
        m.trim().parse().ok()?
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Parse a relative offset such as `30`, `30m`, `2h`, `1d`, `1h30m`, `45s`.
///
/// A bare number is minutes. Returns `None` for empty, zero, negative, or
/// unreasonably large offsets.
pub fn parse_offset(s: &str) -> Option<Duration> {
    let s = s.trim().trim_start_matches('+').to_lowercase();
    if s.is_empty() {
        return None;
    }
    if let Ok(mins) = s.parse::<i64>() {
        return checked_secs(mins.checked_mul(60)?);
    }

    let mut total: i64 = 0;
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if c.is_whitespace() {
            continue;
        }
        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86_400,
            _ => return None,
        };
        let n: i64 = digits.parse().ok()?;
        total = total.checked_add(n.checked_mul(unit)?)?;
        digits.clear();
    }
    if !digits.is_empty() {
        // Trailing number without unit, e.g. "1h30" → minutes.
        let n: i64 = digits.parse().ok()?;
        total = total.checked_add(n.checked_mul(60)?)?;
    }
    checked_secs(total)
}

fn checked_secs(total: i64) -> Option<Duration> {
    if total <= 0 || total > MAX_OFFSET_SECS {
        return None;
    }
    Some(Duration::seconds(total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wall_formats() {
        let a = parse_wall("2024-01-01 10:00:00").unwrap();
        let b = parse_wall("2024-01-01T10:00:00Z").unwrap();
        let c = parse_wall("2024-01-01 10:00").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert!(parse_wall("yesterday").is_none());
    }

    #[test]
    fn test_parse_date_brazilian() {
        let d = parse_date("31/01/2024").unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
        assert_eq!(parse_date("2024-01-31"), Some(d));
        assert!(parse_date("31/13/2024").is_none());
    }

    #[test]
    fn test_parse_time_variants() {
        assert_eq!(parse_time("10:00"), NaiveTime::from_hms_opt(10, 0, 0));
        assert_eq!(parse_time("10h"), NaiveTime::from_hms_opt(10, 0, 0));
        assert_eq!(parse_time("10h30"), NaiveTime::from_hms_opt(10, 30, 0));
        assert!(parse_time("25:00").is_none());
    }

    #[test]
    fn test_parse_offset_units() {
        assert_eq!(parse_offset("30"), Some(Duration::minutes(30)));
        assert_eq!(parse_offset("2h"), Some(Duration::hours(2)));
        assert_eq!(parse_offset("1d"), Some(Duration::days(1)));
        assert_eq!(parse_offset("1h30m"), Some(Duration::minutes(90)));
        assert_eq!(parse_offset("+45s"), Some(Duration::seconds(45)));
    }

    #[test]
    fn test_parse_offset_rejects_garbage() {
        assert!(parse_offset("").is_none());
        assert!(parse_offset("0").is_none());
        assert!(parse_offset("-5").is_none());
        assert!(parse_offset("soon").is_none());
        assert!(parse_offset("9999d").is_none());
    }

    #[test]
    fn test_format_wall_roundtrip_shape() {
        let dt = parse_wall("2024-03-05 07:08:09").unwrap();
        assert_eq!(format_wall(&dt), "2024-03-05 07:08:09");
    }
}
