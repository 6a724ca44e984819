//! XMLTV timestamps and display-zone rendering
//!
//! Stored instants are always UTC; the configured IANA zone is only applied
//! when rendering, so DST transitions are handled by `chrono-tz`.

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use lazy_static::lazy_static;
use regex::Regex;

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::Rome;

lazy_static! {
    /// `YYYYMMDDHHMMSS ±HHMM`
    static ref EPG_DATE_REGEX: Regex = Regex::new(
        r"^([0-9]{4})([0-9]{2})([0-9]{2})([0-9]{2})([0-9]{2})([0-9]{2})\s*([+-])([0-9]{2})([0-9]{2})$"
    )
    .unwrap();
}

/// Parse an XMLTV `start`/`stop` attribute into an absolute instant.
///
/// Anything that is not exactly fourteen digits, optional whitespace and a
/// signed four-digit offset is rejected, as is any impossible calendar date.
pub fn parse_epg_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let caps = EPG_DATE_REGEX.captures(value)?;
    let field = |i: usize| -> Option<u32> { caps.get(i)?.as_str().parse().ok() };

    let year = i32::try_from(field(1)?).ok()?;
    let naive = NaiveDate::from_ymd_opt(year, field(2)?, field(3)?)?
        .and_hms_opt(field(4)?, field(5)?, field(6)?)?;

    let (offset_hours, offset_minutes) = (field(8)?, field(9)?);
    if offset_minutes >= 60 {
        return None;
    }
    let mut offset_secs = i32::try_from(offset_hours * 3600 + offset_minutes * 60).ok()?;
    if caps.get(7)?.as_str() == "-" {
        offset_secs = -offset_secs;
    }
    let offset = FixedOffset::east_opt(offset_secs)?;

    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Resolve an IANA zone name, falling back to the default zone
pub fn parse_timezone(name: Option<&str>) -> Tz {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        None => DEFAULT_TIMEZONE,
        Some(name) => match name.parse::<Tz>() {
            Ok(tz) => tz,
            Err(e) => {
                tracing::warn!("Invalid timezone '{}' ({}), using {}", name, e, DEFAULT_TIMEZONE);
                DEFAULT_TIMEZONE
            }
        },
    }
}

/// `HH:MM` in the display zone
pub fn format_clock(instant: DateTime<Utc>, tz: Tz) -> String {
    instant.with_timezone(&tz).format("%H:%M").to_string()
}

/// `dd/mm/YYYY, HH:MM:SS` in the display zone
pub fn format_full(instant: DateTime<Utc>, tz: Tz) -> String {
    instant.with_timezone(&tz).format("%d/%m/%Y, %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_offset() {
        let parsed = parse_epg_timestamp("20240101120000 +0100").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap());

        let parsed = parse_epg_timestamp("20240101120000 -0530").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 1, 1, 17, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_without_separator() {
        let parsed = parse_epg_timestamp("20240101120000+0000").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_rejects_malformed() {
        // Thirteen digits
        assert_eq!(parse_epg_timestamp("2024010112000+0100"), None);
        // Missing offset
        assert_eq!(parse_epg_timestamp("20240101120000"), None);
        // Impossible date and time
        assert_eq!(parse_epg_timestamp("20240230120000 +0000"), None);
        assert_eq!(parse_epg_timestamp("20240101250000 +0000"), None);
        // Offset minutes out of range
        assert_eq!(parse_epg_timestamp("20240101120000 +0175"), None);
        assert_eq!(parse_epg_timestamp(""), None);
        assert_eq!(parse_epg_timestamp(" 20240101120000 +0100"), None);
    }

    #[test]
    fn test_format_in_zone_follows_dst() {
        let tz = parse_timezone(Some("Europe/Rome"));
        // Winter: UTC+1
        let winter = Utc.with_ymd_and_hms(2024, 1, 15, 20, 0, 0).unwrap();
        assert_eq!(format_clock(winter, tz), "21:00");
        // Summer: UTC+2
        let summer = Utc.with_ymd_and_hms(2024, 7, 15, 20, 0, 0).unwrap();
        assert_eq!(format_clock(summer, tz), "22:00");
        assert_eq!(format_full(summer, tz), "15/07/2024, 22:00:00");
    }

    #[test]
    fn test_invalid_timezone_falls_back() {
        assert_eq!(parse_timezone(Some("Mars/Olympus")), DEFAULT_TIMEZONE);
        assert_eq!(parse_timezone(None), DEFAULT_TIMEZONE);
        assert_eq!(parse_timezone(Some("UTC")), Tz::UTC);
    }
}
