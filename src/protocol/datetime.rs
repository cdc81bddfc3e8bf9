//! HTTP date parsing and formatting.
//!
//! Clients are allowed to send instants in any of three shapes: a numeric
//! unix timestamp (integer or fractional seconds), an RFC1123 date
//! (`Sun, 06 Nov 1994 08:49:37 GMT`), or an ISO8601 / RFC3339 date
//! (`1994-11-06T08:49:37.000Z`). Responses always carry RFC1123.
//!
//! Instants crossing the serialization boundary are normalized to fractional
//! unix seconds via [`timestamp_millis`], so callers never see
//! language-native date values in payloads.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

use super::ParseError;

/// Parse an instant from any of the accepted client-supplied shapes.
///
/// Tried in order: numeric timestamp, RFC1123 (recognized by a `GMT`
/// marker), ISO8601. Anything else fails with a [`ParseError`] carrying the
/// original literal.
///
/// # Examples
///
/// ```
/// use cirrus_rest::protocol::parse_http_datetime;
///
/// let a = parse_http_datetime("784111777").unwrap();
/// let b = parse_http_datetime("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
/// let c = parse_http_datetime("1994-11-06T08:49:37.000Z").unwrap();
/// assert_eq!(a, b);
/// assert_eq!(b, c);
/// ```
pub fn parse_http_datetime(raw: &str) -> Result<DateTime<Utc>, ParseError> {
    let trimmed = raw.trim();

    if let Ok(seconds) = trimmed.parse::<f64>() {
        let millis = (seconds * 1000.0).round() as i64;
        return Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| ParseError::new("HTTP date", raw, "timestamp out of range"));
    }

    if trimmed.contains("GMT") {
        return DateTime::parse_from_rfc2822(trimmed)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| ParseError::new("HTTP date", raw, e));
    }

    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ParseError::new("HTTP date", raw, e))
}

/// Format an instant as an RFC1123 header value, e.g.
/// `Sun, 06 Nov 1994 08:49:37 GMT`.
#[must_use]
pub fn format_http_date(dt: DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Format an instant as an ISO8601 string with millisecond precision.
#[must_use]
pub fn format_iso8601(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The canonical numeric representation of an instant: fractional unix
/// seconds with millisecond precision.
///
/// Used by [`Etag`](super::Etag) literals and by the JSON serialization
/// boundary.
#[must_use]
pub fn timestamp_millis(dt: DateTime<Utc>) -> f64 {
    dt.timestamp_millis() as f64 / 1000.0
}
