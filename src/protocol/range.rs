//! Range pagination request and response header values.
//!
//! Collections are paginated with a `Range` request header of the form
//! `{unit}={offset}-{limit}` and answered with a `Content-Range` response
//! header of the form `{unit} {first}-{last}/{total}`. The two types here
//! round-trip on their shared unit/offset/limit fields.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

use super::ParseError;

static RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<unit>\w+)=(?P<offset>\d+)-(?P<limit>\d+)$").unwrap());

/// A client-requested sub-window of a collection.
///
/// Only the exact `{unit}={offset}-{limit}` shape is accepted; malformed
/// input is a parse failure, never a default.
///
/// # Examples
///
/// ```
/// use cirrus_rest::protocol::Range;
///
/// let range = Range::parse("users=0-199").unwrap();
/// assert_eq!(range.unit, "users");
/// assert_eq!(range.offset, 0);
/// assert_eq!(range.limit, 199);
///
/// assert!(Range::parse("users=abc-10").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    /// The addressing unit, typically a collection's range unit.
    pub unit: String,
    /// First item index requested.
    pub offset: u64,
    /// Number of items requested.
    pub limit: u64,
}

impl Range {
    /// Parse a `Range` header value.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let caps = RANGE_RE
            .captures(raw.trim())
            .ok_or_else(|| ParseError::new("Range", raw, "expected '{unit}={offset}-{limit}'"))?;

        // The regex only admits digit runs; overflow is the one remaining
        // way these can fail.
        let offset = caps["offset"]
            .parse()
            .map_err(|e| ParseError::new("Range", raw, e))?;
        let limit = caps["limit"]
            .parse()
            .map_err(|e| ParseError::new("Range", raw, e))?;

        Ok(Range {
            unit: caps["unit"].to_string(),
            offset,
            limit,
        })
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}-{}", self.unit, self.offset, self.limit)
    }
}

/// A `Content-Range` response header value.
///
/// Formatting-only; produced by the server side when answering ranged
/// collection fetches with 206. A `None` total renders as `*` (size
/// unknown).
///
/// # Examples
///
/// ```
/// use cirrus_rest::protocol::ContentRange;
///
/// let header = ContentRange::new("users", 0, 4, None);
/// assert_eq!(header.to_string(), "users 0-4/*");
///
/// let header = ContentRange::new("users", 10, 19, Some(240));
/// assert_eq!(header.to_string(), "users 10-19/240");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRange {
    /// The addressing unit.
    pub unit: String,
    /// Index of the first item in the response.
    pub first: u64,
    /// Index of the last item in the response.
    pub last: u64,
    /// Total collection size, when known.
    pub total: Option<u64>,
}

impl ContentRange {
    /// Create a `Content-Range` value.
    #[must_use]
    pub fn new(unit: impl Into<String>, first: u64, last: u64, total: Option<u64>) -> Self {
        ContentRange {
            unit: unit.into(),
            first,
            last,
            total,
        }
    }
}

impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}-{}/", self.unit, self.first, self.last)?;
        match self.total {
            Some(total) => write!(f, "{total}"),
            None => f.write_str("*"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_range() {
        let range = Range::parse("bytes=0-199").unwrap();
        assert_eq!(range.unit, "bytes");
        assert_eq!(range.offset, 0);
        assert_eq!(range.limit, 199);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for raw in [
            "bytes=abc-10",
            "bytes=10",
            "bytes 0-10",
            "=0-10",
            "bytes=-5-10",
            "bytes=0-10,20-30",
            "",
        ] {
            assert!(Range::parse(raw).is_err(), "accepted {raw:?}");
        }
    }

    #[test]
    fn test_range_display_roundtrip() {
        let range = Range::parse("users=5-24").unwrap();
        assert_eq!(Range::parse(&range.to_string()).unwrap(), range);
    }

    #[test]
    fn test_content_range_formats() {
        assert_eq!(ContentRange::new("users", 0, 4, None).to_string(), "users 0-4/*");
        assert_eq!(
            ContentRange::new("users", 10, 19, Some(240)).to_string(),
            "users 10-19/240"
        );
    }

    #[test]
    fn test_content_range_range_symmetry() {
        // The response header and an equivalent request header agree on
        // unit/offset/limit.
        let range = Range::parse("orders=10-19").unwrap();
        let content = ContentRange::new(range.unit.clone(), range.offset, range.limit, None);
        assert_eq!(content.unit, range.unit);
        assert_eq!(content.first, range.offset);
        assert_eq!(content.last, range.limit);
    }
}
