//! Entity tags with wildcard-aware comparison.
//!
//! An [`Etag`] pairs a last-modified instant with an opaque resource
//! identifier. The distinguished [`Etag::Wildcard`] value compares equal to
//! any other tag, in every comparison path. Nodes that never override
//! [`etag`](crate::node::Node::etag) report the wildcard, which the pipeline
//! treats as "conditional semantics disabled".

use chrono::{DateTime, TimeZone, Utc};
use std::cmp::Ordering;
use std::fmt;

use super::datetime::timestamp_millis;
use super::ParseError;

/// An entity tag: a `(last_modified, id)` pair, or the wildcard.
///
/// # Literal form
///
/// A value tag renders as `{timestamp:.3}-{id}` where the timestamp is
/// fractional unix seconds; the wildcard renders as `*`. Parsing splits on
/// the **last** `-`; anything that does not yield a numeric timestamp and a
/// non-empty id is rejected.
///
/// # Examples
///
/// ```
/// use cirrus_rest::protocol::Etag;
///
/// let tag = Etag::parse("784111777.000-42").unwrap();
/// assert_eq!(tag.to_string(), "784111777.000-42");
/// assert_eq!(tag, Etag::Wildcard);
/// ```
#[derive(Debug, Clone)]
pub enum Etag {
    /// Matches any other tag in every comparison.
    Wildcard,
    /// A concrete tag derived from a resource's state.
    Value {
        /// The instant the resource was last modified.
        last_modified: DateTime<Utc>,
        /// Opaque resource identifier.
        id: String,
    },
}

impl Etag {
    /// Create a concrete tag from a last-modified instant and an identifier.
    #[must_use]
    pub fn new(last_modified: DateTime<Utc>, id: impl Into<String>) -> Self {
        Etag::Value {
            last_modified,
            id: id.into(),
        }
    }

    /// Parse an `If-Match` / `If-None-Match` / `If-Range` literal.
    ///
    /// `*` yields the wildcard. Anything else must be a
    /// `{timestamp}-{id}` pair split on the last `-`; a missing separator or
    /// an unparsable timestamp is a [`ParseError`].
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let trimmed = raw.trim().trim_matches('"');
        if trimmed == "*" {
            return Ok(Etag::Wildcard);
        }

        let (timestamp, id) = trimmed
            .rsplit_once('-')
            .ok_or_else(|| ParseError::new("ETag", raw, "expected '{timestamp}-{id}'"))?;
        if id.is_empty() {
            return Err(ParseError::new("ETag", raw, "empty id"));
        }

        let seconds: f64 = timestamp
            .parse()
            .map_err(|e| ParseError::new("ETag", raw, e))?;
        let last_modified = Utc
            .timestamp_millis_opt((seconds * 1000.0).round() as i64)
            .single()
            .ok_or_else(|| ParseError::new("ETag", raw, "timestamp out of range"))?;

        Ok(Etag::new(last_modified, id))
    }

    /// Whether this is the wildcard tag.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Etag::Wildcard)
    }

    /// The last-modified instant, if this is a concrete tag.
    #[must_use]
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        match self {
            Etag::Wildcard => None,
            Etag::Value { last_modified, .. } => Some(*last_modified),
        }
    }

    /// Millisecond-truncated timestamp used for equality checks. The literal
    /// form only carries millisecond precision, so comparisons must not be
    /// finer than that.
    fn millis(&self) -> Option<i64> {
        self.last_modified().map(|dt| dt.timestamp_millis())
    }
}

impl PartialEq for Etag {
    /// Wildcard-aware equality: the wildcard is equal to any tag; two
    /// concrete tags are equal iff both the id and the millisecond timestamp
    /// match.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Etag::Wildcard, _) | (_, Etag::Wildcard) => true,
            (
                Etag::Value {
                    id: a_id,
                    ..
                },
                Etag::Value {
                    id: b_id,
                    ..
                },
            ) => a_id == b_id && self.millis() == other.millis(),
        }
    }
}

impl PartialOrd for Etag {
    /// Relational comparison orders by last-modified instant; the wildcard
    /// compares equal to everything.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Etag::Wildcard, _) | (_, Etag::Wildcard) => Some(Ordering::Equal),
            _ => self.millis().partial_cmp(&other.millis()),
        }
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Etag::Wildcard => f.write_str("*"),
            Etag::Value { last_modified, id } => {
                write!(f, "{:.3}-{}", timestamp_millis(*last_modified), id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(secs: i64, id: &str) -> Etag {
        Etag::new(Utc.timestamp_opt(secs, 0).unwrap(), id)
    }

    #[test]
    fn test_wildcard_equals_anything() {
        assert_eq!(Etag::Wildcard, tag(1000, "a"));
        assert_eq!(tag(1000, "a"), Etag::Wildcard);
        assert_eq!(Etag::Wildcard, Etag::Wildcard);
    }

    #[test]
    fn test_value_equality() {
        assert_eq!(tag(1000, "a"), tag(1000, "a"));
        assert_ne!(tag(1000, "a"), tag(1000, "b"));
        assert_ne!(tag(1000, "a"), tag(2000, "a"));
    }

    #[test]
    fn test_ordering() {
        assert!(tag(1000, "a") < tag(2000, "a"));
        assert!(tag(2000, "a") > tag(1000, "b"));
        assert_eq!(
            Etag::Wildcard.partial_cmp(&tag(1000, "a")),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn test_display_roundtrip() {
        let original = tag(784_111_777, "42");
        let parsed = Etag::parse(&original.to_string()).unwrap();
        assert_eq!(parsed, original);
        assert_eq!(parsed.to_string(), "784111777.000-42");
    }

    #[test]
    fn test_parse_wildcard() {
        assert!(Etag::parse("*").unwrap().is_wildcard());
        assert_eq!(Etag::Wildcard.to_string(), "*");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Etag::parse("no separator").is_err());
        assert!(Etag::parse("abc-42").is_err());
        assert!(Etag::parse("1000.0-").is_err());
        // Split happens on the last dash, so a dashed id corrupts the
        // timestamp part and is rejected rather than misread.
        assert!(Etag::parse("1000.000-user-42").is_err());
    }
}
