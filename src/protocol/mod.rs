//! HTTP value types and header-level protocol plumbing.
//!
//! This module gathers the small, self-contained pieces of HTTP that the rest
//! of the crate builds on: entity tags, range windows, HTTP dates and Accept
//! lists. Each type owns its own parsing and formatting, with RFC-defined
//! semantics.
//!
//! # Header Formats
//!
//! | Header | Format | Example |
//! |--------|--------|---------|
//! | ETag | `{timestamp}-{id}` or `*` | `1714089600.000-42` |
//! | Range | `{unit}={offset}-{limit}` | `users=0-199` |
//! | Content-Range | `{unit} {first}-{last}/{total}` | `users 0-4/*` |
//! | Accept | media ranges with q-values | `application/json;q=0.9, */*` |
//!
//! Parse failures are reported as [`ParseError`] values carrying the original
//! literal; the request adapter decides how they escalate (see
//! [`crate::request`]).

use thiserror::Error;

pub mod accept;
pub mod datetime;
pub mod etag;
pub mod range;

pub use accept::{match_outputs, parse_accept};
pub use datetime::{format_http_date, parse_http_datetime, timestamp_millis};
pub use etag::Etag;
pub use range::{ContentRange, Range};

/// Failure to parse an HTTP header value.
///
/// Carries the name of the value being parsed, the offending literal and a
/// short reason, so that the error is meaningful when surfaced in a 400
/// response body.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unable to parse {what} '{raw}': {reason}")]
pub struct ParseError {
    /// What was being parsed, e.g. `"Range"` or `"HTTP date"`.
    pub what: &'static str,
    /// The original input.
    pub raw: String,
    /// Underlying cause, rendered as text.
    pub reason: String,
}

impl ParseError {
    pub(crate) fn new(what: &'static str, raw: &str, reason: impl ToString) -> Self {
        ParseError {
            what,
            raw: raw.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Well-known header names and media types used throughout the crate.
pub mod constants {
    /// The effective-method override header.
    pub const METHOD_OVERRIDE: &str = "x-http-method-override";
    /// Conditional request: required entity tags.
    pub const IF_MATCH: &str = "if-match";
    /// Conditional request: excluded entity tags.
    pub const IF_NONE_MATCH: &str = "if-none-match";
    /// Conditional range: the tag the range applies to.
    pub const IF_RANGE: &str = "if-range";
    /// Conditional read: suppress when unchanged since this instant.
    pub const IF_MODIFIED_SINCE: &str = "if-modified-since";
    /// Conditional write: fail when changed since this instant.
    pub const IF_UNMODIFIED_SINCE: &str = "if-unmodified-since";
    /// Range pagination request header.
    pub const RANGE: &str = "range";
    /// Content negotiation preference list.
    pub const ACCEPT: &str = "accept";
    /// Request body media type.
    pub const CONTENT_TYPE: &str = "content-type";
    /// Request body length.
    pub const CONTENT_LENGTH: &str = "content-length";
    /// Credentials header.
    pub const AUTHORIZATION: &str = "authorization";
    /// Requested host, used for absolute URL construction.
    pub const HOST: &str = "host";
    /// Proxy-reported original scheme.
    pub const FORWARDED_PROTO: &str = "x-forwarded-proto";

    /// Media type of url-encoded form bodies.
    pub const FORM_URL_ENCODED: &str = "application/x-www-form-urlencoded";

    /// JSON-family media types.
    pub const JSON_MIMETYPES: &[&str] = &["application/json", "text/javascript"];
    /// XML-family media types (rendering reserved).
    pub const XML_MIMETYPES: &[&str] = &["application/xml", "text/xml"];
    /// HTML-family media types.
    pub const HTML_MIMETYPES: &[&str] = &["application/xhtml+xml", "text/html"];

    /// Media types an error response may be rendered as.
    pub const ERROR_FORMATS: &[&str] = &[
        "application/json",
        "application/xml",
        "text/html",
        "text/javascript",
        "text/xml",
        "*/*",
    ];
}
