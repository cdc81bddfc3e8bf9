//! Content-type-driven response body serialization.
//!
//! The formatter picks a serializer purely from the negotiated content type:
//! the JSON family goes through `serde_json`, the XML family is reserved
//! (selecting it is a distinct failure from "no formatter configured"), and
//! the HTML family gets a minimal list rendering with auto-linkified URLs —
//! enough for human-browsable debugging, not a templating system.
//!
//! Payloads reach this boundary as `serde_json::Value` with instants already
//! flattened to fractional unix seconds (see
//! [`timestamp_millis`](crate::protocol::timestamp_millis)), so no
//! language-native date values ever appear in output.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::error::{HttpError, Result};
use crate::protocol::constants::{ERROR_FORMATS, HTML_MIMETYPES, JSON_MIMETYPES, XML_MIMETYPES};
use crate::protocol::match_outputs;
use crate::request::RequestContext;

static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\w+://.+$").unwrap());

/// Serialize a payload in the given content type.
///
/// # Errors
///
/// Selecting an XML type is reserved and fails distinctly from selecting a
/// type no formatter is configured for; both surface as 406 with a telling
/// description.
pub fn format_payload(content_type: &str, payload: &Value) -> Result<String> {
    if JSON_MIMETYPES.contains(&content_type) {
        return Ok(payload.to_string());
    }
    if XML_MIMETYPES.contains(&content_type) {
        return Err(HttpError::NotAcceptable {
            supported: JSON_MIMETYPES
                .iter()
                .chain(HTML_MIMETYPES)
                .map(|s| s.to_string())
                .collect(),
        });
    }
    if HTML_MIMETYPES.contains(&content_type) {
        return Ok(to_html(payload));
    }
    Err(HttpError::invalid(format!(
        "no formatter configured for '{content_type}'"
    )))
}

/// Render an error through the same formatting path as normal payloads.
///
/// Negotiates against the error-format list rather than any node's outputs;
/// falls back to JSON when negotiation or formatting fails, so an error
/// response is always producible.
#[must_use]
pub fn format_error(ctx: &RequestContext, err: &HttpError) -> (String, Option<String>) {
    let error_formats: Vec<String> = ERROR_FORMATS.iter().map(|s| s.to_string()).collect();
    let accepted = ctx.accept();
    let content_type = match_outputs(&accepted, &error_formats)
        .into_iter()
        .next()
        .unwrap_or_else(|| ctx.config().default_content_type.clone());

    let Some(payload) = err.payload() else {
        return (content_type, None);
    };

    match format_payload(&content_type, &payload) {
        Ok(body) => (content_type, Some(body)),
        Err(_) => (
            "application/json".to_string(),
            Some(payload.to_string()),
        ),
    }
}

/// Minimal generic HTML rendering: objects and arrays become nested lists,
/// values that look like absolute URLs become links.
#[must_use]
pub fn to_html(payload: &Value) -> String {
    let mut html = String::from("<!DOCTYPE html><html><head></head><body>");
    render_value(payload, &mut html);
    html.push_str("</body></html>");
    html
}

fn render_value(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push_str("<ul>");
            for item in items {
                out.push_str("<li>");
                render_value(item, out);
                out.push_str("</li>");
            }
            out.push_str("</ul>");
        }
        Value::Object(map) => {
            out.push_str("<ul>");
            for (key, item) in map {
                out.push_str("<li>");
                out.push_str(&escape(key));
                out.push_str(": ");
                render_value(item, out);
                out.push_str("</li>");
            }
            out.push_str("</ul>");
        }
        Value::String(text) if URL_RE.is_match(text) => {
            let escaped = escape(text);
            out.push_str(&format!("<a href=\"{escaped}\">{escaped}</a>"));
        }
        Value::String(text) => out.push_str(&escape(text)),
        other => out.push_str(&other.to_string()),
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
