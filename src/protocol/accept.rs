//! Accept header parsing and output negotiation.
//!
//! An `Accept` header is parsed into an ordered list of media types: highest
//! quality first, request order preserved among equals, parameters stripped
//! and `*/*` expanded to the configured default content type. Negotiation is
//! then a plain ordered intersection against a node's declared outputs.

/// Parse an `Accept` header into an ordered media type list.
///
/// Entries are ordered by `q` value (descending, stable), media type
/// parameters are dropped and the `*/*` wildcard is replaced by
/// `default_content_type`. Malformed entries are skipped rather than failing
/// the whole header; an empty or all-malformed header yields just the
/// default.
///
/// # Examples
///
/// ```
/// use cirrus_rest::protocol::parse_accept;
///
/// let accepted = parse_accept(
///     "text/html;q=0.8, application/json, */*;q=0.1",
///     "application/json",
/// );
/// assert_eq!(
///     accepted,
///     vec!["application/json", "text/html", "application/json"]
///         .into_iter()
///         .map(String::from)
///         .collect::<Vec<_>>()
/// );
/// ```
#[must_use]
pub fn parse_accept(raw: &str, default_content_type: &str) -> Vec<String> {
    let mut entries: Vec<(f32, String)> = Vec::new();

    for part in raw.split(',') {
        let mut pieces = part.split(';');
        let media = match pieces.next() {
            Some(m) if !m.trim().is_empty() => m.trim().to_ascii_lowercase(),
            _ => continue,
        };
        // Media types are `type/subtype`; anything else is noise.
        if !media.contains('/') {
            continue;
        }

        let mut quality = 1.0f32;
        for param in pieces {
            if let Some((key, value)) = param.split_once('=') {
                if key.trim() == "q" {
                    quality = value.trim().parse().unwrap_or(0.0);
                }
            }
        }
        if quality <= 0.0 {
            continue;
        }

        let media = if media == "*/*" {
            default_content_type.to_string()
        } else {
            media
        };
        entries.push((quality, media));
    }

    if entries.is_empty() {
        return vec![default_content_type.to_string()];
    }

    // Stable sort keeps request order among equal qualities.
    entries.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    entries.into_iter().map(|(_, media)| media).collect()
}

/// Intersect an accepted media type list with a node's declared outputs,
/// preserving the client's preference order.
#[must_use]
pub fn match_outputs(accepted: &[String], outputs: &[String]) -> Vec<String> {
    let mut matched = Vec::new();
    for media in accepted {
        if outputs.iter().any(|o| o == media) && !matched.contains(media) {
            matched.push(media.clone());
        }
    }
    matched
}
