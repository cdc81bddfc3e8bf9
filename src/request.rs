//! Request adapter: typed access to transport-level request data.
//!
//! [`RequestContext`] wraps one incoming request and normalizes it for the
//! pipeline: the effective method honors `X-HTTP-Method-Override`, header
//! lookup is case-insensitive and dash/underscore tolerant, and the
//! conditional/negotiation headers are converted to typed values on access.
//!
//! # Parse failure policy
//!
//! A malformed conditional header (`If-Match`, `If-Modified-Since`, `Range`,
//! ...) fails the request with 400 rather than silently degrading to "header
//! absent" — silent degradation would bypass the cache and concurrency
//! control semantics the client asked for. A malformed `Authorization`
//! header degrades to [`Authorization::Other`] with the raw value, and
//! malformed `Accept` entries are skipped.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderMap, Method, Uri};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::error::Result;
use crate::node::cache::NodeCache;
use crate::node::registry::NodeRegistry;
use crate::protocol::constants;
use crate::protocol::{parse_accept, parse_http_datetime, Etag, Range};

/// A parsed `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    /// Basic scheme with decoded credentials.
    Basic {
        /// The username part.
        username: String,
        /// The password part.
        password: String,
    },
    /// Any other scheme, credentials untouched. Also the fallback for
    /// Basic values that fail to decode.
    Other {
        /// Upper-cased scheme name.
        scheme: String,
        /// The raw credentials part.
        credentials: String,
    },
}

/// One incoming request, normalized.
///
/// Owns the chain of node instances constructed while resolving it, through
/// the request-scoped instance cache.
pub struct RequestContext {
    method: Method,
    uri: Uri,
    headers: BTreeMap<String, String>,
    body: Bytes,
    registry: Arc<NodeRegistry>,
    config: Arc<ServiceConfig>,
    cache: NodeCache,
}

impl RequestContext {
    /// Build a context from transport parts.
    ///
    /// The effective method is taken from `X-HTTP-Method-Override` when
    /// present (upper-cased), else from the transport method.
    #[must_use]
    pub fn new(
        method: Method,
        uri: Uri,
        header_map: &HeaderMap,
        body: Bytes,
        registry: Arc<NodeRegistry>,
        config: Arc<ServiceConfig>,
    ) -> Self {
        let mut headers = BTreeMap::new();
        for (name, value) in header_map {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
            }
        }

        let method = headers
            .get(constants::METHOD_OVERRIDE)
            .and_then(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok())
            .unwrap_or(method);

        RequestContext {
            method,
            uri,
            headers,
            body,
            registry,
            config,
            cache: NodeCache::new(),
        }
    }

    /// The effective HTTP method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request URI.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Raw body bytes.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The node registry this request resolves against.
    #[must_use]
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Deployment configuration.
    #[must_use]
    pub fn config(&self) -> &Arc<ServiceConfig> {
        &self.config
    }

    /// The request-scoped node instance cache.
    #[must_use]
    pub fn cache(&self) -> &NodeCache {
        &self.cache
    }

    /// Case-insensitive, dash/underscore-normalized header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        let key = name.to_ascii_lowercase().replace('_', "-");
        self.headers.get(&key).map(String::as_str)
    }

    /// Decoded query string pairs, in request order.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        match self.uri.query() {
            Some(query) => url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Whether the request arrived over a secure connection, as reported by
    /// the reverse proxy (`X-Forwarded-Proto: https`) or the URI scheme.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        if let Some(proto) = self.header(constants::FORWARDED_PROTO) {
            return proto.eq_ignore_ascii_case("https");
        }
        self.uri.scheme_str() == Some("https")
    }

    /// The request's own host, for absolute URL construction.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.header(constants::HOST)
            .or_else(|| self.uri.host())
    }

    /// The declared body length: `Content-Length` when present and sane,
    /// else the actual byte count.
    #[must_use]
    pub fn content_length(&self) -> usize {
        self.header(constants::CONTENT_LENGTH)
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.body.len())
    }

    /// The request body's media type, `; charset=` parameters stripped.
    #[must_use]
    pub fn content_type(&self) -> Option<String> {
        self.header(constants::CONTENT_TYPE)
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
    }

    /// The ordered accepted media type list, `*/*` expanded to the
    /// configured default. An absent header means "anything", represented
    /// as the default content type alone.
    #[must_use]
    pub fn accept(&self) -> Vec<String> {
        match self.header(constants::ACCEPT) {
            Some(raw) => parse_accept(raw, &self.config.default_content_type),
            None => vec![self.config.default_content_type.clone()],
        }
    }

    /// Parsed `If-Match` tags (semicolon-separated list), when present.
    pub fn if_match(&self) -> Result<Option<Vec<Etag>>> {
        self.etag_list(constants::IF_MATCH)
    }

    /// Parsed `If-None-Match` tags (semicolon-separated list), when present.
    pub fn if_none_match(&self) -> Result<Option<Vec<Etag>>> {
        self.etag_list(constants::IF_NONE_MATCH)
    }

    /// Parsed `If-Range` tag, when present.
    pub fn if_range(&self) -> Result<Option<Etag>> {
        match self.header(constants::IF_RANGE) {
            Some(raw) => Ok(Some(Etag::parse(raw)?)),
            None => Ok(None),
        }
    }

    /// Parsed `If-Modified-Since` instant, when present.
    pub fn if_modified_since(&self) -> Result<Option<DateTime<Utc>>> {
        self.datetime(constants::IF_MODIFIED_SINCE)
    }

    /// Parsed `If-Unmodified-Since` instant, when present.
    pub fn if_unmodified_since(&self) -> Result<Option<DateTime<Utc>>> {
        self.datetime(constants::IF_UNMODIFIED_SINCE)
    }

    /// Parsed `Range` window, when present.
    pub fn range(&self) -> Result<Option<Range>> {
        match self.header(constants::RANGE) {
            Some(raw) => Ok(Some(Range::parse(raw)?)),
            None => Ok(None),
        }
    }

    /// Parsed `Authorization` header, when present.
    #[must_use]
    pub fn authorization(&self) -> Option<Authorization> {
        let raw = self.header(constants::AUTHORIZATION)?.trim();
        let (scheme, credentials) = match raw.split_once(' ') {
            Some((s, c)) => (s.to_ascii_uppercase(), c.trim().to_string()),
            None => return Some(Authorization::Other {
                scheme: raw.to_ascii_uppercase(),
                credentials: String::new(),
            }),
        };

        if scheme == "BASIC" {
            if let Some((username, password)) = BASE64
                .decode(&credentials)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .and_then(|decoded| {
                    decoded
                        .split_once(':')
                        .map(|(u, p)| (u.to_string(), p.to_string()))
                })
            {
                return Some(Authorization::Basic { username, password });
            }
        }

        Some(Authorization::Other {
            scheme,
            credentials,
        })
    }

    fn etag_list(&self, name: &str) -> Result<Option<Vec<Etag>>> {
        match self.header(name) {
            Some(raw) => {
                let tags = raw
                    .split(';')
                    .map(|part| Etag::parse(part).map_err(Into::into))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Some(tags))
            }
            None => Ok(None),
        }
    }

    fn datetime(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        match self.header(name) {
            Some(raw) => Ok(Some(parse_http_datetime(raw)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::registry::NodeRegistryBuilder;

    fn ctx(method: Method, uri: &str, headers: &[(&str, &str)]) -> RequestContext {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(
                http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                value.parse().unwrap(),
            );
        }
        RequestContext::new(
            method,
            uri.parse().unwrap(),
            &map,
            Bytes::new(),
            Arc::new(NodeRegistryBuilder::new().finish().unwrap()),
            Arc::new(ServiceConfig::default()),
        )
    }

    #[test]
    fn test_method_override() {
        let ctx = ctx(
            Method::POST,
            "/x",
            &[("x-http-method-override", "delete")],
        );
        assert_eq!(ctx.method(), &Method::DELETE);
    }

    #[test]
    fn test_header_normalization() {
        let ctx = ctx(Method::GET, "/x", &[("if-modified-since", "784111777")]);
        assert!(ctx.header("If_Modified_Since").is_some());
        assert!(ctx.header("IF-MODIFIED-SINCE").is_some());
    }

    #[test]
    fn test_malformed_conditional_header_is_an_error() {
        let ctx = ctx(Method::GET, "/x", &[("if-modified-since", "soonish")]);
        assert!(ctx.if_modified_since().is_err());

        let ctx = self::ctx(Method::GET, "/x", &[("range", "users=a-b")]);
        assert!(ctx.range().is_err());
    }

    #[test]
    fn test_if_match_semicolon_list() {
        let ctx = ctx(
            Method::GET,
            "/x",
            &[("if-match", "1000.000-a; 2000.000-b")],
        );
        let tags = ctx.if_match().unwrap().unwrap();
        assert_eq!(tags.len(), 2);
    }

    #[test]
    fn test_basic_authorization_decodes() {
        // "user:pa:ss" — password may itself contain a colon.
        let ctx = ctx(
            Method::GET,
            "/x",
            &[("authorization", "Basic dXNlcjpwYTpzcw==")],
        );
        assert_eq!(
            ctx.authorization(),
            Some(Authorization::Basic {
                username: "user".to_string(),
                password: "pa:ss".to_string(),
            })
        );
    }

    #[test]
    fn test_other_authorization_passes_through() {
        let ctx = ctx(Method::GET, "/x", &[("authorization", "Bearer tok123")]);
        assert_eq!(
            ctx.authorization(),
            Some(Authorization::Other {
                scheme: "BEARER".to_string(),
                credentials: "tok123".to_string(),
            })
        );
    }

    #[test]
    fn test_unparsable_basic_degrades() {
        let ctx = ctx(Method::GET, "/x", &[("authorization", "Basic %%%")]);
        assert!(matches!(
            ctx.authorization(),
            Some(Authorization::Other { .. })
        ));
    }

    #[test]
    fn test_accept_defaults_when_absent() {
        let ctx = ctx(Method::GET, "/x", &[]);
        assert_eq!(ctx.accept(), vec!["application/json".to_string()]);
    }

    #[test]
    fn test_content_type_strips_charset() {
        let ctx = ctx(
            Method::POST,
            "/x",
            &[("content-type", "application/x-www-form-urlencoded; charset=UTF-8")],
        );
        assert_eq!(
            ctx.content_type().as_deref(),
            Some("application/x-www-form-urlencoded")
        );
    }

    #[test]
    fn test_query_pairs() {
        let ctx = ctx(Method::GET, "/x?a=1&b=two%20words", &[]);
        assert_eq!(
            ctx.query_pairs(),
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "two words".to_string())
            ]
        );
    }
}
