//! Error types and result handling.
//!
//! [`HttpError`] is the unit of failure propagation in the request pipeline:
//! every variant is simultaneously a control-flow signal and a directly
//! renderable response, carrying a status code, a human-readable description
//! and any variant-specific headers (the `Allow` set on 405, the entity tag
//! on 304). The pipeline's single top-level handler catches any taxonomy
//! error and routes it through the response formatter — there is no separate
//! error template mechanism.
//!
//! [`RegistryError`] covers configuration mistakes (a node without a URL, an
//! alias used as a parent, a body schema on a bodyless verb). These are not
//! recoverable at request time and fail at registry build, never at first
//! request.

use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use http::{Method, StatusCode};
use serde_json::{json, Value};
use thiserror::Error;

use crate::protocol::{format_http_date, Etag, ParseError};

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HttpError>;

/// An HTTP-status-coded failure condition that doubles as a response.
#[derive(Debug, Clone, Error)]
pub enum HttpError {
    /// 400 — the request could not be understood due to malformed syntax.
    #[error("bad request: {0}")]
    InvalidRequest(String),

    /// 401 — the request requires user authentication.
    #[error("authentication required")]
    Unauthorized,

    /// 403 — understood, but refused; authorization will not help.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// 404 — the resource or collection could not be found.
    #[error("not found: {0}")]
    NotFound(String),

    /// 405 — the method is not allowed for this resource. Carries the real
    /// allowed set for the `Allow` header.
    #[error("method not allowed")]
    MethodNotAllowed {
        /// The full allowed set, implicit HEAD/OPTIONS included.
        allow: Vec<Method>,
    },

    /// 406 — the node cannot produce any of the accepted media types.
    /// Lists the supported outputs in the description.
    #[error("not acceptable: supported outputs are {}", supported.join(", "))]
    NotAcceptable {
        /// Media types the node can produce.
        supported: Vec<String>,
    },

    /// 409 — the request conflicts with the current state of the resource.
    #[error("conflict: {0}")]
    Conflict(String),

    /// 412 — a request precondition evaluated to false.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// 415 — the request body is in a format the resource does not support.
    #[error("unsupported media type: data must be sent with a Content-Type header set to {required}")]
    UnsupportedMediaType {
        /// The media type the resource requires.
        required: String,
    },

    /// 416 — a ranged fetch matched nothing within the collection's extent.
    #[error("requested range not satisfiable")]
    RangeNotSatisfiable,

    /// 304 — conditional read short-circuit; not an error in the usual
    /// sense, but propagated the same way. Carries the tag so the response
    /// can still report coherent caching headers.
    #[error("not modified")]
    NotModified {
        /// The node's current entity tag.
        etag: Etag,
        /// The node's last-modified instant, when known.
        last_modified: Option<DateTime<Utc>>,
    },

    /// 503 — the service cannot handle the request right now.
    #[error("service unavailable")]
    ServiceUnavailable,
}

impl HttpError {
    /// Shorthand for a 400 with a description.
    pub fn invalid(description: impl Into<String>) -> Self {
        HttpError::InvalidRequest(description.into())
    }

    /// Shorthand for the capability-check refusal.
    pub fn forbidden() -> Self {
        HttpError::Forbidden("Access to resource has been denied.".to_string())
    }

    /// The HTTP status code of this condition.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            HttpError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            HttpError::Unauthorized => StatusCode::UNAUTHORIZED,
            HttpError::Forbidden(_) => StatusCode::FORBIDDEN,
            HttpError::NotFound(_) => StatusCode::NOT_FOUND,
            HttpError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            HttpError::NotAcceptable { .. } => StatusCode::NOT_ACCEPTABLE,
            HttpError::Conflict(_) => StatusCode::CONFLICT,
            HttpError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            HttpError::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            HttpError::RangeNotSatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
            HttpError::NotModified { .. } => StatusCode::NOT_MODIFIED,
            HttpError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// The renderable `{error, description}` payload, or `None` for
    /// conditions that must not carry a body (304).
    #[must_use]
    pub fn payload(&self) -> Option<Value> {
        if matches!(self, HttpError::NotModified { .. }) {
            return None;
        }
        let reason = self.status().canonical_reason().unwrap_or("error");
        Some(json!({
            "error": reason,
            "description": self.to_string(),
        }))
    }

    /// Variant-specific response headers.
    #[must_use]
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        match self {
            HttpError::MethodNotAllowed { allow } => {
                let allow = allow
                    .iter()
                    .map(Method::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                vec![("allow", allow)]
            }
            HttpError::NotModified {
                etag,
                last_modified,
            } => {
                let mut headers = vec![("etag", etag.to_string())];
                if let Some(dt) = last_modified {
                    headers.push(("last-modified", format_http_date(*dt)));
                }
                headers
            }
            _ => Vec::new(),
        }
    }
}

impl From<ParseError> for HttpError {
    fn from(err: ParseError) -> Self {
        HttpError::InvalidRequest(err.to_string())
    }
}

impl IntoResponse for HttpError {
    /// Fallback rendering when no negotiated formatter is in play: JSON
    /// body, status and variant headers. The pipeline itself prefers
    /// [`crate::format::format_error`], which honors the Accept header.
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = match self.payload() {
            Some(payload) => (
                status,
                [("content-type", "application/json")],
                payload.to_string(),
            )
                .into_response(),
            None => status.into_response(),
        };
        for (name, value) in self.headers() {
            if let Ok(value) = value.parse() {
                response
                    .headers_mut()
                    .insert(http::HeaderName::from_static(name), value);
            }
        }
        response
    }
}

/// A node graph configuration error, raised at registry build time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Every node must declare a URL pattern fragment.
    #[error("node '{node}' has no url pattern")]
    MissingUrl {
        /// The offending node.
        node: String,
    },

    /// A declared parent must name a registered node.
    #[error("node '{node}' declares unknown parent '{parent}'")]
    UnknownParent {
        /// The offending node.
        node: String,
        /// The name it declared as parent.
        parent: String,
    },

    /// Aliases are redirect-only and can never be parents.
    #[error("node '{node}' declares alias '{parent}' as parent; parents must be nodes")]
    AliasParent {
        /// The offending node.
        node: String,
        /// The alias it declared as parent.
        parent: String,
    },

    /// Node and alias names must be unique.
    #[error("duplicate node name '{name}'")]
    DuplicateName {
        /// The duplicated name.
        name: String,
    },

    /// The parent chain must be acyclic.
    #[error("parent cycle through node '{node}'")]
    ParentCycle {
        /// A node on the cycle.
        node: String,
    },

    /// GET, HEAD, DELETE and OPTIONS requests cannot carry a request body,
    /// so attaching a body schema to them is a configuration mistake.
    #[error("node '{node}' attaches a body schema to bodyless verb {verb}")]
    BodySchemaOnBodylessVerb {
        /// The offending node.
        node: String,
        /// The bodyless verb.
        verb: Method,
    },
}
