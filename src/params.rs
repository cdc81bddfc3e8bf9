//! Declarative query string and body validation.
//!
//! The pipeline runs these validators before invoking a verb handler. A node
//! attaches a [`ParamSchema`] to a verb for its query string, a
//! [`BodySchema`] for its body; validated values arrive in the handler as a
//! typed [`FieldValues`] split into required and optional fields, so
//! handlers never re-parse raw request data.
//!
//! Validation failures map deterministically onto the error taxonomy:
//! unexpected or missing or uncoercible fields are 400s, an unsupported body
//! content type is a 415. Attaching a body schema to a verb that cannot
//! structurally carry a body is a configuration error caught at registry
//! build (see [`crate::error::RegistryError`]).

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::error::{HttpError, Result};
use crate::protocol::constants::FORM_URL_ENCODED;
use crate::protocol::{parse_http_datetime, timestamp_millis};
use crate::request::RequestContext;

/// The coercion applied to a field's raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Kept as text.
    Text,
    /// Parsed as a signed integer.
    Integer,
    /// Parsed as a float.
    Float,
    /// Parsed as `true`/`false`/`1`/`0`.
    Bool,
    /// Parsed as an HTTP date (timestamp, RFC1123 or ISO8601).
    DateTime,
}

/// One declared field.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// Field name as it appears in the query string or form body.
    pub name: &'static str,
    /// Required fields must be present; optional ones may be absent.
    pub required: bool,
    /// Coercion to apply.
    pub kind: FieldKind,
}

impl FieldSpec {
    /// A required field.
    #[must_use]
    pub fn required(name: &'static str, kind: FieldKind) -> Self {
        FieldSpec {
            name,
            required: true,
            kind,
        }
    }

    /// An optional field.
    #[must_use]
    pub fn optional(name: &'static str, kind: FieldKind) -> Self {
        FieldSpec {
            name,
            required: false,
            kind,
        }
    }
}

/// A declared set of fields with strictness policy.
#[derive(Debug, Clone)]
pub struct ParamSchema {
    /// Declared fields.
    pub fields: Vec<FieldSpec>,
    /// Strict schemas reject any field they did not declare.
    pub strict: bool,
}

impl ParamSchema {
    /// A strict schema over the given fields.
    #[must_use]
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        ParamSchema {
            fields,
            strict: true,
        }
    }

    /// Allow undeclared fields to pass through unvalidated (they are
    /// dropped, not forwarded).
    #[must_use]
    pub fn lenient(mut self) -> Self {
        self.strict = false;
        self
    }
}

/// Body validation: a field schema plus the accepted media types.
///
/// A `schema` of `None` marks the body as opaque: any of the accepted
/// content types passes through untouched as raw bytes.
#[derive(Debug, Clone)]
pub struct BodySchema {
    /// Field schema for form-encoded bodies; `None` for opaque payloads.
    pub schema: Option<ParamSchema>,
    /// Accepted request content types.
    pub content_types: Vec<String>,
}

impl BodySchema {
    /// A form-urlencoded body validated against `schema`.
    #[must_use]
    pub fn form(schema: ParamSchema) -> Self {
        BodySchema {
            schema: Some(schema),
            content_types: vec![FORM_URL_ENCODED.to_string()],
        }
    }

    /// An opaque body accepted in the given content types.
    #[must_use]
    pub fn opaque(content_types: Vec<String>) -> Self {
        BodySchema {
            schema: None,
            content_types,
        }
    }
}

/// A coerced field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Text field.
    Text(String),
    /// Integer field.
    Integer(i64),
    /// Float field.
    Float(f64),
    /// Boolean field.
    Bool(bool),
    /// Instant field.
    DateTime(DateTime<Utc>),
}

impl FieldValue {
    /// The JSON rendition; instants become fractional unix seconds so dates
    /// never leak as native values.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Text(v) => json!(v),
            FieldValue::Integer(v) => json!(v),
            FieldValue::Float(v) => json!(v),
            FieldValue::Bool(v) => json!(v),
            FieldValue::DateTime(v) => json!(timestamp_millis(*v)),
        }
    }
}

/// Validated fields, split the way handlers consume them.
#[derive(Debug, Clone, Default)]
pub struct FieldValues {
    /// Required fields, in declaration order.
    pub required: Vec<(&'static str, FieldValue)>,
    /// Optional fields that were present.
    pub optional: BTreeMap<&'static str, FieldValue>,
}

impl FieldValues {
    /// Look up a field by name, required or optional.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.required
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
            .or_else(|| self.optional.get(name))
    }
}

/// A validated request body.
#[derive(Debug, Clone)]
pub enum BodyPayload {
    /// Form-encoded body validated against the schema.
    Fields(FieldValues),
    /// Opaque body passed through untouched.
    Opaque(Bytes),
}

/// Validate the query string against a schema.
pub fn parse_query(ctx: &RequestContext, schema: &ParamSchema) -> Result<FieldValues> {
    validate(schema, &ctx.query_pairs())
}

/// Validate the request body against a body schema.
///
/// An empty body is a 400 (the verb declared one), an unsupported content
/// type a 415. Opaque bodies skip field validation entirely.
pub fn parse_body(ctx: &RequestContext, schema: &BodySchema) -> Result<BodyPayload> {
    if ctx.content_length() == 0 {
        return Err(HttpError::invalid("request has no payload"));
    }

    let content_type = ctx.content_type().unwrap_or_default();
    if !schema.content_types.iter().any(|ct| *ct == content_type) {
        return Err(HttpError::UnsupportedMediaType {
            required: schema.content_types.join(", "),
        });
    }

    match (&schema.schema, content_type.as_str()) {
        (Some(fields), FORM_URL_ENCODED) => {
            let pairs: Vec<(String, String)> = url::form_urlencoded::parse(ctx.body())
                .into_owned()
                .collect();
            Ok(BodyPayload::Fields(validate(fields, &pairs)?))
        }
        (Some(_), _) => {
            // A field schema only knows how to read form encoding.
            Err(HttpError::UnsupportedMediaType {
                required: FORM_URL_ENCODED.to_string(),
            })
        }
        (None, _) => Ok(BodyPayload::Opaque(ctx.body().clone())),
    }
}

fn validate(schema: &ParamSchema, pairs: &[(String, String)]) -> Result<FieldValues> {
    if schema.strict {
        let unexpected: Vec<&str> = pairs
            .iter()
            .map(|(name, _)| name.as_str())
            .filter(|name| !schema.fields.iter().any(|f| f.name == *name))
            .collect();
        if !unexpected.is_empty() {
            return Err(HttpError::invalid(format!(
                "unexpected field(s): {}",
                unexpected.join(", ")
            )));
        }
    }

    let mut values = FieldValues::default();
    for spec in &schema.fields {
        let raw = pairs.iter().find(|(name, _)| name == spec.name);
        match raw {
            Some((_, raw)) => {
                let value = coerce(spec, raw)?;
                if spec.required {
                    values.required.push((spec.name, value));
                } else {
                    values.optional.insert(spec.name, value);
                }
            }
            None if spec.required => {
                return Err(HttpError::invalid(format!(
                    "missing required field '{}'",
                    spec.name
                )));
            }
            None => {}
        }
    }
    Ok(values)
}

fn coerce(spec: &FieldSpec, raw: &str) -> Result<FieldValue> {
    let bad = |reason: &str| {
        HttpError::invalid(format!("field '{}': {reason}", spec.name))
    };
    match spec.kind {
        FieldKind::Text => Ok(FieldValue::Text(raw.to_string())),
        FieldKind::Integer => raw
            .parse()
            .map(FieldValue::Integer)
            .map_err(|_| bad("expected an integer")),
        FieldKind::Float => raw
            .parse()
            .map(FieldValue::Float)
            .map_err(|_| bad("expected a number")),
        FieldKind::Bool => match raw {
            "true" | "1" => Ok(FieldValue::Bool(true)),
            "false" | "0" => Ok(FieldValue::Bool(false)),
            _ => Err(bad("expected a boolean")),
        },
        FieldKind::DateTime => parse_http_datetime(raw)
            .map(FieldValue::DateTime)
            .map_err(|_| bad("expected a date")),
    }
}
