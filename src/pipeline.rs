//! Per-request processing: dispatch, preconditions, pagination, assembly.
//!
//! Routing (Axum) has already resolved the request to a node or alias name
//! plus its path parameters; [`handle`] drives the rest:
//!
//! 1. construct the node instance chain (crossability checked inside);
//! 2. reject undeclared methods with 405 and a deterministic `Allow` set;
//! 3. reject empty accept-negotiation with 406 (OPTIONS bypasses);
//! 4. run the capability check for the effective verb;
//! 5. evaluate conditional request headers (If-Match strictly before
//!    If-Modified-Since, per RFC precedence);
//! 6. validate declared query/body schemas and dispatch to the verb
//!    handler;
//! 7. attach the standard headers and serialize through the response
//!    formatter.
//!
//! Taxonomy errors raised anywhere in the sequence short-circuit to the
//! single top-level catch and are rendered through the same formatter.
//!
//! # Conditional semantics
//!
//! A node whose etag is the wildcard has conditional semantics disabled:
//! the default tag would otherwise match every `If-None-Match` and turn all
//! conditional reads into 304s. Malformed conditional headers still fail
//! with 400 even then. `If-Modified-Since` suppresses the response only
//! when the resource is **not** strictly newer than the supplied instant;
//! `If-Unmodified-Since` fails with 412 only when it **is** strictly newer.

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use http::{HeaderName, Method, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::{HttpError, Result};
use crate::format::{format_error, format_payload};
use crate::node::registry::NodeEntry;
use crate::node::{HandlerArgs, Node, NodeKind, Outcome, Payload, RouteParams, Window};
use crate::params::{parse_body, parse_query};
use crate::protocol::{format_http_date, ContentRange, Etag};
use crate::request::RequestContext;

/// What a route resolved to.
#[derive(Debug, Clone)]
pub enum RouteTarget {
    /// A registered node, by name.
    Node(String),
    /// A registered alias, by name.
    Alias(String),
}

/// An in-flight response before serialization.
struct Draft {
    status: StatusCode,
    headers: Vec<(&'static str, String)>,
    payload: Option<Payload>,
}

impl Draft {
    fn new(status: StatusCode) -> Self {
        Draft {
            status,
            headers: Vec::new(),
            payload: None,
        }
    }

    fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    fn payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Process one request end to end, errors included.
pub async fn handle(target: &RouteTarget, ctx: Arc<RequestContext>, params: RouteParams) -> Response {
    match run(target, &ctx, &params).await {
        Ok(response) => response,
        Err(err) => {
            debug!(error = %err, status = err.status().as_u16(), "request failed");
            error_response(&ctx, &err)
        }
    }
}

async fn run(
    target: &RouteTarget,
    ctx: &Arc<RequestContext>,
    params: &RouteParams,
) -> Result<Response> {
    match target {
        RouteTarget::Node(name) => process_node(name, ctx, params).await,
        RouteTarget::Alias(name) => process_alias(name, ctx, params),
    }
}

/// Aliases are permission-transparent redirects: no capability checks of
/// their own, only `GET` (plus implicit HEAD/OPTIONS), and always a 301/302
/// to the canonical node's absolute URL.
fn process_alias(name: &str, ctx: &Arc<RequestContext>, params: &RouteParams) -> Result<Response> {
    let registry = ctx.registry().clone();
    let entry = registry.alias(name)?.clone();

    let allowed = entry.allowed_methods();
    if !allowed.contains(ctx.method()) {
        return Err(HttpError::MethodNotAllowed { allow: allowed });
    }

    let canonical = (entry.resolver)(&registry, ctx, params)?;
    let location = canonical.build_url(true)?;
    let status = if entry.permanent {
        StatusCode::MOVED_PERMANENTLY
    } else {
        StatusCode::FOUND
    };

    finalize(ctx, Draft::new(status).header("location", location), None)
}

async fn process_node(
    name: &str,
    ctx: &Arc<RequestContext>,
    params: &RouteParams,
) -> Result<Response> {
    let registry = ctx.registry().clone();
    let entry = registry.node(name)?.clone();
    let method = ctx.method().clone();

    let allowed = entry.allowed_methods();
    if !allowed.contains(&method) {
        return Err(HttpError::MethodNotAllowed { allow: allowed });
    }

    if method == Method::OPTIONS {
        // OPTIONS bypasses negotiation, capability checks and
        // preconditions: it describes the node, it does not touch the
        // resource.
        return finalize(ctx, options_draft(&entry), None);
    }

    let node = registry.construct(name, ctx, params)?;

    if node.base().matched_outputs.is_empty() {
        return Err(HttpError::NotAcceptable {
            supported: entry.outputs.clone(),
        });
    }

    check_capability(&*node, &method)?;
    evaluate_preconditions(ctx, &*node, &method)?;

    let args = build_args(ctx, &entry, &method)?;

    let effective = if method == Method::HEAD {
        Method::GET
    } else {
        method.clone()
    };

    let (draft, etag) = match (effective.as_str(), entry.kind) {
        ("GET", NodeKind::Collection) => {
            (collection_get(ctx, &entry, &node, &args).await?, node.etag())
        }
        ("GET", NodeKind::Resource) => {
            (resource_get(ctx, &entry, &node, &args).await?, node.etag())
        }
        ("POST", NodeKind::Collection) => (collection_post(&node, &args).await?, node.etag()),
        ("PUT", _) | ("PATCH", _) => (
            resource_write(ctx, &entry, &node, &effective, &args).await?,
            node.etag(),
        ),
        ("DELETE", _) => resource_delete(ctx, &entry, &node, &args).await?,
        _ => {
            // A verb was declared that the dispatch table has no handler
            // slot for (e.g. POST on a singular resource).
            return Err(HttpError::MethodNotAllowed {
                allow: entry.allowed_methods(),
            });
        }
    };

    finalize(ctx, with_cache_headers(draft, &etag), Some(&node))
}

fn options_draft(entry: &NodeEntry) -> Draft {
    let allow = entry
        .allowed_methods()
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    Draft::new(StatusCode::OK)
        .header("allow", allow.clone())
        .payload(json!({
            "name": entry.name,
            "url": entry.full_pattern,
            "methods": allow,
            "outputs": entry.outputs,
        }))
}

/// Per-verb capability override first, else read for idempotent methods,
/// write for everything else.
fn check_capability(node: &dyn Node, method: &Method) -> Result<()> {
    if let Some(granted) = node.can_method(method) {
        return if granted {
            Ok(())
        } else {
            Err(HttpError::forbidden())
        };
    }
    if *method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS {
        node.try_read()
    } else {
        node.try_write()
    }
}

fn evaluate_preconditions(ctx: &RequestContext, node: &dyn Node, method: &Method) -> Result<()> {
    // Malformed conditional headers are 400s regardless of whether the node
    // participates in conditional semantics.
    let if_match = ctx.if_match()?;
    let if_none_match = ctx.if_none_match()?;
    let if_modified_since = ctx.if_modified_since()?;
    let if_unmodified_since = ctx.if_unmodified_since()?;

    let etag = node.etag();
    if etag.is_wildcard() {
        return Ok(());
    }
    let last_modified = etag.last_modified();

    // Match-failure is evaluated strictly before modified-since.
    if let Some(tags) = if_match {
        if !tags.iter().any(|tag| *tag == etag) {
            return Err(HttpError::PreconditionFailed(
                "If-Match: none of the supplied entity tags match".to_string(),
            ));
        }
    }
    if let (Some(bound), Some(modified)) = (if_unmodified_since, last_modified) {
        if modified > bound {
            return Err(HttpError::PreconditionFailed(
                "If-Unmodified-Since: resource has been modified".to_string(),
            ));
        }
    }

    // The suppression conditions only apply to reads.
    if *method == Method::GET || *method == Method::HEAD {
        if let Some(tags) = if_none_match {
            if tags.iter().any(|tag| *tag == etag) {
                return Err(HttpError::NotModified {
                    etag,
                    last_modified,
                });
            }
        }
        if let (Some(bound), Some(modified)) = (if_modified_since, last_modified) {
            if modified <= bound {
                return Err(HttpError::NotModified {
                    etag,
                    last_modified,
                });
            }
        }
    }
    Ok(())
}

fn build_args(ctx: &RequestContext, entry: &NodeEntry, method: &Method) -> Result<HandlerArgs> {
    // HEAD shares GET's declared schemas.
    let lookup = if *method == Method::HEAD {
        &Method::GET
    } else {
        method
    };

    let mut args = HandlerArgs::default();
    if let Some(schema) = entry.query_schemas.get(lookup) {
        args.query = parse_query(ctx, schema)?;
    }
    if let Some(schema) = entry.body_schemas.get(lookup) {
        args.body = Some(parse_body(ctx, schema)?);
    }
    Ok(args)
}

async fn resource_get(
    ctx: &Arc<RequestContext>,
    entry: &NodeEntry,
    node: &Arc<dyn Node>,
    args: &HandlerArgs,
) -> Result<Draft> {
    let handler = node.as_resource().ok_or_else(|| HttpError::MethodNotAllowed {
        allow: entry.allowed_methods(),
    })?;
    let mut payload = handler.retrieve(args).await?;

    // Child references render as {label: url}; forbidden children are
    // omitted rather than failing the parent's response.
    for child_name in &entry.children {
        let rendered = ctx
            .registry()
            .construct(child_name, ctx, &node.base().params)
            .and_then(|child| child.render_in_parent());
        match rendered {
            Ok(Value::Object(fields)) => {
                if let Value::Object(map) = &mut payload {
                    map.extend(fields);
                }
            }
            Ok(_) => {}
            Err(HttpError::Forbidden(_)) => {
                trace!(child = %child_name, "omitting forbidden child reference");
            }
            Err(other) => return Err(other),
        }
    }

    Ok(Draft::new(StatusCode::OK).payload(payload))
}

async fn collection_get(
    ctx: &Arc<RequestContext>,
    entry: &NodeEntry,
    node: &Arc<dyn Node>,
    args: &HandlerArgs,
) -> Result<Draft> {
    let handler = node
        .as_collection()
        .ok_or_else(|| HttpError::MethodNotAllowed {
            allow: entry.allowed_methods(),
        })?;

    let range = ctx.range()?;
    let max_limit = entry
        .max_limit
        .unwrap_or(ctx.config().max_collection_size);

    let window = match &range {
        Some(range) if range.limit > max_limit => {
            // Asking for too much is a client error, distinct from a range
            // that matched nothing.
            return Err(HttpError::invalid(format!(
                "requested limit {} exceeds the maximum of {max_limit}",
                range.limit
            )));
        }
        Some(range) => Window {
            offset: range.offset,
            limit: range.limit,
        },
        None => Window {
            offset: 0,
            limit: max_limit,
        },
    };

    let items = handler.list(window, args).await?;

    let mut rendered = Vec::new();
    for item in &items {
        match item.render_in_collection() {
            Ok(value) => rendered.push(value),
            Err(HttpError::Forbidden(_)) => {
                trace!(collection = %entry.name, "omitting forbidden collection item");
            }
            Err(other) => return Err(other),
        }
    }

    if rendered.is_empty() {
        // An empty window under an explicit range is a failed range; a
        // legitimately empty collection is simply no content.
        return if range.is_some() {
            Err(HttpError::RangeNotSatisfiable)
        } else {
            Ok(Draft::new(StatusCode::NO_CONTENT).header("accept-range", entry.range_unit.clone()))
        };
    }

    let draft = match range {
        Some(range) => {
            // The range describes the fetched window; omitted items still
            // occupy their slots.
            let last = window.offset + items.len() as u64 - 1;
            let content_range = ContentRange::new(range.unit, window.offset, last, None);
            Draft::new(StatusCode::PARTIAL_CONTENT)
                .header("content-range", content_range.to_string())
        }
        None => Draft::new(StatusCode::OK).header("accept-range", entry.range_unit.clone()),
    };
    Ok(draft.payload(Value::Array(rendered)))
}

/// POST on a collection creates a sub-resource and redirects to it rather
/// than embedding the created entity's body.
async fn collection_post(node: &Arc<dyn Node>, args: &HandlerArgs) -> Result<Draft> {
    let handler = node
        .as_collection()
        .ok_or_else(|| HttpError::MethodNotAllowed {
            allow: node.base().entry.allowed_methods(),
        })?;
    let created = handler.add(args).await?;
    Ok(Draft::new(StatusCode::FOUND).header("location", created.build_url(true)?))
}

async fn resource_write(
    ctx: &Arc<RequestContext>,
    entry: &NodeEntry,
    node: &Arc<dyn Node>,
    method: &Method,
    args: &HandlerArgs,
) -> Result<Draft> {
    let handler = node.as_resource().ok_or_else(|| HttpError::MethodNotAllowed {
        allow: entry.allowed_methods(),
    })?;
    let outcome = if *method == Method::PUT {
        handler.replace(args).await?
    } else {
        handler.modify(args).await?
    };
    match outcome {
        Outcome::NoContent => Ok(Draft::new(StatusCode::NO_CONTENT)),
        Outcome::Render => resource_get(ctx, entry, node, args).await,
    }
}

/// DELETE snapshots the etag before the handler runs, so the response can
/// still report a coherent tag for the resource that no longer exists.
async fn resource_delete(
    ctx: &Arc<RequestContext>,
    entry: &NodeEntry,
    node: &Arc<dyn Node>,
    args: &HandlerArgs,
) -> Result<(Draft, Etag)> {
    let handler = node.as_resource().ok_or_else(|| HttpError::MethodNotAllowed {
        allow: entry.allowed_methods(),
    })?;
    let post_mortem = node.etag();
    let outcome = handler.delete(args).await?;
    let draft = match outcome {
        Outcome::NoContent => Draft::new(StatusCode::NO_CONTENT),
        Outcome::Render => resource_get(ctx, entry, node, args).await?,
    };
    Ok((draft, post_mortem))
}

fn with_cache_headers(draft: Draft, etag: &Etag) -> Draft {
    if etag.is_wildcard() {
        return draft;
    }
    let draft = draft.header("etag", etag.to_string());
    match etag.last_modified() {
        Some(modified) => draft.header("last-modified", format_http_date(modified)),
        None => draft,
    }
}

/// Attach the global headers and serialize the payload.
fn finalize(ctx: &RequestContext, draft: Draft, node: Option<&Arc<dyn Node>>) -> Result<Response> {
    let mut builder = http::Response::builder().status(draft.status);
    for (name, value) in &draft.headers {
        builder = builder.header(HeaderName::from_static(name), value);
    }
    builder = builder.header(HeaderName::from_static("vary"), "Accept");
    if ctx.is_secure() {
        builder = builder.header(
            HeaderName::from_static("strict-transport-security"),
            format!("max-age={}", ctx.config().hsts_max_age),
        );
    }

    let body = match &draft.payload {
        Some(payload) => {
            let content_type = node
                .and_then(|n| n.base().matched_outputs.first().cloned())
                .unwrap_or_else(|| ctx.config().default_content_type.clone());
            let rendered = format_payload(&content_type, payload)?;
            builder = builder.header(HeaderName::from_static("content-type"), content_type);
            if *ctx.method() == Method::HEAD {
                // Identical headers to GET, no message body.
                Body::empty()
            } else {
                Body::from(rendered)
            }
        }
        None => Body::empty(),
    };

    builder
        .body(body)
        .map_err(|e| HttpError::invalid(e.to_string()))
}

/// Render a taxonomy error through the formatter.
pub fn error_response(ctx: &RequestContext, err: &HttpError) -> Response {
    let (content_type, body) = format_error(ctx, err);

    let mut builder = http::Response::builder().status(err.status());
    for (name, value) in err.headers() {
        builder = builder.header(HeaderName::from_static(name), value);
    }
    builder = builder.header(HeaderName::from_static("vary"), "Accept");

    let body = match body {
        Some(text) => {
            builder = builder.header(HeaderName::from_static("content-type"), content_type);
            Body::from(text)
        }
        None => Body::empty(),
    };

    builder
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::node::registry::NodeRegistryBuilder;
    use crate::node::NodeBase;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use http::HeaderMap;

    struct Fixed {
        base: NodeBase,
        etag: Etag,
    }

    impl Node for Fixed {
        fn base(&self) -> &NodeBase {
            &self.base
        }
        fn can_read(&self) -> bool {
            true
        }
        fn etag(&self) -> Etag {
            self.etag.clone()
        }
    }

    fn fixed_node(headers: &[(&str, &str)], etag: Etag) -> (Arc<RequestContext>, Fixed) {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(
                http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                value.parse().unwrap(),
            );
        }
        let registry = Arc::new(
            NodeRegistryBuilder::new()
                .node(crate::node::NodeDef::resource(
                    "thing",
                    "/things/{id}",
                    |base| {
                        Ok(Arc::new(Probe { base }) as Arc<dyn Node>)
                    },
                ))
                .finish()
                .unwrap(),
        );
        struct Probe {
            base: NodeBase,
        }
        impl Node for Probe {
            fn base(&self) -> &NodeBase {
                &self.base
            }
        }
        let ctx = Arc::new(RequestContext::new(
            Method::GET,
            "/things/1".parse().unwrap(),
            &map,
            Bytes::new(),
            registry,
            Arc::new(ServiceConfig::default()),
        ));
        let entry = ctx.registry().node("thing").unwrap().clone();
        let base = NodeBase {
            entry,
            ctx: ctx.clone(),
            params: RouteParams::new(),
            parent: None,
            matched_outputs: vec!["application/json".to_string()],
        };
        (ctx.clone(), Fixed { base, etag })
    }

    fn value_etag() -> Etag {
        Etag::new(Utc.timestamp_opt(2000, 0).unwrap(), "42")
    }

    /// Readable but not writable, with verb overrides inverting both.
    struct Gated {
        base: NodeBase,
    }

    impl Node for Gated {
        fn base(&self) -> &NodeBase {
            &self.base
        }
        fn can_read(&self) -> bool {
            true
        }
        fn can_method(&self, method: &Method) -> Option<bool> {
            match method.as_str() {
                "PUT" => Some(true),
                "GET" => Some(false),
                _ => None,
            }
        }
    }

    #[test]
    fn test_method_override_beats_generic_capability() {
        let (_ctx, fixed) = fixed_node(&[], value_etag());
        let node = Gated { base: fixed.base };

        // Writes are generically denied, but the PUT override grants them.
        assert!(check_capability(&node, &Method::PUT).is_ok());

        // Reads are generically allowed, but the GET override denies them.
        let err = check_capability(&node, &Method::GET).unwrap_err();
        assert_eq!(err.status().as_u16(), 403);
    }

    #[test]
    fn test_verbs_without_override_use_read_write_split() {
        let (_ctx, fixed) = fixed_node(&[], value_etag());
        let node = Gated { base: fixed.base };

        let err = check_capability(&node, &Method::DELETE).unwrap_err();
        assert_eq!(err.status().as_u16(), 403);
        assert!(check_capability(&node, &Method::HEAD).is_ok());
    }

    #[test]
    fn test_if_none_match_hit_is_304() {
        let (ctx, node) = fixed_node(&[("if-none-match", "2000.000-42")], value_etag());
        let err = evaluate_preconditions(&ctx, &node, &Method::GET).unwrap_err();
        assert_eq!(err.status().as_u16(), 304);
    }

    #[test]
    fn test_if_match_miss_is_412() {
        let (ctx, node) = fixed_node(&[("if-match", "1000.000-other")], value_etag());
        let err = evaluate_preconditions(&ctx, &node, &Method::GET).unwrap_err();
        assert_eq!(err.status().as_u16(), 412);
    }

    #[test]
    fn test_if_match_checked_before_modified_since() {
        // Both preconditions would fire; If-Match wins.
        let (ctx, node) = fixed_node(
            &[("if-match", "1000.000-other"), ("if-modified-since", "3000")],
            value_etag(),
        );
        let err = evaluate_preconditions(&ctx, &node, &Method::GET).unwrap_err();
        assert_eq!(err.status().as_u16(), 412);
    }

    #[test]
    fn test_if_modified_since_requires_strictly_newer() {
        // Resource modified at t=2000; bound at t=2000 means "not newer".
        let (ctx, node) = fixed_node(&[("if-modified-since", "2000")], value_etag());
        let err = evaluate_preconditions(&ctx, &node, &Method::GET).unwrap_err();
        assert_eq!(err.status().as_u16(), 304);

        let (ctx, node) = fixed_node(&[("if-modified-since", "1000")], value_etag());
        assert!(evaluate_preconditions(&ctx, &node, &Method::GET).is_ok());
    }

    #[test]
    fn test_if_unmodified_since_fails_only_when_newer() {
        let (ctx, node) = fixed_node(&[("if-unmodified-since", "1000")], value_etag());
        let err = evaluate_preconditions(&ctx, &node, &Method::PUT).unwrap_err();
        assert_eq!(err.status().as_u16(), 412);

        let (ctx, node) = fixed_node(&[("if-unmodified-since", "2000")], value_etag());
        assert!(evaluate_preconditions(&ctx, &node, &Method::PUT).is_ok());
    }

    #[test]
    fn test_wildcard_etag_disables_conditionals() {
        let (ctx, node) = fixed_node(&[("if-none-match", "2000.000-42")], Etag::Wildcard);
        assert!(evaluate_preconditions(&ctx, &node, &Method::GET).is_ok());
    }

    #[test]
    fn test_malformed_conditional_is_400_even_with_wildcard() {
        let (ctx, node) = fixed_node(&[("if-modified-since", "whenever")], Etag::Wildcard);
        let err = evaluate_preconditions(&ctx, &node, &Method::GET).unwrap_err();
        assert_eq!(err.status().as_u16(), 400);
    }

    #[test]
    fn test_suppression_only_applies_to_reads() {
        let (ctx, node) = fixed_node(&[("if-none-match", "2000.000-42")], value_etag());
        assert!(evaluate_preconditions(&ctx, &node, &Method::PUT).is_ok());
    }
}
