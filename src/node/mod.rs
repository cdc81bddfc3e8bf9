//! The node graph: hierarchical resource definitions.
//!
//! A **node** represents one HTTP-addressable resource or collection. Its
//! static shape — URL pattern fragment, route name, parent, outputs,
//! declared verbs — lives in a [`NodeEntry`](registry::NodeEntry) built once
//! at startup by the [`NodeRegistry`](registry::NodeRegistry). A node
//! *instance* is short-lived: constructed per request with the resolved path
//! parameters, its parent chain constructed first, and memoized for the
//! request by [`cache::NodeCache`].
//!
//! # Capability model
//!
//! Three predicates gate access: `can_cross` (may the hierarchy be traversed
//! through this node; default permits), `can_read` and `can_write` (both
//! deny by default — concrete nodes must grant access explicitly). A
//! node may override the check for a single verb with
//! [`Node::can_method`], which takes precedence over the generic
//! read/write split.
//!
//! # Verb handlers
//!
//! Data fetching is business logic outside this crate; nodes implement the
//! [`ResourceHandlers`] / [`CollectionHandlers`] traits and the pipeline
//! dispatches to them per verb. A node's allowed methods are exactly the
//! verbs it declares at registration, plus the always-implicit HEAD and
//! OPTIONS.

use async_trait::async_trait;
use http::Method;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{HttpError, Result};
use crate::params::{BodyPayload, FieldValues};
use crate::protocol::Etag;
use crate::request::RequestContext;

pub mod cache;
pub mod registry;

pub use registry::{AliasDef, NodeDef, NodeEntry, NodeRegistry, NodeRegistryBuilder};

/// Path parameters resolved from the URL, by name.
pub type RouteParams = BTreeMap<String, String>;

/// The payload currency of the crate: structured JSON values with instants
/// already flattened to fractional unix seconds.
pub type Payload = Value;

/// Node instance constructor registered alongside a [`NodeEntry`].
///
/// Concrete node types pull their declared parameter fields out of the
/// [`NodeBase`] explicitly; there is no introspection.
pub type NodeConstructor = fn(NodeBase) -> Result<Arc<dyn Node>>;

/// What a write handler wants done with the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No body should follow: respond 204.
    NoContent,
    /// Render the resource's (final) state as a GET would.
    Render,
}

/// Whether a node is a singular resource or a list-like collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A singular resource with retrieve/replace/modify/delete semantics.
    Resource,
    /// A list-like collection with list/add semantics and range pagination.
    Collection,
}

/// The sub-window of a collection fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// First item index.
    pub offset: u64,
    /// Maximum number of items.
    pub limit: u64,
}

/// Validated request parameters handed to verb handlers.
///
/// Required query fields arrive in declaration order in
/// [`FieldValues::required`]; optional ones by name in
/// [`FieldValues::optional`].
#[derive(Debug, Clone, Default)]
pub struct HandlerArgs {
    /// Validated query string fields (empty when no schema is attached).
    pub query: FieldValues,
    /// Validated body, for body-bearing verbs with a schema.
    pub body: Option<BodyPayload>,
}

/// Per-request state shared by every node instance.
///
/// Concrete node types embed one of these and expose it through
/// [`Node::base`].
pub struct NodeBase {
    /// The node's static registry entry.
    pub entry: Arc<NodeEntry>,
    /// The request being processed.
    pub ctx: Arc<RequestContext>,
    /// Path parameters, shared down the whole ancestor chain.
    pub params: RouteParams,
    /// The parent instance, constructed first.
    pub parent: Option<Arc<dyn Node>>,
    /// Outputs matching the request's Accept list, in preference order.
    pub matched_outputs: Vec<String>,
}

impl NodeBase {
    /// Fetch a declared path parameter.
    ///
    /// A missing parameter means the route resolved to this node without
    /// carrying its identity, which renders the resource unaddressable.
    pub fn param(&self, name: &str) -> Result<&str> {
        self.params
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| {
                HttpError::NotFound(format!("missing path parameter '{name}'"))
            })
    }
}

/// One addressable resource or collection, instantiated for one request.
pub trait Node: Send + Sync {
    /// The instance's shared per-request state.
    fn base(&self) -> &NodeBase;

    /// May the hierarchy be traversed through this node? Guards traversal
    /// independent of whether the leaf will be read or written.
    fn can_cross(&self) -> bool {
        true
    }

    /// May the node's resource be serialized? Deny by default.
    fn can_read(&self) -> bool {
        false
    }

    /// May the node's resource be modified? Deny by default.
    fn can_write(&self) -> bool {
        false
    }

    /// Verb-specific capability override; takes precedence over the generic
    /// read/write checks when it returns `Some`.
    fn can_method(&self, _method: &Method) -> Option<bool> {
        None
    }

    /// The node's entity tag. The default wildcard disables conditional
    /// request semantics; concrete nodes override with a real
    /// last-modified/id pair to get correct 304/412 behavior.
    fn etag(&self) -> Etag {
        Etag::Wildcard
    }

    /// Downcast to the resource verb handlers, if implemented.
    fn as_resource(&self) -> Option<&dyn ResourceHandlers> {
        None
    }

    /// Downcast to the collection verb handlers, if implemented.
    fn as_collection(&self) -> Option<&dyn CollectionHandlers> {
        None
    }

    /// Check crossability, failing with 403.
    fn try_cross(&self) -> Result<()> {
        if self.can_cross() {
            Ok(())
        } else {
            Err(HttpError::forbidden())
        }
    }

    /// Check readability, failing with 403.
    fn try_read(&self) -> Result<()> {
        if self.can_read() {
            Ok(())
        } else {
            Err(HttpError::forbidden())
        }
    }

    /// Check writability, failing with 403.
    fn try_write(&self) -> Result<()> {
        if self.can_write() {
            Ok(())
        } else {
            Err(HttpError::forbidden())
        }
    }

    /// Build the node's URL.
    ///
    /// Exposing a resource's address is itself a read operation, so this
    /// requires the read capability. The relative form substitutes the
    /// request's path parameters into the full pattern — ancestor
    /// parameters are always available since parameters flow down the whole
    /// chain. The absolute form prefixes `https` when the node is declared
    /// secure or the request arrived securely, and the configured endpoint
    /// host when one is set.
    fn build_url(&self, absolute: bool) -> Result<String> {
        self.try_read()?;

        let base = self.base();
        let relative = substitute_params(&base.entry.full_pattern, &base.params)?;
        if !absolute {
            return Ok(relative);
        }

        let scheme = if base.entry.secure || base.ctx.is_secure() {
            "https"
        } else {
            "http"
        };
        let host = match base.ctx.config().endpoint_host() {
            Some(host) => host.to_string(),
            None => base
                .ctx
                .host()
                .ok_or_else(|| HttpError::invalid("request carries no Host header"))?
                .to_string(),
        };
        Ok(format!("{scheme}://{host}{relative}"))
    }

    /// How a reference to this node renders inside its parent's payload:
    /// `{label: url}`.
    fn render_in_parent(&self) -> Result<Payload> {
        let mut map = serde_json::Map::new();
        map.insert(self.base().entry.label.clone(), json!(self.build_url(true)?));
        Ok(Value::Object(map))
    }

    /// How this node renders as an item of a collection: `{uri}`, plus
    /// `etag` for singular resources. Override to add custom fields.
    fn render_in_collection(&self) -> Result<Payload> {
        let mut map = serde_json::Map::new();
        map.insert("uri".to_string(), json!(self.build_url(true)?));
        if self.base().entry.kind == NodeKind::Resource {
            map.insert("etag".to_string(), json!(self.etag().to_string()));
        }
        Ok(Value::Object(map))
    }
}

/// Verb handlers for singular resources (and for collections that support
/// whole-collection replace/modify/delete).
///
/// Defaults fail closed: a verb declared at registration without a matching
/// handler implementation is a configuration slip, surfaced as 405.
#[async_trait]
pub trait ResourceHandlers: Send + Sync {
    /// Fetch the resource's state for GET/HEAD.
    async fn retrieve(&self, _args: &HandlerArgs) -> Result<Payload> {
        Err(HttpError::MethodNotAllowed { allow: Vec::new() })
    }

    /// Replace the resource (PUT).
    async fn replace(&self, _args: &HandlerArgs) -> Result<Outcome> {
        Err(HttpError::MethodNotAllowed { allow: Vec::new() })
    }

    /// Partially modify the resource (PATCH).
    async fn modify(&self, _args: &HandlerArgs) -> Result<Outcome> {
        Err(HttpError::MethodNotAllowed { allow: Vec::new() })
    }

    /// Delete the resource (DELETE). Return [`Outcome::Render`] to include
    /// the deleted item's final state in the response body.
    async fn delete(&self, _args: &HandlerArgs) -> Result<Outcome> {
        Err(HttpError::MethodNotAllowed { allow: Vec::new() })
    }
}

/// Verb handlers for collections.
#[async_trait]
pub trait CollectionHandlers: Send + Sync {
    /// Fetch a window of items for GET/HEAD. Items render themselves via
    /// [`Node::render_in_collection`].
    async fn list(&self, _window: Window, _args: &HandlerArgs) -> Result<Vec<Arc<dyn Node>>> {
        Err(HttpError::MethodNotAllowed { allow: Vec::new() })
    }

    /// Create a sub-resource (POST), returning the created node. The
    /// response redirects to its URL rather than embedding its body.
    async fn add(&self, _args: &HandlerArgs) -> Result<Arc<dyn Node>> {
        Err(HttpError::MethodNotAllowed { allow: Vec::new() })
    }
}

/// Substitute `{name}` placeholders in a route pattern with parameter
/// values.
pub(crate) fn substitute_params(pattern: &str, params: &RouteParams) -> Result<String> {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let close = rest[start..]
            .find('}')
            .ok_or_else(|| HttpError::invalid(format!("malformed route pattern '{pattern}'")))?
            + start;
        let name = &rest[start + 1..close];
        let value = params
            .get(name)
            .ok_or_else(|| HttpError::NotFound(format!("missing path parameter '{name}'")))?;
        out.push_str(value);
        rest = &rest[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
