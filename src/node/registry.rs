//! The startup-built node graph registry.
//!
//! Node types are declared once, at process start, as [`NodeDef`] /
//! [`AliasDef`] values; [`NodeRegistryBuilder::finish`] validates the whole
//! graph and produces an immutable [`NodeRegistry`]. Everything the original
//! design computed lazily or by reflection is resolved here instead:
//!
//! - full URL patterns are composed from the parent chain once;
//! - the parent→children index is an explicit bidirectional graph, not a
//!   scan over framework route storage;
//! - labels, range units and `*/*` output expansion are fixed at build;
//! - configuration errors (missing url, alias parent, parameter schema on a
//!   bodyless verb, parent cycles) fail the build — never the first request.
//!
//! # Examples
//!
//! ```ignore
//! let registry = NodeRegistryBuilder::new()
//!     .node(
//!         NodeDef::collection("users", "/users", UsersNode::construct)
//!             .methods(vec![Method::GET, Method::POST]),
//!     )
//!     .node(
//!         NodeDef::resource("user", "/{user_id}", UserNode::construct)
//!             .parent("users")
//!             .methods(vec![Method::GET, Method::DELETE]),
//!     )
//!     .finish()?;
//! ```

use http::Method;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{trace, warn};

use crate::error::{HttpError, RegistryError, Result};
use crate::params::{BodySchema, ParamSchema};
use crate::protocol::match_outputs;
use crate::request::RequestContext;

use super::{Node, NodeBase, NodeConstructor, NodeKind, RouteParams};

/// Verbs that structurally cannot carry a request body.
const BODYLESS: &[Method] = &[Method::GET, Method::HEAD, Method::DELETE, Method::OPTIONS];

/// Outputs a node declares when it does not say otherwise. The `*/*` entry
/// expands to the builder's default content type at build time.
const DEFAULT_OUTPUTS: &[&str] = &[
    "application/json",
    "application/xml",
    "application/xhtml+xml",
    "text/html",
    "*/*",
];

/// Resolves an alias to its canonical node instance.
pub type CanonicalResolver =
    fn(&NodeRegistry, &Arc<RequestContext>, &RouteParams) -> Result<Arc<dyn Node>>;

/// Declaration of one node type.
pub struct NodeDef {
    name: String,
    url: String,
    label: Option<String>,
    parent: Option<String>,
    secure: bool,
    outputs: Vec<String>,
    kind: NodeKind,
    methods: Vec<Method>,
    range_unit: Option<String>,
    max_limit: Option<u64>,
    query_schemas: HashMap<Method, ParamSchema>,
    body_schemas: HashMap<Method, BodySchema>,
    constructor: NodeConstructor,
}

impl NodeDef {
    fn new(name: &str, url: &str, kind: NodeKind, constructor: NodeConstructor) -> Self {
        NodeDef {
            name: name.to_string(),
            url: url.to_string(),
            label: None,
            parent: None,
            secure: false,
            outputs: DEFAULT_OUTPUTS.iter().map(|s| s.to_string()).collect(),
            kind,
            methods: Vec::new(),
            range_unit: None,
            max_limit: None,
            query_schemas: HashMap::new(),
            body_schemas: HashMap::new(),
            constructor,
        }
    }

    /// Declare a singular resource node.
    #[must_use]
    pub fn resource(name: &str, url: &str, constructor: NodeConstructor) -> Self {
        Self::new(name, url, NodeKind::Resource, constructor)
    }

    /// Declare a collection node.
    #[must_use]
    pub fn collection(name: &str, url: &str, constructor: NodeConstructor) -> Self {
        Self::new(name, url, NodeKind::Collection, constructor)
    }

    /// Name the parent node. Must be a registered node, never an alias.
    #[must_use]
    pub fn parent(mut self, name: &str) -> Self {
        self.parent = Some(name.to_string());
        self
    }

    /// Label used when this node renders as a named child reference.
    /// Defaults to the node name (collections: the range unit).
    #[must_use]
    pub fn label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    /// Advertise this node's URL as `https` regardless of the request.
    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Replace the default acceptable output media types.
    #[must_use]
    pub fn outputs(mut self, outputs: Vec<&str>) -> Self {
        self.outputs = outputs.into_iter().map(|s| s.to_string()).collect();
        self
    }

    /// Declare the verbs this node handles. HEAD and OPTIONS are always
    /// implicit and never declared.
    #[must_use]
    pub fn methods(mut self, methods: Vec<Method>) -> Self {
        self.methods = methods;
        self
    }

    /// Range unit for collections; defaults to the node name pluralized.
    #[must_use]
    pub fn range_unit(mut self, unit: &str) -> Self {
        self.range_unit = Some(unit.to_string());
        self
    }

    /// Fetch size bound for collections; defaults to the service-wide
    /// maximum.
    #[must_use]
    pub fn max_limit(mut self, limit: u64) -> Self {
        self.max_limit = Some(limit);
        self
    }

    /// Attach a query string schema to a verb.
    #[must_use]
    pub fn query_schema(mut self, method: Method, schema: ParamSchema) -> Self {
        self.query_schemas.insert(method, schema);
        self
    }

    /// Attach a body schema to a verb. Attaching one to GET, HEAD, DELETE
    /// or OPTIONS fails the registry build.
    #[must_use]
    pub fn body_schema(mut self, method: Method, schema: BodySchema) -> Self {
        self.body_schemas.insert(method, schema);
        self
    }
}

/// Declaration of a redirect-only alias for a canonical node.
pub struct AliasDef {
    name: String,
    url: String,
    parent: Option<String>,
    permanent: bool,
    resolver: CanonicalResolver,
}

impl AliasDef {
    /// Declare an alias. `resolver` constructs the canonical node the alias
    /// redirects to.
    #[must_use]
    pub fn new(name: &str, url: &str, resolver: CanonicalResolver) -> Self {
        AliasDef {
            name: name.to_string(),
            url: url.to_string(),
            parent: None,
            permanent: true,
            resolver,
        }
    }

    /// Name the parent node (for URL pattern composition only).
    #[must_use]
    pub fn parent(mut self, name: &str) -> Self {
        self.parent = Some(name.to_string());
        self
    }

    /// Redirect with 301 when `true` (the default), 302 otherwise.
    #[must_use]
    pub fn permanent(mut self, permanent: bool) -> Self {
        self.permanent = permanent;
        self
    }
}

/// One node type's resolved, immutable registration.
pub struct NodeEntry {
    /// Route identifier, unique across nodes and aliases.
    pub name: String,
    /// The node's own URL pattern fragment.
    pub url: String,
    /// Label used in parent payload references.
    pub label: String,
    /// Parent node name, when declared.
    pub parent: Option<String>,
    /// Whether URLs for this node always advertise `https`.
    pub secure: bool,
    /// Acceptable output media types, `*/*` already expanded.
    pub outputs: Vec<String>,
    /// Resource or collection.
    pub kind: NodeKind,
    /// Declared verbs (implicit HEAD/OPTIONS not included).
    pub methods: Vec<Method>,
    /// Range unit for pagination headers.
    pub range_unit: String,
    /// Per-node fetch size bound; `None` defers to the service maximum.
    pub max_limit: Option<u64>,
    /// Query string schemas by verb.
    pub query_schemas: HashMap<Method, ParamSchema>,
    /// Body schemas by verb.
    pub body_schemas: HashMap<Method, BodySchema>,
    /// Instance constructor.
    pub constructor: NodeConstructor,
    /// Full URL pattern: the parent chain's patterns concatenated with this
    /// node's fragment.
    pub full_pattern: String,
    /// Names of registered nodes that declare this node as parent.
    pub children: Vec<String>,
}

impl NodeEntry {
    /// The node's allowed methods: declared verbs plus the implicit HEAD
    /// and OPTIONS, in deterministic sorted order.
    #[must_use]
    pub fn allowed_methods(&self) -> Vec<Method> {
        let mut allowed = self.methods.clone();
        for implicit in [Method::HEAD, Method::OPTIONS] {
            if !allowed.contains(&implicit) {
                allowed.push(implicit);
            }
        }
        allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        allowed
    }
}

/// One alias's resolved registration.
pub struct AliasEntry {
    /// Route identifier.
    pub name: String,
    /// The alias's own URL pattern fragment.
    pub url: String,
    /// Parent node name, when declared.
    pub parent: Option<String>,
    /// 301 when `true`, 302 otherwise.
    pub permanent: bool,
    /// Canonical node resolver.
    pub resolver: CanonicalResolver,
    /// Full URL pattern.
    pub full_pattern: String,
}

impl AliasEntry {
    /// Aliases resolve GET only, plus the implicit HEAD and OPTIONS.
    #[must_use]
    pub fn allowed_methods(&self) -> Vec<Method> {
        vec![Method::GET, Method::HEAD, Method::OPTIONS]
    }
}

/// Accumulates declarations, then validates the graph.
#[derive(Default)]
pub struct NodeRegistryBuilder {
    nodes: Vec<NodeDef>,
    aliases: Vec<AliasDef>,
    default_content_type: Option<String>,
}

impl NodeRegistryBuilder {
    /// Start an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node type.
    #[must_use]
    pub fn node(mut self, def: NodeDef) -> Self {
        self.nodes.push(def);
        self
    }

    /// Register an alias.
    #[must_use]
    pub fn alias(mut self, def: AliasDef) -> Self {
        self.aliases.push(def);
        self
    }

    /// Content type substituted for `*/*` in declared outputs. Should match
    /// [`ServiceConfig::default_content_type`](crate::ServiceConfig).
    #[must_use]
    pub fn default_content_type(mut self, content_type: &str) -> Self {
        self.default_content_type = Some(content_type.to_string());
        self
    }

    /// Validate the graph and build the registry.
    ///
    /// # Errors
    ///
    /// Any configuration mistake fails the build with a [`RegistryError`];
    /// none of these can surface at request time.
    pub fn finish(self) -> std::result::Result<NodeRegistry, RegistryError> {
        let default_content_type = self
            .default_content_type
            .unwrap_or_else(|| "application/json".to_string());

        let mut names = HashSet::new();
        for name in self
            .nodes
            .iter()
            .map(|n| &n.name)
            .chain(self.aliases.iter().map(|a| &a.name))
        {
            if !names.insert(name.clone()) {
                return Err(RegistryError::DuplicateName { name: name.clone() });
            }
        }

        let node_names: HashSet<&str> = self.nodes.iter().map(|n| n.name.as_str()).collect();
        let alias_names: HashSet<&str> = self.aliases.iter().map(|a| a.name.as_str()).collect();

        let check_parent = |child: &str, parent: Option<&String>| {
            if let Some(parent) = parent {
                if alias_names.contains(parent.as_str()) {
                    return Err(RegistryError::AliasParent {
                        node: child.to_string(),
                        parent: parent.clone(),
                    });
                }
                if !node_names.contains(parent.as_str()) {
                    return Err(RegistryError::UnknownParent {
                        node: child.to_string(),
                        parent: parent.clone(),
                    });
                }
            }
            Ok(())
        };

        let parents: HashMap<String, Option<String>> = self
            .nodes
            .iter()
            .map(|n| (n.name.clone(), n.parent.clone()))
            .collect();
        let urls: HashMap<String, String> = self
            .nodes
            .iter()
            .map(|n| (n.name.clone(), n.url.clone()))
            .collect();

        for def in &self.nodes {
            if def.url.is_empty() {
                return Err(RegistryError::MissingUrl {
                    node: def.name.clone(),
                });
            }
            check_parent(&def.name, def.parent.as_ref())?;

            for verb in def.body_schemas.keys() {
                if BODYLESS.contains(verb) {
                    return Err(RegistryError::BodySchemaOnBodylessVerb {
                        node: def.name.clone(),
                        verb: verb.clone(),
                    });
                }
            }

            // Walk the parent chain; revisiting a name means a cycle.
            let mut seen = HashSet::new();
            let mut current = def.name.as_str();
            seen.insert(current);
            while let Some(Some(parent)) = parents.get(current) {
                if !seen.insert(parent.as_str()) {
                    return Err(RegistryError::ParentCycle {
                        node: def.name.clone(),
                    });
                }
                current = parent.as_str();
            }

            if def.methods.is_empty() {
                warn!(node = %def.name, "node declares no verb handlers");
            }
        }

        for def in &self.aliases {
            if def.url.is_empty() {
                return Err(RegistryError::MissingUrl {
                    node: def.name.clone(),
                });
            }
            check_parent(&def.name, def.parent.as_ref())?;
        }

        let full_pattern = |name: &str, url: &str, parent: Option<&String>| {
            let mut pattern = url.to_string();
            let mut current = parent;
            while let Some(parent_name) = current {
                // Ancestors were validated above.
                let parent_url = urls.get(parent_name.as_str()).map(String::as_str).unwrap_or("");
                pattern = format!("{parent_url}{pattern}");
                current = parents.get(parent_name.as_str()).and_then(|p| p.as_ref());
            }
            trace!(node = name, pattern = %pattern, "composed full url pattern");
            pattern
        };

        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for def in &self.nodes {
            if let Some(parent) = &def.parent {
                children
                    .entry(parent.clone())
                    .or_default()
                    .push(def.name.clone());
            }
        }
        for names in children.values_mut() {
            names.sort();
        }

        let mut nodes = HashMap::new();
        for def in self.nodes {
            let range_unit = def.range_unit.clone().unwrap_or_else(|| pluralize(&def.name));
            let label = def.label.clone().unwrap_or_else(|| match def.kind {
                NodeKind::Collection => range_unit.clone(),
                NodeKind::Resource => def.name.clone(),
            });
            // Deduped after expansion: the default list carries both the
            // default type and `*/*`, which expands to the same string.
            let mut outputs: Vec<String> = Vec::new();
            for declared in &def.outputs {
                let output = if declared == "*/*" {
                    default_content_type.clone()
                } else {
                    declared.clone()
                };
                if !outputs.contains(&output) {
                    outputs.push(output);
                }
            }
            let pattern = full_pattern(&def.name, &def.url, def.parent.as_ref());
            let entry = NodeEntry {
                label,
                range_unit,
                outputs,
                full_pattern: pattern,
                children: children.remove(&def.name).unwrap_or_default(),
                name: def.name,
                url: def.url,
                parent: def.parent,
                secure: def.secure,
                kind: def.kind,
                methods: def.methods,
                max_limit: def.max_limit,
                query_schemas: def.query_schemas,
                body_schemas: def.body_schemas,
                constructor: def.constructor,
            };
            nodes.insert(entry.name.clone(), Arc::new(entry));
        }

        let mut aliases = HashMap::new();
        for def in self.aliases {
            let pattern = full_pattern(&def.name, &def.url, def.parent.as_ref());
            let entry = AliasEntry {
                full_pattern: pattern,
                name: def.name,
                url: def.url,
                parent: def.parent,
                permanent: def.permanent,
                resolver: def.resolver,
            };
            aliases.insert(entry.name.clone(), Arc::new(entry));
        }

        Ok(NodeRegistry { nodes, aliases })
    }
}

/// The immutable, validated node graph.
pub struct NodeRegistry {
    nodes: HashMap<String, Arc<NodeEntry>>,
    aliases: HashMap<String, Arc<AliasEntry>>,
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("aliases", &self.aliases.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl NodeRegistry {
    /// Look up a node entry by name.
    pub fn node(&self, name: &str) -> Result<&Arc<NodeEntry>> {
        self.nodes
            .get(name)
            .ok_or_else(|| HttpError::NotFound(format!("unknown node '{name}'")))
    }

    /// Look up an alias entry by name.
    pub fn alias(&self, name: &str) -> Result<&Arc<AliasEntry>> {
        self.aliases
            .get(name)
            .ok_or_else(|| HttpError::NotFound(format!("unknown alias '{name}'")))
    }

    /// All registered node entries.
    pub fn nodes(&self) -> impl Iterator<Item = &Arc<NodeEntry>> {
        self.nodes.values()
    }

    /// All registered alias entries.
    pub fn aliases(&self) -> impl Iterator<Item = &Arc<AliasEntry>> {
        self.aliases.values()
    }

    /// Construct a node instance (and, transitively, its parent chain) for
    /// one request.
    ///
    /// The parent instance is built first with the same path parameters,
    /// since a child's full identity depends on its ancestors' parameters.
    /// The crossability check runs immediately upon construction. Identical
    /// sub-resources within the same request are memoized in the request's
    /// instance cache.
    pub fn construct(
        &self,
        name: &str,
        ctx: &Arc<RequestContext>,
        params: &RouteParams,
    ) -> Result<Arc<dyn Node>> {
        let entry = self.node(name)?.clone();

        if let Some(cached) = ctx.cache().get(&entry.full_pattern, params) {
            trace!(node = name, "node instance cache hit");
            return Ok(cached);
        }

        let parent = match &entry.parent {
            Some(parent) => Some(self.construct(parent, ctx, params)?),
            None => None,
        };

        let matched_outputs = match_outputs(&ctx.accept(), &entry.outputs);
        let base = NodeBase {
            entry: entry.clone(),
            ctx: ctx.clone(),
            params: params.clone(),
            parent,
            matched_outputs,
        };

        let node = (entry.constructor)(base)?;
        node.try_cross()?;

        ctx.cache().put(&entry.full_pattern, params, node.clone());
        Ok(node)
    }
}

fn pluralize(name: &str) -> String {
    if name.ends_with('s') {
        name.to_string()
    } else {
        format!("{name}s")
    }
}
