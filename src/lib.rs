#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

//! # Cirrus-REST: Resource Trees over HTTP
//!
//! This crate maps a tree of resource definitions onto HTTP routes and
//! drives every request through one uniform pipeline: node resolution,
//! content negotiation, conditional request evaluation, range pagination,
//! verb dispatch and response formatting.
//!
//! ## Overview
//!
//! Applications describe their API as a registry of **nodes** (resources
//! and collections, nested via parent links) plus **aliases** (redirecting
//! shorthand routes). The registry is validated and frozen at startup;
//! from then on the framework owns the protocol mechanics:
//!
//! 1. **Node graph** - Named definitions with composed URL patterns, an
//!    explicit parent/children index, and per-request instance caching
//! 2. **Negotiation** - `Accept` parsing with q-values, matched against
//!    each node's declared output types
//! 3. **Conditional requests** - Timestamped entity tags driving
//!    `If-Match`, `If-None-Match`, `If-Modified-Since` and
//!    `If-Unmodified-Since`
//! 4. **Pagination** - `Range: unit=offset-limit` windows over
//!    collections, with `206`/`204`/`416` outcomes
//! 5. **Dispatch** - Trait-based verb handlers ([`ResourceHandlers`],
//!    [`CollectionHandlers`]) with declared query/body schemas
//!
//! ## HTTP Status Codes
//!
//! - `200 OK` / `206 Partial Content` - Rendered payloads
//! - `204 No Content` - Empty collections, bodiless writes
//! - `301` / `302` - Alias redirects and creation redirects
//! - `304 Not Modified` - Suppressed conditional reads
//! - `405 Method Not Allowed` - Undeclared verbs, with exact `Allow`
//! - `406 Not Acceptable` - No overlap with the node's output types
//! - `412 Precondition Failed` - Failed `If-Match`/`If-Unmodified-Since`
//! - `416 Range Not Satisfiable` - An explicit range matched nothing
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use cirrus_rest::{
//!     build_router, NodeDef, NodeRegistryBuilder, ServiceConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = NodeRegistryBuilder::new()
//!         .node(NodeDef::collection("users", "/users", make_users))
//!         .node(
//!             NodeDef::resource("user", "/{username}", make_user)
//!                 .parent("users")
//!                 .methods(vec![http::Method::GET, http::Method::DELETE]),
//!         )
//!         .finish()
//!         .unwrap();
//!
//!     let app = build_router(Arc::new(registry), Arc::new(ServiceConfig::default()));
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```
//!
//! ## Module Structure
//!
//! - **[protocol]** - Header value types (entity tags, ranges, accept lists, HTTP dates)
//! - **[error]** - The request error taxonomy and result handling
//! - **[config]** - Service-wide configuration
//! - **[request]** - The per-request context and header accessors
//! - **[params]** - Declared query/body schemas and their validation
//! - **[node]** - Node traits, definitions and the startup registry
//! - **[format]** - Payload and error serialization per content type
//! - **[pipeline]** - The per-request processing sequence
//! - **[router]** - Axum router construction

pub mod config;
pub mod error;
pub mod format;
pub mod node;
pub mod params;
pub mod pipeline;
pub mod protocol;
pub mod request;
pub mod router;

pub use config::ServiceConfig;
pub use error::{HttpError, RegistryError, Result};
pub use node::registry::{AliasEntry, NodeEntry, NodeRegistry, NodeRegistryBuilder};
pub use node::{
    AliasDef, CollectionHandlers, HandlerArgs, Node, NodeBase, NodeDef, NodeKind, Outcome,
    Payload, ResourceHandlers, RouteParams, Window,
};
pub use params::{BodySchema, FieldKind, FieldSpec, ParamSchema};
pub use protocol::{ContentRange, Etag, Range};
pub use request::{Authorization, RequestContext};
pub use router::build_router;
