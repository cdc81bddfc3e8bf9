//! Axum router construction from a [`NodeRegistry`].
//!
//! Every registered node and alias contributes exactly one route, mounted
//! at its composed full pattern. All verbs funnel through the same handler;
//! method acceptance is the pipeline's job, so an undeclared verb gets a
//! 405 with a correct `Allow` header instead of Axum's bare 405.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use cirrus_rest::{build_router, ServiceConfig};
//! # fn registry() -> cirrus_rest::NodeRegistry { unimplemented!() }
//!
//! let registry = Arc::new(registry());
//! let config = Arc::new(ServiceConfig::default());
//! let app = build_router(registry, config);
//! # let _ = app;
//! ```

use axum::body::to_bytes;
use axum::extract::{RawPathParams, Request};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use std::sync::Arc;
use tracing::debug;

use crate::config::ServiceConfig;
use crate::error::HttpError;
use crate::node::registry::NodeRegistry;
use crate::node::RouteParams;
use crate::pipeline::{self, RouteTarget};
use crate::request::RequestContext;

/// Build the service router for a finished registry.
///
/// The registry and configuration are shared across all routes; per-request
/// state lives in the [`RequestContext`] built for each call.
#[must_use]
pub fn build_router(registry: Arc<NodeRegistry>, config: Arc<ServiceConfig>) -> Router {
    let mut router = Router::new();

    for entry in registry.nodes() {
        debug!(node = %entry.name, pattern = %entry.full_pattern, "mounting node route");
        let target = RouteTarget::Node(entry.name.clone());
        let registry = registry.clone();
        let config = config.clone();
        router = router.route(
            &entry.full_pattern,
            any(move |params: RawPathParams, request: Request| {
                serve(target.clone(), registry.clone(), config.clone(), params, request)
            }),
        );
    }

    for entry in registry.aliases() {
        debug!(alias = %entry.name, pattern = %entry.full_pattern, "mounting alias route");
        let target = RouteTarget::Alias(entry.name.clone());
        let registry = registry.clone();
        let config = config.clone();
        router = router.route(
            &entry.full_pattern,
            any(move |params: RawPathParams, request: Request| {
                serve(target.clone(), registry.clone(), config.clone(), params, request)
            }),
        );
    }

    router.fallback(unknown_route)
}

async fn serve(
    target: RouteTarget,
    registry: Arc<NodeRegistry>,
    config: Arc<ServiceConfig>,
    raw_params: RawPathParams,
    request: Request,
) -> Response {
    let max_body_bytes = config.max_body_bytes;
    let (parts, body) = request.into_parts();

    let body = match to_bytes(body, max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return HttpError::invalid(format!("request body could not be read: {err}"))
                .into_response();
        }
    };

    let mut params = RouteParams::new();
    for (name, value) in raw_params.iter() {
        params.insert(name.to_string(), value.to_string());
    }

    let ctx = Arc::new(RequestContext::new(
        parts.method,
        parts.uri,
        &parts.headers,
        body,
        registry,
        config,
    ));
    pipeline::handle(&target, ctx, params).await
}

async fn unknown_route() -> Response {
    HttpError::NotFound("no route matches the requested URL".to_string()).into_response()
}
