//! End-to-end tests driving the router with a small user directory.
//!
//! The fixture registers a `users` collection, a `user` resource beneath it
//! with an `avatar` child, an always-empty `ghosts` collection, a `crew`
//! roster with one unreadable member, a `session` resource whose delete
//! renders the final state, and a `/me` alias redirecting to a canonical
//! user.

use async_trait::async_trait;
use axum::body::Body;
use chrono::{DateTime, TimeZone, Utc};
use http::{Method, Request, Response, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::util::ServiceExt;

use cirrus_rest::{
    build_router, AliasDef, BodySchema, CollectionHandlers, Etag, FieldKind, FieldSpec,
    HandlerArgs, HttpError, Node, NodeBase, NodeDef, NodeRegistry, NodeRegistryBuilder, Outcome,
    ParamSchema, Payload, RequestContext, ResourceHandlers, Result, RouteParams, ServiceConfig,
    Window,
};

/// Known users and their last-modified instants (unix seconds).
const USERS: &[(&str, i64)] = &[("alice", 1000), ("bob", 2000), ("carol", 3000)];

fn modified_at(username: &str) -> Option<DateTime<Utc>> {
    USERS
        .iter()
        .find(|(name, _)| *name == username)
        .map(|(_, seconds)| Utc.timestamp_opt(*seconds, 0).unwrap())
}

struct UserNode {
    base: NodeBase,
    username: String,
    modified: Option<DateTime<Utc>>,
}

fn make_user(base: NodeBase) -> Result<Arc<dyn Node>> {
    let username = base.param("username")?.to_string();
    let modified = modified_at(&username);
    Ok(Arc::new(UserNode {
        base,
        username,
        modified,
    }))
}

impl Node for UserNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }
    fn can_read(&self) -> bool {
        true
    }
    fn can_write(&self) -> bool {
        true
    }
    fn etag(&self) -> Etag {
        match self.modified {
            Some(modified) => Etag::new(modified, &self.username),
            None => Etag::Wildcard,
        }
    }
    fn as_resource(&self) -> Option<&dyn ResourceHandlers> {
        Some(self)
    }
}

#[async_trait]
impl ResourceHandlers for UserNode {
    async fn retrieve(&self, _args: &HandlerArgs) -> Result<Payload> {
        if self.modified.is_none() {
            return Err(HttpError::NotFound(format!(
                "no user named '{}'",
                self.username
            )));
        }
        Ok(json!({ "username": self.username }))
    }

    async fn replace(&self, _args: &HandlerArgs) -> Result<Outcome> {
        Ok(Outcome::NoContent)
    }

    async fn delete(&self, _args: &HandlerArgs) -> Result<Outcome> {
        Ok(Outcome::NoContent)
    }
}

struct AvatarNode {
    base: NodeBase,
}

fn make_avatar(base: NodeBase) -> Result<Arc<dyn Node>> {
    Ok(Arc::new(AvatarNode { base }))
}

impl Node for AvatarNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }
    fn can_read(&self) -> bool {
        true
    }
    fn as_resource(&self) -> Option<&dyn ResourceHandlers> {
        Some(self)
    }
}

#[async_trait]
impl ResourceHandlers for AvatarNode {
    async fn retrieve(&self, _args: &HandlerArgs) -> Result<Payload> {
        Ok(json!({ "image": "data:," }))
    }
}

struct UsersNode {
    base: NodeBase,
}

fn make_users(base: NodeBase) -> Result<Arc<dyn Node>> {
    Ok(Arc::new(UsersNode { base }))
}

impl Node for UsersNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }
    fn can_read(&self) -> bool {
        true
    }
    fn can_write(&self) -> bool {
        true
    }
    fn as_collection(&self) -> Option<&dyn CollectionHandlers> {
        Some(self)
    }
}

#[async_trait]
impl CollectionHandlers for UsersNode {
    async fn list(&self, window: Window, _args: &HandlerArgs) -> Result<Vec<Arc<dyn Node>>> {
        let ctx = &self.base.ctx;
        let mut items: Vec<Arc<dyn Node>> = Vec::new();
        for (username, _) in USERS
            .iter()
            .skip(window.offset as usize)
            .take(window.limit as usize)
        {
            let mut params = RouteParams::new();
            params.insert("username".to_string(), username.to_string());
            items.push(ctx.registry().construct("user", ctx, &params)?);
        }
        Ok(items)
    }

    async fn add(&self, args: &HandlerArgs) -> Result<Arc<dyn Node>> {
        let username = match args.body.as_ref() {
            Some(cirrus_rest::params::BodyPayload::Fields(fields)) => match fields.get("username")
            {
                Some(cirrus_rest::params::FieldValue::Text(value)) => value.clone(),
                _ => return Err(HttpError::invalid("username is required")),
            },
            _ => return Err(HttpError::invalid("a form body is required")),
        };
        let mut params = RouteParams::new();
        params.insert("username".to_string(), username);
        self.base
            .ctx
            .registry()
            .construct("user", &self.base.ctx, &params)
    }
}

struct GhostsNode {
    base: NodeBase,
}

fn make_ghosts(base: NodeBase) -> Result<Arc<dyn Node>> {
    Ok(Arc::new(GhostsNode { base }))
}

impl Node for GhostsNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }
    fn can_read(&self) -> bool {
        true
    }
    fn as_collection(&self) -> Option<&dyn CollectionHandlers> {
        Some(self)
    }
}

#[async_trait]
impl CollectionHandlers for GhostsNode {
    async fn list(&self, _window: Window, _args: &HandlerArgs) -> Result<Vec<Arc<dyn Node>>> {
        Ok(Vec::new())
    }
}

/// Crew callsigns; "shadow" exists in the roster but cannot be read.
const CREW: &[&str] = &["ann", "shadow", "zed"];

struct CrewNode {
    base: NodeBase,
}

fn make_crew(base: NodeBase) -> Result<Arc<dyn Node>> {
    Ok(Arc::new(CrewNode { base }))
}

impl Node for CrewNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }
    fn can_read(&self) -> bool {
        true
    }
    fn as_collection(&self) -> Option<&dyn CollectionHandlers> {
        Some(self)
    }
}

#[async_trait]
impl CollectionHandlers for CrewNode {
    async fn list(&self, window: Window, _args: &HandlerArgs) -> Result<Vec<Arc<dyn Node>>> {
        let ctx = &self.base.ctx;
        let mut items: Vec<Arc<dyn Node>> = Vec::new();
        for callsign in CREW
            .iter()
            .skip(window.offset as usize)
            .take(window.limit as usize)
        {
            let mut params = RouteParams::new();
            params.insert("callsign".to_string(), callsign.to_string());
            items.push(ctx.registry().construct("member", ctx, &params)?);
        }
        Ok(items)
    }
}

struct MemberNode {
    base: NodeBase,
    callsign: String,
}

fn make_member(base: NodeBase) -> Result<Arc<dyn Node>> {
    let callsign = base.param("callsign")?.to_string();
    Ok(Arc::new(MemberNode { base, callsign }))
}

impl Node for MemberNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }
    fn can_read(&self) -> bool {
        self.callsign != "shadow"
    }
    fn as_resource(&self) -> Option<&dyn ResourceHandlers> {
        Some(self)
    }
}

#[async_trait]
impl ResourceHandlers for MemberNode {
    async fn retrieve(&self, _args: &HandlerArgs) -> Result<Payload> {
        Ok(json!({ "callsign": self.callsign }))
    }
}

struct SessionNode {
    base: NodeBase,
}

fn make_session(base: NodeBase) -> Result<Arc<dyn Node>> {
    Ok(Arc::new(SessionNode { base }))
}

impl Node for SessionNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }
    fn can_read(&self) -> bool {
        true
    }
    fn can_write(&self) -> bool {
        true
    }
    fn etag(&self) -> Etag {
        Etag::new(Utc.timestamp_opt(5000, 0).unwrap(), "session")
    }
    fn as_resource(&self) -> Option<&dyn ResourceHandlers> {
        Some(self)
    }
}

#[async_trait]
impl ResourceHandlers for SessionNode {
    async fn retrieve(&self, _args: &HandlerArgs) -> Result<Payload> {
        Ok(json!({ "active": false }))
    }

    async fn delete(&self, _args: &HandlerArgs) -> Result<Outcome> {
        Ok(Outcome::Render)
    }
}

fn resolve_me(
    registry: &NodeRegistry,
    ctx: &Arc<RequestContext>,
    _params: &RouteParams,
) -> Result<Arc<dyn Node>> {
    let mut params = RouteParams::new();
    params.insert("username".to_string(), "alice".to_string());
    registry.construct("user", ctx, &params)
}

fn app() -> axum::Router {
    let registry = NodeRegistryBuilder::new()
        .node(
            NodeDef::collection("users", "/users", make_users)
                .methods(vec![Method::GET, Method::POST])
                .max_limit(10)
                .body_schema(
                    Method::POST,
                    BodySchema::form(ParamSchema::new(vec![FieldSpec::required(
                        "username",
                        FieldKind::Text,
                    )])),
                ),
        )
        .node(
            NodeDef::resource("user", "/{username}", make_user)
                .parent("users")
                .methods(vec![Method::GET, Method::PUT, Method::DELETE]),
        )
        .node(
            NodeDef::resource("avatar", "/avatar", make_avatar)
                .parent("user")
                .methods(vec![Method::GET]),
        )
        .node(NodeDef::collection("ghosts", "/ghosts", make_ghosts).methods(vec![Method::GET]))
        .node(
            NodeDef::collection("crew", "/crew", make_crew)
                .methods(vec![Method::GET])
                .range_unit("crew"),
        )
        .node(
            NodeDef::resource("member", "/{callsign}", make_member)
                .parent("crew")
                .methods(vec![Method::GET]),
        )
        .node(
            NodeDef::resource("session", "/session", make_session)
                .methods(vec![Method::GET, Method::DELETE]),
        )
        .alias(AliasDef::new("me", "/me", resolve_me).permanent(false))
        .finish()
        .expect("fixture registry builds");

    build_router(Arc::new(registry), Arc::new(ServiceConfig::default()))
}

async fn send(request: Request<Body>) -> Response<Body> {
    app().oneshot(request).await.unwrap()
}

fn get(uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
    request(Method::GET, uri, headers, Body::empty())
}

fn request(method: Method, uri: &str, headers: &[(&str, &str)], body: Body) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("host", "api.example.com");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(body).unwrap()
}

async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn header<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
    response.headers().get(name).map(|v| v.to_str().unwrap())
}

#[tokio::test]
async fn test_get_resource_merges_child_references() {
    let response = send(get("/users/alice", &[])).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "etag"), Some("1000.000-alice"));
    assert!(header(&response, "last-modified").is_some());
    assert_eq!(header(&response, "vary"), Some("Accept"));
    assert_eq!(header(&response, "content-type"), Some("application/json"));

    let body = json_body(response).await;
    assert_eq!(body["username"], "alice");
    assert_eq!(body["avatar"], "http://api.example.com/users/alice/avatar");
}

#[tokio::test]
async fn test_unknown_user_is_404() {
    let response = send(get("/users/zed", &[])).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Not Found");
}

#[tokio::test]
async fn test_undeclared_method_is_405_with_exact_allow() {
    let response = send(request(Method::POST, "/users/alice", &[], Body::empty())).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(
        header(&response, "allow"),
        Some("DELETE, GET, HEAD, OPTIONS, PUT")
    );
}

#[tokio::test]
async fn test_unmatched_accept_is_406() {
    let response = send(get("/users/alice", &[("accept", "application/x-zzz")])).await;
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test]
async fn test_collection_without_range_is_200() {
    let response = send(get("/users", &[])).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "accept-range"), Some("users"));
    assert!(header(&response, "content-range").is_none());

    let body = json_body(response).await;
    let items = body.as_array().unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0]["uri"], "http://api.example.com/users/alice");
    assert_eq!(items[0]["etag"], "1000.000-alice");
}

#[tokio::test]
async fn test_collection_with_range_is_206() {
    let response = send(get("/users", &[("range", "users=1-2")])).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&response, "content-range"), Some("users 1-2/*"));

    let body = json_body(response).await;
    let items = body.as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["uri"], "http://api.example.com/users/bob");
}

#[tokio::test]
async fn test_empty_collection_is_204() {
    let response = send(get("/ghosts", &[])).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_range_over_empty_collection_is_416() {
    let response = send(get("/ghosts", &[("range", "ghosts=0-5")])).await;
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn test_range_limit_beyond_maximum_is_400() {
    let response = send(get("/users", &[("range", "users=0-999")])).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_range_is_400() {
    let response = send(get("/users", &[("range", "users=banana")])).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_post_redirects_to_created_resource() {
    let response = send(request(
        Method::POST,
        "/users",
        &[("content-type", "application/x-www-form-urlencoded")],
        Body::from("username=dave"),
    ))
    .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        header(&response, "location"),
        Some("http://api.example.com/users/dave")
    );
}

#[tokio::test]
async fn test_post_without_body_is_400() {
    let response = send(request(Method::POST, "/users", &[], Body::empty())).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_post_with_wrong_content_type_is_415() {
    let response = send(request(
        Method::POST,
        "/users",
        &[("content-type", "application/json")],
        Body::from("{\"username\":\"dave\"}"),
    ))
    .await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_alias_redirects_to_canonical_url() {
    let response = send(get("/me", &[])).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        header(&response, "location"),
        Some("http://api.example.com/users/alice")
    );
}

#[tokio::test]
async fn test_alias_rejects_writes() {
    let response = send(request(Method::POST, "/me", &[], Body::empty())).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(header(&response, "allow"), Some("GET, HEAD, OPTIONS"));
}

#[tokio::test]
async fn test_if_none_match_suppresses_read() {
    let response = send(get("/users/alice", &[("if-none-match", "1000.000-alice")])).await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(header(&response, "etag"), Some("1000.000-alice"));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn test_if_modified_since_suppresses_stale_read() {
    // Resource last modified at t=1000; a bound at t=2000 means unchanged.
    let response = send(get("/users/alice", &[("if-modified-since", "2000")])).await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

    let response = send(get("/users/alice", &[("if-modified-since", "500")])).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_failed_if_match_is_412() {
    let response = send(request(
        Method::PUT,
        "/users/alice",
        &[("if-match", "9999.000-other")],
        Body::empty(),
    ))
    .await;
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn test_malformed_conditional_header_is_400() {
    let response = send(get("/users/alice", &[("if-modified-since", "whenever")])).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_reports_post_mortem_etag() {
    let response = send(request(Method::DELETE, "/users/alice", &[], Body::empty())).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&response, "etag"), Some("1000.000-alice"));
}

#[tokio::test]
async fn test_delete_rendering_final_state_keeps_etag() {
    let response = send(request(Method::DELETE, "/session", &[], Body::empty())).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "etag"), Some("5000.000-session"));
    assert!(header(&response, "last-modified").is_some());

    let body = json_body(response).await;
    assert_eq!(body["active"], false);
}

#[tokio::test]
async fn test_content_range_spans_fetched_window_despite_hidden_items() {
    let response = send(get("/crew", &[("range", "crew=0-3")])).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    // Three members were fetched; the hidden one is omitted from the body
    // but still occupies its slot in the reported range.
    assert_eq!(header(&response, "content-range"), Some("crew 0-2/*"));

    let body = json_body(response).await;
    let items = body.as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["uri"], "http://api.example.com/crew/ann");
    assert_eq!(items[1]["uri"], "http://api.example.com/crew/zed");
}

#[tokio::test]
async fn test_options_describes_the_node() {
    let response = send(request(Method::OPTIONS, "/users", &[], Body::empty())).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "allow"), Some("GET, HEAD, OPTIONS, POST"));

    let body = json_body(response).await;
    assert_eq!(body["name"], "users");
    assert_eq!(body["url"], "/users");
}

#[tokio::test]
async fn test_options_bypasses_accept_negotiation() {
    let response = send(request(
        Method::OPTIONS,
        "/users",
        &[("accept", "application/x-zzz")],
        Body::empty(),
    ))
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_method_override_header_is_honored() {
    let response = send(request(
        Method::POST,
        "/users/alice",
        &[("x-http-method-override", "delete")],
        Body::empty(),
    ))
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_head_matches_get_without_body() {
    let response = send(request(Method::HEAD, "/users/alice", &[], Body::empty())).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "etag"), Some("1000.000-alice"));
    assert_eq!(header(&response, "content-type"), Some("application/json"));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn test_forwarded_https_sets_hsts_and_secure_urls() {
    let response = send(get("/users/alice", &[("x-forwarded-proto", "https")])).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(header(&response, "strict-transport-security")
        .unwrap()
        .starts_with("max-age="));

    let body = json_body(response).await;
    assert_eq!(body["avatar"], "https://api.example.com/users/alice/avatar");
}

#[tokio::test]
async fn test_unregistered_path_is_404() {
    let response = send(get("/nothing/here", &[])).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
