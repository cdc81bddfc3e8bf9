//! Service configuration.
//!
//! [`ServiceConfig`] collects the handful of deployment-level knobs the
//! pipeline consults: the advertised API endpoint, the default content type
//! used for `Accept` wildcard expansion, and the upper bound on collection
//! fetch sizes.
//!
//! # Examples
//!
//! ```
//! use cirrus_rest::ServiceConfig;
//!
//! let config = ServiceConfig {
//!     max_collection_size: 200,
//!     ..Default::default()
//! };
//! assert_eq!(config.default_content_type, "application/json");
//! ```

use url::Url;

/// Deployment-level configuration shared by every request.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Advertised API endpoint. When set, its host (and scheme, if `https`)
    /// overrides the request's own host in absolute URLs.
    pub api_endpoint: Option<Url>,

    /// Content type substituted for `*/*` in Accept lists and used when a
    /// request carries no `Accept` header at all.
    pub default_content_type: String,

    /// Upper bound on collection fetch sizes. Collections may lower it per
    /// node; requests asking for more fail with 400.
    pub max_collection_size: u64,

    /// `max-age` value of the `Strict-Transport-Security` header attached to
    /// responses served over a secure connection.
    pub hsts_max_age: u64,

    /// Upper bound, in bytes, on request bodies read by the router bridge.
    pub max_body_bytes: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            api_endpoint: None,
            default_content_type: "application/json".to_string(),
            max_collection_size: 1000,
            hsts_max_age: 99_999_999,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

impl ServiceConfig {
    /// The host to advertise in absolute URLs, when an endpoint override is
    /// configured.
    #[must_use]
    pub fn endpoint_host(&self) -> Option<&str> {
        self.api_endpoint.as_ref().and_then(Url::host_str)
    }
}
