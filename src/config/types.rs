use super::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Root of a gateway configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfiguration {
    #[serde(default)]
    pub routes: Vec<FileRoute>,

    #[serde(default)]
    pub dynamic_routes: Vec<FileDynamicRoute>,

    #[serde(default)]
    pub aggregates: Vec<FileAggregateRoute>,

    #[serde(default)]
    pub global: FileGlobalConfiguration,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileRoute {
    pub downstream_path_template: String,

    #[serde(default)]
    pub downstream_scheme: Option<String>,

    #[serde(default)]
    pub downstream_hosts: Vec<DownstreamHost>,

    /// Overrides the method used towards the downstream service
    #[serde(default)]
    pub downstream_http_method: Option<String>,

    #[serde(default)]
    pub downstream_http_version: Option<String>,

    #[serde(default)]
    pub downstream_http_version_policy: Option<VersionPolicy>,

    pub upstream_path_template: String,

    /// Empty means any method
    #[serde(default)]
    pub upstream_http_method: Vec<String>,

    #[serde(default)]
    pub upstream_host: Option<String>,

    #[serde(default)]
    pub upstream_header_templates: BTreeMap<String, String>,

    #[serde(default)]
    pub upstream_header_trigger: HeaderTriggerMode,

    #[serde(default)]
    pub route_is_case_sensitive: bool,

    #[serde(default)]
    pub key: Option<String>,

    #[serde(default)]
    pub service_name: Option<String>,

    #[serde(default)]
    pub service_namespace: Option<String>,

    #[serde(default)]
    pub authentication_options: Option<FileAuthenticationOptions>,

    #[serde(default)]
    pub add_headers_to_request: BTreeMap<String, String>,

    #[serde(default)]
    pub add_claims_to_request: BTreeMap<String, String>,

    #[serde(default)]
    pub add_queries_to_request: BTreeMap<String, String>,

    #[serde(default)]
    pub change_downstream_path_template: BTreeMap<String, String>,

    #[serde(default)]
    pub route_claims_requirement: BTreeMap<String, String>,

    #[serde(default)]
    pub cache_options: Option<FileCacheOptions>,

    #[serde(default)]
    pub load_balancer_options: Option<FileLoadBalancerOptions>,

    #[serde(default)]
    pub rate_limit_options: Option<FileRateLimitOptions>,

    #[serde(default)]
    pub qos_options: Option<FileQosOptions>,

    #[serde(default)]
    pub http_handler_options: Option<FileHttpHandlerOptions>,

    #[serde(default)]
    pub upstream_header_transform: BTreeMap<String, String>,

    #[serde(default)]
    pub downstream_header_transform: BTreeMap<String, String>,

    #[serde(default)]
    pub delegating_handlers: Vec<String>,

    #[serde(default)]
    pub security_options: Option<FileSecurityOptions>,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    #[serde(default)]
    pub request_id_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default)]
    pub timeout: Option<u64>,

    #[serde(default)]
    pub dangerous_accept_any_server_certificate: bool,
}

/// A downstream address, either written inline or naming an entry of `global.hosts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DownstreamHost {
    Inline(FileHostAndPort),
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHostAndPort {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderTriggerMode {
    Any,
    #[default]
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionPolicy {
    RequestVersionOrLower,
    #[default]
    RequestVersionOrHigher,
    RequestVersionExact,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileDynamicRoute {
    pub service_name: String,

    #[serde(default)]
    pub service_namespace: Option<String>,

    #[serde(default)]
    pub downstream_scheme: Option<String>,

    #[serde(default)]
    pub downstream_http_version: Option<String>,

    #[serde(default)]
    pub downstream_http_version_policy: Option<VersionPolicy>,

    #[serde(default)]
    pub rate_limit_options: Option<FileRateLimitOptions>,

    #[serde(default)]
    pub load_balancer_options: Option<FileLoadBalancerOptions>,

    #[serde(default)]
    pub cache_options: Option<FileCacheOptions>,

    #[serde(default)]
    pub qos_options: Option<FileQosOptions>,

    #[serde(default)]
    pub authentication_options: Option<FileAuthenticationOptions>,

    #[serde(default)]
    pub http_handler_options: Option<FileHttpHandlerOptions>,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileAggregateRoute {
    pub route_keys: Vec<String>,

    pub upstream_path_template: String,

    #[serde(default)]
    pub upstream_host: Option<String>,

    /// Defaults to GET
    #[serde(default = "default_aggregate_methods")]
    pub upstream_http_method: Vec<String>,

    #[serde(default)]
    pub upstream_header_templates: BTreeMap<String, String>,

    #[serde(default)]
    pub upstream_header_trigger: HeaderTriggerMode,

    #[serde(default)]
    pub route_is_case_sensitive: bool,

    #[serde(default)]
    pub aggregator: Option<String>,
}

fn default_aggregate_methods() -> Vec<String> {
    vec!["GET".to_string()]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileGlobalConfiguration {
    /// Public base URL of the gateway, used by the `{BaseUrl}` header placeholder
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub downstream_scheme: Option<String>,

    #[serde(default)]
    pub downstream_http_version: Option<String>,

    #[serde(default)]
    pub downstream_http_version_policy: Option<VersionPolicy>,

    /// Named downstream hosts referenced from `downstream_hosts`
    #[serde(default)]
    pub hosts: BTreeMap<String, FileHostAndPort>,

    #[serde(default)]
    pub request_id_key: Option<String>,

    #[serde(default)]
    pub service_discovery_provider: Option<FileServiceDiscoveryProvider>,

    #[serde(default)]
    pub timeout: Option<u64>,

    #[serde(default)]
    pub authentication_options: Option<FileAuthenticationOptions>,

    #[serde(default)]
    pub cache_options: Option<FileCacheOptions>,

    #[serde(default)]
    pub load_balancer_options: Option<FileLoadBalancerOptions>,

    #[serde(default)]
    pub rate_limit_options: Option<FileRateLimitOptions>,

    #[serde(default)]
    pub qos_options: Option<FileQosOptions>,

    #[serde(default)]
    pub http_handler_options: Option<FileHttpHandlerOptions>,

    #[serde(default)]
    pub security_options: Option<FileSecurityOptions>,

    #[serde(default)]
    pub upstream_header_transform: BTreeMap<String, String>,

    #[serde(default)]
    pub downstream_header_transform: BTreeMap<String, String>,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileServiceDiscoveryProvider {
    #[serde(rename = "type")]
    pub provider_type: String,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default)]
    pub scheme: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileAuthenticationOptions {
    /// Legacy single-scheme form, merged into `authentication_provider_keys`
    #[serde(default)]
    pub authentication_provider_key: Option<String>,

    #[serde(default)]
    pub authentication_provider_keys: Vec<String>,

    #[serde(default)]
    pub allowed_scopes: Vec<String>,

    #[serde(default)]
    pub allow_anonymous: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileCacheOptions {
    #[serde(default)]
    pub ttl_seconds: Option<u64>,

    #[serde(default)]
    pub region: Option<String>,

    /// Request header whose value takes part in the cache key
    #[serde(default)]
    pub header: Option<String>,

    #[serde(default)]
    pub enable_content_hashing: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileLoadBalancerOptions {
    #[serde(rename = "type", default)]
    pub lb_type: Option<LoadBalancerType>,

    #[serde(default)]
    pub key: Option<String>,

    /// Sticky-session expiry in milliseconds
    #[serde(default)]
    pub expiry_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerType {
    #[default]
    NoLoadBalancer,
    RoundRobin,
    LeastConnection,
    CookieStickySessions,
}

impl LoadBalancerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalancerType::NoLoadBalancer => "no_load_balancer",
            LoadBalancerType::RoundRobin => "round_robin",
            LoadBalancerType::LeastConnection => "least_connection",
            LoadBalancerType::CookieStickySessions => "cookie_sticky_sessions",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileRateLimitOptions {
    #[serde(default)]
    pub enable_rate_limiting: Option<bool>,

    #[serde(default)]
    pub client_whitelist: Option<Vec<String>>,

    /// Window the limit applies to, e.g. "1s", "15m", "1d"
    #[serde(default)]
    pub period: Option<Duration>,

    /// Seconds a client waits after the limit is hit
    #[serde(default)]
    pub period_timespan: Option<f64>,

    #[serde(default)]
    pub limit: Option<u64>,

    #[serde(default)]
    pub client_id_header: Option<String>,

    #[serde(default)]
    pub quota_exceeded_message: Option<String>,

    #[serde(default)]
    pub http_status_code: Option<u16>,

    #[serde(default)]
    pub disable_rate_limit_headers: Option<bool>,

    #[serde(default)]
    pub rate_limit_counter_prefix: Option<String>,

    /// Route keys the global options apply to; empty means every route.
    /// Only read from the global section.
    #[serde(default)]
    pub route_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileQosOptions {
    #[serde(default)]
    pub exceptions_allowed_before_breaking: Option<u32>,

    #[serde(default)]
    pub duration_of_break_ms: Option<u64>,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub sampling_duration_ms: Option<u64>,

    #[serde(default)]
    pub failure_ratio: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileHttpHandlerOptions {
    #[serde(default)]
    pub allow_auto_redirect: Option<bool>,

    #[serde(default)]
    pub use_cookie_container: Option<bool>,

    #[serde(default)]
    pub use_tracing: Option<bool>,

    #[serde(default)]
    pub use_proxy: Option<bool>,

    #[serde(default)]
    pub max_connections_per_server: Option<usize>,

    #[serde(default)]
    pub pooled_connection_lifetime_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileSecurityOptions {
    #[serde(default)]
    pub ip_allowed_list: Vec<String>,

    #[serde(default)]
    pub ip_blocked_list: Vec<String>,

    #[serde(default)]
    pub exclude_allowed_from_blocked: bool,
}

/// External providers wired into the host process. Options that depend on a
/// provider are rejected at validation time when the provider is missing.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub qos_provider: bool,
    pub service_discovery_provider: bool,
    pub authentication_schemes: Vec<String>,
}

impl Capabilities {
    pub fn has_authentication_scheme(&self, scheme: &str) -> bool {
        self.authentication_schemes.iter().any(|s| s == scheme)
    }
}
