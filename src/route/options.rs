use crate::config::{
    Duration, FileAuthenticationOptions, FileCacheOptions, FileHttpHandlerOptions,
    FileLoadBalancerOptions, FileQosOptions, FileRateLimitOptions, LoadBalancerType,
    VersionPolicy,
};
use hyper::Version;
use std::collections::BTreeMap;
use tracing::warn;

/// Route timeout when neither the route nor the global section sets one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 90;

const DEFAULT_BREAK_MS: u64 = 5_000;
const DEFAULT_SAMPLING_MS: u64 = 10_000;
const DEFAULT_FAILURE_RATIO: f64 = 0.8;
const DEFAULT_CLIENT_ID_HEADER: &str = "ClientId";
const DEFAULT_QUOTA_STATUS: u16 = 429;
const DEFAULT_COUNTER_PREFIX: &str = "switchyard";
const DEFAULT_POOLED_LIFETIME_SECS: u64 = 120;

/// Route value if present, else global value, else the built-in default.
#[inline]
pub fn override_chain<T>(route: Option<T>, global: Option<T>, default: impl FnOnce() -> T) -> T {
    route.or(global).unwrap_or_else(default)
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticationOptions {
    pub provider_keys: Vec<String>,
    pub allowed_scopes: Vec<String>,
}

fn scheme_keys(options: &FileAuthenticationOptions) -> Vec<String> {
    options
        .authentication_provider_key
        .iter()
        .chain(options.authentication_provider_keys.iter())
        .filter(|k| !k.is_empty())
        .cloned()
        .collect()
}

fn non_empty<T>(v: Vec<T>) -> Option<Vec<T>> {
    if v.is_empty() { None } else { Some(v) }
}

/// `None` unless a provider key survives the merge and anonymous access is off.
pub fn authentication_options(
    route: Option<&FileAuthenticationOptions>,
    global: Option<&FileAuthenticationOptions>,
) -> Option<AuthenticationOptions> {
    let allow_anonymous = override_chain(
        route.and_then(|r| r.allow_anonymous),
        global.and_then(|g| g.allow_anonymous),
        || false,
    );
    if allow_anonymous {
        return None;
    }

    let provider_keys = override_chain(
        route.map(scheme_keys).and_then(non_empty),
        global.map(scheme_keys).and_then(non_empty),
        Vec::new,
    );
    if provider_keys.is_empty() {
        return None;
    }

    let allowed_scopes = override_chain(
        route.map(|r| r.allowed_scopes.clone()).and_then(non_empty),
        global.map(|g| g.allowed_scopes.clone()).and_then(non_empty),
        Vec::new,
    );

    Some(AuthenticationOptions {
        provider_keys,
        allowed_scopes,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheOptions {
    pub ttl_seconds: u64,
    pub region: String,
    pub header: Option<String>,
    pub enable_content_hashing: bool,
}

/// Region used when none is configured: methods followed by the upstream
/// template, keeping only alphanumerics.
pub fn default_cache_region(methods: &[String], upstream_template: &str) -> String {
    methods
        .iter()
        .map(|m| m.to_ascii_uppercase())
        .chain(std::iter::once(upstream_template.to_string()))
        .flat_map(|s| s.chars().collect::<Vec<_>>())
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// `None` unless the merged time-to-live is positive.
pub fn cache_options(
    route: Option<&FileCacheOptions>,
    global: Option<&FileCacheOptions>,
    default_region: impl FnOnce() -> String,
) -> Option<CacheOptions> {
    let ttl_seconds = override_chain(
        route.and_then(|r| r.ttl_seconds),
        global.and_then(|g| g.ttl_seconds),
        || 0,
    );
    if ttl_seconds == 0 {
        return None;
    }

    Some(CacheOptions {
        ttl_seconds,
        region: override_chain(
            route.and_then(|r| r.region.clone()),
            global.and_then(|g| g.region.clone()),
            default_region,
        ),
        header: route
            .and_then(|r| r.header.clone())
            .or_else(|| global.and_then(|g| g.header.clone())),
        enable_content_hashing: override_chain(
            route.and_then(|r| r.enable_content_hashing),
            global.and_then(|g| g.enable_content_hashing),
            || false,
        ),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitOptions {
    pub client_whitelist: Vec<String>,
    pub period: Duration,
    pub period_timespan_secs: f64,
    pub limit: u64,
    pub client_id_header: String,
    pub quota_exceeded_message: Option<String>,
    pub http_status_code: u16,
    pub enable_headers: bool,
    pub counter_prefix: String,
}

/// Global options only take part for routes listed in the global
/// `route_keys`, or for every route when that list is empty. `None` unless
/// rate limiting is explicitly switched on after the merge.
pub fn rate_limit_options(
    route_key: Option<&str>,
    route: Option<&FileRateLimitOptions>,
    global: Option<&FileRateLimitOptions>,
) -> Option<RateLimitOptions> {
    let global = global.filter(|g| {
        g.route_keys.is_empty()
            || route_key.is_some_and(|key| g.route_keys.iter().any(|k| k == key))
    });

    let enabled = override_chain(
        route.and_then(|r| r.enable_rate_limiting),
        global.and_then(|g| g.enable_rate_limiting),
        || false,
    );
    if !enabled {
        return None;
    }

    Some(RateLimitOptions {
        client_whitelist: override_chain(
            route.and_then(|r| r.client_whitelist.clone()),
            global.and_then(|g| g.client_whitelist.clone()),
            Vec::new,
        ),
        period: override_chain(
            route.and_then(|r| r.period),
            global.and_then(|g| g.period),
            || Duration::from_secs(1),
        ),
        period_timespan_secs: override_chain(
            route.and_then(|r| r.period_timespan),
            global.and_then(|g| g.period_timespan),
            || 0.0,
        ),
        limit: override_chain(route.and_then(|r| r.limit), global.and_then(|g| g.limit), || 0),
        client_id_header: override_chain(
            route.and_then(|r| r.client_id_header.clone()),
            global.and_then(|g| g.client_id_header.clone()),
            || DEFAULT_CLIENT_ID_HEADER.to_string(),
        ),
        quota_exceeded_message: route
            .and_then(|r| r.quota_exceeded_message.clone())
            .or_else(|| global.and_then(|g| g.quota_exceeded_message.clone())),
        http_status_code: override_chain(
            route.and_then(|r| r.http_status_code),
            global.and_then(|g| g.http_status_code),
            || DEFAULT_QUOTA_STATUS,
        ),
        enable_headers: !override_chain(
            route.and_then(|r| r.disable_rate_limit_headers),
            global.and_then(|g| g.disable_rate_limit_headers),
            || false,
        ),
        counter_prefix: override_chain(
            route.and_then(|r| r.rate_limit_counter_prefix.clone()),
            global.and_then(|g| g.rate_limit_counter_prefix.clone()),
            || DEFAULT_COUNTER_PREFIX.to_string(),
        ),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct QosOptions {
    /// Circuit isolation key, the route's identity key
    pub key: String,
    pub exceptions_allowed_before_breaking: u32,
    pub duration_of_break_ms: u64,
    pub timeout_ms: u64,
    pub sampling_duration_ms: u64,
    pub failure_ratio: f64,
}

/// `None` unless both a break threshold and a timeout are set after the merge.
pub fn qos_options(
    key: &str,
    route: Option<&FileQosOptions>,
    global: Option<&FileQosOptions>,
) -> Option<QosOptions> {
    let exceptions_allowed_before_breaking = override_chain(
        route.and_then(|r| r.exceptions_allowed_before_breaking),
        global.and_then(|g| g.exceptions_allowed_before_breaking),
        || 0,
    );
    let timeout_ms = override_chain(
        route.and_then(|r| r.timeout_ms),
        global.and_then(|g| g.timeout_ms),
        || 0,
    );
    if exceptions_allowed_before_breaking == 0 || timeout_ms == 0 {
        return None;
    }

    Some(QosOptions {
        key: key.to_string(),
        exceptions_allowed_before_breaking,
        timeout_ms,
        duration_of_break_ms: override_chain(
            route.and_then(|r| r.duration_of_break_ms),
            global.and_then(|g| g.duration_of_break_ms),
            || DEFAULT_BREAK_MS,
        ),
        sampling_duration_ms: override_chain(
            route.and_then(|r| r.sampling_duration_ms),
            global.and_then(|g| g.sampling_duration_ms),
            || DEFAULT_SAMPLING_MS,
        ),
        failure_ratio: override_chain(
            route.and_then(|r| r.failure_ratio),
            global.and_then(|g| g.failure_ratio),
            || DEFAULT_FAILURE_RATIO,
        ),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadBalancerOptions {
    pub lb_type: LoadBalancerType,
    /// Session cookie name for sticky sessions
    pub key: Option<String>,
    pub expiry_ms: u64,
}

impl LoadBalancerOptions {
    pub fn is_sticky(&self) -> bool {
        self.lb_type == LoadBalancerType::CookieStickySessions
            && self.key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

pub fn load_balancer_options(
    route: Option<&FileLoadBalancerOptions>,
    global: Option<&FileLoadBalancerOptions>,
) -> LoadBalancerOptions {
    LoadBalancerOptions {
        lb_type: override_chain(
            route.and_then(|r| r.lb_type),
            global.and_then(|g| g.lb_type),
            LoadBalancerType::default,
        ),
        key: route
            .and_then(|r| r.key.clone())
            .or_else(|| global.and_then(|g| g.key.clone())),
        expiry_ms: override_chain(
            route.and_then(|r| r.expiry_ms),
            global.and_then(|g| g.expiry_ms),
            || 0,
        ),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpHandlerOptions {
    pub allow_auto_redirect: bool,
    pub use_cookie_container: bool,
    pub use_tracing: bool,
    pub use_proxy: bool,
    pub max_connections_per_server: usize,
    pub pooled_connection_lifetime_secs: u64,
}

pub fn http_handler_options(
    route: Option<&FileHttpHandlerOptions>,
    global: Option<&FileHttpHandlerOptions>,
) -> HttpHandlerOptions {
    HttpHandlerOptions {
        allow_auto_redirect: override_chain(
            route.and_then(|r| r.allow_auto_redirect),
            global.and_then(|g| g.allow_auto_redirect),
            || false,
        ),
        use_cookie_container: override_chain(
            route.and_then(|r| r.use_cookie_container),
            global.and_then(|g| g.use_cookie_container),
            || false,
        ),
        use_tracing: override_chain(
            route.and_then(|r| r.use_tracing),
            global.and_then(|g| g.use_tracing),
            || false,
        ),
        use_proxy: override_chain(
            route.and_then(|r| r.use_proxy),
            global.and_then(|g| g.use_proxy),
            || true,
        ),
        max_connections_per_server: override_chain(
            route.and_then(|r| r.max_connections_per_server).filter(|n| *n > 0),
            global.and_then(|g| g.max_connections_per_server).filter(|n| *n > 0),
            || usize::MAX,
        ),
        pooled_connection_lifetime_secs: override_chain(
            route.and_then(|r| r.pooled_connection_lifetime_seconds),
            global.and_then(|g| g.pooled_connection_lifetime_seconds),
            || DEFAULT_POOLED_LIFETIME_SECS,
        ),
    }
}

fn parse_version(raw: &str) -> Option<Version> {
    match raw.trim() {
        "1.0" => Some(Version::HTTP_10),
        "1.1" => Some(Version::HTTP_11),
        "2" | "2.0" => Some(Version::HTTP_2),
        "3" | "3.0" => Some(Version::HTTP_3),
        _ => None,
    }
}

/// Downstream HTTP version; unknown values fall back to HTTP/1.1.
pub fn downstream_http_version(route: Option<&str>, global: Option<&str>) -> Version {
    let Some(raw) = route.or(global) else {
        return Version::HTTP_11;
    };

    parse_version(raw).unwrap_or_else(|| {
        warn!("Invalid downstream_http_version '{}', using 1.1", raw);
        Version::HTTP_11
    })
}

pub fn version_policy(route: Option<VersionPolicy>, global: Option<VersionPolicy>) -> VersionPolicy {
    override_chain(route, global, VersionPolicy::default)
}

/// Global metadata with route entries layered on top.
pub fn metadata(
    route: &BTreeMap<String, String>,
    global: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = global.clone();
    merged.extend(route.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Only positive values count as set.
pub fn timeout(route: Option<u64>, global: Option<u64>) -> std::time::Duration {
    std::time::Duration::from_secs(override_chain(
        route.filter(|t| *t > 0),
        global.filter(|t| *t > 0),
        || DEFAULT_TIMEOUT_SECS,
    ))
}
