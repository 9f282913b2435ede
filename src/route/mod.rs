mod aggregate;
mod assembler;
pub mod claims;
mod dynamic;
pub mod headers;
pub mod key;
pub mod options;
pub mod security;

pub use aggregate::assemble_aggregate;
pub use assembler::assemble_route;
pub use claims::{ClaimToThing, ClaimsTransforms};
pub use dynamic::{assemble_discovery_fallback, assemble_dynamic_route};
pub use headers::{AddHeader, HeaderFindAndReplace, HeaderRules, RuntimeValues};
pub use options::{
    AuthenticationOptions, CacheOptions, HttpHandlerOptions, LoadBalancerOptions, QosOptions,
    RateLimitOptions,
};
pub use security::SecurityOptions;

use crate::config::{HeaderTriggerMode, VersionPolicy};
use crate::router::{HeaderTemplate, RouteTemplate, TemplateError};
use hyper::{Method, Version};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("Invalid template for route '{route}': {source}")]
    Template {
        route: String,
        #[source]
        source: TemplateError,
    },

    #[error("Invalid HTTP method '{method}' for route '{route}'")]
    InvalidMethod { route: String, method: String },

    #[error("Aggregate '{aggregate}' references unknown route keys: {}", .missing.join(", "))]
    UnknownAggregateRouteKeys {
        aggregate: String,
        missing: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DownstreamHostAndPort {
    pub host: String,
    pub port: u16,
}

impl DownstreamHostAndPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for DownstreamHostAndPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Where a matched request goes.
#[derive(Debug, Clone)]
pub enum DownstreamTarget {
    Static {
        scheme: String,
        hosts: Vec<DownstreamHostAndPort>,
    },
    /// Resolved per request by service discovery. The service name may hold
    /// placeholders filled from the matched request.
    Discovery {
        scheme: String,
        service_name: String,
        service_namespace: Option<String>,
    },
    /// Fans out to the constituent routes in order
    Aggregate {
        routes: Vec<Arc<CompiledRoute>>,
        aggregator: Option<String>,
    },
}

/// An immutable, fully merged route as the resolver sees it.
#[derive(Debug, Clone)]
pub struct CompiledRoute {
    /// Key declared in configuration, used by aggregates and rate-limit grouping
    pub key: Option<String>,
    /// Identity used for load-balancer partitioning and circuit isolation
    pub load_balancer_key: String,

    pub upstream_template: RouteTemplate,
    pub upstream_header_templates: Vec<HeaderTemplate>,
    pub upstream_header_trigger: HeaderTriggerMode,
    pub upstream_host: Option<String>,
    /// Empty means any method
    pub methods: Vec<Method>,

    pub downstream_path_template: String,
    pub downstream_http_method: Option<Method>,
    pub downstream_http_version: Version,
    pub downstream_version_policy: VersionPolicy,
    pub target: DownstreamTarget,

    pub authentication: Option<AuthenticationOptions>,
    pub claims_requirement: BTreeMap<String, String>,
    pub claims: ClaimsTransforms,
    pub cache: Option<CacheOptions>,
    pub rate_limit: Option<RateLimitOptions>,
    pub qos: Option<QosOptions>,
    pub load_balancer: LoadBalancerOptions,
    pub http_handler: HttpHandlerOptions,
    pub request_headers: HeaderRules,
    pub response_headers: HeaderRules,
    pub security: SecurityOptions,
    pub metadata: BTreeMap<String, String>,
    pub delegating_handlers: Vec<String>,
    pub request_id_key: Option<String>,
    pub timeout: Duration,
    pub dangerous_accept_any_server_certificate: bool,
}

impl CompiledRoute {
    /// A route with every option at its built-in default.
    pub fn new(upstream_template: RouteTemplate, target: DownstreamTarget) -> Self {
        Self {
            key: None,
            load_balancer_key: String::new(),
            upstream_template,
            upstream_header_templates: Vec::new(),
            upstream_header_trigger: HeaderTriggerMode::default(),
            upstream_host: None,
            methods: Vec::new(),
            downstream_path_template: String::new(),
            downstream_http_method: None,
            downstream_http_version: Version::HTTP_11,
            downstream_version_policy: VersionPolicy::default(),
            target,
            authentication: None,
            claims_requirement: BTreeMap::new(),
            claims: ClaimsTransforms::default(),
            cache: None,
            rate_limit: None,
            qos: None,
            load_balancer: LoadBalancerOptions::default(),
            http_handler: options::http_handler_options(None, None),
            request_headers: HeaderRules::default(),
            response_headers: HeaderRules::default(),
            security: SecurityOptions::default(),
            metadata: BTreeMap::new(),
            delegating_handlers: Vec::new(),
            request_id_key: None,
            timeout: options::timeout(None, None),
            dangerous_accept_any_server_certificate: false,
        }
    }

    #[inline]
    pub fn priority(&self) -> i32 {
        self.upstream_template.priority()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authentication.is_some()
    }

    pub fn is_authorized(&self) -> bool {
        !self.claims_requirement.is_empty()
    }

    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    pub fn is_rate_limited(&self) -> bool {
        self.rate_limit.is_some()
    }

    pub fn uses_qos(&self) -> bool {
        self.qos.is_some()
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self.target, DownstreamTarget::Aggregate { .. })
    }

    pub fn uses_service_discovery(&self) -> bool {
        matches!(self.target, DownstreamTarget::Discovery { .. })
    }

    /// Human-readable name for logs
    pub fn display_name(&self) -> &str {
        self.key
            .as_deref()
            .unwrap_or_else(|| self.upstream_template.raw())
    }

    /// Method filter; comparison ignores case.
    #[inline]
    pub fn allows_method(&self, method: &Method) -> bool {
        self.methods.is_empty()
            || self
                .methods
                .iter()
                .any(|m| m.as_str().eq_ignore_ascii_case(method.as_str()))
    }
}

fn parse_method(route: &str, method: &str) -> Result<Method, AssemblyError> {
    Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes()).map_err(|_| {
        AssemblyError::InvalidMethod {
            route: route.to_string(),
            method: method.to_string(),
        }
    })
}

fn parse_methods(route: &str, methods: &[String]) -> Result<Vec<Method>, AssemblyError> {
    let mut parsed = Vec::with_capacity(methods.len());
    for method in methods {
        let method = parse_method(route, method)?;
        if !parsed.contains(&method) {
            parsed.push(method);
        }
    }
    Ok(parsed)
}

fn compile_template(
    route: &str,
    template: &str,
    case_sensitive: bool,
) -> Result<RouteTemplate, AssemblyError> {
    RouteTemplate::compile(template, case_sensitive).map_err(|source| AssemblyError::Template {
        route: route.to_string(),
        source,
    })
}

fn compile_header_templates(
    route: &str,
    templates: &BTreeMap<String, String>,
    case_sensitive: bool,
) -> Result<Vec<HeaderTemplate>, AssemblyError> {
    templates
        .iter()
        .map(|(name, template)| {
            HeaderTemplate::compile(name, template, case_sensitive).map_err(|source| {
                AssemblyError::Template {
                    route: route.to_string(),
                    source,
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_methods_parsed_case_insensitively() {
        let methods = parse_methods("r", &["get".to_string(), "GET".to_string(), "Post".to_string()]).unwrap();
        assert_eq!(methods, vec![Method::GET, Method::POST]);
        assert!(parse_method("r", "GE T").is_err());
    }

    #[test]
    fn test_default_route() {
        let template = RouteTemplate::compile("/a", false).unwrap();
        let route = CompiledRoute::new(
            template,
            DownstreamTarget::Static {
                scheme: "http".to_string(),
                hosts: vec![DownstreamHostAndPort::new("a", 80)],
            },
        );
        assert!(route.allows_method(&Method::DELETE));
        assert!(!route.is_cached());
        assert!(!route.is_authenticated());
        assert_eq!(route.timeout.as_secs(), options::DEFAULT_TIMEOUT_SECS);
        assert_eq!(route.display_name(), "/a");
        assert_eq!(route.priority(), 4);
    }

    #[test]
    fn test_unknown_keys_error_lists_keys() {
        let err = AssemblyError::UnknownAggregateRouteKeys {
            aggregate: "/agg".to_string(),
            missing: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Aggregate '/agg' references unknown route keys: a, b"
        );
    }
}
