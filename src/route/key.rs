use super::options::LoadBalancerOptions;
use super::DownstreamHostAndPort;

const STICKY_PREFIX: &str = "CookieStickySessions";

fn or_marker<'a>(value: Option<&'a str>, marker: &'a str) -> &'a str {
    value.filter(|v| !v.is_empty()).unwrap_or(marker)
}

fn sticky_key(load_balancer: &LoadBalancerOptions) -> Option<String> {
    if !load_balancer.is_sticky() {
        return None;
    }
    load_balancer
        .key
        .as_ref()
        .map(|key| format!("{}:{}", STICKY_PREFIX, key))
}

/// Inputs to a static route's identity key.
#[derive(Debug, Clone, Copy)]
pub struct RouteKeyParts<'a> {
    pub upstream_template: &'a str,
    pub methods: &'a [String],
    pub upstream_host: Option<&'a str>,
    pub hosts: &'a [DownstreamHostAndPort],
    pub service_namespace: Option<&'a str>,
    pub service_name: Option<&'a str>,
    pub load_balancer: &'a LoadBalancerOptions,
}

/// Deterministic identity of a route, shared by load-balancer partitioning
/// and circuit isolation. Equal input always yields an equal key.
pub fn route_key(parts: RouteKeyParts<'_>) -> String {
    if let Some(key) = sticky_key(parts.load_balancer) {
        return key;
    }

    let mut methods: Vec<String> = parts
        .methods
        .iter()
        .map(|m| m.to_ascii_uppercase())
        .collect();
    methods.sort();
    methods.dedup();

    let hosts = if parts.hosts.is_empty() {
        "no-host-and-port".to_string()
    } else {
        parts
            .hosts
            .iter()
            .map(|h| h.to_string())
            .collect::<Vec<_>>()
            .join(",")
    };

    [
        parts.upstream_template,
        methods.join(",").as_str(),
        or_marker(parts.upstream_host, "no-host"),
        hosts.as_str(),
        or_marker(parts.service_namespace, "no-svc-ns"),
        or_marker(parts.service_name, "no-svc-name"),
        parts.load_balancer.lb_type.as_str(),
        or_marker(parts.load_balancer.key.as_deref(), "no-lb-key"),
    ]
    .join("|")
}

/// Identity of a discovery-backed route: the sticky key, a declared
/// load-balancer key, or `namespace.service`.
pub fn dynamic_route_key(
    service_namespace: Option<&str>,
    service_name: &str,
    load_balancer: &LoadBalancerOptions,
) -> String {
    if let Some(key) = sticky_key(load_balancer) {
        return key;
    }
    if let Some(key) = load_balancer.key.as_deref().filter(|k| !k.is_empty()) {
        return key.to_string();
    }
    match service_namespace.filter(|ns| !ns.is_empty()) {
        Some(ns) => format!("{}.{}", ns, service_name),
        None => service_name.to_string(),
    }
}
