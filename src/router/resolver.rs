use super::placeholder::{create_downstream_url, substitute, DownstreamUrl, PlaceholderNameAndValue};
use super::template::HeaderTemplate;
use crate::config::HeaderTriggerMode;
use crate::route::{CompiledRoute, DownstreamTarget};
use hyper::{HeaderMap, Method};
use std::sync::Arc;

/// The parts of an incoming request that take part in route selection.
#[derive(Debug, Clone, Copy)]
pub struct RequestMeta<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    /// Raw query string without the leading `?`
    pub query: Option<&'a str>,
    /// Value of the `Host` header, possibly with a port
    pub host: Option<&'a str>,
    pub headers: &'a HeaderMap,
}

/// Service to look up for a discovery-backed match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceLookup {
    pub namespace: Option<String>,
    pub name: String,
    pub scheme: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    pub route: Arc<CompiledRoute>,
    /// Path captures, then query captures, then header captures
    pub placeholders: Vec<PlaceholderNameAndValue>,
}

impl ResolvedRoute {
    /// Concrete downstream path and query for the request this route matched.
    pub fn downstream_url(&self, request_path: &str, request_query: Option<&str>) -> DownstreamUrl {
        create_downstream_url(
            &self.route.downstream_path_template,
            &self.route.upstream_template,
            &self.placeholders,
            request_path,
            request_query,
        )
    }

    /// Service name with placeholders filled in. A `namespace.service` name
    /// is split when the route declares no namespace.
    pub fn discovery_service(&self) -> Option<ServiceLookup> {
        let DownstreamTarget::Discovery {
            scheme,
            service_name,
            service_namespace,
        } = &self.route.target
        else {
            return None;
        };

        let name = substitute(service_name, &self.placeholders);
        let (namespace, name) = match service_namespace {
            Some(ns) => (Some(ns.clone()), name),
            None => match name.split_once('.') {
                Some((ns, svc)) if !ns.is_empty() && !svc.is_empty() => {
                    (Some(ns.to_string()), svc.to_string())
                }
                _ => (None, name),
            },
        };

        Some(ServiceLookup {
            namespace,
            name,
            scheme: scheme.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Matched(ResolvedRoute),
    NotFound,
}

impl Resolution {
    pub fn is_match(&self) -> bool {
        matches!(self, Resolution::Matched(_))
    }

    pub fn matched(&self) -> Option<&ResolvedRoute> {
        match self {
            Resolution::Matched(resolved) => Some(resolved),
            Resolution::NotFound => None,
        }
    }

    /// Label used for logs and metrics
    pub fn outcome(&self) -> &'static str {
        match self {
            Resolution::Matched(_) => "matched",
            Resolution::NotFound => "not_found",
        }
    }
}

/// Drop a trailing `:port`, keeping bracketed IPv6 literals intact.
fn hostname(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.parse::<u16>().is_ok() => name,
        _ => host,
    }
}

/// Case-insensitive host comparison. A route host without a port accepts
/// any port on the request side.
#[inline]
fn host_matches(route_host: &str, request_host: &str) -> bool {
    if route_host.eq_ignore_ascii_case(request_host) {
        return true;
    }
    hostname(route_host) == route_host && hostname(request_host).eq_ignore_ascii_case(route_host)
}

/// First occurrence of the header whose value matches the template.
fn header_captures(
    template: &HeaderTemplate,
    headers: &HeaderMap,
) -> Option<Vec<PlaceholderNameAndValue>> {
    headers
        .get_all(template.name())
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|value| template.captures(value))
}

fn match_headers(route: &CompiledRoute, headers: &HeaderMap) -> Option<Vec<PlaceholderNameAndValue>> {
    if route.upstream_header_templates.is_empty() {
        return Some(Vec::new());
    }

    let mut captured = Vec::new();
    let mut matched = 0;
    for template in &route.upstream_header_templates {
        match header_captures(template, headers) {
            Some(values) => {
                matched += 1;
                captured.extend(values);
            }
            None if route.upstream_header_trigger == HeaderTriggerMode::All => return None,
            None => {}
        }
    }

    (matched > 0).then_some(captured)
}

/// Pick the best candidate for a request.
///
/// Ranking is by template priority, then host-bound over wildcard, then
/// declaration order. Candidates that cannot outrank the current best are
/// not matched at all.
pub fn resolve(candidates: &[Arc<CompiledRoute>], req: &RequestMeta<'_>) -> Resolution {
    let mut best: Option<((i32, bool), &Arc<CompiledRoute>, Vec<PlaceholderNameAndValue>)> = None;

    for route in candidates {
        let rank = (route.priority(), route.upstream_host.is_some());
        if best.as_ref().is_some_and(|(current, _, _)| *current >= rank) {
            continue;
        }

        if !route.allows_method(req.method) {
            continue;
        }

        if let Some(route_host) = &route.upstream_host {
            match req.host {
                Some(host) if host_matches(route_host, host) => {}
                _ => continue,
            }
        }

        let Some(mut placeholders) = route.upstream_template.captures(req.path, req.query) else {
            continue;
        };

        let Some(header_values) = match_headers(route, req.headers) else {
            continue;
        };
        placeholders.extend(header_values);

        best = Some((rank, route, placeholders));
    }

    match best {
        Some((_, route, placeholders)) => Resolution::Matched(ResolvedRoute {
            route: Arc::clone(route),
            placeholders,
        }),
        None => Resolution::NotFound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        DownstreamHost, FileAggregateRoute, FileGlobalConfiguration, FileHostAndPort, FileRoute,
    };
    use crate::route::{assemble_aggregate, assemble_discovery_fallback, assemble_route};
    use hyper::header::HeaderValue;

    fn file_route(upstream: &str, downstream: &str) -> FileRoute {
        FileRoute {
            upstream_path_template: upstream.to_string(),
            downstream_path_template: downstream.to_string(),
            upstream_http_method: vec!["Get".to_string()],
            downstream_hosts: vec![DownstreamHost::Inline(FileHostAndPort {
                host: "localhost".to_string(),
                port: 5001,
            })],
            ..Default::default()
        }
    }

    fn compile(route: FileRoute) -> Arc<CompiledRoute> {
        Arc::new(assemble_route(&route, &FileGlobalConfiguration::default()).unwrap())
    }

    fn request<'a>(method: &'a Method, path: &'a str, query: Option<&'a str>, headers: &'a HeaderMap) -> RequestMeta<'a> {
        RequestMeta {
            method,
            path,
            query,
            host: None,
            headers,
        }
    }

    fn resolve_get(candidates: &[Arc<CompiledRoute>], path: &str, query: Option<&str>) -> Resolution {
        let headers = HeaderMap::new();
        resolve(candidates, &request(&Method::GET, path, query, &headers))
    }

    #[test]
    fn test_products_by_id() {
        let routes = vec![compile(file_route("/products/{id}", "/api/products/{id}"))];
        let resolution = resolve_get(&routes, "/products/1", None);

        let resolved = resolution.matched().expect("route should match");
        assert_eq!(resolved.placeholders, vec![PlaceholderNameAndValue::new("id", "1")]);
        assert_eq!(resolved.downstream_url("/products/1", None).path, "/api/products/1");
    }

    #[test]
    fn test_literal_beats_placeholder_regardless_of_order() {
        let placeholder = compile(file_route("/goods/{url}", "/goods/{url}"));
        let literal = compile(file_route("/goods/delete", "/goods/remove"));

        for routes in [
            vec![Arc::clone(&placeholder), Arc::clone(&literal)],
            vec![Arc::clone(&literal), Arc::clone(&placeholder)],
        ] {
            let resolution = resolve_get(&routes, "/goods/delete", None);
            let resolved = resolution.matched().unwrap();
            assert_eq!(resolved.route.upstream_template.raw(), "/goods/delete");
            assert!(resolved.placeholders.is_empty());
        }
    }

    #[test]
    fn test_query_catch_all() {
        let routes = vec![compile(file_route(
            "/contracts?{everything}",
            "/apipath/contracts?{everything}",
        ))];
        let resolution = resolve_get(&routes, "/contracts", Some("p1=v1&p2=v2"));

        let url = resolution
            .matched()
            .unwrap()
            .downstream_url("/contracts", Some("p1=v1&p2=v2"));
        assert_eq!(url.path, "/apipath/contracts");
        assert_eq!(url.query.as_deref(), Some("p1=v1&p2=v2"));
        assert_eq!(url.path_and_query(), "/apipath/contracts?p1=v1&p2=v2");
    }

    #[test]
    fn test_aggregate_requires_header() {
        let mut laura = file_route("/laura", "/");
        laura.key = Some("Laura".to_string());
        let mut tom = file_route("/tom", "/");
        tom.key = Some("Tom".to_string());
        let constituents = vec![compile(laura), compile(tom)];

        let aggregate = FileAggregateRoute {
            route_keys: vec!["Laura".to_string(), "Tom".to_string()],
            upstream_path_template: "/".to_string(),
            upstream_header_templates: [("Laura".to_string(), "{header:laura}".to_string())]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        let routes = vec![Arc::new(assemble_aggregate(&aggregate, &constituents).unwrap())];

        let mut headers = HeaderMap::new();
        headers.insert("laura", HeaderValue::from_static("yes"));
        let resolution = resolve(&routes, &request(&Method::GET, "/", None, &headers));
        let resolved = resolution.matched().unwrap();
        match &resolved.route.target {
            DownstreamTarget::Aggregate { routes, .. } => {
                let keys: Vec<_> = routes.iter().filter_map(|r| r.key.as_deref()).collect();
                assert_eq!(keys, vec!["Laura", "Tom"]);
            }
            other => panic!("unexpected target {:?}", other),
        }
        assert_eq!(resolved.placeholders, vec![PlaceholderNameAndValue::new("laura", "yes")]);

        assert!(!resolve_get(&routes, "/", None).is_match());
    }

    #[test]
    fn test_case_sensitive_route() {
        let mut sensitive = file_route("/Products/{id}", "/api/products/{id}");
        sensitive.route_is_case_sensitive = true;
        let routes = vec![compile(sensitive)];
        assert!(!resolve_get(&routes, "/products/1", None).is_match());
        assert!(resolve_get(&routes, "/Products/1", None).is_match());

        let routes = vec![compile(file_route("/Products/{id}", "/api/products/{id}"))];
        let resolution = resolve_get(&routes, "/PRODUCTS/AbC", None);
        assert_eq!(resolution.matched().unwrap().placeholders[0].value, "AbC");
    }

    #[test]
    fn test_host_bound_route_preferred() {
        let wildcard = compile(file_route("/api/{all}", "/wild/{all}"));
        let mut bound = file_route("/api/{all}", "/bound/{all}");
        bound.upstream_host = Some("api.example.com".to_string());
        let bound = compile(bound);
        let routes = vec![Arc::clone(&wildcard), Arc::clone(&bound)];
        let headers = HeaderMap::new();

        let mut req = request(&Method::GET, "/api/x", None, &headers);
        req.host = Some("API.example.com:8443");
        let resolution = resolve(&routes, &req);
        assert_eq!(resolution.matched().unwrap().route.downstream_path_template, "/bound/{all}");

        req.host = Some("other.example.com");
        let resolution = resolve(&routes, &req);
        assert_eq!(resolution.matched().unwrap().route.downstream_path_template, "/wild/{all}");

        let only_bound = vec![bound];
        assert!(!resolve(&only_bound, &req).is_match());
    }

    #[test]
    fn test_wildcard_with_higher_priority_wins() {
        let mut bound = file_route("/api/{all}", "/bound/{all}");
        bound.upstream_host = Some("api.example.com".to_string());
        let routes = vec![compile(bound), compile(file_route("/api/status", "/status"))];
        let headers = HeaderMap::new();
        let mut req = request(&Method::GET, "/api/status", None, &headers);
        req.host = Some("api.example.com");

        let resolution = resolve(&routes, &req);
        assert_eq!(resolution.matched().unwrap().route.downstream_path_template, "/status");
    }

    #[test]
    fn test_method_filter() {
        let routes = vec![compile(file_route("/orders", "/orders"))];
        let headers = HeaderMap::new();
        assert!(resolve(&routes, &request(&Method::GET, "/orders", None, &headers)).is_match());
        assert!(!resolve(&routes, &request(&Method::POST, "/orders", None, &headers)).is_match());
    }

    #[test]
    fn test_whole_path_ranks_below_root_and_everything_else() {
        let whole = compile(file_route("/{everything}", "/{everything}"));
        let root = compile(file_route("/", "/home"));
        let tail = compile(file_route("/files/{path}", "/files/{path}"));
        let routes = vec![whole, root, tail];

        let at_root = resolve_get(&routes, "/", None);
        assert_eq!(at_root.matched().unwrap().route.downstream_path_template, "/home");

        let files = resolve_get(&routes, "/files/a/b.txt", None);
        let resolved = files.matched().unwrap();
        assert_eq!(resolved.placeholders[0].value, "a/b.txt");

        let other = resolve_get(&routes, "/misc/thing", None);
        assert_eq!(other.matched().unwrap().placeholders[0].value, "misc/thing");
    }

    #[test]
    fn test_header_trigger_any_and_all() {
        let mut route = file_route("/tenant", "/{tenant}/{region}");
        route.upstream_header_templates = [
            ("X-Tenant".to_string(), "{tenant}".to_string()),
            ("X-Region".to_string(), "{region}".to_string()),
        ]
        .into_iter()
        .collect();
        let all = vec![compile(route.clone())];
        route.upstream_header_trigger = HeaderTriggerMode::Any;
        let any = vec![compile(route)];

        let mut headers = HeaderMap::new();
        headers.append("x-tenant", HeaderValue::from_static("acme"));
        let req = request(&Method::GET, "/tenant", None, &headers);
        assert!(!resolve(&all, &req).is_match());
        assert!(resolve(&any, &req).is_match());

        headers.append("x-region", HeaderValue::from_static("eu"));
        let req = request(&Method::GET, "/tenant", None, &headers);
        let resolution = resolve(&all, &req);
        let resolved = resolution.matched().unwrap();
        assert_eq!(resolved.downstream_url("/tenant", None).path, "/acme/eu");
    }

    #[test]
    fn test_repeated_header_matches_any_occurrence() {
        let mut route = file_route("/tenant", "/{id}");
        route.upstream_header_templates = [("X-Tenant".to_string(), "tenant-{id}".to_string())]
            .into_iter()
            .collect();
        let routes = vec![compile(route)];

        let mut headers = HeaderMap::new();
        headers.append("x-tenant", HeaderValue::from_static("guest"));
        headers.append("x-tenant", HeaderValue::from_static("tenant-acme"));
        let req = request(&Method::GET, "/tenant", None, &headers);
        let resolution = resolve(&routes, &req);
        let resolved = resolution.matched().unwrap();
        assert_eq!(resolved.placeholders, vec![PlaceholderNameAndValue::new("id", "acme")]);

        let mut headers = HeaderMap::new();
        headers.append("x-tenant", HeaderValue::from_static("guest"));
        headers.append("x-tenant", HeaderValue::from_static("admin"));
        let req = request(&Method::GET, "/tenant", None, &headers);
        assert!(!resolve(&routes, &req).is_match());
    }

    #[test]
    fn test_discovery_service_from_placeholders() {
        let global = FileGlobalConfiguration::default();
        let routes = vec![Arc::new(assemble_discovery_fallback(&global).unwrap())];

        let resolution = resolve_get(&routes, "/shop.orders/v1/items", Some("page=2"));
        let resolved = resolution.matched().unwrap();
        assert_eq!(
            resolved.discovery_service(),
            Some(ServiceLookup {
                namespace: Some("shop".to_string()),
                name: "orders".to_string(),
                scheme: "http".to_string(),
            })
        );
        let url = resolved.downstream_url("/shop.orders/v1/items", Some("page=2"));
        assert_eq!(url.path_and_query(), "/v1/items?page=2");
    }

    #[test]
    fn test_hostname_strips_port() {
        assert_eq!(hostname("example.com:8080"), "example.com");
        assert_eq!(hostname("[::1]:8080"), "[::1]");
        assert_eq!(hostname("::1"), "::1");
        assert!(host_matches("example.com", "EXAMPLE.com:80"));
        assert!(!host_matches("example.com:81", "example.com:80"));
    }
}
