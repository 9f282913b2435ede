use super::assembler::downstream_scheme;
use super::key::dynamic_route_key;
use super::options::{self, default_cache_region};
use super::{compile_template, AssemblyError, CompiledRoute, DownstreamTarget};
use crate::config::{FileDynamicRoute, FileGlobalConfiguration};
use tracing::debug;

const DOWNSTREAM_TEMPLATE: &str = "/{everything}";
const FALLBACK_TEMPLATE: &str = "/{serviceName}/{everything}";
const FALLBACK_SERVICE: &str = "{serviceName}";

fn upstream_template(service_namespace: Option<&str>, service_name: &str) -> String {
    match service_namespace.filter(|ns| !ns.is_empty()) {
        Some(ns) => format!("/{}.{}/{{everything}}", ns, service_name),
        None => format!("/{}/{{everything}}", service_name),
    }
}

/// Scheme of a discovery-backed route: explicit, then global, then the
/// discovery provider's own scheme.
fn discovery_scheme(explicit: Option<&str>, global: &FileGlobalConfiguration) -> String {
    let provider = global
        .service_discovery_provider
        .as_ref()
        .and_then(|p| p.scheme.as_deref());
    downstream_scheme(explicit.or(global.downstream_scheme.as_deref()).or(provider), global)
}

/// Build a route forwarding `/{namespace.}service/...` to the discovered
/// instances of that service.
pub fn assemble_dynamic_route(
    route: &FileDynamicRoute,
    global: &FileGlobalConfiguration,
) -> Result<CompiledRoute, AssemblyError> {
    let raw = upstream_template(route.service_namespace.as_deref(), &route.service_name);
    let template = compile_template(&route.service_name, &raw, false)?;

    let load_balancer = options::load_balancer_options(
        route.load_balancer_options.as_ref(),
        global.load_balancer_options.as_ref(),
    );
    let load_balancer_key = dynamic_route_key(
        route.service_namespace.as_deref(),
        &route.service_name,
        &load_balancer,
    );

    let target = DownstreamTarget::Discovery {
        scheme: discovery_scheme(route.downstream_scheme.as_deref(), global),
        service_name: route.service_name.clone(),
        service_namespace: route.service_namespace.clone(),
    };

    debug!(
        "Assembled dynamic route for service '{}' at '{}'",
        route.service_name, raw
    );

    Ok(CompiledRoute {
        downstream_path_template: DOWNSTREAM_TEMPLATE.to_string(),
        downstream_http_version: options::downstream_http_version(
            route.downstream_http_version.as_deref(),
            global.downstream_http_version.as_deref(),
        ),
        downstream_version_policy: options::version_policy(
            route.downstream_http_version_policy,
            global.downstream_http_version_policy,
        ),
        authentication: options::authentication_options(
            route.authentication_options.as_ref(),
            global.authentication_options.as_ref(),
        ),
        cache: options::cache_options(
            route.cache_options.as_ref(),
            global.cache_options.as_ref(),
            || default_cache_region(&[], &raw),
        ),
        rate_limit: options::rate_limit_options(
            Some(route.service_name.as_str()),
            route.rate_limit_options.as_ref(),
            global.rate_limit_options.as_ref(),
        ),
        qos: options::qos_options(
            &load_balancer_key,
            route.qos_options.as_ref(),
            global.qos_options.as_ref(),
        ),
        http_handler: options::http_handler_options(
            route.http_handler_options.as_ref(),
            global.http_handler_options.as_ref(),
        ),
        security: super::SecurityOptions::merge(None, global.security_options.as_ref()),
        metadata: options::metadata(&route.metadata, &global.metadata),
        request_id_key: global.request_id_key.clone(),
        timeout: options::timeout(route.timeout, global.timeout),
        load_balancer,
        load_balancer_key,
        ..CompiledRoute::new(template, target)
    })
}

/// Catch-all used when no static routes are declared but a discovery
/// provider is: the first path segment names the service.
pub fn assemble_discovery_fallback(
    global: &FileGlobalConfiguration,
) -> Result<CompiledRoute, AssemblyError> {
    let template = compile_template(FALLBACK_TEMPLATE, FALLBACK_TEMPLATE, false)?;
    let namespace = global
        .service_discovery_provider
        .as_ref()
        .and_then(|p| p.namespace.clone());

    let load_balancer = options::load_balancer_options(None, global.load_balancer_options.as_ref());
    let load_balancer_key =
        dynamic_route_key(namespace.as_deref(), FALLBACK_SERVICE, &load_balancer);

    let target = DownstreamTarget::Discovery {
        scheme: discovery_scheme(None, global),
        service_name: FALLBACK_SERVICE.to_string(),
        service_namespace: namespace,
    };

    Ok(CompiledRoute {
        downstream_path_template: DOWNSTREAM_TEMPLATE.to_string(),
        downstream_http_version: options::downstream_http_version(
            None,
            global.downstream_http_version.as_deref(),
        ),
        downstream_version_policy: options::version_policy(
            None,
            global.downstream_http_version_policy,
        ),
        authentication: options::authentication_options(None, global.authentication_options.as_ref()),
        rate_limit: options::rate_limit_options(None, None, global.rate_limit_options.as_ref()),
        qos: options::qos_options(&load_balancer_key, None, global.qos_options.as_ref()),
        http_handler: options::http_handler_options(None, global.http_handler_options.as_ref()),
        security: super::SecurityOptions::merge(None, global.security_options.as_ref()),
        metadata: global.metadata.clone(),
        request_id_key: global.request_id_key.clone(),
        timeout: options::timeout(None, global.timeout),
        load_balancer,
        load_balancer_key,
        ..CompiledRoute::new(template, target)
    })
}
