use super::claims::{claims_to_things, ClaimsTransforms};
use super::headers::header_rules;
use super::key::{route_key, RouteKeyParts};
use super::options::{self, default_cache_region};
use super::security::SecurityOptions;
use super::{
    compile_header_templates, compile_template, parse_method, parse_methods, AssemblyError,
    CompiledRoute, DownstreamHostAndPort, DownstreamTarget,
};
use crate::config::{DownstreamHost, FileGlobalConfiguration, FileRoute};
use tracing::{debug, warn};

const DEFAULT_SCHEME: &str = "http";

/// Inline hosts are taken as written; named hosts are looked up in the
/// global registry and dropped with a warning when missing.
fn resolve_hosts(
    route_name: &str,
    hosts: &[DownstreamHost],
    global: &FileGlobalConfiguration,
) -> Vec<DownstreamHostAndPort> {
    hosts
        .iter()
        .filter_map(|host| match host {
            DownstreamHost::Inline(inline) => {
                Some(DownstreamHostAndPort::new(inline.host.as_str(), inline.port))
            }
            DownstreamHost::Named(name) => match global.hosts.get(name) {
                Some(entry) => Some(DownstreamHostAndPort::new(entry.host.as_str(), entry.port)),
                None => {
                    warn!(
                        "Route '{}' references unknown downstream host '{}', dropping it",
                        route_name, name
                    );
                    None
                }
            },
        })
        .collect()
}

pub(super) fn downstream_scheme(route: Option<&str>, global: &FileGlobalConfiguration) -> String {
    options::override_chain(
        route.map(str::to_string),
        global.downstream_scheme.clone(),
        || DEFAULT_SCHEME.to_string(),
    )
}

/// Merge one declared route onto the global defaults.
pub fn assemble_route(
    route: &FileRoute,
    global: &FileGlobalConfiguration,
) -> Result<CompiledRoute, AssemblyError> {
    let name = route
        .key
        .clone()
        .unwrap_or_else(|| route.upstream_path_template.clone());

    let upstream_template = compile_template(
        &name,
        &route.upstream_path_template,
        route.route_is_case_sensitive,
    )?;
    let upstream_header_templates = compile_header_templates(
        &name,
        &route.upstream_header_templates,
        route.route_is_case_sensitive,
    )?;
    let methods = parse_methods(&name, &route.upstream_http_method)?;
    let downstream_http_method = route
        .downstream_http_method
        .as_deref()
        .map(|m| parse_method(&name, m))
        .transpose()?;

    let hosts = resolve_hosts(&name, &route.downstream_hosts, global);
    if hosts.is_empty() && route.service_name.is_none() {
        warn!("Route '{}' has no usable downstream host", name);
    }

    let load_balancer = options::load_balancer_options(
        route.load_balancer_options.as_ref(),
        global.load_balancer_options.as_ref(),
    );
    let load_balancer_key = route_key(RouteKeyParts {
        upstream_template: &route.upstream_path_template,
        methods: &route.upstream_http_method,
        upstream_host: route.upstream_host.as_deref(),
        hosts: &hosts,
        service_namespace: route.service_namespace.as_deref(),
        service_name: route.service_name.as_deref(),
        load_balancer: &load_balancer,
    });

    let scheme = downstream_scheme(route.downstream_scheme.as_deref(), global);
    let target = match &route.service_name {
        Some(service_name) => DownstreamTarget::Discovery {
            scheme,
            service_name: service_name.clone(),
            service_namespace: route.service_namespace.clone(),
        },
        None => DownstreamTarget::Static { scheme, hosts },
    };

    let base_url = global.base_url.as_deref();

    let compiled = CompiledRoute {
        key: route.key.clone(),
        upstream_header_templates,
        upstream_header_trigger: route.upstream_header_trigger,
        upstream_host: route.upstream_host.clone(),
        methods,
        downstream_path_template: route.downstream_path_template.clone(),
        downstream_http_method,
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
        claims_requirement: route.route_claims_requirement.clone(),
        claims: ClaimsTransforms {
            to_headers: claims_to_things(&route.add_headers_to_request),
            to_claims: claims_to_things(&route.add_claims_to_request),
            to_queries: claims_to_things(&route.add_queries_to_request),
            to_downstream_path: claims_to_things(&route.change_downstream_path_template),
        },
        cache: options::cache_options(
            route.cache_options.as_ref(),
            global.cache_options.as_ref(),
            || default_cache_region(&route.upstream_http_method, &route.upstream_path_template),
        ),
        rate_limit: options::rate_limit_options(
            route.key.as_deref(),
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
        request_headers: header_rules(
            &route.upstream_header_transform,
            &global.upstream_header_transform,
            base_url,
        ),
        response_headers: header_rules(
            &route.downstream_header_transform,
            &global.downstream_header_transform,
            base_url,
        ),
        security: SecurityOptions::merge(
            route.security_options.as_ref(),
            global.security_options.as_ref(),
        ),
        metadata: options::metadata(&route.metadata, &global.metadata),
        delegating_handlers: route.delegating_handlers.clone(),
        request_id_key: route
            .request_id_key
            .clone()
            .or_else(|| global.request_id_key.clone()),
        timeout: options::timeout(route.timeout, global.timeout),
        dangerous_accept_any_server_certificate: route.dangerous_accept_any_server_certificate,
        load_balancer,
        load_balancer_key,
        ..CompiledRoute::new(upstream_template, target)
    };

    debug!(
        "Assembled route '{}' (priority {}, key {})",
        name,
        compiled.priority(),
        compiled.load_balancer_key
    );

    Ok(compiled)
}
