use super::key::{route_key, RouteKeyParts};
use super::options::LoadBalancerOptions;
use super::{
    compile_header_templates, compile_template, parse_methods, AssemblyError, CompiledRoute,
    DownstreamTarget,
};
use crate::config::FileAggregateRoute;
use std::sync::Arc;
use tracing::debug;

/// Build an aggregate over already assembled routes.
///
/// Constituents are taken in the order the aggregate lists their keys.
/// Every key has to name an assembled route.
pub fn assemble_aggregate(
    aggregate: &FileAggregateRoute,
    routes: &[Arc<CompiledRoute>],
) -> Result<CompiledRoute, AssemblyError> {
    let name = aggregate.upstream_path_template.as_str();

    let mut constituents = Vec::with_capacity(aggregate.route_keys.len());
    let mut missing = Vec::new();
    for key in &aggregate.route_keys {
        match routes.iter().find(|r| r.key.as_deref() == Some(key.as_str())) {
            Some(route) => constituents.push(Arc::clone(route)),
            None => missing.push(key.clone()),
        }
    }
    if !missing.is_empty() {
        return Err(AssemblyError::UnknownAggregateRouteKeys {
            aggregate: name.to_string(),
            missing,
        });
    }

    let upstream_template = compile_template(
        name,
        &aggregate.upstream_path_template,
        aggregate.route_is_case_sensitive,
    )?;
    let upstream_header_templates = compile_header_templates(
        name,
        &aggregate.upstream_header_templates,
        aggregate.route_is_case_sensitive,
    )?;

    let methods = if aggregate.upstream_http_method.is_empty() {
        vec!["GET".to_string()]
    } else {
        aggregate.upstream_http_method.clone()
    };

    let load_balancer = LoadBalancerOptions::default();
    let load_balancer_key = route_key(RouteKeyParts {
        upstream_template: &aggregate.upstream_path_template,
        methods: &methods,
        upstream_host: aggregate.upstream_host.as_deref(),
        hosts: &[],
        service_namespace: None,
        service_name: None,
        load_balancer: &load_balancer,
    });

    debug!(
        "Assembled aggregate '{}' over {} routes",
        name,
        constituents.len()
    );

    Ok(CompiledRoute {
        load_balancer_key,
        upstream_header_templates,
        upstream_header_trigger: aggregate.upstream_header_trigger,
        upstream_host: aggregate.upstream_host.clone(),
        methods: parse_methods(name, &methods)?,
        load_balancer,
        ..CompiledRoute::new(
            upstream_template,
            DownstreamTarget::Aggregate {
                routes: constituents,
                aggregator: aggregate.aggregator.clone(),
            },
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DownstreamHost, FileGlobalConfiguration, FileHostAndPort, FileRoute};
    use crate::route::assemble_route;
    use hyper::Method;

    fn keyed(key: &str, upstream: &str) -> Arc<CompiledRoute> {
        let file = FileRoute {
            key: Some(key.to_string()),
            upstream_path_template: upstream.to_string(),
            downstream_path_template: upstream.to_string(),
            downstream_hosts: vec![DownstreamHost::Inline(FileHostAndPort {
                host: "localhost".to_string(),
                port: 80,
            })],
            ..Default::default()
        };
        Arc::new(assemble_route(&file, &FileGlobalConfiguration::default()).unwrap())
    }

    fn aggregate(keys: &[&str]) -> FileAggregateRoute {
        FileAggregateRoute {
            route_keys: keys.iter().map(|k| k.to_string()).collect(),
            upstream_path_template: "/dashboard".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_constituents_in_listed_order() {
        let routes = vec![keyed("users", "/users"), keyed("orders", "/orders")];
        let compiled = assemble_aggregate(&aggregate(&["orders", "users"]), &routes).unwrap();

        assert!(compiled.is_aggregate());
        assert_eq!(compiled.methods, vec![Method::GET]);
        match &compiled.target {
            DownstreamTarget::Aggregate { routes, .. } => {
                let keys: Vec<_> = routes.iter().filter_map(|r| r.key.as_deref()).collect();
                assert_eq!(keys, vec!["orders", "users"]);
            }
            other => panic!("unexpected target {:?}", other),
        }
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let routes = vec![keyed("users", "/users")];
        let err = assemble_aggregate(&aggregate(&["users", "ghost", "phantom"]), &routes).unwrap_err();
        match err {
            AssemblyError::UnknownAggregateRouteKeys { missing, .. } => {
                assert_eq!(missing, vec!["ghost".to_string(), "phantom".to_string()]);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_explicit_methods_kept() {
        let routes = vec![keyed("users", "/users")];
        let mut file = aggregate(&["users"]);
        file.upstream_http_method = vec!["post".to_string()];
        let compiled = assemble_aggregate(&file, &routes).unwrap();
        assert_eq!(compiled.methods, vec![Method::POST]);
        assert!(compiled.load_balancer_key.starts_with("/dashboard|POST|"));
    }
}
