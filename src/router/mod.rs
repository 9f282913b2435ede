mod cache;
mod placeholder;
mod resolver;
mod template;

pub use cache::{CacheKey, ResolutionCache};
pub use placeholder::{create_downstream_url, substitute, DownstreamUrl, PlaceholderNameAndValue};
pub use resolver::{resolve, RequestMeta, Resolution, ResolvedRoute, ServiceLookup};
pub use template::{
    parse_query, HeaderTemplate, QueryPair, QueryParam, QueryTemplate, QueryValue, RouteTemplate,
    TemplateError, TemplateKind,
};

use crate::config::FileConfiguration;
use crate::route::{
    assemble_aggregate, assemble_discovery_fallback, assemble_dynamic_route, assemble_route,
    AssemblyError, CompiledRoute,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Immutable set of compiled routes built from one configuration.
pub struct RouteTable {
    /// Routes the resolver considers, in declaration order
    candidates: Vec<Arc<CompiledRoute>>,
    /// Every assembled static route, aggregate constituents included
    routes: Vec<Arc<CompiledRoute>>,
    /// Lower-cased names of headers any candidate routes on
    routing_headers: Vec<String>,
}

impl RouteTable {
    pub fn empty() -> Self {
        Self {
            candidates: Vec::new(),
            routes: Vec::new(),
            routing_headers: Vec::new(),
        }
    }

    /// Compile a configuration. Candidates are the static routes no
    /// aggregate absorbs, then aggregates, then dynamic routes. A
    /// configuration with no static routes and a discovery provider gets a
    /// trailing catch-all that treats the first segment as a service name.
    pub fn from_config(config: &FileConfiguration) -> Result<Self, AssemblyError> {
        let global = &config.global;

        let routes = config
            .routes
            .iter()
            .map(|route| assemble_route(route, global).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        let aggregates = config
            .aggregates
            .iter()
            .map(|aggregate| assemble_aggregate(aggregate, &routes).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        let absorbed: HashSet<&str> = config
            .aggregates
            .iter()
            .flat_map(|a| a.route_keys.iter().map(String::as_str))
            .collect();

        let mut candidates: Vec<Arc<CompiledRoute>> = routes
            .iter()
            .filter(|route| {
                !route
                    .key
                    .as_deref()
                    .is_some_and(|key| absorbed.contains(key))
            })
            .cloned()
            .collect();
        candidates.extend(aggregates);

        for dynamic in &config.dynamic_routes {
            candidates.push(Arc::new(assemble_dynamic_route(dynamic, global)?));
        }

        if config.routes.is_empty() && global.service_discovery_provider.is_some() {
            debug!("No static routes declared, adding service discovery catch-all");
            candidates.push(Arc::new(assemble_discovery_fallback(global)?));
        }

        let mut routing_headers: Vec<String> = Vec::new();
        for template in candidates.iter().flat_map(|r| r.upstream_header_templates.iter()) {
            if !routing_headers.iter().any(|h| h == template.name()) {
                routing_headers.push(template.name().to_string());
            }
        }

        info!(
            "Route table built: {} candidates from {} routes, {} aggregates, {} dynamic routes",
            candidates.len(),
            routes.len(),
            config.aggregates.len(),
            config.dynamic_routes.len()
        );

        Ok(Self {
            candidates,
            routes,
            routing_headers,
        })
    }

    #[inline]
    pub fn resolve(&self, req: &RequestMeta<'_>) -> Resolution {
        resolve(&self.candidates, req)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn candidates(&self) -> &[Arc<CompiledRoute>] {
        &self.candidates
    }

    pub fn routes(&self) -> &[Arc<CompiledRoute>] {
        &self.routes
    }

    pub fn find_by_key(&self, key: &str) -> Option<&Arc<CompiledRoute>> {
        self.routes.iter().find(|r| r.key.as_deref() == Some(key))
    }

    pub fn routing_header_names(&self) -> &[String] {
        &self.routing_headers
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::empty()
    }
}
