pub mod duration;
mod types;
pub mod watcher;

pub use duration::Duration;
pub use types::*;
pub use watcher::{watch_config_async, ConfigWatcher};

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;

impl FileConfiguration {
    /// Read and parse a configuration file. `.json` files are parsed as JSON,
    /// anything else as YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yml::from_str(content).with_context(|| "Failed to parse YAML config")
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).with_context(|| "Failed to parse JSON config")
    }

    /// Check the document for inconsistencies that make it impossible to
    /// build a route table, and for options whose provider is not wired.
    pub fn validate(&self, capabilities: &Capabilities) -> Result<()> {
        if let Some(base_url) = &self.global.base_url {
            url::Url::parse(base_url)
                .with_context(|| format!("Invalid global base_url: {}", base_url))?;
        }

        let discovery_configured = self.global.service_discovery_provider.is_some();
        if discovery_configured && !capabilities.service_discovery_provider {
            anyhow::bail!("A service discovery provider is configured but none is registered");
        }

        if let Some(auth) = &self.global.authentication_options {
            validate_authentication("global", auth, capabilities)?;
        }
        if let Some(qos) = &self.global.qos_options {
            validate_qos("global", qos, capabilities)?;
        }

        let mut keys = HashSet::new();

        for (index, route) in self.routes.iter().enumerate() {
            let name = route
                .key
                .clone()
                .unwrap_or_else(|| format!("#{} ({})", index, route.upstream_path_template));

            if !route.upstream_path_template.starts_with('/') {
                anyhow::bail!("Route '{}' upstream_path_template must start with '/'", name);
            }
            if !route.downstream_path_template.starts_with('/') {
                anyhow::bail!("Route '{}' downstream_path_template must start with '/'", name);
            }

            if let Some(key) = &route.key {
                if !keys.insert(key.as_str()) {
                    anyhow::bail!("Route key '{}' is declared more than once", key);
                }
            }

            match &route.service_name {
                Some(_) if !discovery_configured => {
                    anyhow::bail!(
                        "Route '{}' uses service_name but no service_discovery_provider is configured",
                        name
                    );
                }
                None if route.downstream_hosts.is_empty() => {
                    anyhow::bail!("Route '{}' must have at least one downstream host", name);
                }
                _ => {}
            }

            if let Some(auth) = &route.authentication_options {
                validate_authentication(&name, auth, capabilities)?;
            }
            if let Some(qos) = &route.qos_options {
                validate_qos(&name, qos, capabilities)?;
            }
        }

        self.validate_duplicate_upstreams()?;

        for dynamic in &self.dynamic_routes {
            if dynamic.service_name.is_empty() {
                anyhow::bail!("Dynamic route must have a service_name");
            }
            if !discovery_configured {
                anyhow::bail!(
                    "Dynamic route '{}' requires a service_discovery_provider",
                    dynamic.service_name
                );
            }
            if let Some(auth) = &dynamic.authentication_options {
                validate_authentication(&dynamic.service_name, auth, capabilities)?;
            }
            if let Some(qos) = &dynamic.qos_options {
                validate_qos(&dynamic.service_name, qos, capabilities)?;
            }
        }

        for aggregate in &self.aggregates {
            if !aggregate.upstream_path_template.starts_with('/') {
                anyhow::bail!(
                    "Aggregate '{}' upstream_path_template must start with '/'",
                    aggregate.upstream_path_template
                );
            }
            if aggregate.route_keys.is_empty() {
                anyhow::bail!(
                    "Aggregate '{}' must reference at least one route key",
                    aggregate.upstream_path_template
                );
            }
            for key in &aggregate.route_keys {
                if !keys.contains(key.as_str()) {
                    anyhow::bail!(
                        "Aggregate '{}' references non-existent route key '{}'",
                        aggregate.upstream_path_template,
                        key
                    );
                }
            }
        }

        Ok(())
    }

    /// Two routes sharing template, host, header templates and at least one
    /// method can never both be reached.
    fn validate_duplicate_upstreams(&self) -> Result<()> {
        for (i, a) in self.routes.iter().enumerate() {
            for b in self.routes.iter().skip(i + 1) {
                let same_template = if a.route_is_case_sensitive || b.route_is_case_sensitive {
                    a.upstream_path_template == b.upstream_path_template
                } else {
                    a.upstream_path_template
                        .eq_ignore_ascii_case(&b.upstream_path_template)
                };
                let same_host = match (&a.upstream_host, &b.upstream_host) {
                    (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
                    (None, None) => true,
                    _ => false,
                };
                let methods_overlap = a.upstream_http_method.is_empty()
                    || b.upstream_http_method.is_empty()
                    || a.upstream_http_method.iter().any(|m| {
                        b.upstream_http_method
                            .iter()
                            .any(|n| n.eq_ignore_ascii_case(m))
                    });

                if same_template
                    && same_host
                    && methods_overlap
                    && a.upstream_header_templates == b.upstream_header_templates
                {
                    anyhow::bail!(
                        "Duplicate route for upstream '{}'",
                        a.upstream_path_template
                    );
                }
            }
        }
        Ok(())
    }
}

fn validate_authentication(
    owner: &str,
    auth: &FileAuthenticationOptions,
    capabilities: &Capabilities,
) -> Result<()> {
    let schemes = auth
        .authentication_provider_key
        .iter()
        .chain(auth.authentication_provider_keys.iter())
        .filter(|s| !s.is_empty());

    for scheme in schemes {
        if !capabilities.has_authentication_scheme(scheme) {
            anyhow::bail!(
                "'{}' uses authentication scheme '{}' which is not registered",
                owner,
                scheme
            );
        }
    }
    Ok(())
}

fn validate_qos(owner: &str, qos: &FileQosOptions, capabilities: &Capabilities) -> Result<()> {
    let wants_breaker = qos.exceptions_allowed_before_breaking.unwrap_or(0) > 0
        || qos.timeout_ms.unwrap_or(0) > 0;

    if wants_breaker && !capabilities.qos_provider {
        anyhow::bail!("'{}' has qos_options but no QoS provider is registered", owner);
    }
    Ok(())
}
