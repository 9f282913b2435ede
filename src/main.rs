use anyhow::{Context, Result};
use clap::Parser;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Method};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use switchyard::{
    config::{Capabilities, FileConfiguration},
    gateway::{Gateway, RoutingState},
    metrics,
    route::DownstreamTarget,
    router::{RequestMeta, Resolution},
};

#[derive(Parser, Debug)]
#[command(name = "switchyard")]
#[command(about = "API gateway route table compiler and request resolver")]
#[command(version)]
struct Args {
    /// Path to configuration file (.json or .yaml)
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Keep running and reload the route table when the file changes
    #[arg(short, long)]
    watch: bool,

    /// Resolve one request, e.g. "GET /products/1?page=2"
    #[arg(long, value_name = "METHOD PATH")]
    resolve: Option<String>,

    /// Host header for --resolve
    #[arg(long)]
    host: Option<String>,

    /// Request header for --resolve, as name:value
    #[arg(long = "header", value_name = "NAME:VALUE")]
    headers: Vec<String>,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    metrics_address: Option<String>,

    /// A QoS provider is available
    #[arg(long)]
    qos_provider: bool,

    /// A service discovery provider is available
    #[arg(long)]
    discovery_provider: bool,

    /// Registered authentication scheme
    #[arg(long = "auth-scheme", value_name = "SCHEME")]
    auth_schemes: Vec<String>,

    /// Resolution cache entries per table, 0 disables caching
    #[arg(long, default_value_t = 10_000)]
    cache_capacity: usize,
}

fn init_tracing(debug: bool, json: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn parse_headers(raw: &[String]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for entry in raw {
        let (name, value) = entry
            .split_once(':')
            .with_context(|| format!("Header '{}' is not in name:value form", entry))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .with_context(|| format!("Invalid header name in '{}'", entry))?;
        let value = HeaderValue::from_str(value.trim())
            .with_context(|| format!("Invalid header value in '{}'", entry))?;
        headers.append(name, value);
    }
    Ok(headers)
}

fn print_resolution(state: &RoutingState, request: &str, host: Option<&str>, headers: &HeaderMap) -> Result<()> {
    let (method, target) = request
        .trim()
        .split_once(' ')
        .with_context(|| format!("Expected \"<METHOD> <path>\", got '{}'", request))?;
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid method '{}'", method))?;
    let target = target.trim();
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    };

    let req = RequestMeta {
        method: &method,
        path,
        query,
        host,
        headers,
    };

    let output = match state.resolve(&req) {
        Resolution::Matched(resolved) => {
            let route = &resolved.route;
            let url = resolved.downstream_url(path, query);
            let placeholders: serde_json::Map<String, serde_json::Value> = resolved
                .placeholders
                .iter()
                .map(|p| (p.name.clone(), serde_json::Value::String(p.value.clone())))
                .collect();

            let target = match &route.target {
                DownstreamTarget::Static { scheme, hosts } => serde_json::json!({
                    "scheme": scheme,
                    "hosts": hosts.iter().map(|h| h.to_string()).collect::<Vec<_>>(),
                }),
                DownstreamTarget::Discovery { .. } => {
                    let service = resolved.discovery_service();
                    serde_json::json!({
                        "scheme": service.as_ref().map(|s| s.scheme.clone()),
                        "service_name": service.as_ref().map(|s| s.name.clone()),
                        "service_namespace": service.and_then(|s| s.namespace),
                    })
                }
                DownstreamTarget::Aggregate { routes, aggregator } => serde_json::json!({
                    "aggregator": aggregator,
                    "routes": routes.iter().map(|r| r.display_name().to_string()).collect::<Vec<_>>(),
                }),
            };

            serde_json::json!({
                "outcome": "matched",
                "route": route.display_name(),
                "priority": route.priority(),
                "load_balancer_key": route.load_balancer_key,
                "placeholders": placeholders,
                "downstream": url.path_and_query(),
                "downstream_method": route.downstream_http_method.as_ref().unwrap_or(&method).as_str(),
                "target": target,
            })
        }
        Resolution::NotFound => serde_json::json!({ "outcome": "not_found" }),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(args.debug, args.log_json);

    let capabilities = Capabilities {
        qos_provider: args.qos_provider,
        service_discovery_provider: args.discovery_provider,
        authentication_schemes: args.auth_schemes.clone(),
    };

    info!("Loading configuration from {:?}", args.config);

    let config = FileConfiguration::load(&args.config)?;
    let state = Arc::new(RoutingState::from_config(
        &config,
        &capabilities,
        args.cache_capacity,
    )?);

    if args.validate {
        info!("Configuration is valid ({} routes)", state.table().len());
        return Ok(());
    }

    // Start metrics server if configured
    if let Some(ref address) = args.metrics_address {
        info!("Starting Prometheus metrics server on {}", address);
        if let Err(e) = metrics::start_metrics_server(address) {
            warn!("Failed to start metrics server: {}. Continuing without metrics.", e);
        }
    }

    if let Some(ref request) = args.resolve {
        let headers = parse_headers(&args.headers)?;
        print_resolution(&state, request, args.host.as_deref(), &headers)?;
    } else if !args.watch {
        for route in state.table().candidates() {
            info!(
                "{} [priority {}] -> {}",
                route.upstream_template.raw(),
                route.priority(),
                route.downstream_path_template
            );
        }
    }

    if args.watch {
        let gateway = Gateway::new(args.config, capabilities, state);
        gateway.run().await?;
    }

    Ok(())
}
