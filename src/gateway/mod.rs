use crate::config::{watch_config_async, Capabilities, FileConfiguration};
use crate::metrics::{Metrics, ResolutionTimer};
use crate::router::{RequestMeta, Resolution, ResolutionCache, RouteTable};
use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

/// A route table together with the resolution cache built for it.
pub struct Snapshot {
    pub table: Arc<RouteTable>,
    cache: Option<ResolutionCache>,
}

impl Snapshot {
    fn new(table: RouteTable, cache_capacity: usize) -> Self {
        Self {
            table: Arc::new(table),
            cache: (cache_capacity > 0).then(|| ResolutionCache::new(cache_capacity)),
        }
    }

    pub fn cached_resolutions(&self) -> usize {
        self.cache.as_ref().map_or(0, ResolutionCache::len)
    }
}

/// Routing state shared by every request. Readers never lock; a reload
/// swaps in a fully built snapshot or leaves the current one in place.
pub struct RoutingState {
    snapshot: ArcSwap<Snapshot>,
    cache_capacity: usize,
}

impl RoutingState {
    pub fn new(table: RouteTable, cache_capacity: usize) -> Self {
        Metrics::set_table_size(table.len());
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::new(table, cache_capacity)),
            cache_capacity,
        }
    }

    pub fn from_config(
        config: &FileConfiguration,
        capabilities: &Capabilities,
        cache_capacity: usize,
    ) -> Result<Self> {
        Ok(Self::new(build_table(config, capabilities)?, cache_capacity))
    }

    /// Validate and compile a new configuration, then publish it.
    /// On error the previous table stays active.
    pub fn reload(&self, config: &FileConfiguration, capabilities: &Capabilities) -> Result<()> {
        let table = match build_table(config, capabilities) {
            Ok(table) => table,
            Err(e) => {
                Metrics::record_reload("failure");
                return Err(e);
            }
        };

        let routes = table.len();
        self.snapshot
            .store(Arc::new(Snapshot::new(table, self.cache_capacity)));

        Metrics::record_reload("success");
        Metrics::set_table_size(routes);
        info!("Route table reloaded with {} routes", routes);

        Ok(())
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    pub fn table(&self) -> Arc<RouteTable> {
        Arc::clone(&self.snapshot.load().table)
    }

    /// Resolve against the current snapshot, consulting its cache first.
    pub fn resolve(&self, req: &RequestMeta<'_>) -> Resolution {
        let snapshot = self.snapshot.load();
        let timer = ResolutionTimer::new();

        let Some(cache) = &snapshot.cache else {
            let resolution = snapshot.table.resolve(req);
            timer.finish(resolution.outcome());
            return resolution;
        };

        let key = ResolutionCache::key(req, snapshot.table.routing_header_names());
        if let Some(resolution) = cache.get(&key) {
            Metrics::record_cache_hit();
            timer.finish(resolution.outcome());
            return resolution;
        }

        let resolution = snapshot.table.resolve(req);
        cache.insert(key, resolution.clone());
        timer.finish(resolution.outcome());
        resolution
    }
}

fn build_table(config: &FileConfiguration, capabilities: &Capabilities) -> Result<RouteTable> {
    config
        .validate(capabilities)
        .context("Configuration validation failed")?;
    RouteTable::from_config(config).context("Failed to build route table")
}

/// Owns the routing state and keeps it in sync with the configuration file.
pub struct Gateway {
    config_path: PathBuf,
    capabilities: Capabilities,
    state: Arc<RoutingState>,
}

impl Gateway {
    pub fn new(config_path: PathBuf, capabilities: Capabilities, state: Arc<RoutingState>) -> Self {
        Self {
            config_path,
            capabilities,
            state,
        }
    }

    /// Load, validate and compile the file at `config_path`.
    pub fn load(config_path: PathBuf, capabilities: Capabilities, cache_capacity: usize) -> Result<Self> {
        let config = FileConfiguration::load(&config_path)?;
        let state = RoutingState::from_config(&config, &capabilities, cache_capacity)?;
        Ok(Self::new(config_path, capabilities, Arc::new(state)))
    }

    pub fn state(&self) -> Arc<RoutingState> {
        Arc::clone(&self.state)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Watch the configuration file and reload on change until a shutdown
    /// signal arrives.
    pub async fn run(&self) -> Result<()> {
        let config_path = self.config_path.clone();
        let capabilities = self.capabilities.clone();
        let state = Arc::clone(&self.state);

        let watcher_handle = tokio::spawn(async move {
            let (mut rx, _handle) = watch_config_async(config_path);

            loop {
                match rx.recv().await {
                    Ok(new_config) => {
                        info!("Hot reloading configuration...");
                        if let Err(e) = state.reload(&new_config, &capabilities) {
                            error!("Reload rejected, keeping current routes: {:#}", e);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Config watcher lagged, skipped {} updates", skipped);
                    }
                    Err(RecvError::Closed) => {
                        debug!("Config watcher channel closed");
                        break;
                    }
                }
            }
        });

        info!(
            "Watching {:?} for changes, waiting for shutdown signal",
            self.config_path
        );

        shutdown_signal().await;

        info!("Shutdown signal received, stopping watcher");
        watcher_handle.abort();

        Ok(())
    }

    pub fn reload_config(&self, config: FileConfiguration) -> Result<()> {
        self.state.reload(&config, &self.capabilities)?;
        info!("Configuration reloaded manually");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::{HeaderMap, Method};
    use std::io::Write;

    const ORDERS: &str = r#"
routes:
  - upstream_path_template: /orders/{id}
    downstream_path_template: /api/orders/{id}
    downstream_hosts:
      - host: localhost
        port: 5001
"#;

    const INVOICES: &str = r#"
routes:
  - upstream_path_template: /invoices/{id}
    downstream_path_template: /api/invoices/{id}
    downstream_hosts:
      - host: localhost
        port: 5002
"#;

    fn get<'a>(path: &'a str, headers: &'a HeaderMap) -> RequestMeta<'a> {
        RequestMeta {
            method: &Method::GET,
            path,
            query: None,
            host: None,
            headers,
        }
    }

    fn state(yaml: &str, cache_capacity: usize) -> RoutingState {
        let config = FileConfiguration::from_yaml(yaml).unwrap();
        RoutingState::from_config(&config, &Capabilities::default(), cache_capacity).unwrap()
    }

    #[test]
    fn test_reload_swaps_table_and_drops_cache() {
        let state = state(ORDERS, 100);
        let headers = HeaderMap::new();

        assert!(state.resolve(&get("/orders/1", &headers)).is_match());
        assert!(state.resolve(&get("/orders/1", &headers)).is_match());
        assert_eq!(state.snapshot().cached_resolutions(), 1);

        state
            .reload(&FileConfiguration::from_yaml(INVOICES).unwrap(), &Capabilities::default())
            .unwrap();

        assert_eq!(state.snapshot().cached_resolutions(), 0);
        assert!(!state.resolve(&get("/orders/1", &headers)).is_match());
        assert!(state.resolve(&get("/invoices/9", &headers)).is_match());
    }

    #[test]
    fn test_cache_never_changes_header_routing_outcome() {
        let state = state(
            r#"
routes:
  - upstream_path_template: /p
    downstream_path_template: /api/p
    upstream_header_templates:
      X-T: "{t}"
    downstream_hosts:
      - host: localhost
        port: 5001
"#,
            100,
        );

        let mut tagged = HeaderMap::new();
        tagged.insert("x-t", hyper::header::HeaderValue::from_static("z|"));
        let mut with_header = get("/p", &tagged);
        with_header.query = Some("a=1");
        assert!(state.resolve(&with_header).is_match());

        let untagged = HeaderMap::new();
        let mut without_header = get("/p", &untagged);
        without_header.query = Some("a=1|z");
        assert!(!state.table().resolve(&without_header).is_match());
        assert!(!state.resolve(&without_header).is_match());
        assert_eq!(state.snapshot().cached_resolutions(), 2);
    }

    #[test]
    fn test_failed_reload_keeps_previous_table() {
        let state = state(ORDERS, 0);
        let before = state.table();

        let mut broken = FileConfiguration::from_yaml(INVOICES).unwrap();
        broken.routes[0].upstream_path_template = "invoices".to_string();
        assert!(state.reload(&broken, &Capabilities::default()).is_err());

        assert!(Arc::ptr_eq(&before, &state.table()));
        let headers = HeaderMap::new();
        assert!(state.resolve(&get("/orders/7", &headers)).is_match());
    }

    #[test]
    fn test_missing_capability_rejected() {
        let config = FileConfiguration::from_yaml(
            r#"
global:
  service_discovery_provider:
    type: consul
"#,
        )
        .unwrap();
        assert!(RoutingState::from_config(&config, &Capabilities::default(), 0).is_err());

        let capabilities = Capabilities {
            service_discovery_provider: true,
            ..Default::default()
        };
        let state = RoutingState::from_config(&config, &capabilities, 0).unwrap();
        assert_eq!(state.table().len(), 1);
    }

    #[test]
    fn test_gateway_load_and_manual_reload() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(ORDERS.as_bytes()).unwrap();

        let gateway = Gateway::load(file.path().to_path_buf(), Capabilities::default(), 16).unwrap();
        assert_eq!(gateway.config_path(), file.path());

        let headers = HeaderMap::new();
        assert!(gateway.state().resolve(&get("/orders/1", &headers)).is_match());

        gateway
            .reload_config(FileConfiguration::from_yaml(INVOICES).unwrap())
            .unwrap();
        assert!(gateway.state().resolve(&get("/invoices/1", &headers)).is_match());
    }

    #[test]
    fn test_bundled_example_config() {
        let path = PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/config.yaml"));
        let gateway = Gateway::load(path, Capabilities::default(), 0).unwrap();
        let state = gateway.state();
        let headers = HeaderMap::new();

        let resolution = state.resolve(&get("/goods/delete", &headers));
        assert_eq!(
            resolution.matched().unwrap().route.downstream_path_template,
            "/api/goods/remove"
        );

        let mut req = get("/contracts", &headers);
        req.query = Some("p1=v1&p2=v2");
        let resolution = state.resolve(&req);
        let url = resolution.matched().unwrap().downstream_url("/contracts", req.query);
        assert_eq!(url.path_and_query(), "/apipath/contracts?p1=v1&p2=v2");

        // Aggregate constituents are only reachable through the aggregate
        assert!(!state.resolve(&get("/laura", &headers)).is_match());
    }

    #[tokio::test]
    async fn test_concurrent_readers_during_reload() {
        let state = Arc::new(state(ORDERS, 64));
        let invoices = FileConfiguration::from_yaml(INVOICES).unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let state = Arc::clone(&state);
            handles.push(tokio::spawn(async move {
                let headers = HeaderMap::new();
                for _ in 0..100 {
                    // Either table answers exactly one of the two paths
                    let orders = state.resolve(&get("/orders/1", &headers)).is_match();
                    let table = state.table();
                    let invoices = table.resolve(&get("/invoices/1", &headers)).is_match();
                    assert!(orders || invoices);
                }
            }));
        }

        state.reload(&invoices, &Capabilities::default()).unwrap();

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(state.table().len(), 1);
    }
}
