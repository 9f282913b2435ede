use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::{Duration, Instant};

/// Initialize metrics with descriptions
pub fn init_metrics() {
    describe_counter!(
        "route_resolutions_total",
        "Total number of route resolutions by outcome"
    );
    describe_histogram!(
        "route_resolution_duration_seconds",
        "Time spent resolving a request to a route"
    );
    describe_counter!(
        "route_resolution_cache_hits_total",
        "Resolutions answered from the resolution cache"
    );
    describe_counter!(
        "route_table_reloads_total",
        "Route table reloads by result"
    );
    describe_gauge!("route_table_routes", "Number of resolution candidates in the active table");
}

/// Start Prometheus metrics server on given address
pub fn start_metrics_server(addr: &str) -> anyhow::Result<()> {
    let addr: std::net::SocketAddr = addr.parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    init_metrics();

    Ok(())
}

/// Get a Prometheus handle for manual scraping
pub fn get_prometheus_handle() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    init_metrics();
    Ok(handle)
}

pub struct Metrics;

impl Metrics {
    /// Record one resolution; `outcome` is `matched` or `not_found`
    #[inline]
    pub fn record_resolution(outcome: &'static str, duration: Duration) {
        let labels = [("outcome", outcome)];

        counter!("route_resolutions_total", &labels).increment(1);
        histogram!("route_resolution_duration_seconds", &labels).record(duration.as_secs_f64());
    }

    #[inline]
    pub fn record_cache_hit() {
        counter!("route_resolution_cache_hits_total").increment(1);
    }

    /// Record a reload attempt; `result` is `success` or `failure`
    #[inline]
    pub fn record_reload(result: &'static str) {
        counter!("route_table_reloads_total", "result" => result).increment(1);
    }

    #[inline]
    pub fn set_table_size(routes: usize) {
        gauge!("route_table_routes").set(routes as f64);
    }
}

/// Timer for resolution duration tracking
pub struct ResolutionTimer {
    start: Instant,
}

impl ResolutionTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn finish(self, outcome: &'static str) {
        Metrics::record_resolution(outcome, self.start.elapsed());
    }
}

impl Default for ResolutionTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_handle_renders_recorded_metrics() {
        let handle = get_prometheus_handle().unwrap();

        Metrics::record_resolution("matched", Duration::from_micros(40));
        Metrics::record_cache_hit();
        Metrics::record_reload("failure");
        Metrics::set_table_size(3);

        let rendered = handle.render();
        assert!(rendered.contains("route_resolutions_total{outcome=\"matched\"}"));
        assert!(rendered.contains("route_resolution_cache_hits_total"));
        assert!(rendered.contains("route_table_reloads_total{result=\"failure\"}"));
        assert!(rendered.contains("route_table_routes"));
    }
}
