use anyhow::Result;
use lazy_static::lazy_static;
use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter, register_int_counter_vec, GaugeVec, HistogramVec,
    IntCounter, IntCounterVec,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

lazy_static! {
    pub static ref LOOKUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "dnslist_lookups_total",
        "Counter of DNS list lookups per zone and outcome.",
        &["zone", "outcome"]
    ).unwrap();

    pub static ref LOOKUP_DURATION: HistogramVec = register_histogram_vec!(
        "dnslist_lookup_duration_seconds",
        "Histogram of the time (in seconds) each DNS list lookup took.",
        &["zone"],
        vec![0.001, 0.002, 0.004, 0.008, 0.016, 0.032, 0.064, 0.128, 0.256, 0.512, 1.024, 2.048, 4.096, 8.192, 16.384, 32.768]
    ).unwrap();

    pub static ref ZONE_ACTIVE: GaugeVec = register_gauge_vec!(
        "dnslist_zone_active",
        "Whether a zone is currently trusted (1) or disabled (0).",
        &["zone"]
    ).unwrap();

    pub static ref DECISIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "dnslist_decisions_total",
        "Counter of final decisions per code.",
        &["code"]
    ).unwrap();

    pub static ref RELOAD_FAILED_TOTAL: IntCounter = register_int_counter!(
        "dnslist_reload_failed_total",
        "Counter of the number of failed config reload attempts."
    ).unwrap();

    pub static ref RELOAD_VERSION_INFO: GaugeVec = register_gauge_vec!(
        "dnslist_reload_version_info",
        "A metric with a constant '1' value labeled by hash, and value which type of hash generated.",
        &["hash", "value"]
    ).unwrap();

    pub static ref BUILD_INFO: GaugeVec = register_gauge_vec!(
        "dnslist_build_info",
        "A metric with a constant '1' value labeled by version.",
        &["version"]
    ).unwrap();
}

/// Append-only sink for per-lookup statistics. Implementations must never
/// block or fail the caller.
pub trait MetricsSink: Send + Sync {
    fn record(&self, zone: &str, outcome: &str, elapsed: Duration);
}

pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn record(&self, _zone: &str, _outcome: &str, _elapsed: Duration) {}
}

pub struct PrometheusSink;

impl MetricsSink for PrometheusSink {
    fn record(&self, zone: &str, outcome: &str, elapsed: Duration) {
        LOOKUPS_TOTAL.with_label_values(&[zone, outcome]).inc();
        LOOKUP_DURATION.with_label_values(&[zone]).observe(elapsed.as_secs_f64());
    }
}

/// Serves the default registry in text format. Dropping the handle stops the listener.
pub struct MetricsListener {
    _handle: tokio::task::JoinHandle<()>,
}

impl MetricsListener {
    pub fn spawn(listen: &str) -> Result<Self> {
        let addr = if listen.starts_with(':') { format!("0.0.0.0{}", listen) } else { listen.to_string() };
        BUILD_INFO.with_label_values(&[env!("CARGO_PKG_VERSION")]).set(1.0);

        let handle = tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(&addr).await {
                Ok(l) => l,
                Err(e) => {
                    tracing::error!("[metrics] Failed to bind {}: {}", addr, e);
                    return;
                }
            };
            tracing::info!("[metrics] Serving Prometheus metrics on {}", addr);
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 8192];
                    let Ok(Ok(n)) = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf)).await else { return };
                    if n == 0 || !buf.starts_with(b"GET ") { return; }

                    let body = render();
                    let header = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    let mut response = header.into_bytes();
                    response.extend_from_slice(&body);
                    let _ = tokio::time::timeout(Duration::from_secs(2), stream.write_all(&response)).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Ok(Self { _handle: handle })
    }
}

impl Drop for MetricsListener {
    fn drop(&mut self) { self._handle.abort(); }
}

pub fn render() -> Vec<u8> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::debug!("[metrics] encode failed: {}", e);
    }
    buffer
}
