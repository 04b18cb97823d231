use axum::{
    extract::Request,
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),

    #[error("failed to encode metrics: {0}")]
    EncodingFailed(String),
}

pub type MetricsResult<T> = Result<T, MetricsError>;

/// Service counters, registered once with a dedicated registry
pub struct ServiceMetrics {
    registry: Registry,
    requests_total: IntCounter,
    server_errors_total: IntCounter,
    gate_denied_total: IntCounter,
    gate_unauthenticated_total: IntCounter,
    merged_views_total: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> MetricsResult<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl ServiceMetrics {
    pub fn new() -> MetricsResult<Self> {
        let registry = Registry::new();
        Ok(Self {
            requests_total: counter(&registry, "timeboard_http_requests_total", "HTTP requests received")?,
            server_errors_total: counter(
                &registry,
                "timeboard_http_server_errors_total",
                "HTTP responses with a 5xx status",
            )?,
            gate_denied_total: counter(
                &registry,
                "timeboard_gate_denied_total",
                "Requests rejected for a missing permission",
            )?,
            gate_unauthenticated_total: counter(
                &registry,
                "timeboard_gate_unauthenticated_total",
                "Requests rejected without a valid session",
            )?,
            merged_views_total: counter(
                &registry,
                "timeboard_merged_views_total",
                "Merged entity views computed",
            )?,
            registry,
        })
    }

    /// Prometheus text exposition of every registered counter
    pub fn encode_text(&self) -> MetricsResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingFailed(e.to_string()))
    }
}

static METRICS: OnceLock<Option<ServiceMetrics>> = OnceLock::new();

/// Process-wide counters; `None` only if registration failed at first use
fn metrics() -> Option<&'static ServiceMetrics> {
    METRICS
        .get_or_init(|| match ServiceMetrics::new() {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                log::error!("Metrics disabled: {}", e);
                None
            }
        })
        .as_ref()
}

pub fn record_denied() {
    if let Some(m) = metrics() {
        m.gate_denied_total.inc();
    }
}

pub fn record_unauthenticated() {
    if let Some(m) = metrics() {
        m.gate_unauthenticated_total.inc();
    }
}

pub fn record_merged(count: usize) {
    if let Some(m) = metrics() {
        m.merged_views_total.inc_by(count as u64);
    }
}

/// Counts every request and every 5xx response
pub async fn track_requests(request: Request, next: Next) -> Response {
    let metrics = metrics();
    if let Some(m) = metrics {
        m.requests_total.inc();
    }
    let response = next.run(request).await;
    if let Some(m) = metrics.filter(|_| response.status().is_server_error()) {
        m.server_errors_total.inc();
    }
    response
}

pub fn render() -> MetricsResult<String> {
    match metrics() {
        Some(m) => m.encode_text(),
        None => Err(MetricsError::EncodingFailed("metrics registry unavailable".to_string())),
    }
}

/// GET /metrics
pub async fn metrics_handler() -> Response {
    match render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            log::error!("{}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_lists_every_counter() {
        record_denied();
        let body = render().unwrap();

        assert!(body.contains("# TYPE timeboard_gate_denied_total counter"));
        assert!(body.contains("timeboard_http_requests_total "));
        assert!(body.contains("timeboard_merged_views_total "));
        assert_eq!(body.lines().filter(|l| l.starts_with("# HELP")).count(), 5);
    }

    #[test]
    fn separate_registries_do_not_share_counts() {
        let metrics = ServiceMetrics::new().unwrap();
        metrics.merged_views_total.inc_by(3);

        let body = metrics.encode_text().unwrap();
        assert!(body.contains("timeboard_merged_views_total 3"));
        assert!(body.contains("timeboard_gate_denied_total 0"));
    }
}
