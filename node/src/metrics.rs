//! # Prometheus Metrics
//!
//! Exposes operational metrics for the marketplace node. Scraped by
//! Prometheus at the `/metrics` HTTP endpoint on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so they
//! do not collide with any default global registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the node.
///
/// Clone-friendly (prometheus handles are `Arc`s internally) so it can be
/// shared across request handlers.
#[derive(Clone)]
pub struct NodeMetrics {
    /// Prometheus registry that owns all metrics below.
    registry: Registry,
    /// Products successfully listed.
    pub products_created_total: IntCounter,
    /// Products successfully sold.
    pub purchases_total: IntCounter,
    /// Rejected create/purchase calls, labelled by error kind.
    pub rejected_operations_total: IntCounterVec,
    /// Current value of the registry's product counter.
    pub product_count: IntGauge,
    /// Time spent inside a marketplace transition, lock wait included.
    pub operation_latency_seconds: HistogramVec,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("agora".into()), None)
            .expect("failed to create prometheus registry");

        let products_created_total =
            IntCounter::new("products_created_total", "Total number of products listed")
                .expect("metric creation");
        registry
            .register(Box::new(products_created_total.clone()))
            .expect("metric registration");

        let purchases_total =
            IntCounter::new("purchases_total", "Total number of completed purchases")
                .expect("metric creation");
        registry
            .register(Box::new(purchases_total.clone()))
            .expect("metric registration");

        let rejected_operations_total = IntCounterVec::new(
            Opts::new(
                "rejected_operations_total",
                "Total number of rejected marketplace operations",
            ),
            &["reason"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(rejected_operations_total.clone()))
            .expect("metric registration");

        let product_count = IntGauge::new("product_count", "Number of products ever listed")
            .expect("metric creation");
        registry
            .register(Box::new(product_count.clone()))
            .expect("metric registration");

        let operation_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "operation_latency_seconds",
                "Marketplace transition latency in seconds",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
            &["operation"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(operation_latency_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            products_created_total,
            purchases_total,
            rejected_operations_total,
            product_count,
            operation_latency_seconds,
        }
    }

    /// Counts a rejected operation under its error kind.
    pub fn record_rejection(&self, reason: &str) {
        self.rejected_operations_total
            .with_label_values(&[reason])
            .inc();
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
///
/// Returns HTTP 500 if encoding fails.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
