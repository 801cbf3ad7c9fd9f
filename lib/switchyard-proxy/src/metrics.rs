//! Prometheus metrics for routed requests and discovery refreshes

use std::sync::Arc;

use anyhow::Result;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use switchyard_core::{RefreshObserver, RefreshOutcome};
use tracing::debug;

use crate::middleware::{Middleware, MiddlewareContext};

/// Gateway metrics, registered on a private registry
#[derive(Clone)]
pub struct MetricsCollector {
    /// Routed requests by route and target type
    pub requests_total: CounterVec,
    /// Requests answered with a gateway error, by route and status
    pub upstream_errors_total: CounterVec,
    pub request_duration_seconds: HistogramVec,
    /// Discovery cache refreshes by service and outcome
    pub discovery_refresh_total: CounterVec,
    pub registry: Arc<Registry>,
}

impl MetricsCollector {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let requests_total = CounterVec::new(
            Opts::new("gateway_requests_total", "Total routed requests"),
            &["route", "target_type"],
        )?;

        let upstream_errors_total = CounterVec::new(
            Opts::new(
                "gateway_upstream_errors_total",
                "Routed requests that ended in a gateway error",
            ),
            &["route", "status"],
        )?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "gateway_request_duration_seconds",
                "Time until the response head was ready, in seconds",
            ),
            &["route"],
        )?;

        let discovery_refresh_total = CounterVec::new(
            Opts::new("discovery_refresh_total", "Discovery cache refreshes"),
            &["service", "outcome"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(upstream_errors_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(discovery_refresh_total.clone()))?;

        Ok(Self {
            requests_total,
            upstream_errors_total,
            request_duration_seconds,
            discovery_refresh_total,
            registry,
        })
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn record_refresh(&self, service: &str, outcome: RefreshOutcome) {
        self.discovery_refresh_total
            .with_label_values(&[service, outcome.as_str()])
            .inc();
    }

    /// Observer to hand to discovery caches
    pub fn refresh_observer(&self) -> RefreshObserver {
        let collector = self.clone();
        Arc::new(move |service: &str, outcome: RefreshOutcome| {
            collector.record_refresh(service, outcome)
        })
    }
}

/// Records request counts, latency and errors per route
pub struct MetricsMiddleware {
    pub collector: MetricsCollector,
}

impl MetricsMiddleware {
    pub fn new(collector: MetricsCollector) -> Self {
        Self { collector }
    }

    fn observe_latency(&self, context: &MiddlewareContext) {
        self.collector
            .request_duration_seconds
            .with_label_values(&[&context.route])
            .observe(context.elapsed().as_secs_f64());
    }
}

#[async_trait::async_trait]
impl Middleware for MetricsMiddleware {
    fn name(&self) -> &'static str {
        "MetricsMiddleware"
    }

    async fn on_request(&self, context: &MiddlewareContext) -> Result<()> {
        let target_type = context.target_type.to_string();
        self.collector
            .requests_total
            .with_label_values(&[&context.route, &target_type])
            .inc();
        Ok(())
    }

    async fn on_response(&self, context: &MiddlewareContext, _status: u16) -> Result<()> {
        self.observe_latency(context);
        Ok(())
    }

    async fn on_error(&self, context: &MiddlewareContext, status: u16, error: &str) -> Result<()> {
        debug!(route = %context.route, status, error, "Recording route error");
        self.collector
            .upstream_errors_total
            .with_label_values(&[&context.route, &status.to_string()])
            .inc();
        self.observe_latency(context);
        Ok(())
    }
}
