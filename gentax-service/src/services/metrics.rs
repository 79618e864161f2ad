//! Prometheus metrics for gentax-service.
//!
//! HTTP request metrics come from `service_core`'s middleware through the
//! `metrics` recorder; LLM and retrieval metrics live in a `prometheus`
//! registry. Both are rendered together on `/metrics`.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();
static LLM_METRICS: OnceLock<Option<LlmMetrics>> = OnceLock::new();

struct LlmMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    tokens_total: IntCounterVec,
    latency_seconds: HistogramVec,
    retrieval_hits: HistogramVec,
}

impl LlmMetrics {
    fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("llm_requests_total", "Total LLM completion requests"),
            &["provider", "model", "outcome"],
        )?;

        let tokens_total = IntCounterVec::new(
            Opts::new("llm_tokens_total", "Total tokens processed"),
            &["model", "type"], // type: input, output
        )?;

        let latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "llm_provider_latency_seconds",
                "LLM provider API latency in seconds",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
            &["provider", "model"],
        )?;

        let retrieval_hits = HistogramVec::new(
            HistogramOpts::new(
                "knowledge_retrieval_hits",
                "Knowledge snippets returned per question",
            )
            .buckets(vec![0.0, 1.0, 2.0, 3.0, 5.0, 10.0]),
            &["outcome"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(tokens_total.clone()))?;
        registry.register(Box::new(latency_seconds.clone()))?;
        registry.register(Box::new(retrieval_hits.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            tokens_total,
            latency_seconds,
            retrieval_hits,
        })
    }
}

/// Install the `metrics` recorder and build the LLM registry.
///
/// Safe to call more than once; only the first call has an effect. A
/// recorder that cannot be installed (another one is already global) is
/// logged and HTTP metrics are then simply not rendered.
pub fn init_metrics() {
    METRICS_HANDLE.get_or_init(|| match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install Prometheus recorder");
            None
        }
    });

    LLM_METRICS.get_or_init(|| match LlmMetrics::new() {
        Ok(metrics) => Some(metrics),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to register LLM metrics");
            None
        }
    });
}

fn llm() -> Option<&'static LlmMetrics> {
    LLM_METRICS.get().and_then(Option::as_ref)
}

/// Render every metric in the Prometheus text format.
pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .and_then(Option::as_ref)
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string());

    if let Some(metrics) = llm() {
        let encoder = TextEncoder::new();
        let metric_families = metrics.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_ok() {
            output.push_str(&String::from_utf8_lossy(&buffer));
        }
    }

    output
}

/// Record the outcome of one provider call.
pub fn record_completion(provider: &str, model: &str, outcome: &str, latency_secs: f64) {
    if let Some(metrics) = llm() {
        metrics
            .requests_total
            .with_label_values(&[provider, model, outcome])
            .inc();
        metrics
            .latency_seconds
            .with_label_values(&[provider, model])
            .observe(latency_secs);
    }
}

/// Record token usage reported by the provider.
pub fn record_tokens(model: &str, input_tokens: u32, output_tokens: u32) {
    if let Some(metrics) = llm() {
        metrics
            .tokens_total
            .with_label_values(&[model, "input"])
            .inc_by(u64::from(input_tokens));
        metrics
            .tokens_total
            .with_label_values(&[model, "output"])
            .inc_by(u64::from(output_tokens));
    }
}

/// Record how many knowledge snippets a question retrieved.
pub fn record_retrieval(outcome: &str, hits: usize) {
    if let Some(metrics) = llm() {
        metrics
            .retrieval_hits
            .with_label_values(&[outcome])
            .observe(hits as f64);
    }
}
