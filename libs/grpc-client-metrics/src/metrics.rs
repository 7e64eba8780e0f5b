//! Prometheus metrics definitions for gRPC clients
//!
//! Counters are created and registered up front. Histograms are opt-in: each
//! one is built and registered by its `enable_*` call, exactly once, and every
//! observe helper is a no-op until then.

use std::collections::HashMap;
use std::time::Instant;

use lazy_static::lazy_static;
use once_cell::sync::OnceCell;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::sync::Arc;
use tonic::Code;
use tracing::info;

use crate::config::ClientMetricsConfig;
use crate::error::{MetricsError, Result};
use crate::labels::{code_label, CallLabels};

/// Label names shared by all per-call metrics
pub const CALL_LABEL_NAMES: [&str; 3] = ["grpc_type", "grpc_service", "grpc_method"];

/// Label names of `grpc_client_handled_total`
pub const HANDLED_LABEL_NAMES: [&str; 4] = ["grpc_type", "grpc_service", "grpc_method", "grpc_code"];

/// Default latency ladder in seconds: 0.5ms to 30s
pub const DEFAULT_HANDLING_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

lazy_static! {
    /// Process-wide client metrics
    ///
    /// Registered into a registry of their own so they never collide with
    /// metrics the application puts in `prometheus::default_registry()`.
    /// Expose them by gathering `DEFAULT_CLIENT_METRICS.registry()`.
    pub static ref DEFAULT_CLIENT_METRICS: Arc<ClientMetrics> = Arc::new(
        ClientMetrics::new(&Registry::new())
            .expect("fresh registry rejected gRPC client metrics")
    );
}

/// Options applied to every metric this adapter creates
#[derive(Debug, Clone, Default)]
pub struct MetricOptions {
    pub namespace: Option<String>,
    pub const_labels: HashMap<String, String>,
}

impl MetricOptions {
    fn counter_opts(&self, name: &str, help: &str) -> Opts {
        let mut opts = Opts::new(name, help).const_labels(self.const_labels.clone());
        if let Some(namespace) = &self.namespace {
            opts = opts.namespace(namespace.clone());
        }
        opts
    }

    fn histogram_opts(&self, name: &str, help: &str, buckets: Vec<f64>) -> HistogramOpts {
        let mut opts = HistogramOpts::new(name, help)
            .const_labels(self.const_labels.clone())
            .buckets(buckets);
        if let Some(namespace) = &self.namespace {
            opts = opts.namespace(namespace.clone());
        }
        opts
    }
}

/// gRPC client metrics
///
/// Build one instance at startup, wrap it in an `Arc` and hand clones to
/// every interceptor. All recording methods take `&self` and only touch
/// Prometheus atomics, so any number of calls can record concurrently.
pub struct ClientMetrics {
    /// Calls started, labels: grpc_type, grpc_service, grpc_method
    started: IntCounterVec,

    /// Calls completed, labels: grpc_type, grpc_service, grpc_method, grpc_code
    handled: IntCounterVec,

    /// Stream messages received, labels: grpc_type, grpc_service, grpc_method
    msg_received: IntCounterVec,

    /// Stream messages sent, labels: grpc_type, grpc_service, grpc_method
    msg_sent: IntCounterVec,

    handling_seconds: OnceCell<HistogramVec>,
    msg_recv_seconds: OnceCell<HistogramVec>,
    msg_send_seconds: OnceCell<HistogramVec>,

    options: MetricOptions,
    registry: Registry,
}

impl ClientMetrics {
    /// Create client metrics and register the counters with `registry`
    pub fn new(registry: &Registry) -> Result<Self> {
        Self::with_options(registry, MetricOptions::default())
    }

    pub fn with_options(registry: &Registry, options: MetricOptions) -> Result<Self> {
        let started = IntCounterVec::new(
            options.counter_opts(
                "grpc_client_started_total",
                "Total number of RPCs started on the client.",
            ),
            &CALL_LABEL_NAMES,
        )?;

        let handled = IntCounterVec::new(
            options.counter_opts(
                "grpc_client_handled_total",
                "Total number of RPCs completed by the client, regardless of success or failure.",
            ),
            &HANDLED_LABEL_NAMES,
        )?;

        let msg_received = IntCounterVec::new(
            options.counter_opts(
                "grpc_client_msg_received_total",
                "Total number of RPC stream messages received by the client.",
            ),
            &CALL_LABEL_NAMES,
        )?;

        let msg_sent = IntCounterVec::new(
            options.counter_opts(
                "grpc_client_msg_sent_total",
                "Total number of gRPC stream messages sent by the client.",
            ),
            &CALL_LABEL_NAMES,
        )?;

        registry.register(Box::new(started.clone()))?;
        registry.register(Box::new(handled.clone()))?;
        registry.register(Box::new(msg_received.clone()))?;
        registry.register(Box::new(msg_sent.clone()))?;

        Ok(Self {
            started,
            handled,
            msg_received,
            msg_sent,
            handling_seconds: OnceCell::new(),
            msg_recv_seconds: OnceCell::new(),
            msg_send_seconds: OnceCell::new(),
            options,
            registry: registry.clone(),
        })
    }

    /// Create client metrics and enable every histogram the config asks for
    pub fn from_config(registry: &Registry, config: &ClientMetricsConfig) -> Result<Self> {
        let options = MetricOptions {
            namespace: config.namespace.clone(),
            const_labels: config.const_labels.clone(),
        };
        let metrics = Self::with_options(registry, options)?;

        if config.handling_time_histogram {
            metrics.enable_handling_time_histogram(config.handling_time_buckets.clone())?;
        }
        if config.stream_receive_time_histogram {
            metrics.enable_stream_receive_time_histogram(None)?;
        }
        if config.stream_send_time_histogram {
            metrics.enable_stream_send_time_histogram(None)?;
        }

        Ok(metrics)
    }

    /// Enable `grpc_client_handling_seconds`
    ///
    /// Idempotent: the first successful call fixes the buckets, later calls
    /// return `Ok(())` and change nothing.
    pub fn enable_handling_time_histogram(&self, buckets: Option<Vec<f64>>) -> Result<()> {
        self.enable_histogram(
            &self.handling_seconds,
            "grpc_client_handling_seconds",
            "Histogram of response latency (seconds) of the gRPC until it is finished by the application.",
            buckets,
        )
    }

    /// Enable `grpc_client_msg_recv_handling_seconds`
    pub fn enable_stream_receive_time_histogram(&self, buckets: Option<Vec<f64>>) -> Result<()> {
        self.enable_histogram(
            &self.msg_recv_seconds,
            "grpc_client_msg_recv_handling_seconds",
            "Histogram of response latency (seconds) of the gRPC single message receive.",
            buckets,
        )
    }

    /// Enable `grpc_client_msg_send_handling_seconds`
    pub fn enable_stream_send_time_histogram(&self, buckets: Option<Vec<f64>>) -> Result<()> {
        self.enable_histogram(
            &self.msg_send_seconds,
            "grpc_client_msg_send_handling_seconds",
            "Histogram of response latency (seconds) of the gRPC single message send.",
            buckets,
        )
    }

    fn enable_histogram(
        &self,
        cell: &OnceCell<HistogramVec>,
        name: &str,
        help: &str,
        buckets: Option<Vec<f64>>,
    ) -> Result<()> {
        cell.get_or_try_init(|| {
            let buckets = match buckets {
                Some(buckets) => validate_buckets(buckets)?,
                None => DEFAULT_HANDLING_BUCKETS.to_vec(),
            };
            let histogram = HistogramVec::new(
                self.options.histogram_opts(name, help, buckets),
                &CALL_LABEL_NAMES,
            )?;
            self.registry.register(Box::new(histogram.clone()))?;
            info!(metric = name, "gRPC client histogram enabled");
            Ok::<_, MetricsError>(histogram)
        })?;
        Ok(())
    }

    /// Registry the metrics are published to
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn handling_time_enabled(&self) -> bool {
        self.handling_seconds.get().is_some()
    }

    pub fn stream_receive_time_enabled(&self) -> bool {
        self.msg_recv_seconds.get().is_some()
    }

    pub fn stream_send_time_enabled(&self) -> bool {
        self.msg_send_seconds.get().is_some()
    }

    pub fn inc_started(&self, labels: &CallLabels) {
        self.started.with_label_values(&labels.values()).inc();
    }

    pub fn inc_handled(&self, labels: &CallLabels, code: Code) {
        let [call_type, service, method] = labels.values();
        self.handled
            .with_label_values(&[call_type, service, method, code_label(code)])
            .inc();
    }

    /// No-op unless the handling-time histogram is enabled
    pub fn observe_handled_duration(&self, labels: &CallLabels, seconds: f64) {
        if let Some(histogram) = self.handling_seconds.get() {
            histogram.with_label_values(&labels.values()).observe(seconds);
        }
    }

    pub fn inc_msg_sent(&self, labels: &CallLabels) {
        self.msg_sent.with_label_values(&labels.values()).inc();
    }

    pub fn inc_msg_received(&self, labels: &CallLabels) {
        self.msg_received.with_label_values(&labels.values()).inc();
    }

    /// Start time for a receive, `None` when receive timing is disabled
    pub(crate) fn recv_timer(&self) -> Option<Instant> {
        self.stream_receive_time_enabled().then(Instant::now)
    }

    /// Start time for a send, `None` when send timing is disabled
    pub(crate) fn send_timer(&self) -> Option<Instant> {
        self.stream_send_time_enabled().then(Instant::now)
    }

    pub(crate) fn observe_recv_duration(&self, labels: &CallLabels, started_at: Option<Instant>) {
        if let (Some(histogram), Some(started_at)) = (self.msg_recv_seconds.get(), started_at) {
            histogram
                .with_label_values(&labels.values())
                .observe(started_at.elapsed().as_secs_f64());
        }
    }

    pub(crate) fn observe_send_duration(&self, labels: &CallLabels, started_at: Option<Instant>) {
        if let (Some(histogram), Some(started_at)) = (self.msg_send_seconds.get(), started_at) {
            histogram
                .with_label_values(&labels.values())
                .observe(started_at.elapsed().as_secs_f64());
        }
    }

    // Read-back helpers, mostly for tests and debug endpoints.

    pub fn started_total(&self, labels: &CallLabels) -> u64 {
        self.started.with_label_values(&labels.values()).get()
    }

    pub fn handled_total(&self, labels: &CallLabels, code: Code) -> u64 {
        let [call_type, service, method] = labels.values();
        self.handled
            .with_label_values(&[call_type, service, method, code_label(code)])
            .get()
    }

    pub fn msg_sent_total(&self, labels: &CallLabels) -> u64 {
        self.msg_sent.with_label_values(&labels.values()).get()
    }

    pub fn msg_received_total(&self, labels: &CallLabels) -> u64 {
        self.msg_received.with_label_values(&labels.values()).get()
    }

    /// Number of handling-time observations, `None` when the histogram is disabled
    pub fn handling_seconds_count(&self, labels: &CallLabels) -> Option<u64> {
        self.handling_seconds
            .get()
            .map(|h| h.with_label_values(&labels.values()).get_sample_count())
    }

    pub fn stream_receive_seconds_count(&self, labels: &CallLabels) -> Option<u64> {
        self.msg_recv_seconds
            .get()
            .map(|h| h.with_label_values(&labels.values()).get_sample_count())
    }

    pub fn stream_send_seconds_count(&self, labels: &CallLabels) -> Option<u64> {
        self.msg_send_seconds
            .get()
            .map(|h| h.with_label_values(&labels.values()).get_sample_count())
    }
}

fn validate_buckets(buckets: Vec<f64>) -> Result<Vec<f64>> {
    if buckets.is_empty() {
        return Err(MetricsError::invalid_buckets("bucket list must not be empty"));
    }
    if buckets.iter().any(|b| !b.is_finite()) {
        return Err(MetricsError::invalid_buckets("bucket bounds must be finite"));
    }
    if buckets.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(MetricsError::invalid_buckets(
            "bucket bounds must be strictly increasing",
        ));
    }
    Ok(buckets)
}
