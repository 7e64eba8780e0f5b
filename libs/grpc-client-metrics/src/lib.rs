//! gRPC Client Metrics - Prometheus instrumentation for outgoing calls
//!
//! This library records standard client-side metrics for every call made
//! through a tonic client, without instrumenting call sites one by one:
//! - `grpc_client_started_total`: calls started
//! - `grpc_client_handled_total`: calls completed, by gRPC code
//! - `grpc_client_msg_received_total` / `grpc_client_msg_sent_total`: stream messages
//! - `grpc_client_handling_seconds`: call latency (opt-in)
//! - `grpc_client_msg_recv_handling_seconds` / `grpc_client_msg_send_handling_seconds`:
//!   per-message latency on streams (opt-in)
//!
//! All metrics are labeled by `grpc_type`, `grpc_service` and `grpc_method`.
//!
//! Usage:
//! ```ignore
//! use grpc_client_metrics::{ClientMetrics, ClientMetricsInterceptor, MethodDescriptor};
//! use std::sync::Arc;
//!
//! const LIST_FEED: MethodDescriptor =
//!     MethodDescriptor::server_streaming("/nova.feed.v1.FeedService/ListFeed");
//!
//! let registry = prometheus::Registry::new();
//! let metrics = ClientMetrics::new(&registry)?;
//! metrics.enable_handling_time_histogram(None)?;
//! let interceptor = ClientMetricsInterceptor::new(Arc::new(metrics));
//!
//! let mut feed = interceptor
//!     .response_stream(&LIST_FEED, || client.list_feed(request))
//!     .await?
//!     .into_inner();
//! while let Some(item) = feed.next().await {
//!     // ...
//! }
//! ```
//!
//! `ClientMetricsInterceptor::default()` publishes to [`DEFAULT_CLIENT_METRICS`],
//! which lives in its own registry (`DEFAULT_CLIENT_METRICS.registry()`), so
//! it can sit next to metrics registered in `prometheus::default_registry()`.

mod config;
mod error;
mod interceptor;
mod labels;
mod layer;
mod metrics;
mod reporter;
mod stream;
mod streaming;

pub use config::{ClientMetricsConfig, ENV_PREFIX};
pub use error::{MetricsError, Result};
pub use interceptor::ClientMetricsInterceptor;
pub use labels::{code_label, split_method_name, CallLabels, CallType, MethodDescriptor};
pub use layer::{ClientMetricsLayer, ClientMetricsService};
pub use metrics::{
    ClientMetrics, MetricOptions, CALL_LABEL_NAMES, DEFAULT_CLIENT_METRICS,
    DEFAULT_HANDLING_BUCKETS, HANDLED_LABEL_NAMES,
};
pub use reporter::{report_unary, UnaryReporter};
pub use stream::{
    ChannelClientStream, ChannelReceiver, ChannelSender, ClientStream, ClientStreamReceiver,
    ClientStreamSender, MonitoredClientStream, MonitoredReceiver, MonitoredSender,
    SplitClientStream,
};
pub use streaming::{MonitoredRequestStream, MonitoredResponseStream};

// Re-export tonic Status for convenience
pub use tonic::Status;

/// Enable the handling-time histogram on the process-wide default metrics
///
/// Call this once during client initialization, before issuing calls.
pub fn enable_default_handling_time_histogram(buckets: Option<Vec<f64>>) -> Result<()> {
    DEFAULT_CLIENT_METRICS.enable_handling_time_histogram(buckets)
}
