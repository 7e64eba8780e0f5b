/// Tower Layer integration for per-method client metrics
///
/// Wraps a typed request/response service (for example a `service_fn` around
/// a generated client method) so that every call goes through the unary
/// reporter with the method's labels.
use crate::labels::{CallLabels, MethodDescriptor};
use crate::metrics::ClientMetrics;
use crate::reporter::UnaryReporter;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tonic::{Request, Response, Status};
use tower::{Layer, Service};

/// Client metrics layer bound to one method
#[derive(Clone)]
pub struct ClientMetricsLayer {
    metrics: Arc<ClientMetrics>,
    labels: CallLabels,
}

impl ClientMetricsLayer {
    pub fn new(metrics: Arc<ClientMetrics>, method: &MethodDescriptor) -> Self {
        Self {
            metrics,
            labels: method.labels(),
        }
    }
}

impl<S> Layer<S> for ClientMetricsLayer {
    type Service = ClientMetricsService<S>;

    fn layer(&self, service: S) -> Self::Service {
        ClientMetricsService {
            inner: service,
            metrics: self.metrics.clone(),
            labels: self.labels.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ClientMetricsService<S> {
    inner: S,
    metrics: Arc<ClientMetrics>,
    labels: CallLabels,
}

impl<S, Req, Resp> Service<Request<Req>> for ClientMetricsService<S>
where
    S: Service<Request<Req>, Response = Response<Resp>, Error = Status>,
    S::Future: Send + 'static,
    Resp: Send + 'static,
{
    type Response = Response<Resp>;
    type Error = Status;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Req>) -> Self::Future {
        // started is counted before the inner service sees the request
        let reporter = UnaryReporter::start(self.metrics.clone(), self.labels.clone());
        let fut = self.inner.call(req);
        Box::pin(reporter.report(fut))
    }
}
