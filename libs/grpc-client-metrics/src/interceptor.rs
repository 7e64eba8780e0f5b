//! Client interceptor entry points
//!
//! Tonic interceptors only see request metadata, so the metrics interceptor
//! wraps the call itself. Each entry point classifies the method, counts the
//! call as started before it is dispatched and hands back the call's result,
//! or an instrumented stream in place of the raw one.

use std::future::Future;
use std::sync::Arc;

use futures::Stream;
use tonic::{Response, Status};

use crate::labels::{CallType, MethodDescriptor};
use crate::metrics::{ClientMetrics, DEFAULT_CLIENT_METRICS};
use crate::reporter::{CallRecord, UnaryReporter};
use crate::stream::{ClientStream, MonitoredClientStream};
use crate::streaming::{MonitoredRequestStream, MonitoredResponseStream};

/// Wraps outgoing gRPC calls with client metrics
///
/// Cheap to clone; every clone shares the same [`ClientMetrics`].
///
/// ```rust,no_run
/// use grpc_client_metrics::{ClientMetricsInterceptor, MethodDescriptor};
/// use tonic::Status;
///
/// const GET_USER: MethodDescriptor = MethodDescriptor::unary("/nova.identity.v1.Identity/GetUser");
///
/// # async fn example() -> Result<(), Status> {
/// let interceptor = ClientMetricsInterceptor::default();
/// interceptor
///     .unary(&GET_USER, || async {
///         // client.get_user(request).await
///         Ok::<_, Status>(())
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ClientMetricsInterceptor {
    metrics: Arc<ClientMetrics>,
}

impl ClientMetricsInterceptor {
    pub fn new(metrics: Arc<ClientMetrics>) -> Self {
        Self { metrics }
    }

    pub fn metrics(&self) -> &Arc<ClientMetrics> {
        &self.metrics
    }

    /// Instrument a call that resolves to one final response
    ///
    /// Used for unary calls and for client-streaming calls (whose request
    /// stream is wrapped separately with [`request_stream`](Self::request_stream)).
    pub async fn unary<T, F, Fut>(&self, method: &MethodDescriptor, call: F) -> Result<T, Status>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Status>>,
    {
        let reporter = UnaryReporter::start(self.metrics.clone(), method.labels());
        reporter.report(call()).await
    }

    /// Instrument a streaming call driven through a [`ClientStream`] handle
    ///
    /// `open` establishes the stream. If that fails, the call is recorded as
    /// handled with the failure's code and the error is returned. Use
    /// [`MonitoredClientStream::split`] to send and receive from separate tasks.
    pub async fn stream<S, F, Fut>(
        &self,
        method: &MethodDescriptor,
        open: F,
    ) -> Result<MonitoredClientStream<S>, Status>
    where
        S: ClientStream,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<S, Status>>,
    {
        let record = CallRecord::start(self.metrics.clone(), method.labels());
        match open().await {
            Ok(inner) => Ok(MonitoredClientStream::new(inner, record)),
            Err(status) => {
                record.finish(status.code());
                Err(status)
            }
        }
    }

    /// Instrument a tonic call whose response is a stream (server or bidi streaming)
    ///
    /// For server-streaming methods the single request went out with the
    /// call, so a successful open also counts one sent message.
    pub async fn response_stream<T, S, F, Fut>(
        &self,
        method: &MethodDescriptor,
        call: F,
    ) -> Result<Response<MonitoredResponseStream<S>>, Status>
    where
        S: Stream<Item = Result<T, Status>>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Response<S>, Status>>,
    {
        let record = CallRecord::start(self.metrics.clone(), method.labels());
        match call().await {
            Ok(response) => {
                if method.call_type() == CallType::ServerStream {
                    self.metrics.inc_msg_sent(record.labels());
                }
                Ok(response.map(|inner| MonitoredResponseStream::new(inner, record)))
            }
            Err(status) => {
                record.finish(status.code());
                Err(status)
            }
        }
    }

    /// Wrap the request stream of a client-streaming or bidi call
    pub fn request_stream<S>(&self, method: &MethodDescriptor, requests: S) -> MonitoredRequestStream<S>
    where
        S: Stream,
    {
        MonitoredRequestStream::new(requests, self.metrics.clone(), method.labels())
    }
}

impl Default for ClientMetricsInterceptor {
    /// Interceptor publishing to the process-wide default metrics
    fn default() -> Self {
        Self::new(DEFAULT_CLIENT_METRICS.clone())
    }
}
