//! `futures::Stream` adapters for tonic streaming calls
//!
//! Tonic hands out responses as a `Stream` (`tonic::Streaming<T>`) and takes
//! client-streamed requests as a `Stream`, so these wrappers observe messages
//! as they are polled instead of through a send/receive handle.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use futures::Stream;
use pin_project::pin_project;
use tonic::{Code, Status};

use crate::labels::CallLabels;
use crate::metrics::ClientMetrics;
use crate::reporter::CallRecord;

/// Response stream of a server-streaming or bidi call
///
/// Counts every `Ok` item as a received message. The first `Err` item or the
/// end of the stream records the call as handled; dropping the stream before
/// either records `Canceled`.
#[pin_project]
pub struct MonitoredResponseStream<S> {
    #[pin]
    inner: S,
    record: CallRecord,
}

impl<S> MonitoredResponseStream<S> {
    pub(crate) fn new(inner: S, record: CallRecord) -> Self {
        Self { inner, record }
    }

    pub fn labels(&self) -> &CallLabels {
        self.record.labels()
    }

    pub fn is_finished(&self) -> bool {
        self.record.is_finished()
    }
}

impl<S, T> Stream for MonitoredResponseStream<S>
where
    S: Stream<Item = Result<T, Status>>,
{
    type Item = Result<T, Status>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let item = ready!(this.inner.poll_next(cx));
        match &item {
            Some(Ok(_)) => this.record.metrics().inc_msg_received(this.record.labels()),
            Some(Err(status)) => {
                this.record.finish(status.code());
            }
            None => {
                this.record.finish(Code::Ok);
            }
        }
        Poll::Ready(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Request stream of a client-streaming or bidi call
///
/// Counts each item as a sent message when the transport pulls it.
#[pin_project]
pub struct MonitoredRequestStream<S> {
    #[pin]
    inner: S,
    metrics: Arc<ClientMetrics>,
    labels: CallLabels,
}

impl<S> MonitoredRequestStream<S> {
    pub(crate) fn new(inner: S, metrics: Arc<ClientMetrics>, labels: CallLabels) -> Self {
        Self {
            inner,
            metrics,
            labels,
        }
    }
}

impl<S> Stream for MonitoredRequestStream<S>
where
    S: Stream,
{
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let item = ready!(this.inner.poll_next(cx));
        if item.is_some() {
            this.metrics.inc_msg_sent(this.labels);
        }
        Poll::Ready(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::MethodDescriptor;
    use futures::{stream, StreamExt};
    use prometheus::Registry;

    const LIST: MethodDescriptor = MethodDescriptor::server_streaming("/nova.feed.v1.Feed/List");

    fn metrics() -> Arc<ClientMetrics> {
        Arc::new(ClientMetrics::new(&Registry::new()).unwrap())
    }

    #[tokio::test]
    async fn test_response_stream_counts_until_end() {
        let metrics = metrics();
        let labels = LIST.labels();
        let inner = stream::iter(vec![Ok::<_, Status>(1), Ok(2), Ok(3)]);
        let record = CallRecord::start(metrics.clone(), labels.clone());
        let monitored = MonitoredResponseStream::new(inner, record);

        let items: Vec<_> = monitored.collect().await;

        assert_eq!(items.len(), 3);
        assert_eq!(metrics.msg_received_total(&labels), 3);
        assert_eq!(metrics.handled_total(&labels, Code::Ok), 1);
    }

    #[tokio::test]
    async fn test_response_stream_error_finishes_with_code() {
        let metrics = metrics();
        let labels = LIST.labels();
        let inner = stream::iter(vec![
            Ok::<_, Status>(1),
            Err(Status::resource_exhausted("quota")),
        ]);
        let record = CallRecord::start(metrics.clone(), labels.clone());
        let mut monitored = MonitoredResponseStream::new(inner, record);

        assert!(monitored.next().await.unwrap().is_ok());
        let err = monitored.next().await.unwrap().unwrap_err();
        assert_eq!(err.code(), Code::ResourceExhausted);
        assert!(monitored.is_finished());

        // end of stream after the error is not a second completion
        assert!(monitored.next().await.is_none());
        drop(monitored);

        assert_eq!(metrics.msg_received_total(&labels), 1);
        assert_eq!(metrics.handled_total(&labels, Code::ResourceExhausted), 1);
        assert_eq!(metrics.handled_total(&labels, Code::Ok), 0);
    }

    #[tokio::test]
    async fn test_request_stream_counts_pulled_items() {
        let metrics = metrics();
        let labels = MethodDescriptor::client_streaming("/media.Upload/Put").labels();
        let monitored =
            MonitoredRequestStream::new(stream::iter(vec!["a", "b"]), metrics.clone(), labels.clone());

        let sent: Vec<_> = monitored.collect().await;

        assert_eq!(sent, vec!["a", "b"]);
        assert_eq!(metrics.msg_sent_total(&labels), 2);
        assert_eq!(metrics.started_total(&labels), 0);
    }
}
