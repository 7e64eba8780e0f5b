//! Streaming call handles
//!
//! [`ClientStream`] is the send/receive view of an open streaming call.
//! [`MonitoredClientStream`] wraps any handle and publishes message counts
//! plus one handled result per stream, whichever path surfaces the terminal
//! status first: a failed send, end-of-stream or a failed receive, or the
//! handle being dropped early. A handle that implements [`SplitClientStream`]
//! can be split so sending and receiving run on separate tasks while still
//! sharing that single result.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tonic::{Code, Status};

use crate::labels::{CallLabels, CallType};
use crate::reporter::CallRecord;

/// Send/receive interface of an open streaming call
#[async_trait]
pub trait ClientStream: Send {
    type Request: Send;
    type Response: Send;

    /// Send one request message
    async fn send(&mut self, message: Self::Request) -> Result<(), Status>;

    /// Receive the next response; `Ok(None)` marks a clean end of stream
    async fn recv(&mut self) -> Result<Option<Self::Response>, Status>;

    /// Half-close the request side; responses keep flowing
    async fn close_send(&mut self) -> Result<(), Status>;
}

/// Request side of a split [`ClientStream`]
#[async_trait]
pub trait ClientStreamSender: Send {
    type Request: Send;

    async fn send(&mut self, message: Self::Request) -> Result<(), Status>;

    async fn close_send(&mut self) -> Result<(), Status>;
}

/// Response side of a split [`ClientStream`]
#[async_trait]
pub trait ClientStreamReceiver: Send {
    type Response: Send;

    async fn recv(&mut self) -> Result<Option<Self::Response>, Status>;
}

/// A [`ClientStream`] whose two directions can be driven independently
pub trait SplitClientStream: ClientStream {
    type Sender: ClientStreamSender<Request = Self::Request>;
    type Receiver: ClientStreamReceiver<Response = Self::Response>;

    fn split(self) -> (Self::Sender, Self::Receiver);
}

async fn monitored_send<F>(record: &CallRecord, send: F) -> Result<(), Status>
where
    F: Future<Output = Result<(), Status>>,
{
    let metrics = record.metrics();
    let timer = metrics.send_timer();
    let result = send.await;
    metrics.observe_send_duration(record.labels(), timer);

    match &result {
        Ok(()) => metrics.inc_msg_sent(record.labels()),
        Err(status) => {
            record.finish(status.code());
        }
    }
    result
}

async fn monitored_recv<T, F>(record: &CallRecord, recv: F) -> Result<Option<T>, Status>
where
    F: Future<Output = Result<Option<T>, Status>>,
{
    let metrics = record.metrics();
    let timer = metrics.recv_timer();
    let result = recv.await;
    metrics.observe_recv_duration(record.labels(), timer);

    match &result {
        Ok(Some(_)) => {
            metrics.inc_msg_received(record.labels());
            // the single response of a client-streaming call ends it
            if record.labels().call_type == CallType::ClientStream {
                record.finish(Code::Ok);
            }
        }
        Ok(None) => {
            record.finish(Code::Ok);
        }
        Err(status) => {
            record.finish(status.code());
        }
    }
    result
}

async fn monitored_close_send<F>(record: &CallRecord, close: F) -> Result<(), Status>
where
    F: Future<Output = Result<(), Status>>,
{
    let result = close.await;
    if let Err(status) = &result {
        record.finish(status.code());
    }
    result
}

/// A [`ClientStream`] that records metrics for the call it carries
///
/// Returned by the streaming entry point in place of the raw handle.
/// Dropping it before a terminal status records the call as `Canceled`.
pub struct MonitoredClientStream<S> {
    inner: S,
    record: Arc<CallRecord>,
}

impl<S> MonitoredClientStream<S> {
    pub(crate) fn new(inner: S, record: CallRecord) -> Self {
        Self {
            inner,
            record: Arc::new(record),
        }
    }

    pub fn labels(&self) -> &CallLabels {
        self.record.labels()
    }

    /// Whether the terminal status has been recorded
    pub fn is_finished(&self) -> bool {
        self.record.is_finished()
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S> MonitoredClientStream<S>
where
    S: SplitClientStream,
{
    /// Split into a sender and a receiver for use on separate tasks
    ///
    /// Both halves report to the same call. The first terminal status seen
    /// on either side is the one recorded. The call counts as canceled only
    /// if both halves are dropped before that.
    pub fn split(self) -> (MonitoredSender<S::Sender>, MonitoredReceiver<S::Receiver>) {
        let (sender, receiver) = self.inner.split();
        (
            MonitoredSender {
                inner: sender,
                record: self.record.clone(),
            },
            MonitoredReceiver {
                inner: receiver,
                record: self.record,
            },
        )
    }
}

#[async_trait]
impl<S> ClientStream for MonitoredClientStream<S>
where
    S: ClientStream,
{
    type Request = S::Request;
    type Response = S::Response;

    async fn send(&mut self, message: Self::Request) -> Result<(), Status> {
        monitored_send(&self.record, self.inner.send(message)).await
    }

    async fn recv(&mut self) -> Result<Option<Self::Response>, Status> {
        monitored_recv(&self.record, self.inner.recv()).await
    }

    async fn close_send(&mut self) -> Result<(), Status> {
        monitored_close_send(&self.record, self.inner.close_send()).await
    }
}

/// Sending half of a split [`MonitoredClientStream`]
pub struct MonitoredSender<T> {
    inner: T,
    record: Arc<CallRecord>,
}

impl<T> MonitoredSender<T> {
    pub fn labels(&self) -> &CallLabels {
        self.record.labels()
    }

    pub fn is_finished(&self) -> bool {
        self.record.is_finished()
    }
}

#[async_trait]
impl<T> ClientStreamSender for MonitoredSender<T>
where
    T: ClientStreamSender,
{
    type Request = T::Request;

    async fn send(&mut self, message: Self::Request) -> Result<(), Status> {
        monitored_send(&self.record, self.inner.send(message)).await
    }

    async fn close_send(&mut self) -> Result<(), Status> {
        monitored_close_send(&self.record, self.inner.close_send()).await
    }
}

/// Receiving half of a split [`MonitoredClientStream`]
pub struct MonitoredReceiver<R> {
    inner: R,
    record: Arc<CallRecord>,
}

impl<R> MonitoredReceiver<R> {
    pub fn labels(&self) -> &CallLabels {
        self.record.labels()
    }

    pub fn is_finished(&self) -> bool {
        self.record.is_finished()
    }
}

#[async_trait]
impl<R> ClientStreamReceiver for MonitoredReceiver<R>
where
    R: ClientStreamReceiver,
{
    type Response = R::Response;

    async fn recv(&mut self) -> Result<Option<Self::Response>, Status> {
        monitored_recv(&self.record, self.inner.recv()).await
    }
}

/// Request side of a [`ChannelClientStream`]
pub struct ChannelSender<Req> {
    outbound: Option<mpsc::Sender<Req>>,
}

#[async_trait]
impl<Req> ClientStreamSender for ChannelSender<Req>
where
    Req: Send,
{
    type Request = Req;

    async fn send(&mut self, message: Req) -> Result<(), Status> {
        let sender = self
            .outbound
            .as_ref()
            .ok_or_else(|| Status::failed_precondition("send on a closed request stream"))?;
        sender
            .send(message)
            .await
            .map_err(|_| Status::unavailable("request stream closed by transport"))
    }

    async fn close_send(&mut self) -> Result<(), Status> {
        self.outbound.take();
        Ok(())
    }
}

/// Response side of a [`ChannelClientStream`]
pub struct ChannelReceiver<S> {
    inbound: S,
}

#[async_trait]
impl<Resp, S> ClientStreamReceiver for ChannelReceiver<S>
where
    Resp: Send,
    S: Stream<Item = Result<Resp, Status>> + Unpin + Send,
{
    type Response = Resp;

    async fn recv(&mut self) -> Result<Option<Resp>, Status> {
        self.inbound.next().await.transpose()
    }
}

/// [`ClientStream`] over a tonic streaming call
///
/// Requests go into an `mpsc` channel whose receiver is handed to tonic as
/// the request stream (e.g. via `tokio_stream::wrappers::ReceiverStream`);
/// responses come from any `Stream` of results such as `tonic::Streaming<T>`.
pub struct ChannelClientStream<Req, S> {
    sender: ChannelSender<Req>,
    receiver: ChannelReceiver<S>,
}

impl<Req, S> ChannelClientStream<Req, S> {
    pub fn new(outbound: mpsc::Sender<Req>, inbound: S) -> Self {
        Self {
            sender: ChannelSender {
                outbound: Some(outbound),
            },
            receiver: ChannelReceiver { inbound },
        }
    }

    /// Receive-only handle, for server-streaming calls whose request was
    /// sent when the call was opened
    pub fn receive_only(inbound: S) -> Self {
        Self {
            sender: ChannelSender { outbound: None },
            receiver: ChannelReceiver { inbound },
        }
    }
}

#[async_trait]
impl<Req, Resp, S> ClientStream for ChannelClientStream<Req, S>
where
    Req: Send,
    Resp: Send,
    S: Stream<Item = Result<Resp, Status>> + Unpin + Send,
{
    type Request = Req;
    type Response = Resp;

    async fn send(&mut self, message: Req) -> Result<(), Status> {
        self.sender.send(message).await
    }

    async fn recv(&mut self) -> Result<Option<Resp>, Status> {
        self.receiver.recv().await
    }

    async fn close_send(&mut self) -> Result<(), Status> {
        self.sender.close_send().await
    }
}

impl<Req, Resp, S> SplitClientStream for ChannelClientStream<Req, S>
where
    Req: Send,
    Resp: Send,
    S: Stream<Item = Result<Resp, Status>> + Unpin + Send,
{
    type Sender = ChannelSender<Req>;
    type Receiver = ChannelReceiver<S>;

    fn split(self) -> (Self::Sender, Self::Receiver) {
        (self.sender, self.receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::MethodDescriptor;
    use crate::metrics::ClientMetrics;
    use futures::stream;
    use prometheus::Registry;

    const CHAT: MethodDescriptor = MethodDescriptor::bidi_streaming("/nova.chat.v1.Chat/Connect");
    const UPLOAD: MethodDescriptor =
        MethodDescriptor::client_streaming("/nova.media.v1.MediaService/Upload");

    fn monitored<S>(inner: S) -> (Arc<ClientMetrics>, MonitoredClientStream<S>) {
        monitored_as(&CHAT, inner)
    }

    fn monitored_as<S>(
        method: &MethodDescriptor,
        inner: S,
    ) -> (Arc<ClientMetrics>, MonitoredClientStream<S>) {
        let metrics = Arc::new(ClientMetrics::new(&Registry::new()).unwrap());
        let record = CallRecord::start(metrics.clone(), method.labels());
        (metrics, MonitoredClientStream::new(inner, record))
    }

    fn handled_sum(metrics: &ClientMetrics, labels: &CallLabels) -> u64 {
        [
            Code::Ok,
            Code::Cancelled,
            Code::Unavailable,
            Code::Aborted,
            Code::Internal,
        ]
        .into_iter()
        .map(|code| metrics.handled_total(labels, code))
        .sum()
    }

    #[tokio::test]
    async fn test_channel_stream_send_and_receive() {
        let (tx, mut rx) = mpsc::channel::<&str>(4);
        let inbound = stream::iter(vec![Ok::<_, Status>(1u32), Ok(2)]);
        let mut handle = ChannelClientStream::new(tx, inbound);

        handle.send("hello").await.unwrap();
        assert_eq!(rx.recv().await, Some("hello"));

        assert_eq!(handle.recv().await.unwrap(), Some(1));
        assert_eq!(handle.recv().await.unwrap(), Some(2));
        assert_eq!(handle.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_channel_stream_send_after_close_fails() {
        let (tx, _rx) = mpsc::channel::<u8>(1);
        let mut handle = ChannelClientStream::new(tx, stream::empty::<Result<u8, Status>>());

        handle.close_send().await.unwrap();
        let err = handle.send(1).await.unwrap_err();
        assert_eq!(err.code(), Code::FailedPrecondition);
    }

    #[tokio::test]
    async fn test_channel_stream_send_fails_when_receiver_gone() {
        let (tx, rx) = mpsc::channel::<u8>(1);
        drop(rx);
        let mut handle = ChannelClientStream::new(tx, stream::empty::<Result<u8, Status>>());

        let err = handle.send(1).await.unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
    }

    #[tokio::test]
    async fn test_monitored_counts_messages_and_finishes_ok() {
        let (tx, _rx) = mpsc::channel::<u8>(8);
        let inbound = stream::iter(vec![Ok::<_, Status>("a"), Ok("b"), Ok("c")]);
        let (metrics, mut handle) = monitored(ChannelClientStream::new(tx, inbound));
        let labels = CHAT.labels();

        handle.send(1u8).await.unwrap();
        handle.send(2u8).await.unwrap();
        handle.close_send().await.unwrap();
        while handle.recv().await.unwrap().is_some() {}

        assert!(handle.is_finished());
        assert_eq!(metrics.msg_sent_total(&labels), 2);
        assert_eq!(metrics.msg_received_total(&labels), 3);
        assert_eq!(metrics.handled_total(&labels, Code::Ok), 1);
    }

    #[tokio::test]
    async fn test_monitored_send_failure_closes_call() {
        let (tx, rx) = mpsc::channel::<u8>(1);
        drop(rx);
        let (metrics, mut handle) =
            monitored(ChannelClientStream::new(tx, stream::empty::<Result<u8, Status>>()));
        let labels = CHAT.labels();

        let err = handle.send(7u8).await.unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
        assert_eq!(metrics.msg_sent_total(&labels), 0);
        assert_eq!(metrics.handled_total(&labels, Code::Unavailable), 1);

        // later terminal signals do not count again
        assert_eq!(handle.recv().await.unwrap(), None);
        drop(handle);
        assert_eq!(metrics.handled_total(&labels, Code::Ok), 0);
        assert_eq!(metrics.handled_total(&labels, Code::Cancelled), 0);
    }

    #[tokio::test]
    async fn test_monitored_drop_before_completion_records_cancelled() {
        let (tx, _rx) = mpsc::channel::<u8>(1);
        let inbound = stream::iter(vec![Ok::<_, Status>(1u8)]);
        let (metrics, mut handle) = monitored(ChannelClientStream::new(tx, inbound));
        let labels = CHAT.labels();

        assert_eq!(handle.recv().await.unwrap(), Some(1));
        drop(handle);

        assert_eq!(metrics.msg_received_total(&labels), 1);
        assert_eq!(metrics.handled_total(&labels, Code::Cancelled), 1);
    }

    #[tokio::test]
    async fn test_monitored_records_message_timing_when_enabled() {
        let (tx, _rx) = mpsc::channel::<u8>(1);
        let inbound = stream::iter(vec![Ok::<_, Status>(1u8)]);
        let (metrics, mut handle) = monitored(ChannelClientStream::new(tx, inbound));
        metrics.enable_stream_receive_time_histogram(None).unwrap();
        metrics.enable_stream_send_time_histogram(None).unwrap();
        let labels = CHAT.labels();

        handle.send(0u8).await.unwrap();
        handle.recv().await.unwrap();
        handle.recv().await.unwrap();

        assert_eq!(metrics.stream_send_seconds_count(&labels), Some(1));
        assert_eq!(metrics.stream_receive_seconds_count(&labels), Some(2));
    }

    #[tokio::test]
    async fn test_client_stream_finishes_on_its_single_response() {
        let (tx, _rx) = mpsc::channel::<u8>(4);
        let inbound = stream::iter(vec![Ok::<_, Status>(9u32)]);
        let (metrics, mut handle) = monitored_as(&UPLOAD, ChannelClientStream::new(tx, inbound));
        let labels = UPLOAD.labels();

        handle.send(1u8).await.unwrap();
        handle.close_send().await.unwrap();
        assert_eq!(handle.recv().await.unwrap(), Some(9));
        assert!(handle.is_finished());
        drop(handle);

        assert_eq!(metrics.msg_received_total(&labels), 1);
        assert_eq!(metrics.handled_total(&labels, Code::Ok), 1);
        assert_eq!(metrics.handled_total(&labels, Code::Cancelled), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_split_halves_run_on_separate_tasks() {
        let (out_tx, mut out_rx) = mpsc::channel::<u32>(1);
        let (in_tx, mut in_rx) = mpsc::channel::<Result<u32, Status>>(1);
        let inbound = stream::poll_fn(move |cx| in_rx.poll_recv(cx));
        let (metrics, handle) = monitored(ChannelClientStream::new(out_tx, inbound));
        let labels = CHAT.labels();

        // echo server: every request comes back as a response
        let server = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                in_tx.send(Ok(message * 10)).await.unwrap();
            }
        });

        let (mut sender, mut receiver) = handle.split();
        let sending = tokio::spawn(async move {
            for i in 1..=3 {
                sender.send(i).await.unwrap();
            }
            sender.close_send().await.unwrap();
        });
        let receiving = tokio::spawn(async move {
            let mut received = Vec::new();
            while let Some(message) = receiver.recv().await.unwrap() {
                received.push(message);
            }
            assert!(receiver.is_finished());
            received
        });

        sending.await.unwrap();
        assert_eq!(receiving.await.unwrap(), vec![10, 20, 30]);
        server.await.unwrap();

        assert_eq!(metrics.started_total(&labels), 1);
        assert_eq!(metrics.msg_sent_total(&labels), 3);
        assert_eq!(metrics.msg_received_total(&labels), 3);
        assert_eq!(metrics.handled_total(&labels, Code::Ok), 1);
        assert_eq!(handled_sum(&metrics, &labels), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_split_halves_racing_terminal_status_count_once() {
        for _ in 0..50 {
            let (out_tx, out_rx) = mpsc::channel::<u32>(1);
            drop(out_rx);
            let inbound = stream::iter(vec![Err::<u32, _>(Status::aborted("server restarted"))]);
            let (metrics, handle) = monitored(ChannelClientStream::new(out_tx, inbound));
            let labels = CHAT.labels();

            let (mut sender, mut receiver) = handle.split();
            let sending = tokio::spawn(async move { sender.send(1).await });
            let receiving = tokio::spawn(async move { receiver.recv().await });

            let sent = sending.await.unwrap();
            let received = receiving.await.unwrap();
            assert_eq!(sent.unwrap_err().code(), Code::Unavailable);
            assert_eq!(received.unwrap_err().code(), Code::Aborted);

            assert_eq!(handled_sum(&metrics, &labels), 1);
            assert_eq!(metrics.handled_total(&labels, Code::Cancelled), 0);
        }
    }

    #[tokio::test]
    async fn test_split_halves_dropped_early_cancel_once() {
        let (tx, _rx) = mpsc::channel::<u8>(1);
        let inbound = stream::pending::<Result<u8, Status>>();
        let (metrics, handle) = monitored(ChannelClientStream::new(tx, inbound));
        let labels = CHAT.labels();

        let (sender, receiver) = handle.split();
        drop(sender);
        assert_eq!(metrics.handled_total(&labels, Code::Cancelled), 0);
        drop(receiver);

        assert_eq!(metrics.handled_total(&labels, Code::Cancelled), 1);
        assert_eq!(handled_sum(&metrics, &labels), 1);
    }
}
