//! Per-call bookkeeping and the unary reporter

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tonic::{Code, Status};
use tracing::{debug, warn};

use crate::labels::{code_label, CallLabels, CallType};
use crate::metrics::ClientMetrics;

/// State of one in-flight call
///
/// Creating a record counts the call as started. `finish` publishes the
/// handled counter and handling time; only the first `finish` does anything.
/// A record dropped before finishing counts as `Canceled`, matching tonic,
/// which cancels a call whose future or stream is dropped.
pub(crate) struct CallRecord {
    metrics: Arc<ClientMetrics>,
    labels: CallLabels,
    started_at: Instant,
    finished: AtomicBool,
}

impl CallRecord {
    pub(crate) fn start(metrics: Arc<ClientMetrics>, labels: CallLabels) -> Self {
        metrics.inc_started(&labels);
        Self {
            metrics,
            labels,
            started_at: Instant::now(),
            finished: AtomicBool::new(false),
        }
    }

    pub(crate) fn metrics(&self) -> &ClientMetrics {
        &self.metrics
    }

    pub(crate) fn labels(&self) -> &CallLabels {
        &self.labels
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Record the terminal status. Returns `false` if the call was already finished.
    pub(crate) fn finish(&self, code: Code) -> bool {
        if self.finished.swap(true, Ordering::AcqRel) {
            return false;
        }

        let elapsed = self.started_at.elapsed();
        self.metrics.inc_handled(&self.labels, code);
        self.metrics
            .observe_handled_duration(&self.labels, elapsed.as_secs_f64());

        debug!(
            grpc_type = self.labels.call_type.as_str(),
            grpc_service = %self.labels.service,
            grpc_method = %self.labels.method,
            grpc_code = code_label(code),
            elapsed_ms = elapsed.as_millis() as u64,
            "gRPC client call finished"
        );
        true
    }
}

impl Drop for CallRecord {
    fn drop(&mut self) {
        if self.finish(Code::Cancelled) {
            warn!(
                grpc_service = %self.labels.service,
                grpc_method = %self.labels.method,
                "gRPC client call dropped before completion, recording as canceled"
            );
        }
    }
}

/// Instruments one call that resolves to a single final response
///
/// `start` counts the call before it is dispatched; `report` drives the call
/// and records its outcome. The result is handed back untouched.
pub struct UnaryReporter {
    record: CallRecord,
}

impl UnaryReporter {
    pub fn start(metrics: Arc<ClientMetrics>, labels: CallLabels) -> Self {
        Self {
            record: CallRecord::start(metrics, labels),
        }
    }

    pub fn labels(&self) -> &CallLabels {
        self.record.labels()
    }

    pub async fn report<T, F>(self, call: F) -> Result<T, Status>
    where
        F: Future<Output = Result<T, Status>>,
    {
        let result = call.await;
        match &result {
            Ok(_) => {
                // a client-streaming call ends with exactly one response message
                if self.record.labels().call_type == CallType::ClientStream {
                    self.record.metrics().inc_msg_received(self.record.labels());
                }
                self.record.finish(Code::Ok);
            }
            Err(status) => {
                self.record.finish(status.code());
            }
        }
        result
    }
}

/// Count, run and record a call that returns a single terminal result
pub async fn report_unary<T, F>(
    metrics: Arc<ClientMetrics>,
    labels: CallLabels,
    call: F,
) -> Result<T, Status>
where
    F: Future<Output = Result<T, Status>>,
{
    UnaryReporter::start(metrics, labels).report(call).await
}
