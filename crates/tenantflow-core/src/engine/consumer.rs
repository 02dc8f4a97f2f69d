//! Status report consumer.
//!
//! Drains a channel of `StatusReport`s and applies each one to a
//! `StatusSink`. A report that fails to apply (unknown workflow, illegal
//! transition) is logged and skipped; it never stops the consumer.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tenantflow_types::workflow::StatusReport;

use super::StatusSink;

/// Single-loop consumer over an mpsc channel of status reports.
pub struct StatusConsumer {
    receiver: mpsc::Receiver<StatusReport>,
    shutdown: CancellationToken,
}

/// Counters returned when the consumer exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub applied: u64,
    pub rejected: u64,
}

impl StatusConsumer {
    pub fn new(receiver: mpsc::Receiver<StatusReport>, shutdown: CancellationToken) -> Self {
        Self { receiver, shutdown }
    }

    /// Run until the channel closes or shutdown is requested.
    pub async fn run<S: StatusSink>(mut self, sink: &S) -> ConsumerStats {
        let mut stats = ConsumerStats::default();
        loop {
            let report = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    debug!("status consumer shutting down");
                    break;
                }
                next = self.receiver.recv() => match next {
                    Some(report) => report,
                    None => break,
                },
            };

            let workflow_id = report.workflow_id;
            match sink.apply_report(report).await {
                Ok(workflow) => {
                    stats.applied += 1;
                    debug!(%workflow_id, status = %workflow.status, "status report applied");
                }
                Err(e) => {
                    stats.rejected += 1;
                    warn!(%workflow_id, error = %e, "status report rejected");
                }
            }
        }
        info!(applied = stats.applied, rejected = stats.rejected, "status consumer stopped");
        stats
    }
}
