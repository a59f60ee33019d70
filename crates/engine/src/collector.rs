//! Runs partition executors under a concurrency bound and merges their rows.

use crate::executor::PartitionExecutor;
use crate::planner::PartitionSpec;
use crate::state::{JobState, JobSummary};
use floe_common::{Error, Result, Row, SchemaRef};
use floe_connector::ConnectionFactory;
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinError;
use tokio_util::sync::DropGuard;
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorOptions {
    /// Partitions running at once.
    pub concurrency: usize,
    /// Capacity of the merge channel, in rows.
    pub buffer_rows: usize,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            buffer_rows: 1024,
        }
    }
}

pub struct Collector {
    factory: Arc<dyn ConnectionFactory>,
    state: Arc<JobState>,
    options: CollectorOptions,
}

impl Collector {
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        state: Arc<JobState>,
        options: CollectorOptions,
    ) -> Self {
        Self {
            factory,
            state,
            options,
        }
    }

    /// Starts the job and returns the merged stream.
    ///
    /// Partitions are admitted in index order. Rows of one partition arrive in
    /// the order it produced them; rows of different partitions interleave.
    /// Must be called within a tokio runtime.
    pub fn run(self, partitions: Vec<PartitionSpec>) -> JobStream {
        let (tx, rx) = mpsc::channel(self.options.buffer_rows.max(1));
        let guard = self.state.cancellation().drop_guard();
        let state = Arc::clone(&self.state);
        info!(
            job_id = %state.job_id(),
            partitions = partitions.len(),
            concurrency = self.options.concurrency,
            "starting extraction"
        );
        tokio::spawn(drive(
            self.factory,
            Arc::clone(&state),
            partitions,
            self.options.concurrency.max(1),
            tx,
        ));
        JobStream {
            rx,
            state,
            phase: Phase::Streaming,
            _cancel_on_drop: guard,
        }
    }
}

async fn drive(
    factory: Arc<dyn ConnectionFactory>,
    state: Arc<JobState>,
    partitions: Vec<PartitionSpec>,
    concurrency: usize,
    tx: mpsc::Sender<Row>,
) {
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let cancel = state.cancellation();
    let mut pending = partitions.into_iter().peekable();
    let mut running = FuturesUnordered::new();

    while pending.peek().is_some() || !running.is_empty() {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some((index, joined)) = running.next(), if !running.is_empty() => {
                reap(&state, index, joined);
            }
            permit = Arc::clone(&semaphore).acquire_owned(), if pending.peek().is_some() => {
                let Ok(permit) = permit else { break };
                let Some(partition) = pending.next() else { break };
                let index = partition.index;
                let executor = PartitionExecutor::new(
                    Arc::clone(&factory),
                    partition,
                    Arc::clone(state.schema()),
                )
                .with_cancellation(state.cancellation());
                let task_state = Arc::clone(&state);
                let task_tx = tx.clone();
                let handle = tokio::spawn(async move {
                    let _permit = permit;
                    run_partition(executor, index, task_state, task_tx).await;
                });
                running.push(async move { (index, handle.await) });
            }
        }
    }
    drop(tx);

    for partition in pending {
        state.mark_cancelled(partition.index, 0);
    }
    while let Some((index, joined)) = running.next().await {
        reap(&state, index, joined);
    }

    let summary = state.summary();
    if summary.succeeded() {
        info!(
            job_id = %summary.job_id,
            rows = summary.total_rows(),
            "extraction finished"
        );
    } else {
        debug!(job_id = %summary.job_id, "extraction stopped");
    }
}

fn reap(state: &JobState, index: usize, joined: std::result::Result<(), JoinError>) {
    if let Err(e) = joined {
        let err = Error::query_failed(format!("partition task aborted: {}", e)).in_partition(index);
        error!(job_id = %state.job_id(), partition = index, error = %err, "partition task aborted");
        state.fail(index, None, err);
    }
}

async fn run_partition(
    executor: PartitionExecutor,
    index: usize,
    state: Arc<JobState>,
    tx: mpsc::Sender<Row>,
) {
    let cancel = state.cancellation();
    state.start(index);
    debug!(job_id = %state.job_id(), partition = index, "partition started");

    let mut stream = executor.execute();
    let mut rows: u64 = 0;
    while let Some(item) = stream.next().await {
        match item {
            Ok(row) => {
                tokio::select! {
                    sent = tx.send(row) => {
                        if sent.is_err() {
                            // consumer is gone
                            state.cancel();
                            break;
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
                rows += 1;
            }
            Err(e) => {
                drop(stream);
                error!(
                    job_id = %state.job_id(),
                    partition = index,
                    rows,
                    error = %e,
                    "partition failed, cancelling job"
                );
                state.fail(index, Some(rows), e);
                return;
            }
        }
    }
    drop(stream);

    if cancel.is_cancelled() {
        debug!(job_id = %state.job_id(), partition = index, rows, "partition cancelled");
        state.mark_cancelled(index, rows);
    } else {
        debug!(job_id = %state.job_id(), partition = index, rows, "partition finished");
        state.finish(index, rows);
    }
}

enum Phase {
    Streaming,
    // the failure was reported; discarding rows until every partition exits
    Draining,
    Done,
}

/// The merged row stream of one job.
///
/// Ends with `None` on success. On failure it yields exactly one
/// [`Error::JobFailed`] and then ends once every partition task has exited and
/// released its connection. A job cancelled through [`JobStream::cancel`]
/// before it completed ends with one [`Error::Cancelled`]. Dropping it cancels
/// the job.
pub struct JobStream {
    rx: mpsc::Receiver<Row>,
    state: Arc<JobState>,
    phase: Phase,
    _cancel_on_drop: DropGuard,
}

impl JobStream {
    pub fn schema(&self) -> &SchemaRef {
        self.state.schema()
    }

    pub fn job_id(&self) -> Uuid {
        self.state.job_id()
    }

    /// Per-partition status and row counts so far.
    pub fn summary(&self) -> JobSummary {
        self.state.summary()
    }

    /// Cancels the job. Rows already buffered are still delivered, then the
    /// stream ends with [`Error::Cancelled`] unless every partition had
    /// already finished.
    pub fn cancel(&self) {
        self.state.cancel();
    }
}

impl Stream for JobStream {
    type Item = Result<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match self.phase {
                Phase::Done => return Poll::Ready(None),
                Phase::Draining => match self.rx.poll_recv(cx) {
                    Poll::Ready(Some(_)) => continue,
                    Poll::Ready(None) => {
                        self.phase = Phase::Done;
                        return Poll::Ready(None);
                    }
                    Poll::Pending => return Poll::Pending,
                },
                Phase::Streaming => {
                    if let Some(err) = self.state.take_failure() {
                        self.phase = Phase::Draining;
                        return Poll::Ready(Some(Err(err)));
                    }
                    return match self.rx.poll_recv(cx) {
                        Poll::Ready(Some(row)) => Poll::Ready(Some(Ok(row))),
                        Poll::Ready(None) => {
                            self.phase = Phase::Done;
                            match self.state.take_failure() {
                                Some(err) => Poll::Ready(Some(Err(err))),
                                None if self.state.interrupted() => {
                                    Poll::Ready(Some(Err(Error::Cancelled)))
                                }
                                None => Poll::Ready(None),
                            }
                        }
                        Poll::Pending => Poll::Pending,
                    };
                }
            }
        }
    }
}
