//! Per-job bookkeeping shared by the collector's workers.

use floe_common::{Error, SchemaRef};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionStatus {
    Pending,
    Running,
    Finished,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionProgress {
    pub status: PartitionStatus,
    pub rows: u64,
    pub error: Option<String>,
}

/// A snapshot of a job's partitions.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub partitions: BTreeMap<usize, PartitionProgress>,
    pub failed_partition: Option<usize>,
}

impl JobSummary {
    pub fn total_rows(&self) -> u64 {
        self.partitions.values().map(|p| p.rows).sum()
    }

    pub fn succeeded(&self) -> bool {
        self.failed_partition.is_none()
            && self
                .partitions
                .values()
                .all(|p| p.status == PartitionStatus::Finished)
    }
}

struct Progress {
    partitions: BTreeMap<usize, PartitionProgress>,
    failed_partition: Option<usize>,
    // the first failure, until the merged stream takes it
    failure: Option<(usize, Error)>,
}

/// Lives for one job. The status map is the only mutable shared state.
pub struct JobState {
    job_id: Uuid,
    schema: SchemaRef,
    progress: Mutex<Progress>,
    cancel: CancellationToken,
}

impl JobState {
    pub fn new(job_id: Uuid, schema: SchemaRef, partitions: impl IntoIterator<Item = usize>) -> Self {
        let partitions = partitions
            .into_iter()
            .map(|index| {
                (
                    index,
                    PartitionProgress {
                        status: PartitionStatus::Pending,
                        rows: 0,
                        error: None,
                    },
                )
            })
            .collect();
        Self {
            job_id,
            schema,
            progress: Mutex::new(Progress {
                partitions,
                failed_partition: None,
                failure: None,
            }),
            cancel: CancellationToken::new(),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn start(&self, index: usize) {
        self.update(index, PartitionStatus::Running, Some(0), None);
    }

    pub fn finish(&self, index: usize, rows: u64) {
        self.update(index, PartitionStatus::Finished, Some(rows), None);
    }

    pub fn mark_cancelled(&self, index: usize, rows: u64) {
        self.update(index, PartitionStatus::Cancelled, Some(rows), None);
    }

    /// Records a failure and cancels the job. `rows: None` keeps the last
    /// recorded count.
    ///
    /// Returns `true` only for the job's first failure; its error is kept for
    /// [`take_failure`](Self::take_failure), later ones are only summarized.
    pub fn fail(&self, index: usize, rows: Option<u64>, error: Error) -> bool {
        let message = error.to_string();
        let first = {
            let mut progress = self.lock();
            let first = progress.failed_partition.is_none();
            if first {
                progress.failed_partition = Some(index);
                progress.failure = Some((index, error));
            }
            first
        };
        self.update(index, PartitionStatus::Failed, rows, Some(message));
        self.cancel.cancel();
        first
    }

    /// The first failure wrapped as [`Error::JobFailed`]. Yields it once.
    pub fn take_failure(&self) -> Option<Error> {
        self.lock()
            .failure
            .take()
            .map(|(partition, source)| Error::JobFailed {
                partition,
                source: Box::new(source),
            })
    }

    /// Cancelled while some partition had not finished.
    pub fn interrupted(&self) -> bool {
        self.cancel.is_cancelled()
            && self
                .lock()
                .partitions
                .values()
                .any(|p| p.status != PartitionStatus::Finished)
    }

    pub fn summary(&self) -> JobSummary {
        let progress = self.lock();
        JobSummary {
            job_id: self.job_id,
            partitions: progress.partitions.clone(),
            failed_partition: progress.failed_partition,
        }
    }

    fn update(
        &self,
        index: usize,
        status: PartitionStatus,
        rows: Option<u64>,
        error: Option<String>,
    ) {
        let mut progress = self.lock();
        let entry = progress
            .partitions
            .entry(index)
            .or_insert_with(|| PartitionProgress {
                status,
                rows: 0,
                error: None,
            });
        entry.status = status;
        if let Some(rows) = rows {
            entry.rows = rows;
        }
        if error.is_some() {
            entry.error = error;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(|e| e.into_inner())
    }
}
