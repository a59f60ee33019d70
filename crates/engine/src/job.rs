//! Wires the resolver, the planner and the collector into one extraction.

use crate::collector::{Collector, CollectorOptions, JobStream};
use crate::planner::{PartitionPlanner, PartitionSpec};
use crate::schema::SchemaResolver;
use crate::state::JobState;
use floe_common::{ColumnOptions, Result, SchemaRef, SourceDescriptor};
use floe_connector::ConnectionFactory;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct JobOptions {
    /// Desired number of partitions.
    pub parallelism: usize,
    /// Partitions running at once; defaults to `parallelism`.
    pub concurrency: Option<usize>,
    /// Rows buffered between the partitions and the consumer.
    pub buffer_rows: usize,
    pub column_options: HashMap<String, ColumnOptions>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            parallelism: 1,
            concurrency: None,
            buffer_rows: 1024,
            column_options: HashMap::new(),
        }
    }
}

impl JobOptions {
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn with_column(mut self, name: impl Into<String>, options: ColumnOptions) -> Self {
        self.column_options.insert(name.into(), options);
        self
    }

    fn collector_options(&self) -> CollectorOptions {
        CollectorOptions {
            concurrency: self.concurrency.unwrap_or(self.parallelism).max(1),
            buffer_rows: self.buffer_rows.max(1),
        }
    }
}

/// One extraction of one source.
pub struct ExtractionJob {
    job_id: Uuid,
    factory: Arc<dyn ConnectionFactory>,
    source: Arc<SourceDescriptor>,
    options: JobOptions,
}

impl ExtractionJob {
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        source: SourceDescriptor,
        options: JobOptions,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            factory,
            source: Arc::new(source),
            options,
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Resolves the schema and plans the partitions. Nothing is scanned yet,
    /// so an unsupported column type fails here.
    pub async fn prepare(&self) -> Result<PreparedJob> {
        let schema = SchemaResolver::new(Arc::clone(&self.factory))
            .resolve(&self.source, &self.options.column_options)
            .await?;
        let partitions = PartitionPlanner::new(Arc::clone(&self.factory))
            .plan(Arc::clone(&self.source), &schema, self.options.parallelism)
            .await?;
        info!(
            job_id = %self.job_id,
            relation = %self.source.relation,
            columns = schema.len(),
            partitions = partitions.len(),
            "extraction prepared"
        );
        Ok(PreparedJob {
            job_id: self.job_id,
            factory: Arc::clone(&self.factory),
            schema,
            partitions,
            options: self.options.collector_options(),
        })
    }

    pub async fn run(&self) -> Result<JobStream> {
        Ok(self.prepare().await?.run())
    }
}

/// A resolved schema plus the partitions that will read it.
pub struct PreparedJob {
    job_id: Uuid,
    factory: Arc<dyn ConnectionFactory>,
    schema: SchemaRef,
    partitions: Vec<PartitionSpec>,
    options: CollectorOptions,
}

impl PreparedJob {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn partitions(&self) -> &[PartitionSpec] {
        &self.partitions
    }

    pub fn run(self) -> JobStream {
        let state = Arc::new(JobState::new(
            self.job_id,
            self.schema,
            self.partitions.iter().map(|p| p.index),
        ));
        Collector::new(self.factory, state, self.options).run(self.partitions)
    }
}
