//! Engine crate
//!
//! The partitioned extraction engine: resolves a fixed output schema from the
//! source's metadata, splits the source into key-range partitions, runs each
//! partition on its own connection and merges the converted rows into one
//! stream.
//!
//! # Example
//! ```rust,no_run
//! use floe_common::{ConnectionParams, SourceDescriptor};
//! use floe_connector::MemorySource;
//! use floe_engine::{ExtractionJob, JobOptions};
//! use futures::TryStreamExt;
//! use std::sync::Arc;
//!
//! # async fn example() -> floe_common::Result<()> {
//! let source = SourceDescriptor::table(ConnectionParams::new("localhost", "user", "db"), "t");
//! let job = ExtractionJob::new(Arc::new(MemorySource::new()), source, JobOptions::default());
//! let rows: Vec<_> = job.run().await?.try_collect().await?;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod collector;
pub mod convert;
pub mod executor;
pub mod hstore;
pub mod job;
pub mod planner;
pub mod schema;
pub mod state;

pub use batch::{rows_to_record_batch, RecordBatchStream};
pub use collector::{Collector, CollectorOptions, JobStream};
pub use convert::convert;
pub use executor::{convert_row, PartitionExecutor, PartitionStream};
pub use job::{ExtractionJob, JobOptions, PreparedJob};
pub use planner::{split_ranges, PartitionPlanner, PartitionSpec};
pub use schema::{build_schema, type_family, SchemaResolver, TypeFamily};
pub use state::{JobState, JobSummary, PartitionProgress, PartitionStatus};
