//! Runs one partition on its own connection.

use crate::convert::convert;
use crate::planner::PartitionSpec;
use async_stream::try_stream;
use floe_common::{Error, Result, Row, Schema, SchemaRef};
use floe_connector::{ColumnMetadata, ConnectionFactory, RawValue};
use futures::stream::{BoxStream, Stream, StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Converted rows of one partition, in the order the source returned them.
pub type PartitionStream = BoxStream<'static, Result<Row>>;

pub struct PartitionExecutor {
    factory: Arc<dyn ConnectionFactory>,
    partition: PartitionSpec,
    schema: SchemaRef,
    cancel: CancellationToken,
}

impl PartitionExecutor {
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        partition: PartitionSpec,
        schema: SchemaRef,
    ) -> Self {
        Self {
            factory,
            partition,
            schema,
            cancel: CancellationToken::new(),
        }
    }

    /// The token is checked before every round-trip to the source.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns a lazy stream: nothing is opened until it is first polled.
    ///
    /// The first error ends the stream and is attributed to this partition.
    /// The connection is closed when the stream is exhausted or cancelled and
    /// dropped on any other exit.
    pub fn execute(self) -> PartitionStream {
        let index = self.partition.index;
        self.rows().map_err(move |e| e.in_partition(index)).boxed()
    }

    fn rows(self) -> impl Stream<Item = Result<Row>> + Send + 'static {
        try_stream! {
            let index = self.partition.index;
            let scan = self.partition.scan_request();
            let fetch_rows = scan.source.fetch_rows;

            let mut conn = self.factory.connect(&scan.source).await?;
            let mut position: u64 = 0;
            let mut cancelled = false;
            {
                let result = conn.query(&scan).await?;
                check_columns(&self.schema, &result.columns)?;
                debug!(partition = index, range = ?scan.range, "partition scan started");

                let mut cursor = result.cursor;
                loop {
                    if self.cancel.is_cancelled() {
                        cancelled = true;
                        break;
                    }
                    let batch = match cursor.next_batch(fetch_rows).await? {
                        Some(batch) => batch,
                        None => break,
                    };
                    for raw in batch {
                        let row = convert_row(&self.schema, raw, position)?;
                        position += 1;
                        yield row;
                    }
                }
            }

            if let Err(e) = conn.close().await {
                warn!(partition = index, error = %e, "failed to close partition connection");
            }
            if cancelled {
                debug!(partition = index, rows = position, "partition stopped by cancellation");
            } else {
                debug!(partition = index, rows = position, "partition exhausted");
            }
        }
    }
}

/// Converts one raw row column by column in schema order. `position` is the
/// row's 0-based position within the partition.
pub fn convert_row(schema: &Schema, raw: Vec<RawValue>, position: u64) -> Result<Row> {
    if raw.len() != schema.len() {
        return Err(Error::query_failed(format!(
            "row {} has {} columns, schema has {}",
            position,
            raw.len(),
            schema.len()
        )));
    }
    schema
        .columns()
        .iter()
        .zip(raw)
        .map(|(column, value)| {
            convert(column, value).map_err(|e| e.into_error(&column.name, position))
        })
        .collect()
}

fn check_columns(schema: &Schema, columns: &[ColumnMetadata]) -> Result<()> {
    if columns.len() != schema.len() {
        return Err(Error::query_failed(format!(
            "query returned {} columns, schema has {}",
            columns.len(),
            schema.len()
        )));
    }
    Ok(())
}
