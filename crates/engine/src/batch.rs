//! Packs converted rows into Arrow record batches.

use crate::collector::JobStream;
use arrow::array::{
    ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder,
    TimestampMicrosecondBuilder,
};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use async_stream::try_stream;
use floe_common::{Cell, OutputType, Result, Row, Schema};
use futures::stream::{BoxStream, Stream, StreamExt};
use std::sync::Arc;

pub type RecordBatchStream = BoxStream<'static, Result<RecordBatch>>;

/// Builds one batch from rows that match `schema`. A row of the wrong width
/// is rejected.
pub fn rows_to_record_batch(schema: &Schema, rows: &[Row]) -> Result<RecordBatch> {
    if let Some((index, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != schema.len()) {
        return Err(ArrowError::InvalidArgumentError(format!(
            "row {} has {} cells, schema has {} columns",
            index,
            row.len(),
            schema.len()
        ))
        .into());
    }
    let columns = schema
        .columns()
        .iter()
        .map(|column| build_column(column.position, &column.name, column.output_type(), rows))
        .collect::<Result<Vec<_>>>()?;
    Ok(RecordBatch::try_new(Arc::new(schema.to_arrow()), columns)?)
}

fn build_column(
    position: usize,
    name: &str,
    output_type: OutputType,
    rows: &[Row],
) -> Result<ArrayRef> {
    let cells = rows.iter().map(|row| &row[position]);
    let array: ArrayRef = match output_type {
        OutputType::String | OutputType::Json => {
            let mut builder = StringBuilder::new();
            for cell in cells {
                match cell {
                    Cell::Null => builder.append_null(),
                    Cell::String(v) | Cell::Json(v) => builder.append_value(v),
                    other => return Err(mismatch(name, output_type, other)),
                }
            }
            Arc::new(builder.finish())
        }
        OutputType::Long => {
            let mut builder = Int64Builder::with_capacity(rows.len());
            for cell in cells {
                match cell {
                    Cell::Null => builder.append_null(),
                    Cell::Long(v) => builder.append_value(*v),
                    other => return Err(mismatch(name, output_type, other)),
                }
            }
            Arc::new(builder.finish())
        }
        OutputType::Double => {
            let mut builder = Float64Builder::with_capacity(rows.len());
            for cell in cells {
                match cell {
                    Cell::Null => builder.append_null(),
                    Cell::Double(v) => builder.append_value(*v),
                    other => return Err(mismatch(name, output_type, other)),
                }
            }
            Arc::new(builder.finish())
        }
        OutputType::Boolean => {
            let mut builder = BooleanBuilder::with_capacity(rows.len());
            for cell in cells {
                match cell {
                    Cell::Null => builder.append_null(),
                    Cell::Boolean(v) => builder.append_value(*v),
                    other => return Err(mismatch(name, output_type, other)),
                }
            }
            Arc::new(builder.finish())
        }
        OutputType::Timestamp => {
            let mut builder = TimestampMicrosecondBuilder::with_capacity(rows.len())
                .with_timezone("UTC");
            for cell in cells {
                match cell {
                    Cell::Null => builder.append_null(),
                    Cell::Timestamp(v) => builder.append_value(v.timestamp_micros()),
                    other => return Err(mismatch(name, output_type, other)),
                }
            }
            Arc::new(builder.finish())
        }
    };
    Ok(array)
}

fn mismatch(column: &str, expected: OutputType, cell: &Cell) -> floe_common::Error {
    ArrowError::InvalidArgumentError(format!(
        "column '{}' is declared {} but holds {:?}",
        column, expected, cell
    ))
    .into()
}

impl JobStream {
    /// Regroups the merged rows into batches of up to `batch_size` rows. A job
    /// failure discards the partial batch and ends the stream with the error.
    pub fn record_batches(self, batch_size: usize) -> RecordBatchStream {
        batches(self, batch_size.max(1)).boxed()
    }
}

fn batches(
    mut rows: JobStream,
    batch_size: usize,
) -> impl Stream<Item = Result<RecordBatch>> + Send + 'static {
    try_stream! {
        let schema = Arc::clone(rows.schema());
        let mut buffer: Vec<Row> = Vec::with_capacity(batch_size);
        while let Some(row) = rows.next().await {
            buffer.push(row?);
            if buffer.len() == batch_size {
                let batch = rows_to_record_batch(&schema, &buffer)?;
                buffer.clear();
                yield batch;
            }
        }
        if !buffer.is_empty() {
            yield rows_to_record_batch(&schema, &buffer)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Int64Array, StringArray, TimestampMicrosecondArray};
    use chrono::{TimeZone, Utc};
    use floe_common::{ColumnSpec, ConversionRule, MapMode};

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnSpec::new("id", 0, "int4", ConversionRule::Direct(OutputType::Long)),
            ColumnSpec::new("c1", 1, "hstore", ConversionRule::Map(MapMode::StructuredJson)),
            ColumnSpec::new(
                "at",
                2,
                "timestamptz",
                ConversionRule::Direct(OutputType::Timestamp),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_rows_to_record_batch() {
        let at = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        let rows = vec![
            vec![
                Cell::Long(1),
                Cell::Json(r#"{"a":"b"}"#.to_string()),
                Cell::Timestamp(at),
            ],
            vec![Cell::Long(2), Cell::Null, Cell::Null],
        ];
        let batch = rows_to_record_batch(&schema(), &rows).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 3);

        let ids = batch.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!((ids.value(0), ids.value(1)), (1, 2));
        let maps = batch.column(1).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(maps.value(0), r#"{"a":"b"}"#);
        assert!(maps.is_null(1));
        let times = batch
            .column(2)
            .as_any()
            .downcast_ref::<TimestampMicrosecondArray>()
            .unwrap();
        assert_eq!(times.value(0), at.timestamp_micros());
        assert!(times.is_null(1));
    }

    #[test]
    fn test_cell_of_the_wrong_type_is_rejected() {
        let rows = vec![vec![
            Cell::String("x".to_string()),
            Cell::Null,
            Cell::Null,
        ]];
        assert!(matches!(
            rows_to_record_batch(&schema(), &rows),
            Err(floe_common::Error::Arrow(_))
        ));
    }

    #[test]
    fn test_row_of_the_wrong_width_is_rejected() {
        let rows = vec![
            vec![Cell::Long(1), Cell::Null, Cell::Null],
            vec![Cell::Long(2)],
        ];
        match rows_to_record_batch(&schema(), &rows) {
            Err(floe_common::Error::Arrow(ArrowError::InvalidArgumentError(message))) => {
                assert_eq!(message, "row 1 has 1 cells, schema has 3 columns");
            }
            other => panic!("expected a width error, got {:?}", other),
        }
    }
}
