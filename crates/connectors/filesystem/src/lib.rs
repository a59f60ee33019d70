use csv::{QuoteStyle, Writer, WriterBuilder};
use floe_common::{Cell, Result, Row, Schema};
use std::borrow::Cow;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Timestamp rendering in written files.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f %z";

/// Writes converted rows as CSV: a header of column names, then one record
/// per row. Fields are quoted only when they need it.
pub struct CsvSink<W: Write = File> {
    writer: Writer<W>,
    rows: u64,
}

impl CsvSink<File> {
    pub fn create(path: impl AsRef<Path>, schema: &Schema) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "csv sink created");
        Self::from_writer(file, schema)
    }
}

impl<W: Write> CsvSink<W> {
    pub fn from_writer(writer: W, schema: &Schema) -> Result<Self> {
        let mut writer = WriterBuilder::new()
            .quote_style(QuoteStyle::Necessary)
            .from_writer(writer);
        writer.write_record(schema.names())?;
        Ok(Self { writer, rows: 0 })
    }

    /// Fails if the row's width differs from the header's.
    pub fn write_row(&mut self, row: &Row) -> Result<()> {
        for cell in row {
            self.writer.write_field(render_cell(cell).as_bytes())?;
        }
        self.writer.write_record(None::<&[u8]>)?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    /// Flushes and returns the number of rows written.
    pub fn finish(mut self) -> Result<u64> {
        self.writer.flush()?;
        Ok(self.rows)
    }

    /// Flushes and hands back the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| floe_common::Error::Io(e.into_error()))
    }
}

/// A cell's field text. Null is the empty field.
pub fn render_cell(cell: &Cell) -> Cow<'_, str> {
    match cell {
        Cell::Null => Cow::Borrowed(""),
        Cell::String(v) | Cell::Json(v) => Cow::Borrowed(v.as_str()),
        Cell::Long(v) => Cow::Owned(v.to_string()),
        Cell::Double(v) => Cow::Owned(v.to_string()),
        Cell::Boolean(v) => Cow::Borrowed(if *v { "true" } else { "false" }),
        Cell::Timestamp(v) => Cow::Owned(v.format(TIMESTAMP_FORMAT).to_string()),
    }
}
