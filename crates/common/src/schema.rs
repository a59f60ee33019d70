use crate::error::{Error, Result};
use crate::types::{ConversionRule, MapMode, OutputType};
use arrow::datatypes::{DataType, Field, TimeUnit};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Field metadata key marking a `Utf8` Arrow column that holds JSON text.
pub const FIELD_TYPE_KEY: &str = "floe.type";

/// One output column as resolved from the source's metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub position: usize,
    /// The type tag the source reported, e.g. `int4` or `hstore`.
    pub source_type: String,
    pub rule: ConversionRule,
}

impl ColumnSpec {
    pub fn new(
        name: impl Into<String>,
        position: usize,
        source_type: impl Into<String>,
        rule: ConversionRule,
    ) -> Self {
        Self {
            name: name.into(),
            position,
            source_type: source_type.into(),
            rule,
        }
    }

    pub fn output_type(&self) -> OutputType {
        self.rule.output_type()
    }
}

/// The output schema shared read-only by every partition of a job.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    columns: Vec<ColumnSpec>,
}

pub type SchemaRef = Arc<Schema>;

impl Schema {
    /// Builds a schema, checking that positions are exactly `0..N-1` in order.
    pub fn new(columns: Vec<ColumnSpec>) -> Result<Self> {
        for (expected, column) in columns.iter().enumerate() {
            if column.position != expected {
                return Err(Error::Config(format!(
                    "column '{}' has position {}, expected {}",
                    column.name, column.position, expected
                )));
            }
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// The Arrow schema of the batches built from this schema's rows. Every
    /// field is nullable.
    pub fn to_arrow(&self) -> arrow::datatypes::Schema {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|column| {
                let output_type = column.output_type();
                let field = Field::new(&column.name, arrow_type(output_type), true);
                if output_type == OutputType::Json {
                    field.with_metadata(HashMap::from([(
                        FIELD_TYPE_KEY.to_string(),
                        "json".to_string(),
                    )]))
                } else {
                    field
                }
            })
            .collect();
        arrow::datatypes::Schema::new(fields)
    }
}

pub fn arrow_type(output_type: OutputType) -> DataType {
    match output_type {
        OutputType::String | OutputType::Json => DataType::Utf8,
        OutputType::Long => DataType::Int64,
        OutputType::Double => DataType::Float64,
        OutputType::Boolean => DataType::Boolean,
        OutputType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
    }
}

/// Per-column configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ColumnOptions {
    /// Forces the output type, also for tags the built-in table lacks.
    #[serde(rename = "type", default)]
    pub output_type: Option<OutputType>,
    /// Rendering of a key-value map column.
    #[serde(default)]
    pub map_mode: Option<MapMode>,
}

impl ColumnOptions {
    pub fn with_type(output_type: OutputType) -> Self {
        Self {
            output_type: Some(output_type),
            map_mode: None,
        }
    }

    pub fn with_map_mode(map_mode: MapMode) -> Self {
        Self {
            output_type: None,
            map_mode: Some(map_mode),
        }
    }
}
