use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;

/// The engine's fixed output type system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    String,
    Long,
    Double,
    Boolean,
    Timestamp,
    Json,
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputType::String => "string",
            OutputType::Long => "long",
            OutputType::Double => "double",
            OutputType::Boolean => "boolean",
            OutputType::Timestamp => "timestamp",
            OutputType::Json => "json",
        };
        f.write_str(name)
    }
}

/// How a key-value map column is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MapMode {
    /// The source's own literal text, e.g. `"a"=>"b"`.
    #[default]
    FlattenedString,
    /// A JSON object, e.g. `{"a":"b"}`.
    StructuredJson,
}

/// The conversion selected for one column, fixed at schema resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionRule {
    Direct(OutputType),
    Map(MapMode),
}

impl ConversionRule {
    pub fn output_type(&self) -> OutputType {
        match self {
            ConversionRule::Direct(output_type) => *output_type,
            ConversionRule::Map(MapMode::FlattenedString) => OutputType::String,
            ConversionRule::Map(MapMode::StructuredJson) => OutputType::Json,
        }
    }
}

/// One converted column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    String(String),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    /// A JSON document in its string serialization.
    Json(String),
}

impl Cell {
    /// `None` for a null cell, which fits any declared type.
    pub fn output_type(&self) -> Option<OutputType> {
        match self {
            Cell::Null => None,
            Cell::String(_) => Some(OutputType::String),
            Cell::Long(_) => Some(OutputType::Long),
            Cell::Double(_) => Some(OutputType::Double),
            Cell::Boolean(_) => Some(OutputType::Boolean),
            Cell::Timestamp(_) => Some(OutputType::Timestamp),
            Cell::Json(_) => Some(OutputType::Json),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// The textual payload of string and JSON cells.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::String(s) | Cell::Json(s) => Some(s),
            _ => None,
        }
    }
}

/// A row is one cell per schema column, in schema order.
pub type Row = Vec<Cell>;
