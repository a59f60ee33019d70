//! Common crate
//!
//! Shared types and error handling for Floe: the output type system, the
//! resolved schema every partition shares, and the source descriptor a job is
//! built from.
//!
//! # Example
//! ```rust
//! use floe_common::{Cell, OutputType};
//! let cell = Cell::String("a".to_string());
//! assert_eq!(cell.output_type(), Some(OutputType::String));
//! ```

pub mod error;
pub mod schema;
pub mod source;
pub mod types;

pub use error::{ConversionError, Error, Result};
pub use schema::{arrow_type, ColumnOptions, ColumnSpec, Schema, SchemaRef, FIELD_TYPE_KEY};
pub use source::{ConnectionParams, Relation, SourceDescriptor};
pub use types::{Cell, ConversionRule, MapMode, OutputType, Row};
