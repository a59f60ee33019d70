//! The relational source capability every Floe connector implements.
//!
//! A [`ConnectionFactory`] is passed explicitly to the parts of the engine
//! that need a connection; there is no process-wide driver registry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use floe_common::{Result, SourceDescriptor};
use std::fmt;
use std::sync::Arc;

pub mod memory;

pub use memory::{MemorySource, MemoryTable};

/// A column value as the source hands it back, before conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Text in the source's own literal form.
    Text(String),
    Timestamp(DateTime<Utc>),
    /// Decoded key-value pairs in source order; `None` is a null value.
    Map(Vec<(String, Option<String>)>),
}

impl RawValue {
    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            RawValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The value in `kind`'s key units. Floats are floored, so comparing the
    /// result with whole-number bounds agrees with comparing the float itself.
    pub fn as_key(&self, kind: KeyKind) -> Option<i64> {
        match (kind, self) {
            (KeyKind::Integer, RawValue::Int(v)) => Some(*v),
            (KeyKind::Integer, RawValue::Float(v)) if v.is_finite() => Some(v.floor() as i64),
            (KeyKind::Timestamp, RawValue::Timestamp(v)) => Some(v.timestamp_micros()),
            _ => None,
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Null => f.write_str("NULL"),
            RawValue::Bool(v) => write!(f, "{}", v),
            RawValue::Int(v) => write!(f, "{}", v),
            RawValue::Float(v) => write!(f, "{}", v),
            RawValue::Text(v) => f.write_str(v),
            RawValue::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            RawValue::Map(pairs) => {
                for (i, (key, value)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match value {
                        Some(value) => write!(f, "{}=>{}", key, value)?,
                        None => write!(f, "{}=>NULL", key)?,
                    }
                }
                Ok(())
            }
        }
    }
}

/// A column as reported by the source's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    pub name: String,
    /// Source type tag, e.g. `int4`, `text`, `hstore`.
    pub type_tag: String,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_tag: type_tag.into(),
        }
    }
}

/// What a key range's bounds measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyKind {
    /// Whole numbers. Also used for floating-point keys.
    #[default]
    Integer,
    /// Microseconds since the Unix epoch, UTC.
    Timestamp,
}

/// A half-open range over a key: `lower <= key < upper`.
///
/// A missing bound is unbounded on that side. `include_nulls` also selects rows
/// whose key is null, so that a set of ranges can cover every row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub column: String,
    pub kind: KeyKind,
    pub lower: Option<i64>,
    pub upper: Option<i64>,
    pub include_nulls: bool,
}

impl KeyRange {
    pub fn contains(&self, key: Option<i64>) -> bool {
        match key {
            None => self.include_nulls,
            Some(key) => {
                self.lower.map_or(true, |lower| key >= lower)
                    && self.upper.map_or(true, |upper| key < upper)
            }
        }
    }
}

/// One partition's read request.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub source: Arc<SourceDescriptor>,
    pub range: Option<KeyRange>,
}

/// Opens connections to a source.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, source: &SourceDescriptor) -> Result<Box<dyn Connection>>;
}

/// One exclusively owned connection. Not shared between partitions.
#[async_trait]
pub trait Connection: Send {
    /// Reports the relation's columns without fetching rows.
    async fn describe(&mut self, source: &SourceDescriptor) -> Result<Vec<ColumnMetadata>>;

    /// Minimum and maximum of `column`, or `None` when the relation is empty.
    async fn key_bounds(
        &mut self,
        source: &SourceDescriptor,
        column: &str,
    ) -> Result<Option<(RawValue, RawValue)>>;

    /// Starts a scan. The cursor borrows the connection until it is dropped.
    async fn query<'a>(&'a mut self, scan: &ScanRequest) -> Result<QueryResult<'a>>;

    async fn close(self: Box<Self>) -> Result<()>;
}

/// Column metadata plus a cursor over the rows.
pub struct QueryResult<'a> {
    pub columns: Vec<ColumnMetadata>,
    pub cursor: Box<dyn RowCursor + 'a>,
}

/// Pulls rows in bounded batches.
#[async_trait]
pub trait RowCursor: Send {
    /// Up to `max_rows` rows, or `None` once exhausted.
    async fn next_batch(&mut self, max_rows: usize) -> Result<Option<Vec<Vec<RawValue>>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(lower: Option<i64>, upper: Option<i64>, include_nulls: bool) -> KeyRange {
        KeyRange {
            column: "id".to_string(),
            kind: KeyKind::Integer,
            lower,
            upper,
            include_nulls,
        }
    }

    #[test]
    fn test_key_range_is_half_open() {
        let r = range(Some(10), Some(20), false);
        assert!(!r.contains(Some(9)));
        assert!(r.contains(Some(10)));
        assert!(r.contains(Some(19)));
        assert!(!r.contains(Some(20)));
        assert!(!r.contains(None));
    }

    #[test]
    fn test_key_range_open_ends() {
        assert!(range(None, Some(0), true).contains(Some(i64::MIN)));
        assert!(range(None, Some(0), true).contains(None));
        assert!(range(Some(5), None, false).contains(Some(i64::MAX)));
    }

    #[test]
    fn test_keys_in_range_units() {
        use chrono::TimeZone;
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            RawValue::Timestamp(at).as_key(KeyKind::Timestamp),
            Some(1_704_067_200_000_000)
        );
        assert_eq!(RawValue::Timestamp(at).as_key(KeyKind::Integer), None);
        assert_eq!(RawValue::Float(-1.5).as_key(KeyKind::Integer), Some(-2));
        assert_eq!(RawValue::Float(f64::NAN).as_key(KeyKind::Integer), None);
        assert_eq!(RawValue::Int(7).as_key(KeyKind::Integer), Some(7));
        assert_eq!(RawValue::Null.as_key(KeyKind::Integer), None);
    }

    #[test]
    fn test_raw_value_display() {
        let map = RawValue::Map(vec![
            ("a".to_string(), Some("b".to_string())),
            ("c".to_string(), None),
        ]);
        assert_eq!(map.to_string(), "a=>b, c=>NULL");
        assert_eq!(RawValue::Null.to_string(), "NULL");
        assert_eq!(RawValue::Int(42).as_int(), Some(42));
    }
}
