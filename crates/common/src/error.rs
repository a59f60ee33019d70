use thiserror::Error;

/// Unified error type for Floe crates.
///
/// The first four variants are the extraction taxonomy. `JobFailed` is what
/// the consumer of a merged stream sees: it wraps the first partition error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported source type '{source_type}' for column '{column}'")]
    UnsupportedType { column: String, source_type: String },

    #[error("source unavailable{}: {message}", at_partition(.partition))]
    SourceUnavailable {
        partition: Option<usize>,
        message: String,
    },

    #[error("query failed{}: {message}", at_partition(.partition))]
    QueryFailed {
        partition: Option<usize>,
        message: String,
    },

    #[error(
        "conversion failed{} for column '{column}' at row {row}: {reason} (value: {preview})",
        at_partition(.partition)
    )]
    ConversionFailed {
        partition: Option<usize>,
        column: String,
        row: u64,
        preview: String,
        reason: String,
    },

    #[error("job failed in partition {partition}: {source}")]
    JobFailed {
        partition: usize,
        #[source]
        source: Box<Error>,
    },

    /// The merged stream ended because the job was cancelled before every
    /// partition finished.
    #[error("job cancelled before every partition finished")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

fn at_partition(partition: &Option<usize>) -> String {
    match partition {
        Some(index) => format!(" in partition {}", index),
        None => String::new(),
    }
}

impl Error {
    pub fn source_unavailable(message: impl Into<String>) -> Self {
        Error::SourceUnavailable {
            partition: None,
            message: message.into(),
        }
    }

    pub fn query_failed(message: impl Into<String>) -> Self {
        Error::QueryFailed {
            partition: None,
            message: message.into(),
        }
    }

    /// Attributes a partition-level error to `index`. Other variants are
    /// returned unchanged.
    pub fn in_partition(self, index: usize) -> Self {
        match self {
            Error::SourceUnavailable { message, .. } => Error::SourceUnavailable {
                partition: Some(index),
                message,
            },
            Error::QueryFailed { message, .. } => Error::QueryFailed {
                partition: Some(index),
                message,
            },
            Error::ConversionFailed {
                column,
                row,
                preview,
                reason,
                ..
            } => Error::ConversionFailed {
                partition: Some(index),
                column,
                row,
                preview,
                reason,
            },
            other => other,
        }
    }

    /// The partition this error is attributed to, if any.
    pub fn partition(&self) -> Option<usize> {
        match self {
            Error::SourceUnavailable { partition, .. }
            | Error::QueryFailed { partition, .. }
            | Error::ConversionFailed { partition, .. } => *partition,
            Error::JobFailed { partition, .. } => Some(*partition),
            _ => None,
        }
    }
}

/// A raw value that could not be mapped under its column's rule.
///
/// Carries no column or row: the executor knows those and lifts this into
/// [`Error::ConversionFailed`].
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{reason} (value: {preview})")]
pub struct ConversionError {
    pub preview: String,
    pub reason: String,
}

impl ConversionError {
    pub const PREVIEW_CHARS: usize = 64;

    pub fn new(raw: &str, reason: impl Into<String>) -> Self {
        Self {
            preview: preview(raw),
            reason: reason.into(),
        }
    }

    pub fn into_error(self, column: &str, row: u64) -> Error {
        Error::ConversionFailed {
            partition: None,
            column: column.to_string(),
            row,
            preview: self.preview,
            reason: self.reason,
        }
    }
}

fn preview(raw: &str) -> String {
    let mut chars = raw.chars();
    let mut out: String = chars.by_ref().take(ConversionError::PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_partition_sets_index() {
        let err = Error::query_failed("relation does not exist").in_partition(3);
        assert_eq!(err.partition(), Some(3));
        assert_eq!(
            err.to_string(),
            "query failed in partition 3: relation does not exist"
        );
    }

    #[test]
    fn test_in_partition_leaves_other_variants() {
        let err = Error::Config("bad".to_string()).in_partition(1);
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.partition(), None);
    }

    #[test]
    fn test_conversion_failure_names_column_row_and_value() {
        let err = ConversionError::new("\"a\"=>", "unexpected end of input")
            .into_error("c1", 7)
            .in_partition(2);
        assert_eq!(
            err.to_string(),
            "conversion failed in partition 2 for column 'c1' at row 7: unexpected end of input (value: \"a\"=>)"
        );
    }

    #[test]
    fn test_job_failed_wraps_first_error() {
        let inner = Error::source_unavailable("connection reset").in_partition(0);
        let err = Error::JobFailed {
            partition: 0,
            source: Box::new(inner),
        };
        assert_eq!(
            err.to_string(),
            "job failed in partition 0: source unavailable in partition 0: connection reset"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_preview_truncates_long_values() {
        let raw = "x".repeat(100);
        let err = ConversionError::new(&raw, "bad");
        assert_eq!(err.preview.len(), ConversionError::PREVIEW_CHARS + 3);
        assert!(err.preview.ends_with("..."));
    }
}
