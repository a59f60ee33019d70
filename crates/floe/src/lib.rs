//! The `floe` binary's library half: settings loading and the run loop that
//! streams one extraction into a CSV file.

pub mod config;

use anyhow::Context;
use floe_connector::ConnectionFactory;
use floe_connector_filesystem::CsvSink;
use floe_engine::{ExtractionJob, JobSummary};
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub use crate::config::Settings;

/// Runs the extraction `settings` describe and writes it to
/// `settings.output.path`. A partial file is removed when the job fails.
pub async fn run(
    settings: &Settings,
    factory: Arc<dyn ConnectionFactory>,
) -> anyhow::Result<JobSummary> {
    let source = settings.source.descriptor()?;
    let job = ExtractionJob::new(factory, source, settings.job_options());
    let prepared = job.prepare().await?;
    let output = settings.output.path.as_path();
    let mut sink = CsvSink::create(output, prepared.schema())
        .with_context(|| format!("cannot create {}", output.display()))?;

    let mut rows = prepared.run();
    let mut outcome: anyhow::Result<()> = Ok(());
    while let Some(row) = rows.next().await {
        let written = row
            .map_err(anyhow::Error::from)
            .and_then(|row| sink.write_row(&row).map_err(anyhow::Error::from));
        if let Err(e) = written {
            rows.cancel();
            outcome = Err(e);
            break;
        }
    }
    let summary = rows.summary();
    drop(rows);

    if let Err(e) = outcome {
        discard(output);
        return Err(e.context(format!("extraction {} failed", summary.job_id)));
    }
    let written = match sink.finish() {
        Ok(written) => written,
        Err(e) => {
            discard(output);
            return Err(anyhow::Error::from(e).context("cannot flush output"));
        }
    };
    info!(
        job_id = %summary.job_id,
        rows = written,
        partitions = summary.partitions.len(),
        path = %output.display(),
        "extraction written"
    );
    Ok(summary)
}

fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "cannot remove partial output");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use floe_common::Error;
    use floe_connector::{ColumnMetadata, MemorySource, MemoryTable, RawValue};

    fn settings(output: &Path, extra: &str) -> Settings {
        Settings::from_toml(&format!(
            r#"
            [source]
            user = "test_user"
            database = "test_db"
            table = "input_hstore"

            {extra}

            [output]
            path = "{}"
            "#,
            output.display()
        ))
        .unwrap()
    }

    fn input_hstore(column_type: &str, value: &str) -> MemorySource {
        let memory = MemorySource::new();
        memory.register_table(
            "input_hstore",
            MemoryTable::new(vec![ColumnMetadata::new("c1", column_type)])
                .with_rows(vec![vec![RawValue::Text(value.to_string())]]),
        );
        memory
    }

    #[tokio::test]
    async fn test_run_writes_csv() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("postgresql-input000.00.csv");
        let source = input_hstore("hstore", r#""a"=>"b""#);
        let summary = run(&settings(&path, ""), Arc::new(source)).await?;
        assert_eq!(summary.total_rows(), 1);
        assert!(summary.succeeded());

        let text = std::fs::read_to_string(&path)?;
        assert_eq!(text, "c1\n\"\"\"a\"\"=>\"\"b\"\"\"\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_run_writes_structured_maps() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("postgresql-input000.00.csv");
        let source = input_hstore("hstore", r#""a"=>"b""#);
        let extra = "[columns.c1]\nmap_mode = \"structured-json\"";
        run(&settings(&path, extra), Arc::new(source)).await?;

        let text = std::fs::read_to_string(&path)?;
        assert_eq!(text, "c1\n\"{\"\"a\"\":\"\"b\"\"}\"\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_column_options_find_mixed_case_columns() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.csv");
        let memory = MemorySource::new();
        memory.register_table(
            "input_hstore",
            MemoryTable::new(vec![ColumnMetadata::new("Attrs", "hstore")])
                .with_rows(vec![vec![RawValue::Text(r#""a"=>"b""#.to_string())]]),
        );
        let extra = "[columns.Attrs]\nmap_mode = \"structured-json\"";
        run(&settings(&path, extra), Arc::new(memory)).await?;

        let text = std::fs::read_to_string(&path)?;
        assert_eq!(text, "Attrs\n\"{\"\"a\"\":\"\"b\"\"}\"\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_run_removes_output() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.csv");
        let source = input_hstore("hstore", r#""a"=>"#);
        let extra = "[columns.c1]\nmap_mode = \"structured-json\"";
        let err = run(&settings(&path, extra), Arc::new(source))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::JobFailed { partition: 0, .. })
        ));
        assert!(!path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_unsupported_type_creates_no_output() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.csv");
        let source = input_hstore("geometry", "POINT(0 0)");
        let err = run(&settings(&path, ""), Arc::new(source))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::UnsupportedType { .. })
        ));
        assert!(!path.exists());
        Ok(())
    }
}
