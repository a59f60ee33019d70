use floe_common::{ColumnOptions, ConnectionParams, Error, SourceDescriptor};
use floe_engine::JobOptions;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variables prefixed with this override the file, e.g.
/// `FLOE__SOURCE__HOST` or `FLOE__JOB__PARALLELISM`.
pub const ENV_PREFIX: &str = "FLOE";

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub source: SourceSettings,
    #[serde(default)]
    pub job: JobSettings,
    /// Per-column options keyed by column name.
    #[serde(default)]
    pub columns: HashMap<String, ColumnOptions>,
    pub output: OutputSettings,
}

#[derive(Debug, Deserialize)]
pub struct SourceSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    pub database: String,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub application_name: Option<String>,

    /// Exactly one of `table` and `query` must be set.
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub query: Option<String>,

    #[serde(default)]
    pub select: Option<String>,
    #[serde(default, rename = "where")]
    pub filter: Option<String>,
    #[serde(default)]
    pub order_by: Option<String>,
    #[serde(default)]
    pub partition_column: Option<String>,
    #[serde(default)]
    pub fetch_rows: Option<usize>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

#[derive(Debug, Deserialize)]
pub struct JobSettings {
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default = "default_buffer_rows")]
    pub buffer_rows: usize,
}

fn default_parallelism() -> usize {
    1
}

fn default_buffer_rows() -> usize {
    1024
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            concurrency: None,
            buffer_rows: default_buffer_rows(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OutputSettings {
    pub path: PathBuf,
}

impl Settings {
    /// Reads `path` (format chosen by extension), then applies `FLOE__`
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
        let s = config::Config::builder()
            .add_source(config::File::from(path).required(true))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        s.try_deserialize()
    }

    pub fn from_toml(text: &str) -> Result<Self, config::ConfigError> {
        let s = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?;
        s.try_deserialize()
    }

    pub fn job_options(&self) -> JobOptions {
        JobOptions {
            parallelism: self.job.parallelism,
            concurrency: self.job.concurrency,
            buffer_rows: self.job.buffer_rows,
            column_options: self.columns.clone(),
        }
    }
}

impl SourceSettings {
    pub fn descriptor(&self) -> Result<SourceDescriptor, Error> {
        let mut connection = ConnectionParams::new(&self.host, &self.user, &self.database);
        connection.port = self.port;
        connection.password = self.password.clone();
        if let Some(secs) = self.connect_timeout_secs {
            connection.connect_timeout_secs = secs;
        }
        if let Some(name) = &self.application_name {
            connection.application_name = name.clone();
        }

        let mut source = match (&self.table, &self.query) {
            (Some(table), None) => {
                let source = SourceDescriptor::table(connection, table);
                match &self.schema {
                    Some(schema) => source.with_table_schema(schema),
                    None => source,
                }
            }
            (None, Some(query)) => {
                if self.schema.is_some() {
                    return Err(Error::Config(
                        "'schema' applies to 'table', not to 'query'".to_string(),
                    ));
                }
                SourceDescriptor::query(connection, query)
            }
            (Some(_), Some(_)) => {
                return Err(Error::Config(
                    "set either 'table' or 'query', not both".to_string(),
                ));
            }
            (None, None) => {
                return Err(Error::Config("one of 'table' or 'query' is required".to_string()));
            }
        };
        if let Some(select) = &self.select {
            source = source.with_select(select);
        }
        if let Some(filter) = &self.filter {
            source = source.with_filter(filter);
        }
        if let Some(order_by) = &self.order_by {
            source = source.with_order_by(order_by);
        }
        if let Some(column) = &self.partition_column {
            source = source.with_partition_column(column);
        }
        if let Some(fetch_rows) = self.fetch_rows {
            source = source.with_fetch_rows(fetch_rows);
        }
        Ok(source)
    }
}
