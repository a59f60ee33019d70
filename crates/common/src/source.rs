use serde::Deserialize;
use std::fmt;

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionParams {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    pub database: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_application_name")]
    pub application_name: String,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_connect_timeout_secs() -> u64 {
    300
}

fn default_application_name() -> String {
    "floe".to_string()
}

impl ConnectionParams {
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            user: user.into(),
            password: None,
            database: database.into(),
            connect_timeout_secs: default_connect_timeout_secs(),
            application_name: default_application_name(),
        }
    }
}

/// The rows a job extracts: a table or a free-form query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    Table { schema: Option<String>, name: String },
    Query(String),
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relation::Table {
                schema: Some(schema),
                name,
            } => write!(f, "{}.{}", schema, name),
            Relation::Table { schema: None, name } => f.write_str(name),
            Relation::Query(_) => f.write_str("<query>"),
        }
    }
}

/// Connection parameters plus what to read. Immutable once a job starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub connection: ConnectionParams,
    pub relation: Relation,
    /// Select list for a table relation; `*` when unset.
    pub select: Option<String>,
    /// Filter applied to a table relation before partitioning.
    pub filter: Option<String>,
    /// Ordering applied inside each partition.
    pub order_by: Option<String>,
    /// Integer, floating point or timestamp key used to split the rows into
    /// ranges.
    pub partition_column: Option<String>,
    /// Rows pulled per round-trip.
    pub fetch_rows: usize,
}

impl SourceDescriptor {
    pub const DEFAULT_FETCH_ROWS: usize = 10_000;

    pub fn table(connection: ConnectionParams, name: impl Into<String>) -> Self {
        Self::new(
            connection,
            Relation::Table {
                schema: None,
                name: name.into(),
            },
        )
    }

    pub fn query(connection: ConnectionParams, sql: impl Into<String>) -> Self {
        Self::new(connection, Relation::Query(sql.into()))
    }

    fn new(connection: ConnectionParams, relation: Relation) -> Self {
        Self {
            connection,
            relation,
            select: None,
            filter: None,
            order_by: None,
            partition_column: None,
            fetch_rows: Self::DEFAULT_FETCH_ROWS,
        }
    }

    pub fn with_table_schema(mut self, table_schema: impl Into<String>) -> Self {
        if let Relation::Table { schema, .. } = &mut self.relation {
            *schema = Some(table_schema.into());
        }
        self
    }

    pub fn with_select(mut self, select: impl Into<String>) -> Self {
        self.select = Some(select.into());
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    pub fn with_partition_column(mut self, column: impl Into<String>) -> Self {
        self.partition_column = Some(column.into());
        self
    }

    /// Zero is treated as one row per round-trip.
    pub fn with_fetch_rows(mut self, fetch_rows: usize) -> Self {
        self.fetch_rows = fetch_rows.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_descriptor_defaults() {
        let source = SourceDescriptor::table(
            ConnectionParams::new("localhost", "test_user", "test_db"),
            "input_hstore",
        );
        assert_eq!(source.fetch_rows, SourceDescriptor::DEFAULT_FETCH_ROWS);
        assert_eq!(source.connection.port, 5432);
        assert_eq!(source.relation.to_string(), "input_hstore");
        assert!(source.partition_column.is_none());
    }

    #[test]
    fn test_table_schema_only_applies_to_tables() {
        let conn = ConnectionParams::new("localhost", "u", "d");
        let table = SourceDescriptor::table(conn.clone(), "t").with_table_schema("public");
        assert_eq!(table.relation.to_string(), "public.t");

        let query = SourceDescriptor::query(conn, "SELECT 1").with_table_schema("public");
        assert_eq!(query.relation, Relation::Query("SELECT 1".to_string()));
    }

    #[test]
    fn test_fetch_rows_is_at_least_one() {
        let source =
            SourceDescriptor::table(ConnectionParams::new("h", "u", "d"), "t").with_fetch_rows(0);
        assert_eq!(source.fetch_rows, 1);
    }
}
