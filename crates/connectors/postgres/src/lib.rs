//! PostgreSQL source for Floe.
//!
//! Every connection runs its scans inside a read-only transaction and pulls
//! rows through a portal, `fetch_rows` at a time. Columns the driver cannot
//! decode natively (hstore, numeric, json, uuid, ...) are cast to `text` so the
//! server's own literal form reaches the converter unchanged.

pub mod sql;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use floe_common::{ConnectionParams, Error, Result, SourceDescriptor};
use floe_connector::{
    ColumnMetadata, Connection, ConnectionFactory, QueryResult, RawValue, RowCursor, ScanRequest,
};
use sql::BoundsCast;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Client, Config, NoTls, Portal, Row, Transaction};
use tracing::{debug, warn};

/// Builds the driver configuration for `params`. Sessions run in UTC so
/// timestamp key bounds and range literals agree.
pub fn pg_config(params: &ConnectionParams) -> Config {
    let mut config = Config::new();
    config
        .host(&params.host)
        .port(params.port)
        .user(&params.user)
        .dbname(&params.database)
        .application_name(&params.application_name)
        .connect_timeout(Duration::from_secs(params.connect_timeout_secs))
        .options("-c TimeZone=UTC");
    if let Some(password) = &params.password {
        config.password(password);
    }
    config
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresConnectionFactory;

impl PostgresConnectionFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConnectionFactory for PostgresConnectionFactory {
    async fn connect(&self, source: &SourceDescriptor) -> Result<Box<dyn Connection>> {
        let params = &source.connection;
        let (client, connection) = pg_config(params).connect(NoTls).await.map_err(|e| {
            Error::source_unavailable(format!(
                "cannot connect to {}:{}/{}: {}",
                params.host, params.port, params.database, e
            ))
        })?;
        let task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "postgres connection closed with error");
            }
        });
        debug!(host = %params.host, database = %params.database, "connected");
        Ok(Box::new(PostgresConnection { client, task }))
    }
}

struct PostgresConnection {
    client: Client,
    task: JoinHandle<()>,
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn describe(&mut self, source: &SourceDescriptor) -> Result<Vec<ColumnMetadata>> {
        let statement = self
            .client
            .prepare(&sql::base_query(source))
            .await
            .map_err(map_error)?;
        Ok(statement
            .columns()
            .iter()
            .map(|c| ColumnMetadata::new(c.name(), c.type_().name()))
            .collect())
    }

    async fn key_bounds(
        &mut self,
        source: &SourceDescriptor,
        column: &str,
    ) -> Result<Option<(RawValue, RawValue)>> {
        let typed = self
            .client
            .prepare(&sql::key_bounds_query(source, column, BoundsCast::Native))
            .await
            .map_err(map_error)?;
        let cast = typed
            .columns()
            .first()
            .map(|c| bounds_cast(c.type_()))
            .unwrap_or(BoundsCast::Text);

        let query = sql::key_bounds_query(source, column, cast);
        let row = self
            .client
            .query_one(query.as_str(), &[])
            .await
            .map_err(map_error)?;
        let bounds = match cast {
            BoundsCast::Int8 => bounds_pair::<i64>(&row)?
                .map(|(min, max)| (RawValue::Int(min), RawValue::Int(max))),
            BoundsCast::Float8 => bounds_pair::<f64>(&row)?
                .map(|(min, max)| (RawValue::Float(min), RawValue::Float(max))),
            BoundsCast::Timestamptz => bounds_pair::<DateTime<Utc>>(&row)?
                .map(|(min, max)| (RawValue::Timestamp(min), RawValue::Timestamp(max))),
            BoundsCast::Native | BoundsCast::Text => bounds_pair::<String>(&row)?
                .map(|(min, max)| (RawValue::Text(min), RawValue::Text(max))),
        };
        Ok(bounds)
    }

    async fn query<'a>(&'a mut self, scan: &ScanRequest) -> Result<QueryResult<'a>> {
        let source = &scan.source;
        let described = self
            .client
            .prepare(&sql::base_query(source))
            .await
            .map_err(map_error)?;
        let columns: Vec<ColumnMetadata> = described
            .columns()
            .iter()
            .map(|c| ColumnMetadata::new(c.name(), c.type_().name()))
            .collect();
        let casts: Vec<Option<String>> = described
            .columns()
            .iter()
            .map(|c| text_cast(c.type_()).map(str::to_string))
            .collect();

        let statement = sql::scan_query(source, &casts, scan.range.as_ref());
        debug!(sql = %statement, "starting scan");
        let txn = self
            .client
            .build_transaction()
            .read_only(true)
            .start()
            .await
            .map_err(map_error)?;
        let portal = txn
            .bind(statement.as_str(), &[])
            .await
            .map_err(map_error)?;
        Ok(QueryResult {
            columns,
            cursor: Box::new(PostgresCursor {
                txn,
                portal,
                exhausted: false,
            }),
        })
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let PostgresConnection { client, task } = *self;
        drop(client);
        task.await
            .map_err(|e| Error::source_unavailable(format!("connection task failed: {}", e)))
    }
}

struct PostgresCursor<'a> {
    txn: Transaction<'a>,
    portal: Portal,
    exhausted: bool,
}

#[async_trait]
impl<'a> RowCursor for PostgresCursor<'a> {
    async fn next_batch(&mut self, max_rows: usize) -> Result<Option<Vec<Vec<RawValue>>>> {
        if self.exhausted {
            return Ok(None);
        }
        let max_rows = i32::try_from(max_rows.max(1)).unwrap_or(i32::MAX);
        let rows = self
            .txn
            .query_portal(&self.portal, max_rows)
            .await
            .map_err(map_error)?;
        // a short batch means the portal ran dry
        if rows.len() < max_rows as usize {
            self.exhausted = true;
        }
        if rows.is_empty() {
            return Ok(None);
        }
        rows.iter().map(decode_row).collect::<Result<Vec<_>>>().map(Some)
    }
}

/// The cast a column needs in the scan, or `None` when it decodes natively.
fn text_cast(ty: &Type) -> Option<&'static str> {
    match *ty {
        Type::BOOL
        | Type::INT2
        | Type::INT4
        | Type::INT8
        | Type::FLOAT4
        | Type::FLOAT8
        | Type::TEXT
        | Type::VARCHAR
        | Type::BPCHAR
        | Type::NAME
        | Type::DATE
        | Type::TIMESTAMP
        | Type::TIMESTAMPTZ => None,
        // the text form of money carries a currency symbol
        Type::MONEY => Some("numeric::text"),
        _ => Some("text"),
    }
}

/// The cast that lets a key column's bounds decode as a partitionable value.
fn bounds_cast(ty: &Type) -> BoundsCast {
    match *ty {
        Type::INT2 | Type::INT4 | Type::INT8 => BoundsCast::Int8,
        Type::FLOAT4 | Type::FLOAT8 | Type::NUMERIC => BoundsCast::Float8,
        Type::DATE | Type::TIMESTAMP | Type::TIMESTAMPTZ => BoundsCast::Timestamptz,
        _ => BoundsCast::Text,
    }
}

fn bounds_pair<'a, T: FromSql<'a>>(row: &'a Row) -> Result<Option<(T, T)>> {
    let min: Option<T> = row.try_get(0).map_err(map_error)?;
    let max: Option<T> = row.try_get(1).map_err(map_error)?;
    Ok(min.zip(max))
}

fn decode_row(row: &Row) -> Result<Vec<RawValue>> {
    (0..row.len()).map(|idx| decode(row, idx)).collect()
}

fn decode(row: &Row, idx: usize) -> Result<RawValue> {
    let column = &row.columns()[idx];
    let value = match *column.type_() {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx).map(|v| v.map(RawValue::Bool)),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .map(|v| v.map(|v| RawValue::Int(v as i64))),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .map(|v| v.map(|v| RawValue::Int(v as i64))),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx).map(|v| v.map(RawValue::Int)),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .map(|v| v.map(|v| RawValue::Float(v as f64))),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(idx)
            .map(|v| v.map(RawValue::Float)),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)
            .map(|v| v.map(RawValue::Timestamp)),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)
            .map(|v| v.map(|v| RawValue::Timestamp(v.and_utc()))),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)
            .map(|v| v.map(|v| RawValue::Timestamp(v.and_time(NaiveTime::MIN).and_utc()))),
        _ => row
            .try_get::<_, Option<String>>(idx)
            .map(|v| v.map(RawValue::Text)),
    }
    .map_err(|e| {
        Error::query_failed(format!(
            "cannot decode column '{}' of type {}: {}",
            column.name(),
            column.type_(),
            e
        ))
    })?;
    Ok(value.unwrap_or(RawValue::Null))
}

/// Server-side errors are query failures; anything else means the connection
/// is gone.
fn map_error(e: tokio_postgres::Error) -> Error {
    match e.as_db_error() {
        Some(db) => Error::query_failed(format!("{} (SQLSTATE {})", db.message(), db.code().code())),
        None => Error::source_unavailable(e.to_string()),
    }
}
