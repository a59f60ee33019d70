//! An in-memory relational source.
//!
//! Tables are registered up front, like a catalog. Every connection is
//! counted so callers can assert that a job released everything it opened.
//! Scans honour the relation and the key range only; `select`, `filter` and
//! `order_by` are rejected because there is no SQL to evaluate them against.

use crate::{
    ColumnMetadata, Connection, ConnectionFactory, KeyRange, QueryResult, RawValue, RowCursor,
    ScanRequest,
};
use async_trait::async_trait;
use floe_common::{Error, Relation, Result, SourceDescriptor};
use std::cmp;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;

/// A registered table: column metadata plus rows in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    pub columns: Vec<ColumnMetadata>,
    pub rows: Vec<Vec<RawValue>>,
}

impl MemoryTable {
    pub fn new(columns: Vec<ColumnMetadata>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(mut self, rows: Vec<Vec<RawValue>>) -> Self {
        self.rows = rows;
        self
    }

    fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| Error::query_failed(format!("column \"{}\" does not exist", name)))
    }
}

#[derive(Default)]
struct Inner {
    tables: RwLock<HashMap<String, Arc<MemoryTable>>>,
    queries: RwLock<HashMap<String, String>>,
    // (table, row index) that drops the connection when reached
    poisoned_rows: RwLock<Vec<(String, usize)>>,
    unavailable: AtomicBool,
    batch_delay_ms: AtomicUsize,
    connections_opened: AtomicUsize,
    open_connections: AtomicUsize,
    scans_started: AtomicUsize,
    describes: AtomicUsize,
}

/// Cheap to clone; clones share tables and counters.
#[derive(Clone, Default)]
pub struct MemorySource {
    inner: Arc<Inner>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a table.
    pub fn register_table(&self, name: impl Into<String>, table: MemoryTable) {
        let mut tables = self.inner.tables.write().unwrap_or_else(|e| e.into_inner());
        tables.insert(name.into(), Arc::new(table));
    }

    /// Makes `Relation::Query(sql)` read the rows of `table`.
    pub fn register_query(&self, sql: impl Into<String>, table: impl Into<String>) {
        let mut queries = self.inner.queries.write().unwrap_or_else(|e| e.into_inner());
        queries.insert(sql.into(), table.into());
    }

    /// Every subsequent `connect` fails with `SourceUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// A scan reaching row `row` of `table` fails as if the connection dropped.
    pub fn fail_on_row(&self, table: impl Into<String>, row: usize) {
        let mut poisoned = self
            .inner
            .poisoned_rows
            .write()
            .unwrap_or_else(|e| e.into_inner());
        poisoned.push((table.into(), row));
    }

    /// Sleeps before every batch, to keep partitions in flight.
    pub fn set_batch_delay(&self, delay: Duration) {
        self.inner
            .batch_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn connections_opened(&self) -> usize {
        self.inner.connections_opened.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        self.inner.open_connections.load(Ordering::SeqCst)
    }

    pub fn scans_started(&self) -> usize {
        self.inner.scans_started.load(Ordering::SeqCst)
    }

    pub fn describes(&self) -> usize {
        self.inner.describes.load(Ordering::SeqCst)
    }

    fn resolve(&self, source: &SourceDescriptor) -> Result<(String, Arc<MemoryTable>)> {
        let name = match &source.relation {
            Relation::Table { name, .. } => name.clone(),
            Relation::Query(sql) => {
                let queries = self.inner.queries.read().unwrap_or_else(|e| e.into_inner());
                queries
                    .get(sql)
                    .cloned()
                    .ok_or_else(|| Error::query_failed(format!("unknown query: {}", sql)))?
            }
        };
        let tables = self.inner.tables.read().unwrap_or_else(|e| e.into_inner());
        let table = tables
            .get(&name)
            .cloned()
            .ok_or_else(|| Error::query_failed(format!("relation \"{}\" does not exist", name)))?;
        Ok((name, table))
    }
}

#[async_trait]
impl ConnectionFactory for MemorySource {
    async fn connect(&self, _source: &SourceDescriptor) -> Result<Box<dyn Connection>> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(Error::source_unavailable("memory source is unavailable"));
        }
        self.inner.connections_opened.fetch_add(1, Ordering::SeqCst);
        self.inner.open_connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            source: self.clone(),
        }))
    }
}

struct MemoryConnection {
    source: MemorySource,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.source
            .inner
            .open_connections
            .fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn describe(&mut self, source: &SourceDescriptor) -> Result<Vec<ColumnMetadata>> {
        self.source.inner.describes.fetch_add(1, Ordering::SeqCst);
        let (_, table) = self.source.resolve(source)?;
        Ok(table.columns.clone())
    }

    async fn key_bounds(
        &mut self,
        source: &SourceDescriptor,
        column: &str,
    ) -> Result<Option<(RawValue, RawValue)>> {
        let (_, table) = self.source.resolve(source)?;
        let index = table.column_index(column)?;
        let mut bounds: Option<(RawValue, RawValue)> = None;
        for key in table.rows.iter().map(|row| &row[index]) {
            if key.is_null() || matches!(key, RawValue::Float(v) if v.is_nan()) {
                continue;
            }
            bounds = match bounds {
                None => Some((key.clone(), key.clone())),
                Some((min, max)) => match (key_order(key, &min), key_order(key, &max)) {
                    (Some(below), Some(above)) => Some((
                        if below.is_lt() { key.clone() } else { min },
                        if above.is_gt() { key.clone() } else { max },
                    )),
                    // mixed key types: report them and let the planner decide
                    _ => return Ok(Some((min, key.clone()))),
                },
            };
        }
        Ok(bounds)
    }

    async fn query<'a>(&'a mut self, scan: &ScanRequest) -> Result<QueryResult<'a>> {
        let source = &scan.source;
        if source.select.is_some() || source.filter.is_some() || source.order_by.is_some() {
            return Err(Error::query_failed(
                "memory source does not evaluate select, filter or order_by",
            ));
        }
        let (name, table) = self.source.resolve(source)?;
        let key_index = match &scan.range {
            Some(range) => Some(table.column_index(&range.column)?),
            None => None,
        };
        let poisoned: Vec<usize> = {
            let poisoned = self
                .source
                .inner
                .poisoned_rows
                .read()
                .unwrap_or_else(|e| e.into_inner());
            poisoned
                .iter()
                .filter(|(table_name, _)| *table_name == name)
                .map(|(_, row)| *row)
                .collect()
        };
        self.source.inner.scans_started.fetch_add(1, Ordering::SeqCst);
        debug!(table = %name, range = ?scan.range, "memory scan started");

        let delay_ms = self.source.inner.batch_delay_ms.load(Ordering::SeqCst) as u64;
        Ok(QueryResult {
            columns: table.columns.clone(),
            cursor: Box::new(MemoryCursor {
                table,
                range: scan.range.clone(),
                key_index,
                poisoned,
                next_row: 0,
                delay: Duration::from_millis(delay_ms),
            }),
        })
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

struct MemoryCursor {
    table: Arc<MemoryTable>,
    range: Option<KeyRange>,
    key_index: Option<usize>,
    poisoned: Vec<usize>,
    next_row: usize,
    delay: Duration,
}

impl MemoryCursor {
    fn selects(&self, row: &[RawValue]) -> bool {
        match (&self.range, self.key_index) {
            (Some(range), Some(index)) => range.contains(row[index].as_key(range.kind)),
            _ => true,
        }
    }
}

fn key_order(a: &RawValue, b: &RawValue) -> Option<cmp::Ordering> {
    match (a, b) {
        (RawValue::Int(a), RawValue::Int(b)) => Some(a.cmp(b)),
        (RawValue::Float(a), RawValue::Float(b)) => a.partial_cmp(b),
        (RawValue::Timestamp(a), RawValue::Timestamp(b)) => Some(a.cmp(b)),
        (RawValue::Text(a), RawValue::Text(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[async_trait]
impl RowCursor for MemoryCursor {
    async fn next_batch(&mut self, max_rows: usize) -> Result<Option<Vec<Vec<RawValue>>>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut batch = Vec::new();
        while self.next_row < self.table.rows.len() && batch.len() < max_rows.max(1) {
            let index = self.next_row;
            self.next_row += 1;
            let row = &self.table.rows[index];
            if !self.selects(row) {
                continue;
            }
            if self.poisoned.contains(&index) {
                return Err(Error::source_unavailable(format!(
                    "connection dropped while reading row {}",
                    index
                )));
            }
            batch.push(row.clone());
        }
        if batch.is_empty() {
            Ok(None)
        } else {
            Ok(Some(batch))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyKind;
    use chrono::{TimeZone, Utc};
    use floe_common::ConnectionParams;

    fn descriptor(table: &str) -> SourceDescriptor {
        SourceDescriptor::table(ConnectionParams::new("memory", "test", "test"), table)
    }

    fn numbers(n: i64) -> MemoryTable {
        MemoryTable::new(vec![ColumnMetadata::new("id", "int8")])
            .with_rows((0..n).map(|i| vec![RawValue::Int(i)]).collect())
    }

    async fn drain(cursor: &mut Box<dyn RowCursor + '_>, max_rows: usize) -> Vec<Vec<RawValue>> {
        let mut rows = Vec::new();
        while let Some(batch) = cursor.next_batch(max_rows).await.unwrap() {
            assert!(batch.len() <= max_rows);
            rows.extend(batch);
        }
        rows
    }

    #[tokio::test]
    async fn test_connections_are_counted_and_released() {
        let source = MemorySource::new();
        source.register_table("t", numbers(3));

        let conn = source.connect(&descriptor("t")).await.unwrap();
        assert_eq!(source.open_connections(), 1);
        conn.close().await.unwrap();
        assert_eq!(source.open_connections(), 0);

        let conn = source.connect(&descriptor("t")).await.unwrap();
        drop(conn);
        assert_eq!(source.open_connections(), 0);
        assert_eq!(source.connections_opened(), 2);
    }

    #[tokio::test]
    async fn test_scan_respects_range_and_batch_size() {
        let source = MemorySource::new();
        source.register_table("t", numbers(10));
        let mut conn = source.connect(&descriptor("t")).await.unwrap();
        let scan = ScanRequest {
            source: Arc::new(descriptor("t")),
            range: Some(KeyRange {
                column: "id".to_string(),
                kind: KeyKind::Integer,
                lower: Some(3),
                upper: Some(8),
                include_nulls: false,
            }),
        };
        let result = conn.query(&scan).await.unwrap();
        let mut cursor = result.cursor;
        let rows = drain(&mut cursor, 2).await;
        let keys: Vec<i64> = rows.iter().filter_map(|r| r[0].as_int()).collect();
        assert_eq!(keys, vec![3, 4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn test_key_bounds() {
        let source = MemorySource::new();
        source.register_table("t", numbers(5));
        source.register_table("empty", MemoryTable::new(vec![ColumnMetadata::new("id", "int8")]));
        let mut conn = source.connect(&descriptor("t")).await.unwrap();

        let bounds = conn.key_bounds(&descriptor("t"), "id").await.unwrap();
        assert_eq!(bounds, Some((RawValue::Int(0), RawValue::Int(4))));
        let bounds = conn.key_bounds(&descriptor("empty"), "id").await.unwrap();
        assert_eq!(bounds, None);
        assert!(conn.key_bounds(&descriptor("t"), "missing").await.is_err());
    }

    #[tokio::test]
    async fn test_timestamp_keys_bound_and_select() {
        let source = MemorySource::new();
        let day = |d: u32| RawValue::Timestamp(Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap());
        source.register_table(
            "events",
            MemoryTable::new(vec![ColumnMetadata::new("at", "timestamptz")])
                .with_rows(vec![vec![day(3)], vec![RawValue::Null], vec![day(1)], vec![day(9)]]),
        );
        let mut conn = source.connect(&descriptor("events")).await.unwrap();
        let bounds = conn.key_bounds(&descriptor("events"), "at").await.unwrap();
        assert_eq!(bounds, Some((day(1), day(9))));

        let lower = day(2).as_key(KeyKind::Timestamp);
        let scan = ScanRequest {
            source: Arc::new(descriptor("events")),
            range: Some(KeyRange {
                column: "at".to_string(),
                kind: KeyKind::Timestamp,
                lower,
                upper: None,
                include_nulls: false,
            }),
        };
        let mut cursor = conn.query(&scan).await.unwrap().cursor;
        assert_eq!(drain(&mut cursor, 10).await, vec![vec![day(3)], vec![day(9)]]);
    }

    #[tokio::test]
    async fn test_unavailable_source_refuses_connections() {
        let source = MemorySource::new();
        source.set_unavailable(true);
        let result = source.connect(&descriptor("t")).await;
        assert!(matches!(result, Err(Error::SourceUnavailable { .. })));
        assert_eq!(source.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_poisoned_row_fails_the_scan() {
        let source = MemorySource::new();
        source.register_table("t", numbers(4));
        source.fail_on_row("t", 2);
        let mut conn = source.connect(&descriptor("t")).await.unwrap();
        let scan = ScanRequest {
            source: Arc::new(descriptor("t")),
            range: None,
        };
        let mut cursor = conn.query(&scan).await.unwrap().cursor;
        let first = cursor.next_batch(2).await.unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert!(cursor.next_batch(2).await.is_err());
    }

    #[tokio::test]
    async fn test_registered_query_reads_its_table() {
        let source = MemorySource::new();
        source.register_table("t", numbers(2));
        source.register_query("SELECT * FROM t", "t");
        let query = SourceDescriptor::query(
            ConnectionParams::new("memory", "test", "test"),
            "SELECT * FROM t",
        );
        let mut conn = source.connect(&query).await.unwrap();
        let columns = conn.describe(&query).await.unwrap();
        assert_eq!(columns, vec![ColumnMetadata::new("id", "int8")]);
        assert_eq!(source.describes(), 1);
    }
}
