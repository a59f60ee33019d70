//! Splits a source into key-range partitions.

use floe_common::{Result, Schema, SourceDescriptor};
use floe_connector::{ConnectionFactory, KeyKind, KeyRange, RawValue, ScanRequest};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One independently executable slice of the source.
#[derive(Debug, Clone)]
pub struct PartitionSpec {
    pub index: usize,
    /// `None` reads every row.
    pub range: Option<KeyRange>,
    pub source: Arc<SourceDescriptor>,
}

impl PartitionSpec {
    pub fn scan_request(&self) -> ScanRequest {
        ScanRequest {
            source: Arc::clone(&self.source),
            range: self.range.clone(),
        }
    }
}

pub struct PartitionPlanner {
    factory: Arc<dyn ConnectionFactory>,
}

impl PartitionPlanner {
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self { factory }
    }

    /// Plans up to `desired_parallelism` partitions over the source's
    /// `partition_column`. Integer, floating point and timestamp keys split;
    /// anything else, or a key `schema` does not name exactly once, silently
    /// degrades the plan to a single partition.
    pub async fn plan(
        &self,
        source: Arc<SourceDescriptor>,
        schema: &Schema,
        desired_parallelism: usize,
    ) -> Result<Vec<PartitionSpec>> {
        let parallelism = desired_parallelism.max(1);
        let column = match &source.partition_column {
            Some(column) if parallelism > 1 => column.clone(),
            Some(_) => return Ok(single(source)),
            None => {
                if parallelism > 1 {
                    debug!(
                        relation = %source.relation,
                        "no partition column configured, reading with one partition"
                    );
                }
                return Ok(single(source));
            }
        };

        match schema.names().filter(|name| *name == column).count() {
            1 => {}
            0 => {
                warn!(
                    column = %column,
                    relation = %source.relation,
                    "partition column is not in the source, reading with one partition"
                );
                return Ok(single(source));
            }
            _ => {
                warn!(
                    column = %column,
                    relation = %source.relation,
                    "partition column name is ambiguous, reading with one partition"
                );
                return Ok(single(source));
            }
        }

        let mut conn = self.factory.connect(&source).await?;
        let bounds = conn.key_bounds(&source, &column).await;
        if let Err(e) = conn.close().await {
            warn!(error = %e, "failed to close planning connection");
        }

        let (kind, min, max) = match bounds? {
            Some((min, max)) => match key_bounds(&min, &max) {
                Some(bounds) => bounds,
                None => {
                    warn!(
                        column = %column,
                        sample = %min,
                        "partition column is not an ordered numeric or timestamp key, reading with one partition"
                    );
                    return Ok(single(source));
                }
            },
            None => {
                debug!(column = %column, "source is empty, reading with one partition");
                return Ok(single(source));
            }
        };

        let partitions: Vec<PartitionSpec> = split_ranges(&column, kind, min, max, parallelism)
            .into_iter()
            .enumerate()
            .map(|(index, range)| PartitionSpec {
                index,
                range,
                source: Arc::clone(&source),
            })
            .collect();
        info!(
            column = %column,
            kind = ?kind,
            min,
            max,
            partitions = partitions.len(),
            "planned key-range partitions"
        );
        Ok(partitions)
    }
}

/// Sampled bounds as split points. Floating point keys split on their floor.
fn key_bounds(min: &RawValue, max: &RawValue) -> Option<(KeyKind, i64, i64)> {
    let kind = match (min, max) {
        (RawValue::Int(_), RawValue::Int(_)) | (RawValue::Float(_), RawValue::Float(_)) => {
            KeyKind::Integer
        }
        (RawValue::Timestamp(_), RawValue::Timestamp(_)) => KeyKind::Timestamp,
        _ => return None,
    };
    Some((kind, min.as_key(kind)?, max.as_key(kind)?))
}

fn single(source: Arc<SourceDescriptor>) -> Vec<PartitionSpec> {
    vec![PartitionSpec {
        index: 0,
        range: None,
        source,
    }]
}

/// Splits `[min, max]` into at most `parallelism` contiguous ranges.
/// Timestamp bounds are microseconds since the Unix epoch.
///
/// The first range has no lower bound and also takes null keys; the last has
/// no upper bound, so keys outside the sampled bounds still land somewhere.
pub fn split_ranges(
    column: &str,
    kind: KeyKind,
    min: i64,
    max: i64,
    parallelism: usize,
) -> Vec<Option<KeyRange>> {
    let span = max as i128 - min as i128 + 1;
    let count = (parallelism as i128).min(span);
    if count <= 1 {
        return vec![None];
    }

    // b_i = min + ceil(i * span / count); strictly increasing because span >= count
    let bounds: Vec<i64> = (1..count)
        .map(|i| (min as i128 + (i * span + count - 1) / count) as i64)
        .collect();

    let mut ranges = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let lower = if i == 0 { None } else { Some(bounds[i - 1]) };
        let upper = bounds.get(i).copied();
        ranges.push(Some(KeyRange {
            column: column.to_string(),
            kind,
            lower,
            upper,
            include_nulls: i == 0,
        }));
    }
    ranges
}
