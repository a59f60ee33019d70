//! SQL text for the statements the connector issues.
//!
//! Only identifiers and key bounds are generated here. `select`, `where` and
//! `order_by` are taken verbatim from the job configuration.
//!
//! Timestamp literals are written in UTC; connections set `TimeZone=UTC` so
//! `date` and `timestamp` keys compare against them the same way.

use chrono::{DateTime, Datelike};
use floe_common::{Relation, SourceDescriptor};
use floe_connector::{KeyKind, KeyRange};

/// Double-quotes an identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// The statement the source's rows come from, before partitioning.
pub fn base_query(source: &SourceDescriptor) -> String {
    let select = source.select.as_deref().unwrap_or("*");
    let mut sql = match &source.relation {
        Relation::Table { schema, name } => {
            let table = match schema {
                Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(name)),
                None => quote_ident(name),
            };
            format!("SELECT {} FROM {}", select, table)
        }
        Relation::Query(query) => {
            let query = query.trim().trim_end_matches(';');
            if source.select.is_none() && source.filter.is_none() {
                return query.to_string();
            }
            format!("SELECT {} FROM ({}) AS floe_query", select, query)
        }
    };
    if let Some(filter) = &source.filter {
        sql.push_str(&format!(" WHERE {}", filter));
    }
    sql
}

/// How the bounds query renders `MIN`/`MAX` for the driver to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsCast {
    /// The column's own type; only prepared, to learn it.
    Native,
    Int8,
    /// Floating point and numeric keys. Non-finite values are skipped.
    Float8,
    /// `date`, `timestamp` and `timestamptz` keys. Infinities are skipped.
    Timestamptz,
    Text,
}

/// `MIN`/`MAX` of `column` over the base query.
pub fn key_bounds_query(source: &SourceDescriptor, column: &str, cast: BoundsCast) -> String {
    let column = quote_ident(column);
    let (cast, finite) = match cast {
        BoundsCast::Native => ("", None),
        BoundsCast::Int8 => ("::int8", None),
        BoundsCast::Float8 => (
            "::float8",
            Some(format!(
                "{column}::float8 NOT IN ('NaN', 'Infinity', '-Infinity')"
            )),
        ),
        BoundsCast::Timestamptz => (
            "::timestamptz",
            Some(format!("isfinite({column}::timestamptz)")),
        ),
        BoundsCast::Text => ("::text", None),
    };
    let mut sql = format!(
        "SELECT MIN({column}){cast}, MAX({column}){cast} FROM ({}) AS floe_bounds",
        base_query(source)
    );
    if let Some(finite) = finite {
        sql.push_str(&format!(" WHERE {}", finite));
    }
    sql
}

fn key_literal(kind: KeyKind, key: i64) -> String {
    match kind {
        KeyKind::Integer => key.to_string(),
        KeyKind::Timestamp => match DateTime::from_timestamp_micros(key) {
            Some(at) if (1..=9999).contains(&at.year()) => {
                format!("'{}'::timestamptz", at.format("%Y-%m-%d %H:%M:%S%.6f+00"))
            }
            _ => format!("(TIMESTAMPTZ 'epoch' + {} * INTERVAL '1 microsecond')", key),
        },
    }
}

/// The predicate selecting one key range, or `None` for every row.
pub fn range_predicate(range: &KeyRange) -> Option<String> {
    let column = quote_ident(&range.column);
    let mut bounds = Vec::new();
    if let Some(lower) = range.lower {
        bounds.push(format!("{} >= {}", column, key_literal(range.kind, lower)));
    }
    if let Some(upper) = range.upper {
        bounds.push(format!("{} < {}", column, key_literal(range.kind, upper)));
    }
    match (bounds.is_empty(), range.include_nulls) {
        (true, true) => None,
        (true, false) => Some(format!("{} IS NOT NULL", column)),
        (false, false) => Some(bounds.join(" AND ")),
        (false, true) => Some(format!("({} OR {} IS NULL)", bounds.join(" AND "), column)),
    }
}

/// The statement one partition runs. `casts` holds one entry per column of
/// the base query, e.g. `Some("text")`.
///
/// The range and `order_by` apply to the base query's own names; the outer
/// select then renames columns by position, so duplicate or odd names in the
/// base query never need to be referenced.
pub fn scan_query(
    source: &SourceDescriptor,
    casts: &[Option<String>],
    range: Option<&KeyRange>,
) -> String {
    let mut inner = format!("SELECT * FROM ({}) AS floe_base", base_query(source));
    if let Some(predicate) = range.and_then(range_predicate) {
        inner.push_str(&format!(" WHERE {}", predicate));
    }
    if let Some(order_by) = &source.order_by {
        inner.push_str(&format!(" ORDER BY {}", order_by));
    }
    if casts.is_empty() {
        return format!("SELECT FROM ({}) AS floe_scan", inner);
    }

    let aliases: Vec<String> = (0..casts.len())
        .map(|i| quote_ident(&format!("c{}", i)))
        .collect();
    let projection = aliases
        .iter()
        .zip(casts)
        .map(|(alias, cast)| match cast {
            Some(cast) => format!("{}::{}", alias, cast),
            None => alias.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT {} FROM ({}) AS floe_scan({})",
        projection,
        inner,
        aliases.join(", ")
    )
}
