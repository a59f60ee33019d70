//! Resolves the output schema from the source's column metadata.

use floe_common::{
    ColumnOptions, ColumnSpec, ConversionRule, Error, MapMode, OutputType, Result, Schema,
    SchemaRef, SourceDescriptor,
};
use floe_connector::{ColumnMetadata, ConnectionFactory};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// How a source type tag converts when no option overrides it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Scalar(OutputType),
    /// Key-value maps; rendering is chosen per column.
    Map,
}

/// The built-in table from source type tags to output types.
pub fn type_family(source_type: &str) -> Option<TypeFamily> {
    use OutputType::*;
    let family = match source_type.to_ascii_lowercase().as_str() {
        "int2" | "int4" | "int8" | "smallint" | "integer" | "bigint" | "oid" | "serial"
        | "bigserial" | "smallserial" => TypeFamily::Scalar(Long),
        "float4" | "float8" | "real" | "double precision" | "numeric" | "decimal" | "money" => {
            TypeFamily::Scalar(Double)
        }
        "bool" | "boolean" => TypeFamily::Scalar(Boolean),
        "text" | "varchar" | "bpchar" | "char" | "name" | "uuid" | "xml" | "citext" | "inet"
        | "cidr" | "macaddr" => TypeFamily::Scalar(String),
        "date" | "timestamp" | "timestamptz" => TypeFamily::Scalar(Timestamp),
        "json" | "jsonb" => TypeFamily::Scalar(Json),
        "hstore" => TypeFamily::Map,
        _ => return None,
    };
    Some(family)
}

/// Inspects the source once and produces the schema every partition shares.
pub struct SchemaResolver {
    factory: Arc<dyn ConnectionFactory>,
}

impl SchemaResolver {
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self { factory }
    }

    /// Issues one metadata request on a short-lived connection. Fails with
    /// `UnsupportedType` before any row is read if a column cannot convert.
    pub async fn resolve(
        &self,
        source: &SourceDescriptor,
        column_options: &HashMap<String, ColumnOptions>,
    ) -> Result<SchemaRef> {
        let mut conn = self.factory.connect(source).await?;
        let described = conn.describe(source).await;
        if let Err(e) = conn.close().await {
            warn!(error = %e, "failed to close metadata connection");
        }
        let columns = described?;
        debug!(relation = %source.relation, columns = columns.len(), "source described");
        Ok(Arc::new(build_schema(&columns, column_options)?))
    }
}

/// Maps reported columns to column specs, applying per-column options.
pub fn build_schema(
    columns: &[ColumnMetadata],
    column_options: &HashMap<String, ColumnOptions>,
) -> Result<Schema> {
    let options_by_name = match_options(columns, column_options)?;
    let default_options = ColumnOptions::default();
    let specs = columns
        .iter()
        .enumerate()
        .map(|(position, column)| {
            let options = options_by_name
                .get(column.name.as_str())
                .copied()
                .unwrap_or(&default_options);
            let rule = resolve_rule(column, options)?;
            Ok(ColumnSpec::new(&column.name, position, &column.type_tag, rule))
        })
        .collect::<Result<Vec<_>>>()?;
    Schema::new(specs)
}

/// Pairs option keys with reported column names. A key matches its column
/// exactly, or else the one column equal to it ignoring case, since settings
/// loaders may lowercase keys.
fn match_options<'a>(
    columns: &'a [ColumnMetadata],
    column_options: &'a HashMap<String, ColumnOptions>,
) -> Result<HashMap<&'a str, &'a ColumnOptions>> {
    let mut matched = HashMap::new();
    for (key, options) in column_options {
        let name = if columns.iter().any(|c| &c.name == key) {
            key.as_str()
        } else {
            let folded = key.to_lowercase();
            let mut candidates: Vec<&str> = columns
                .iter()
                .map(|c| c.name.as_str())
                .filter(|name| name.to_lowercase() == folded)
                .collect();
            candidates.sort_unstable();
            candidates.dedup();
            match candidates.as_slice() {
                [name] => {
                    debug!(key = %key, column = %name, "column options matched ignoring case");
                    *name
                }
                [] => {
                    return Err(Error::Config(format!(
                        "options given for column '{}', which the source does not report",
                        key
                    )));
                }
                several => {
                    return Err(Error::Config(format!(
                        "options for column '{}' match several columns: {}",
                        key,
                        several.join(", ")
                    )));
                }
            }
        };
        if matched.insert(name, options).is_some() {
            return Err(Error::Config(format!(
                "options given more than once for column '{}'",
                name
            )));
        }
    }
    Ok(matched)
}

fn resolve_rule(column: &ColumnMetadata, options: &ColumnOptions) -> Result<ConversionRule> {
    match type_family(&column.type_tag) {
        Some(TypeFamily::Map) => {
            let mode = match (options.map_mode, options.output_type) {
                (Some(mode), _) => mode,
                (None, None) | (None, Some(OutputType::String)) => MapMode::FlattenedString,
                (None, Some(OutputType::Json)) => MapMode::StructuredJson,
                (None, Some(other)) => {
                    return Err(Error::Config(format!(
                        "map column '{}' cannot be converted to {}",
                        column.name, other
                    )));
                }
            };
            Ok(ConversionRule::Map(mode))
        }
        family => {
            if options.map_mode.is_some() {
                warn!(
                    column = %column.name,
                    source_type = %column.type_tag,
                    "map_mode ignored for a column that is not a map"
                );
            }
            let output_type = match (options.output_type, family) {
                (Some(output_type), _) => output_type,
                (None, Some(TypeFamily::Scalar(output_type))) => output_type,
                _ => {
                    return Err(Error::UnsupportedType {
                        column: column.name.clone(),
                        source_type: column.type_tag.clone(),
                    });
                }
            };
            Ok(ConversionRule::Direct(output_type))
        }
    }
}
