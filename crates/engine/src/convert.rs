//! Conversion of raw source values into cells of the column's output type.
//!
//! A closed match over `(rule, raw value)`: no I/O, no state.

use crate::hstore;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use floe_common::{Cell, ColumnSpec, ConversionError, ConversionRule, MapMode, OutputType};
use floe_connector::RawValue;
use serde_json::Value;

/// Converts one raw value under `column`'s rule. Null is null under every rule.
pub fn convert(column: &ColumnSpec, raw: RawValue) -> Result<Cell, ConversionError> {
    if raw.is_null() {
        return Ok(Cell::Null);
    }
    match column.rule {
        ConversionRule::Map(mode) => convert_map(mode, raw),
        ConversionRule::Direct(output_type) => convert_direct(output_type, raw),
    }
}

fn convert_map(mode: MapMode, raw: RawValue) -> Result<Cell, ConversionError> {
    match raw {
        RawValue::Text(text) => {
            let pairs = hstore::parse(&text).map_err(|reason| ConversionError::new(&text, reason))?;
            Ok(match mode {
                MapMode::FlattenedString => Cell::String(text),
                MapMode::StructuredJson => Cell::Json(hstore::to_json(&pairs)),
            })
        }
        RawValue::Map(pairs) => Ok(match mode {
            MapMode::FlattenedString => Cell::String(hstore::render(&pairs)),
            MapMode::StructuredJson => Cell::Json(hstore::to_json(&pairs)),
        }),
        other => Err(mismatch(&other, "a key-value map")),
    }
}

fn convert_direct(output_type: OutputType, raw: RawValue) -> Result<Cell, ConversionError> {
    match output_type {
        OutputType::String => to_string(raw).map(Cell::String),
        OutputType::Long => to_long(raw).map(Cell::Long),
        OutputType::Double => to_double(raw).map(Cell::Double),
        OutputType::Boolean => to_boolean(raw).map(Cell::Boolean),
        OutputType::Timestamp => to_timestamp(raw).map(Cell::Timestamp),
        OutputType::Json => to_json(raw).map(Cell::Json),
    }
}

fn to_string(raw: RawValue) -> Result<String, ConversionError> {
    Ok(match raw {
        RawValue::Text(s) => s,
        RawValue::Bool(v) => v.to_string(),
        RawValue::Int(v) => v.to_string(),
        RawValue::Float(v) => v.to_string(),
        RawValue::Timestamp(v) => v.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        RawValue::Map(pairs) => hstore::render(&pairs),
        RawValue::Null => return Err(mismatch(&RawValue::Null, "string")),
    })
}

fn to_long(raw: RawValue) -> Result<i64, ConversionError> {
    match raw {
        RawValue::Int(v) => Ok(v),
        RawValue::Bool(v) => Ok(v as i64),
        RawValue::Float(v) if v.is_finite() && v.fract() == 0.0 => {
            if v >= i64::MIN as f64 && v < i64::MAX as f64 {
                Ok(v as i64)
            } else {
                Err(ConversionError::new(&v.to_string(), "out of range for long"))
            }
        }
        RawValue::Text(ref s) => s
            .trim()
            .parse::<i64>()
            .map_err(|e| ConversionError::new(s, format!("not a long: {}", e))),
        other => Err(mismatch(&other, "long")),
    }
}

fn to_double(raw: RawValue) -> Result<f64, ConversionError> {
    match raw {
        RawValue::Float(v) => Ok(v),
        RawValue::Int(v) => Ok(v as f64),
        RawValue::Bool(v) => Ok(if v { 1.0 } else { 0.0 }),
        RawValue::Text(ref s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| ConversionError::new(s, format!("not a double: {}", e))),
        other => Err(mismatch(&other, "double")),
    }
}

fn to_boolean(raw: RawValue) -> Result<bool, ConversionError> {
    match raw {
        RawValue::Bool(v) => Ok(v),
        RawValue::Int(0) => Ok(false),
        RawValue::Int(1) => Ok(true),
        RawValue::Text(ref s) => match s.trim().to_ascii_lowercase().as_str() {
            "t" | "true" | "y" | "yes" | "on" | "1" => Ok(true),
            "f" | "false" | "n" | "no" | "off" | "0" => Ok(false),
            _ => Err(ConversionError::new(s, "not a boolean")),
        },
        other => Err(mismatch(&other, "boolean")),
    }
}

fn to_timestamp(raw: RawValue) -> Result<DateTime<Utc>, ConversionError> {
    match raw {
        RawValue::Timestamp(v) => Ok(v),
        RawValue::Int(secs) => DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| ConversionError::new(&secs.to_string(), "epoch seconds out of range")),
        RawValue::Text(ref s) => parse_timestamp(s.trim())
            .ok_or_else(|| ConversionError::new(s, "not a timestamp")),
        other => Err(mismatch(&other, "timestamp")),
    }
}

/// Accepts RFC 3339 and the source's own `YYYY-MM-DD HH:MM:SS[.f][+zz]` form.
/// Values without an offset are taken as UTC.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(v) = DateTime::parse_from_rfc3339(s) {
        return Some(v.with_timezone(&Utc));
    }
    if let Ok(v) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(v.with_timezone(&Utc));
    }
    if let Ok(v) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(v.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|v| v.and_utc())
}

fn to_json(raw: RawValue) -> Result<String, ConversionError> {
    let value = match raw {
        RawValue::Text(s) => {
            return match serde_json::from_str::<Value>(&s) {
                Ok(_) => Ok(s),
                Err(e) => Err(ConversionError::new(&s, format!("not JSON: {}", e))),
            };
        }
        RawValue::Map(pairs) => return Ok(hstore::to_json(&pairs)),
        RawValue::Bool(v) => Value::Bool(v),
        RawValue::Int(v) => Value::from(v),
        RawValue::Float(v) => serde_json::Number::from_f64(v)
            .map(Value::Number)
            .ok_or_else(|| ConversionError::new(&v.to_string(), "not representable in JSON"))?,
        RawValue::Timestamp(v) => Value::String(v.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        RawValue::Null => Value::Null,
    };
    Ok(value.to_string())
}

fn mismatch(raw: &RawValue, expected: &str) -> ConversionError {
    ConversionError::new(&raw.to_string(), format!("cannot convert to {}", expected))
}
