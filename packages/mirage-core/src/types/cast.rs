//! Value casting between data types.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::{DbError, Result};

use super::data_type::DataType;
use super::interval::Interval;
use super::value::{PathValue, Point, Value};

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
];

const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"];

impl DataType {
    /// Casts `value` (of this type) to `to`.
    ///
    /// Fails with [`DbError::Cast`] when no cast exists between the two
    /// types, and with [`DbError::InvalidValue`] when a cast exists but the
    /// value cannot be represented.
    pub fn cast(&self, value: Value, to: &DataType) -> Result<Value> {
        if !self.can_cast(to) {
            return Err(DbError::cast(self, to));
        }
        cast_value(value, to)
    }
}

/// Casts a value to `to` based on the value's own variant.
pub fn cast_value(value: Value, to: &DataType) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match (value, to) {
        (v, DataType::Text) => Ok(Value::text(v.to_string())),
        (Value::Text(s), to) => parse_text(&s, to),
        (v @ (Value::Integer(_) | Value::BigInt(_) | Value::Float(_)), to) if to.is_numeric() => {
            cast_numeric(v, to)
        }
        (Value::Bool(b), DataType::Integer) => Ok(Value::Integer(b as i32)),
        (Value::Bool(b), DataType::BigInt) => Ok(Value::BigInt(b as i64)),
        (v @ (Value::Integer(_) | Value::BigInt(_)), DataType::Bool) => {
            Ok(Value::Bool(v.as_i64() != Some(0)))
        }
        (Value::Date(d), DataType::Timestamp) => Ok(Value::Timestamp(d.and_time(NaiveTime::MIN))),
        (Value::Timestamp(t), DataType::Date) => Ok(Value::Date(t.date())),
        (Value::Timestamp(t), DataType::Time) => Ok(Value::Time(t.time())),
        (Value::Jsonb(json), to) => cast_json(&json, to),
        (Value::Array(items), DataType::Array(element)) => {
            let items = items
                .iter()
                .cloned()
                .map(|item| cast_value(item, element))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::array(items))
        }
        (v, to) if v.data_type() == *to => Ok(v),
        (v, to) => Err(DbError::cast(v.data_type(), to)),
    }
}

fn cast_numeric(value: Value, to: &DataType) -> Result<Value> {
    match to {
        DataType::Integer => {
            let i = match value {
                Value::Float(f) => {
                    if !f.0.is_finite() {
                        return Err(DbError::OutOfRange("integer".into()));
                    }
                    f.0.round() as i64
                }
                other => other.as_i64().unwrap_or_default(),
            };
            i32::try_from(i)
                .map(Value::Integer)
                .map_err(|_| DbError::OutOfRange("integer".into()))
        }
        DataType::BigInt => match value {
            Value::Float(f) => {
                let rounded = f.0.round();
                if !rounded.is_finite() || rounded.abs() > i64::MAX as f64 {
                    return Err(DbError::OutOfRange("bigint".into()));
                }
                Ok(Value::BigInt(rounded as i64))
            }
            other => Ok(Value::BigInt(other.as_i64().unwrap_or_default())),
        },
        DataType::Float => Ok(Value::float(value.as_f64().unwrap_or_default())),
        other => Err(DbError::cast(value.data_type(), other)),
    }
}

fn cast_json(json: &serde_json::Value, to: &DataType) -> Result<Value> {
    use serde_json::Value as Json;
    match (json, to) {
        (Json::Null, _) => Ok(Value::Null),
        (Json::Bool(b), DataType::Bool) => Ok(Value::Bool(*b)),
        (Json::Number(n), DataType::Integer | DataType::BigInt | DataType::Float) => {
            let v = match n.as_i64() {
                Some(i) => Value::BigInt(i),
                None => Value::float(n.as_f64().unwrap_or_default()),
            };
            cast_numeric(v, to)
        }
        (json, to) => Err(DbError::cast(
            format!("jsonb {}", json_kind(json)),
            to,
        )),
    }
}

fn json_kind(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Parses text into a value of type `to`.
pub fn parse_text(text: &str, to: &DataType) -> Result<Value> {
    let trimmed = text.trim();
    let invalid = || DbError::invalid(to, text);
    match to {
        DataType::Text => Ok(Value::text(text)),
        DataType::Null => Ok(Value::Null),
        DataType::Bool => match trimmed.to_ascii_lowercase().as_str() {
            "t" | "true" | "yes" | "y" | "on" | "1" => Ok(Value::Bool(true)),
            "f" | "false" | "no" | "n" | "off" | "0" => Ok(Value::Bool(false)),
            _ => Err(invalid()),
        },
        DataType::Integer => trimmed
            .parse::<i32>()
            .map(Value::Integer)
            .map_err(|_| invalid()),
        DataType::BigInt => trimmed
            .parse::<i64>()
            .map(Value::BigInt)
            .map_err(|_| invalid()),
        DataType::Float => trimmed
            .parse::<f64>()
            .map(Value::float)
            .map_err(|_| invalid()),
        DataType::Bytea => {
            if let Some(hex) = trimmed.strip_prefix("\\x") {
                let bytes = (0..hex.len())
                    .step_by(2)
                    .map(|i| hex.get(i..i + 2).and_then(|b| u8::from_str_radix(b, 16).ok()))
                    .collect::<Option<Vec<u8>>>()
                    .ok_or_else(invalid)?;
                Ok(Value::Bytea(Arc::from(bytes)))
            } else {
                Ok(Value::Bytea(Arc::from(text.as_bytes())))
            }
        }
        DataType::Date => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .map(Value::Date)
            .or_else(|_| parse_timestamp(trimmed).map(|t| Value::Date(t.date())))
            .map_err(|_| invalid()),
        DataType::Time => TIME_FORMATS
            .iter()
            .find_map(|format| NaiveTime::parse_from_str(trimmed, format).ok())
            .map(Value::Time)
            .ok_or_else(invalid),
        DataType::Timestamp => parse_timestamp(trimmed)
            .map(Value::Timestamp)
            .map_err(|_| invalid()),
        DataType::Interval => Interval::parse(trimmed)
            .map(Value::Interval)
            .ok_or_else(invalid),
        DataType::Jsonb => serde_json::from_str::<serde_json::Value>(trimmed)
            .map(Value::jsonb)
            .map_err(|_| invalid()),
        DataType::Point => parse_point(trimmed).map(Value::Point).ok_or_else(invalid),
        DataType::Path => parse_path(trimmed)
            .map(|p| Value::Path(Arc::new(p)))
            .ok_or_else(invalid),
        DataType::Array(element) => parse_array(trimmed, element).ok_or_else(invalid)?,
        DataType::Record => Err(DbError::cast(DataType::Text, DataType::Record)),
    }
}

fn parse_timestamp(text: &str) -> std::result::Result<NaiveDateTime, ()> {
    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(ts);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map(|d| d.and_time(NaiveTime::MIN))
        .map_err(|_| ())
}

fn parse_point(text: &str) -> Option<Point> {
    let inner = text.trim().trim_start_matches('(').trim_end_matches(')');
    let (x, y) = inner.split_once(',')?;
    Some(Point::new(x.trim().parse().ok()?, y.trim().parse().ok()?))
}

fn parse_path(text: &str) -> Option<PathValue> {
    let closed = !text.starts_with('[');
    let inner = &text[1..text.len().checked_sub(1)?];
    let mut points = Vec::new();
    for chunk in inner.split(')') {
        let chunk = chunk.trim_start_matches(',').trim();
        if chunk.is_empty() {
            continue;
        }
        points.push(parse_point(chunk)?);
    }
    Some(PathValue { closed, points })
}

/// Parses the `{a,b,"c d",NULL}` array literal form.
fn parse_array(text: &str, element: &DataType) -> Option<Result<Value>> {
    let inner = text.strip_prefix('{')?.strip_suffix('}')?;
    if inner.trim().is_empty() {
        return Some(Ok(Value::array(Vec::new())));
    }
    let mut items = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut was_quoted = false;
    let mut chars = inner.chars();
    let mut flush = |current: &mut String, was_quoted: &mut bool| -> Result<()> {
        let raw = if *was_quoted {
            current.clone()
        } else {
            current.trim().to_string()
        };
        let item = if !*was_quoted && raw.eq_ignore_ascii_case("null") {
            Value::Null
        } else {
            parse_text(&raw, element)?
        };
        items.push(item);
        current.clear();
        *was_quoted = false;
        Ok(())
    };
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                was_quoted = true;
            }
            '\\' if quoted => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            ',' if !quoted => {
                if let Err(e) = flush(&mut current, &mut was_quoted) {
                    return Some(Err(e));
                }
            }
            c => current.push(c),
        }
    }
    if let Err(e) = flush(&mut current, &mut was_quoted) {
        return Some(Err(e));
    }
    Some(Ok(Value::array(items)))
}
