//! Scalar column values.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use ordered_float::OrderedFloat;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use super::data_type::DataType;
use super::interval::Interval;

/// A 2D point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Point {
    pub x: OrderedFloat<f64>,
    pub y: OrderedFloat<f64>,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x: OrderedFloat(x),
            y: OrderedFloat(y),
        }
    }
}

/// Open or closed sequence of points.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathValue {
    pub closed: bool,
    pub points: Vec<Point>,
}

/// A single scalar value.
///
/// `Null` is the absence marker and carries no type; every other variant
/// belongs to exactly one [`DataType`].
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i32),
    BigInt(i64),
    Float(OrderedFloat<f64>),
    Text(Arc<str>),
    Bytea(Arc<[u8]>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    Interval(Interval),
    Jsonb(Arc<serde_json::Value>),
    Array(Arc<[Value]>),
    Point(Point),
    Path(Arc<PathValue>),
    Record(Arc<[Value]>),
}

impl Value {
    pub fn text(s: impl AsRef<str>) -> Value {
        Value::Text(Arc::from(s.as_ref()))
    }

    pub fn float(f: f64) -> Value {
        Value::Float(OrderedFloat(f))
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Arc::from(items))
    }

    pub fn jsonb(json: serde_json::Value) -> Value {
        Value::Jsonb(Arc::new(json))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Best-effort type of this value; arrays report the type of their
    /// first non-null element.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Bool(_) => DataType::Bool,
            Value::Integer(_) => DataType::Integer,
            Value::BigInt(_) => DataType::BigInt,
            Value::Float(_) => DataType::Float,
            Value::Text(_) => DataType::Text,
            Value::Bytea(_) => DataType::Bytea,
            Value::Date(_) => DataType::Date,
            Value::Time(_) => DataType::Time,
            Value::Timestamp(_) => DataType::Timestamp,
            Value::Interval(_) => DataType::Interval,
            Value::Jsonb(_) => DataType::Jsonb,
            Value::Point(_) => DataType::Point,
            Value::Path(_) => DataType::Path,
            Value::Record(_) => DataType::Record,
            Value::Array(items) => items
                .iter()
                .find(|v| !v.is_null())
                .map(|v| v.data_type())
                .unwrap_or(DataType::Null)
                .array_of(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i as i64),
            Value::BigInt(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::BigInt(i) => Some(*i as f64),
            Value::Float(f) => Some(f.0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Position of the variant in the cross-type total order.
    fn rank(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Integer(_) | Value::BigInt(_) | Value::Float(_) => 1,
            Value::Text(_) => 2,
            Value::Bytea(_) => 3,
            Value::Date(_) | Value::Timestamp(_) => 4,
            Value::Time(_) => 5,
            Value::Interval(_) => 6,
            Value::Jsonb(_) => 7,
            Value::Point(_) => 8,
            Value::Path(_) => 9,
            Value::Array(_) => 10,
            Value::Record(_) => 11,
            Value::Null => 12,
        }
    }
}

fn compare_numeric(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Float(x), Value::Float(y)) => x.cmp(y),
        (Value::Float(x), other) => compare_integral_float(integral(other), x.0).reverse(),
        (other, Value::Float(y)) => compare_integral_float(integral(other), y.0),
        _ => integral(a).cmp(&integral(b)),
    }
}

fn integral(value: &Value) -> i64 {
    match value {
        Value::Integer(i) => i64::from(*i),
        Value::BigInt(i) => *i,
        _ => 0,
    }
}

const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

/// Exact comparison of an integer with a float; NaN sorts above every number.
fn compare_integral_float(i: i64, f: f64) -> Ordering {
    if f.is_nan() || f >= TWO_POW_63 {
        return Ordering::Less;
    }
    if f < -TWO_POW_63 {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    match i.cmp(&(whole as i64)) {
        Ordering::Equal => OrderedFloat(whole).cmp(&OrderedFloat(f)),
        unequal => unequal,
    }
}

/// Integer a float equals exactly, if any.
fn exact_integral(f: f64) -> Option<i64> {
    (f.fract() == 0.0 && (-TWO_POW_63..TWO_POW_63).contains(&f)).then(|| f as i64)
}

fn json_text(json: &serde_json::Value) -> String {
    json.to_string()
}

/// Total order over values: numerics compare across widths, dates and
/// timestamps compare on the same timeline, nulls sort last.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let (ra, rb) = (self.rank(), other.rank());
        if ra != rb {
            return ra.cmp(&rb);
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Bytea(a), Value::Bytea(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Date(a), Value::Timestamp(b)) => a.and_time(NaiveTime::MIN).cmp(b),
            (Value::Timestamp(a), Value::Date(b)) => a.cmp(&b.and_time(NaiveTime::MIN)),
            (Value::Time(a), Value::Time(b)) => a.cmp(b),
            (Value::Interval(a), Value::Interval(b)) => a.cmp(b),
            (Value::Jsonb(a), Value::Jsonb(b)) => json_text(a).cmp(&json_text(b)),
            (Value::Point(a), Value::Point(b)) => a.cmp(b),
            (Value::Path(a), Value::Path(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => a.iter().cmp(b.iter()),
            (Value::Record(a), Value::Record(b)) => a.iter().cmp(b.iter()),
            _ => compare_numeric(self, other),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            // Integer(1) == Float(1.0), so integral floats hash as integers
            Value::Integer(_) | Value::BigInt(_) => integral(self).hash(state),
            Value::Float(f) => match exact_integral(f.0) {
                Some(i) => i.hash(state),
                None => f.hash(state),
            },
            Value::Text(s) => s.hash(state),
            Value::Bytea(b) => b.hash(state),
            Value::Date(d) => d.and_time(NaiveTime::MIN).hash(state),
            Value::Timestamp(t) => t.hash(state),
            Value::Time(t) => t.hash(state),
            Value::Interval(i) => i.hash(state),
            Value::Jsonb(j) => json_text(j).hash(state),
            Value::Point(p) => p.hash(state),
            Value::Path(p) => p.hash(state),
            Value::Array(items) | Value::Record(items) => {
                for item in items.iter() {
                    item.hash(state);
                }
            }
        }
    }
}

fn write_array_element(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::Null => write!(f, "NULL"),
        Value::Text(s) if s.is_empty() || s.contains([',', ' ', '{', '}', '"']) => {
            write!(f, "\"{}\"", s.replace('"', "\\\""))
        }
        other => write!(f, "{}", other),
    }
}

/// Postgres text rendering, as produced by a cast to `text`.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::BigInt(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x.0),
            Value::Text(s) => write!(f, "{}", s),
            Value::Bytea(bytes) => {
                write!(f, "\\x")?;
                for byte in bytes.iter() {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Time(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
            Value::Timestamp(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::Interval(i) => write!(f, "{}", i),
            Value::Jsonb(j) => write!(f, "{}", j),
            Value::Point(p) => write!(f, "({},{})", p.x, p.y),
            Value::Path(path) => {
                let (open, close) = if path.closed { ("(", ")") } else { ("[", "]") };
                write!(f, "{}", open)?;
                for (i, p) in path.points.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "({},{})", p.x, p.y)?;
                }
                write!(f, "{}", close)
            }
            Value::Array(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write_array_element(f, item)?;
                }
                write!(f, "}}")
            }
            Value::Record(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// JSON rendering used by query results.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Integer(i) => serializer.serialize_i32(*i),
            Value::BigInt(i) => serializer.serialize_i64(*i),
            Value::Float(x) => serializer.serialize_f64(x.0),
            Value::Jsonb(j) => j.serialize(serializer),
            Value::Point(p) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("x", &p.x.0)?;
                map.serialize_entry("y", &p.y.0)?;
                map.end()
            }
            Value::Array(items) | Value::Record(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            other => serializer.serialize_str(&other.to_string()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::BigInt(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::text(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(Arc::from(s))
    }
}
