//! Data type tags and the per-type comparison and conversion rules.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::value::Value;

/// Scalar data type of a column or expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Type of the bare `NULL` literal; converts implicitly to anything
    Null,
    Bool,
    /// 32-bit integer (`integer`, `int4`)
    Integer,
    /// 64-bit integer (`bigint`, `int8`)
    BigInt,
    /// Double precision float (`float8`)
    Float,
    Text,
    Bytea,
    Date,
    Time,
    Timestamp,
    Interval,
    Jsonb,
    Point,
    Path,
    Record,
    Array(Box<DataType>),
}

impl DataType {
    /// Wraps this type into an array type.
    pub fn array_of(self) -> DataType {
        DataType::Array(Box::new(self))
    }

    /// Element type of an array type.
    pub fn element_type(&self) -> Option<&DataType> {
        match self {
            DataType::Array(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.numeric_rank().is_some()
    }

    /// Width rank used for numeric promotion.
    fn numeric_rank(&self) -> Option<u8> {
        match self {
            DataType::Integer => Some(1),
            DataType::BigInt => Some(2),
            DataType::Float => Some(3),
            _ => None,
        }
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            DataType::Date | DataType::Time | DataType::Timestamp | DataType::Interval
        )
    }

    /// Three-valued equality: `None` when either operand is null.
    pub fn equals(&self, a: &Value, b: &Value) -> Option<bool> {
        if a.is_null() || b.is_null() {
            return None;
        }
        match self {
            // Path equality has always been a no-op; callers rely on it.
            DataType::Path => Some(true),
            _ => Some(a.cmp(b) == Ordering::Equal),
        }
    }

    /// Three-valued `a < b`.
    pub fn lt(&self, a: &Value, b: &Value) -> Option<bool> {
        self.compare(a, b).map(|o| o == Ordering::Less)
    }

    /// Three-valued `a > b`.
    pub fn gt(&self, a: &Value, b: &Value) -> Option<bool> {
        self.compare(a, b).map(|o| o == Ordering::Greater)
    }

    /// Ordering between two non-null values of this type.
    pub fn compare(&self, a: &Value, b: &Value) -> Option<Ordering> {
        if a.is_null() || b.is_null() {
            return None;
        }
        Some(a.cmp(b))
    }

    /// Whether a value of this type may be silently converted to `to`.
    pub fn can_convert_implicit(&self, to: &DataType) -> bool {
        if self == to {
            return true;
        }
        match (self, to) {
            (DataType::Null, _) => true,
            (from, to) if from.is_numeric() && to.is_numeric() => {
                from.numeric_rank() <= to.numeric_rank()
            }
            (DataType::Date, DataType::Timestamp) => true,
            (DataType::Array(from), DataType::Array(to)) => from.can_convert_implicit(to),
            _ => false,
        }
    }

    /// Whether an explicit `CAST` from this type to `to` exists.
    pub fn can_cast(&self, to: &DataType) -> bool {
        if self.can_convert_implicit(to) {
            return true;
        }
        match (self, to) {
            (_, DataType::Text) => true,
            (DataType::Text, DataType::Record) => false,
            (DataType::Text, _) => true,
            (from, to) if from.is_numeric() && to.is_numeric() => true,
            (DataType::Bool, DataType::Integer | DataType::BigInt) => true,
            (DataType::Integer | DataType::BigInt, DataType::Bool) => true,
            (DataType::Timestamp, DataType::Date | DataType::Time) => true,
            (DataType::Jsonb, DataType::Bool | DataType::Integer | DataType::BigInt)
            | (DataType::Jsonb, DataType::Float) => true,
            (DataType::Array(from), DataType::Array(to)) => from.can_cast(to),
            _ => false,
        }
    }

    /// Picks the more general of two types, if they are compatible.
    ///
    /// This is the partial order used to reconcile operand types: `null`
    /// promotes to anything, numerics promote to the widest, arrays promote
    /// element-wise.
    pub fn prefer(&self, other: &DataType) -> Option<DataType> {
        if self == other {
            return Some(self.clone());
        }
        match (self, other) {
            (DataType::Null, t) | (t, DataType::Null) => Some(t.clone()),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                if a.numeric_rank() >= b.numeric_rank() {
                    Some(a.clone())
                } else {
                    Some(b.clone())
                }
            }
            (DataType::Date, DataType::Timestamp) | (DataType::Timestamp, DataType::Date) => {
                Some(DataType::Timestamp)
            }
            (DataType::Array(a), DataType::Array(b)) => a.prefer(b).map(DataType::array_of),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Null => write!(f, "unknown"),
            DataType::Bool => write!(f, "boolean"),
            DataType::Integer => write!(f, "integer"),
            DataType::BigInt => write!(f, "bigint"),
            DataType::Float => write!(f, "float"),
            DataType::Text => write!(f, "text"),
            DataType::Bytea => write!(f, "bytea"),
            DataType::Date => write!(f, "date"),
            DataType::Time => write!(f, "time"),
            DataType::Timestamp => write!(f, "timestamp"),
            DataType::Interval => write!(f, "interval"),
            DataType::Jsonb => write!(f, "jsonb"),
            DataType::Point => write!(f, "point"),
            DataType::Path => write!(f, "path"),
            DataType::Record => write!(f, "record"),
            DataType::Array(inner) => write!(f, "{}[]", inner),
        }
    }
}
