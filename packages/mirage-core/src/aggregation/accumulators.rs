//! Per-group aggregate state.

use std::collections::HashSet;

use crate::error::{DbError, Result};
use crate::types::{DataType, Value};

/// State of one aggregate within one group.
///
/// Accumulators never fail on an empty group: `count` finishes with 0 and
/// every other aggregate with null.
pub trait Accumulator: Send {
    fn feed(&mut self, value: Value) -> Result<()>;
    fn finish(self: Box<Self>) -> Result<Value>;
}

/// `count(*)`: counts every row.
#[derive(Default)]
pub struct CountRows(i64);

impl Accumulator for CountRows {
    fn feed(&mut self, _value: Value) -> Result<()> {
        self.0 += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Value> {
        Ok(Value::BigInt(self.0))
    }
}

/// `count(x)`: counts non-null values.
#[derive(Default)]
pub struct CountValues(i64);

impl Accumulator for CountValues {
    fn feed(&mut self, value: Value) -> Result<()> {
        if !value.is_null() {
            self.0 += 1;
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Value> {
        Ok(Value::BigInt(self.0))
    }
}

enum Total {
    Empty,
    Int(i64),
    Float(f64),
}

/// `sum(x)`: bigint for integer input, float otherwise.
pub struct Sum {
    total: Total,
}

impl Sum {
    pub fn new() -> Self {
        Self { total: Total::Empty }
    }
}

impl Accumulator for Sum {
    fn feed(&mut self, value: Value) -> Result<()> {
        self.total = match (&self.total, &value) {
            (_, Value::Null) => return Ok(()),
            (Total::Empty, Value::Float(f)) => Total::Float(f.0),
            (Total::Empty, v) => Total::Int(v.as_i64().ok_or_else(|| not_numeric("sum", v))?),
            (Total::Int(acc), Value::Integer(_) | Value::BigInt(_)) => {
                let v = value.as_i64().unwrap_or_default();
                Total::Int(
                    acc.checked_add(v)
                        .ok_or_else(|| DbError::OutOfRange("bigint".to_string()))?,
                )
            }
            (Total::Int(acc), v) => {
                Total::Float(*acc as f64 + v.as_f64().ok_or_else(|| not_numeric("sum", v))?)
            }
            (Total::Float(acc), v) => {
                Total::Float(acc + v.as_f64().ok_or_else(|| not_numeric("sum", v))?)
            }
        };
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Value> {
        Ok(match self.total {
            Total::Empty => Value::Null,
            Total::Int(i) => Value::BigInt(i),
            Total::Float(f) => Value::float(f),
        })
    }
}

/// `avg(x)`: always float.
#[derive(Default)]
pub struct Avg {
    sum: f64,
    count: u64,
}

impl Accumulator for Avg {
    fn feed(&mut self, value: Value) -> Result<()> {
        if value.is_null() {
            return Ok(());
        }
        self.sum += value.as_f64().ok_or_else(|| not_numeric("avg", &value))?;
        self.count += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Value> {
        Ok(match self.count {
            0 => Value::Null,
            n => Value::float(self.sum / n as f64),
        })
    }
}

/// `min(x)` / `max(x)`.
pub struct Extremum {
    best: Option<Value>,
    max: bool,
}

impl Extremum {
    pub fn min() -> Self {
        Self {
            best: None,
            max: false,
        }
    }

    pub fn max() -> Self {
        Self {
            best: None,
            max: true,
        }
    }
}

impl Accumulator for Extremum {
    fn feed(&mut self, value: Value) -> Result<()> {
        if value.is_null() {
            return Ok(());
        }
        let replace = match &self.best {
            None => true,
            Some(best) if self.max => value > *best,
            Some(best) => value < *best,
        };
        if replace {
            self.best = Some(value);
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Value> {
        Ok(self.best.unwrap_or(Value::Null))
    }
}

/// `array_agg(x)`: keeps nulls, in feed order.
#[derive(Default)]
pub struct ArrayAgg(Vec<Value>);

impl Accumulator for ArrayAgg {
    fn feed(&mut self, value: Value) -> Result<()> {
        self.0.push(value);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Value> {
        if self.0.is_empty() {
            return Ok(Value::Null);
        }
        Ok(Value::array(self.0))
    }
}

/// `bool_and(x)` / `bool_or(x)`.
pub struct BoolFold {
    state: Option<bool>,
    all: bool,
}

impl BoolFold {
    pub fn and() -> Self {
        Self {
            state: None,
            all: true,
        }
    }

    pub fn or() -> Self {
        Self {
            state: None,
            all: false,
        }
    }
}

impl Accumulator for BoolFold {
    fn feed(&mut self, value: Value) -> Result<()> {
        let Some(b) = value.as_bool() else {
            return Ok(());
        };
        self.state = Some(match self.state {
            None => b,
            Some(acc) if self.all => acc && b,
            Some(acc) => acc || b,
        });
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Value> {
        Ok(self.state.map_or(Value::Null, Value::Bool))
    }
}

/// Feeds each distinct non-null value once.
pub struct Distinct {
    seen: HashSet<Value>,
    inner: Box<dyn Accumulator>,
}

impl Distinct {
    pub fn new(inner: Box<dyn Accumulator>) -> Self {
        Self {
            seen: HashSet::new(),
            inner,
        }
    }
}

impl Accumulator for Distinct {
    fn feed(&mut self, value: Value) -> Result<()> {
        if value.is_null() || self.seen.insert(value.clone()) {
            self.inner.feed(value)?;
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Value> {
        self.inner.finish()
    }
}

fn not_numeric(function: &str, value: &Value) -> DbError {
    DbError::FunctionNotFound(format!("{}({})", function, value.data_type()))
}

/// Output type of `sum` over `input`.
pub(crate) fn sum_type(input: &DataType) -> Option<DataType> {
    match input {
        DataType::Integer | DataType::BigInt => Some(DataType::BigInt),
        DataType::Float => Some(DataType::Float),
        DataType::Null => Some(DataType::BigInt),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntest::timeout;

    fn run(mut acc: Box<dyn Accumulator>, values: Vec<Value>) -> Value {
        for value in values {
            acc.feed(value).unwrap();
        }
        acc.finish().unwrap()
    }

    #[timeout(1000)]
    #[test]
    fn test_empty_groups_are_neutral() {
        assert_eq!(run(Box::<CountRows>::default(), vec![]), Value::BigInt(0));
        assert_eq!(run(Box::<CountValues>::default(), vec![]), Value::BigInt(0));
        assert_eq!(run(Box::new(Sum::new()), vec![]), Value::Null);
        assert_eq!(run(Box::<Avg>::default(), vec![]), Value::Null);
        assert_eq!(run(Box::new(Extremum::max()), vec![]), Value::Null);
        assert_eq!(run(Box::<ArrayAgg>::default(), vec![]), Value::Null);
        assert_eq!(run(Box::new(BoolFold::and()), vec![]), Value::Null);
    }

    #[timeout(1000)]
    #[test]
    fn test_nulls_are_skipped() {
        let values = || vec![Value::Integer(3), Value::Null, Value::Integer(1)];
        assert_eq!(run(Box::<CountRows>::default(), values()), Value::BigInt(3));
        assert_eq!(run(Box::<CountValues>::default(), values()), Value::BigInt(2));
        assert_eq!(run(Box::new(Sum::new()), values()), Value::BigInt(4));
        assert_eq!(run(Box::<Avg>::default(), values()), Value::float(2.0));
        assert_eq!(run(Box::new(Extremum::min()), values()), Value::Integer(1));
        assert_eq!(run(Box::new(Extremum::max()), values()), Value::Integer(3));
        assert_eq!(
            run(Box::<ArrayAgg>::default(), values()),
            Value::array(values())
        );
    }

    #[timeout(1000)]
    #[test]
    fn test_sum_switches_to_float() {
        let total = run(
            Box::new(Sum::new()),
            vec![Value::Integer(1), Value::float(0.5)],
        );
        assert_eq!(total, Value::float(1.5));
    }

    #[timeout(1000)]
    #[test]
    fn test_distinct_feeds_once() {
        let acc = Box::new(Distinct::new(Box::<CountValues>::default()));
        let total = run(
            acc,
            vec![Value::Integer(1), Value::Integer(1), Value::BigInt(2)],
        );
        assert_eq!(total, Value::BigInt(2));
    }

    #[timeout(1000)]
    #[test]
    fn test_bool_folds() {
        let values = || vec![Value::Bool(true), Value::Null, Value::Bool(false)];
        assert_eq!(run(Box::new(BoolFold::and()), values()), Value::Bool(false));
        assert_eq!(run(Box::new(BoolFold::or()), values()), Value::Bool(true));
    }
}
