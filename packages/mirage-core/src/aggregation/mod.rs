//! Grouping and aggregate functions.

mod accumulators;
mod node;

use std::fmt;

use crate::error::{DbError, Result};
use crate::eval::Evaluator;
use crate::index::IndexKey;
use crate::row::Row;
use crate::transaction::Transaction;
use crate::types::{DataType, Value};

pub use accumulators::{
    Accumulator, ArrayAgg, Avg, BoolFold, CountRows, CountValues, Distinct, Extremum, Sum,
};
pub use node::{build_aggregation, collect_aggregates, AggregationStrategy};
pub(crate) use node::AggregationNode;

/// Whether `name` (lower case) is an aggregate function.
pub fn is_aggregate(name: &str) -> bool {
    AggregateFunction::from_name(name, false).is_some()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    CountRows,
    Count,
    Sum,
    Avg,
    Min,
    Max,
    ArrayAgg,
    BoolAnd,
    BoolOr,
}

impl AggregateFunction {
    fn from_name(name: &str, star: bool) -> Option<Self> {
        Some(match name {
            "count" if star => AggregateFunction::CountRows,
            "count" => AggregateFunction::Count,
            "sum" => AggregateFunction::Sum,
            "avg" => AggregateFunction::Avg,
            "min" => AggregateFunction::Min,
            "max" => AggregateFunction::Max,
            "array_agg" => AggregateFunction::ArrayAgg,
            "bool_and" => AggregateFunction::BoolAnd,
            "bool_or" => AggregateFunction::BoolOr,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::CountRows | AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::ArrayAgg => "array_agg",
            AggregateFunction::BoolAnd => "bool_and",
            AggregateFunction::BoolOr => "bool_or",
        }
    }
}

/// An aggregate call bound to its argument over the aggregated selection.
#[derive(Debug, Clone)]
pub struct BoundAggregate {
    pub function: AggregateFunction,
    pub argument: Option<Evaluator>,
    pub distinct: bool,
    pub output_type: DataType,
}

impl fmt::Display for BoundAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.argument {
            None => write!(f, "{}(*)", self.function.name()),
            Some(arg) if self.distinct => {
                write!(f, "{}(DISTINCT {})", self.function.name(), arg.name())
            }
            Some(arg) => write!(f, "{}({})", self.function.name(), arg.name()),
        }
    }
}

impl BoundAggregate {
    /// Type checks a call.
    pub fn bind(name: &str, mut args: Vec<Evaluator>, distinct: bool, star: bool) -> Result<Self> {
        let lower = name.to_lowercase();
        let function = AggregateFunction::from_name(&lower, star)
            .ok_or_else(|| DbError::FunctionNotFound(format!("{}()", name)))?;
        if function == AggregateFunction::CountRows {
            return Ok(Self {
                function,
                argument: None,
                distinct: false,
                output_type: DataType::BigInt,
            });
        }
        if args.len() != 1 {
            let types: Vec<String> = args.iter().map(|a| a.data_type().to_string()).collect();
            return Err(DbError::FunctionNotFound(format!(
                "{}({})",
                lower,
                types.join(", ")
            )));
        }
        let mut argument = args.remove(0);
        if argument.is_untyped() {
            argument = argument.cast(&DataType::Text)?;
        }
        let input = argument.data_type().clone();
        let mismatch = || DbError::FunctionNotFound(format!("{}({})", lower, input));
        let output_type = match function {
            AggregateFunction::CountRows | AggregateFunction::Count => DataType::BigInt,
            AggregateFunction::Sum => accumulators::sum_type(&input).ok_or_else(mismatch)?,
            AggregateFunction::Avg if input.is_numeric() || input == DataType::Null => {
                DataType::Float
            }
            AggregateFunction::Avg => return Err(mismatch()),
            AggregateFunction::Min | AggregateFunction::Max => input.clone(),
            AggregateFunction::ArrayAgg => input.clone().array_of(),
            AggregateFunction::BoolAnd | AggregateFunction::BoolOr => {
                if input != DataType::Bool && input != DataType::Null {
                    return Err(mismatch());
                }
                DataType::Bool
            }
        };
        Ok(Self {
            function,
            argument: Some(argument),
            distinct,
            output_type,
        })
    }

    /// Fresh accumulator for one group.
    pub fn create_group(&self) -> Box<dyn Accumulator> {
        let accumulator: Box<dyn Accumulator> = match self.function {
            AggregateFunction::CountRows => Box::<CountRows>::default(),
            AggregateFunction::Count => Box::<CountValues>::default(),
            AggregateFunction::Sum => Box::new(Sum::new()),
            AggregateFunction::Avg => Box::<Avg>::default(),
            AggregateFunction::Min => Box::new(Extremum::min()),
            AggregateFunction::Max => Box::new(Extremum::max()),
            AggregateFunction::ArrayAgg => Box::<ArrayAgg>::default(),
            AggregateFunction::BoolAnd => Box::new(BoolFold::and()),
            AggregateFunction::BoolOr => Box::new(BoolFold::or()),
        };
        if self.distinct {
            Box::new(Distinct::new(accumulator))
        } else {
            accumulator
        }
    }

    /// Feeds one row of the aggregated selection.
    pub fn feed_row(&self, group: &mut dyn Accumulator, row: &Row, t: &Transaction) -> Result<()> {
        match &self.argument {
            Some(arg) => group.feed(arg.get(Some(row), t)?),
            None => group.feed(Value::Bool(true)),
        }
    }

    /// Closed form without grouping: `count(*)` is the row count.
    pub fn compute_trivial(&self, row_count: usize) -> Option<Value> {
        match self.function {
            AggregateFunction::CountRows => Some(Value::BigInt(row_count as i64)),
            _ => None,
        }
    }

    /// Whether the value can be read off an index key and its row count.
    pub fn supports_index(&self, keys: &[Evaluator]) -> bool {
        if self.distinct {
            return false;
        }
        match (self.function, &self.argument) {
            (AggregateFunction::CountRows, _) => true,
            (AggregateFunction::Count | AggregateFunction::Min | AggregateFunction::Max, Some(arg)) => {
                keys.iter().any(|k| k.hash() == arg.hash())
            }
            _ => false,
        }
    }

    /// Value for the group with index key `key` holding `rows` rows.
    pub fn compute_from_index(&self, keys: &[Evaluator], key: &IndexKey, rows: usize) -> Result<Value> {
        let key_value = || {
            self.argument
                .as_ref()
                .and_then(|arg| keys.iter().position(|k| k.hash() == arg.hash()))
                .and_then(|i| key.0.get(i).cloned())
                .ok_or_else(|| DbError::Internal(format!("{} is not an index key", self)))
        };
        Ok(match self.function {
            AggregateFunction::CountRows => Value::BigInt(rows as i64),
            AggregateFunction::Count => {
                if key_value()?.is_null() {
                    Value::BigInt(0)
                } else {
                    Value::BigInt(rows as i64)
                }
            }
            AggregateFunction::Min | AggregateFunction::Max => key_value()?,
            _ => {
                return Err(DbError::Internal(format!(
                    "{} cannot be computed from an index",
                    self
                )))
            }
        })
    }
}
