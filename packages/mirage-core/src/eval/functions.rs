//! Scalar function registry and overload resolution.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{DbError, Result};
use crate::types::{DataType, Value};

use super::evaluator::Evaluator;

/// Implementation callback of a scalar function.
pub type FunctionImpl = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// A named scalar function overload.
#[derive(Clone)]
pub struct FunctionDefinition {
    pub name: String,
    /// Positional argument types
    pub args: Vec<DataType>,
    /// Type of any number of trailing arguments
    pub variadic: Option<DataType>,
    pub returns: DataType,
    /// Result may differ between calls with identical arguments (never folded)
    pub impure: bool,
    /// Called even when an argument is null (otherwise null in, null out)
    pub allow_nulls: bool,
    pub implementation: FunctionImpl,
}

impl fmt::Debug for FunctionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.signature())
    }
}

impl FunctionDefinition {
    pub fn new(
        name: &str,
        args: Vec<DataType>,
        returns: DataType,
        implementation: impl Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_lowercase(),
            args,
            variadic: None,
            returns,
            impure: false,
            allow_nulls: false,
            implementation: Arc::new(implementation),
        }
    }

    pub fn variadic(mut self, ty: DataType) -> Self {
        self.variadic = Some(ty);
        self
    }

    pub fn impure(mut self) -> Self {
        self.impure = true;
        self
    }

    pub fn allow_nulls(mut self) -> Self {
        self.allow_nulls = true;
        self
    }

    pub fn signature(&self) -> String {
        let mut args: Vec<String> = self.args.iter().map(|a| a.to_string()).collect();
        if let Some(variadic) = &self.variadic {
            args.push(format!("VARIADIC {}[]", variadic));
        }
        format!("{}({})", self.name, args.join(", "))
    }

    /// Parameter types for a call with `arity` arguments.
    fn parameters(&self, arity: usize) -> Option<Vec<DataType>> {
        match &self.variadic {
            None if arity == self.args.len() => Some(self.args.clone()),
            Some(variadic) if arity >= self.args.len() => {
                let mut params = self.args.clone();
                params.resize(arity, variadic.clone());
                Some(params)
            }
            _ => None,
        }
    }
}

/// Registered scalar functions by lowercase name.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Vec<Arc<FunctionDefinition>>>,
}

#[derive(PartialEq)]
enum Fit {
    Exact,
    Coercible,
}

fn fit(args: &[Evaluator], params: &[DataType]) -> Option<Fit> {
    let mut exact = true;
    for (arg, param) in args.iter().zip(params) {
        if arg.is_untyped() {
            exact &= *param == DataType::Text;
            continue;
        }
        if arg.data_type() == param {
            continue;
        }
        if !arg.data_type().can_convert_implicit(param) {
            return None;
        }
        exact = false;
    }
    Some(if exact { Fit::Exact } else { Fit::Coercible })
}

/// Whether overload `a` is at least as specific as `b`.
fn more_specific(a: &[DataType], b: &[DataType]) -> bool {
    a.iter().zip(b).all(|(a, b)| a.can_convert_implicit(b))
}

impl FunctionRegistry {
    /// Registry holding the built-in functions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        for def in builtins() {
            registry.register(def);
        }
        registry
    }

    pub fn register(&mut self, def: FunctionDefinition) {
        tracing::debug!(function = %def.signature(), "registering function");
        self.functions
            .entry(def.name.clone())
            .or_default()
            .push(Arc::new(def));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(&name.to_lowercase())
    }

    /// Picks the overload of `name` matching `args`: exact matches first,
    /// then implicitly coercible ones, preferring the most specific.
    pub fn resolve(
        &self,
        name: &str,
        args: &[Evaluator],
    ) -> Result<(Arc<FunctionDefinition>, Vec<DataType>)> {
        let not_found = || {
            let types: Vec<String> = args
                .iter()
                .map(|a| {
                    if a.is_untyped() {
                        "unknown".to_string()
                    } else {
                        a.data_type().to_string()
                    }
                })
                .collect();
            DbError::FunctionNotFound(format!("{}({})", name, types.join(", ")))
        };
        let overloads = self
            .functions
            .get(&name.to_lowercase())
            .ok_or_else(not_found)?;
        let mut exact = Vec::new();
        let mut coercible = Vec::new();
        for def in overloads {
            let Some(params) = def.parameters(args.len()) else {
                continue;
            };
            match fit(args, &params) {
                Some(Fit::Exact) => exact.push((def.clone(), params)),
                Some(Fit::Coercible) => coercible.push((def.clone(), params)),
                None => {}
            }
        }
        let candidates = if exact.is_empty() { coercible } else { exact };
        let best: Vec<_> = candidates
            .iter()
            .filter(|(_, params)| {
                candidates
                    .iter()
                    .all(|(_, other)| more_specific(params, other))
            })
            .cloned()
            .collect();
        match best.len() {
            0 if candidates.is_empty() => Err(not_found()),
            1 => Ok(best.into_iter().next().ok_or_else(not_found)?),
            _ => Err(DbError::AmbiguousFunction(format!(
                "{}({})",
                name,
                args.iter()
                    .map(|a| a.data_type().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Builds a call node for `name(args)`.
    pub fn call(&self, name: &str, args: Vec<Evaluator>) -> Result<Evaluator> {
        let (def, params) = self.resolve(name, &args)?;
        let converted = args
            .iter()
            .zip(&params)
            .map(|(arg, param)| arg.convert_implicit(param))
            .collect::<Result<Vec<_>>>()?;
        let label = format!(
            "{}({})",
            def.name,
            args.iter().map(|a| a.name()).collect::<Vec<_>>().join(", ")
        );
        let implementation = def.implementation.clone();
        let allow_nulls = def.allow_nulls;
        Evaluator::compute(label, def.returns.clone(), converted)
            .key(("function", def.signature()))
            .impure(def.impure)
            .build(move |args| {
                let values = args.all()?;
                if !allow_nulls && values.iter().any(Value::is_null) {
                    return Ok(Value::Null);
                }
                implementation(&values)
            })
    }
}

fn text_arg(values: &[Value]) -> &str {
    values.first().and_then(Value::as_str).unwrap_or_default()
}

fn builtins() -> Vec<FunctionDefinition> {
    vec![
        FunctionDefinition::new("lower", vec![DataType::Text], DataType::Text, |v| {
            Ok(Value::text(text_arg(v).to_lowercase()))
        }),
        FunctionDefinition::new("upper", vec![DataType::Text], DataType::Text, |v| {
            Ok(Value::text(text_arg(v).to_uppercase()))
        }),
        FunctionDefinition::new("length", vec![DataType::Text], DataType::Integer, |v| {
            Ok(Value::Integer(text_arg(v).chars().count() as i32))
        }),
        FunctionDefinition::new("concat", vec![], DataType::Text, |v| {
            Ok(Value::text(
                v.iter()
                    .filter(|x| !x.is_null())
                    .map(|x| x.to_string())
                    .collect::<String>(),
            ))
        })
        .variadic(DataType::Text)
        .allow_nulls(),
        FunctionDefinition::new("abs", vec![DataType::Integer], DataType::Integer, |v| {
            match v.first() {
                Some(Value::Integer(i)) => i
                    .checked_abs()
                    .map(Value::Integer)
                    .ok_or_else(|| DbError::OutOfRange("integer".into())),
                _ => Ok(Value::Null),
            }
        }),
        FunctionDefinition::new("abs", vec![DataType::BigInt], DataType::BigInt, |v| {
            match v.first() {
                Some(Value::BigInt(i)) => i
                    .checked_abs()
                    .map(Value::BigInt)
                    .ok_or_else(|| DbError::OutOfRange("bigint".into())),
                _ => Ok(Value::Null),
            }
        }),
        FunctionDefinition::new("abs", vec![DataType::Float], DataType::Float, |v| {
            Ok(v.first()
                .and_then(Value::as_f64)
                .map_or(Value::Null, |f| Value::float(f.abs())))
        }),
        FunctionDefinition::new("array_length", vec![DataType::Text.array_of(), DataType::Integer], DataType::Integer, |v| {
            array_length(v)
        }),
        FunctionDefinition::new("array_length", vec![DataType::BigInt.array_of(), DataType::Integer], DataType::Integer, |v| {
            array_length(v)
        }),
        FunctionDefinition::new("array_length", vec![DataType::Float.array_of(), DataType::Integer], DataType::Integer, |v| {
            array_length(v)
        }),
        FunctionDefinition::new("now", vec![], DataType::Timestamp, |_| {
            Ok(Value::Timestamp(chrono::Utc::now().naive_utc()))
        })
        .impure(),
        FunctionDefinition::new("random", vec![], DataType::Float, |_| {
            Ok(Value::float(rand::random::<f64>()))
        })
        .impure(),
    ]
}

/// Length of the first dimension; null for empty arrays and other dimensions.
fn array_length(values: &[Value]) -> Result<Value> {
    match (values.first().and_then(Value::as_array), values.get(1).and_then(Value::as_i64)) {
        (Some(items), Some(1)) if !items.is_empty() => Ok(Value::Integer(items.len() as i32)),
        _ => Ok(Value::Null),
    }
}
