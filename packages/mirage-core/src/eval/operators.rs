//! Operator nodes: arithmetic, comparison, logic and the other built-in
//! expression forms.

use std::cmp::Ordering;

use chrono::Duration;

use crate::ast::{BinaryOp, UnaryOp};
use crate::error::{DbError, Result};
use crate::types::{DataType, Interval, Value};

use super::evaluator::{reconcile_nodes, Evaluator};
use super::like::LikeMatcher;

fn operator_error(left: &Evaluator, op: &str, right: &Evaluator) -> DbError {
    DbError::OperatorNotFound(format!(
        "{} {} {}",
        left.data_type(),
        op,
        right.data_type()
    ))
}

fn label(left: &Evaluator, op: &str, right: &Evaluator) -> String {
    format!("{} {} {}", left.name(), op, right.name())
}

/// Builds a binary operator node.
pub fn binary(op: BinaryOp, left: Evaluator, right: Evaluator) -> Result<Evaluator> {
    match op {
        BinaryOp::And | BinaryOp::Or => logic(op, left, right),
        op if op.is_comparison() => comparison(op, left, right),
        BinaryOp::Concat => concat(left, right),
        BinaryOp::JsonGet | BinaryOp::JsonGetText => json_member(op, left, right),
        _ => arithmetic(op, left, right),
    }
}

fn logic(op: BinaryOp, left: Evaluator, right: Evaluator) -> Result<Evaluator> {
    let name = label(&left, op.symbol(), &right);
    let left = left.convert_implicit(&DataType::Bool)?;
    let right = right.convert_implicit(&DataType::Bool)?;
    let is_and = op == BinaryOp::And;
    Evaluator::compute(name, DataType::Bool, vec![left, right])
        .key(op)
        .build(move |args| {
            let a = args.get(0)?.as_bool();
            // short-circuit on the absorbing element
            if a == Some(!is_and) {
                return Ok(Value::Bool(!is_and));
            }
            let b = args.get(1)?.as_bool();
            if b == Some(!is_and) {
                return Ok(Value::Bool(!is_and));
            }
            match (a, b) {
                (Some(_), Some(_)) => Ok(Value::Bool(is_and)),
                _ => Ok(Value::Null),
            }
        })
}

fn compare(op: BinaryOp, ty: &DataType, a: &Value, b: &Value) -> Option<bool> {
    match op {
        BinaryOp::Eq => ty.equals(a, b),
        BinaryOp::NotEq => ty.equals(a, b).map(|eq| !eq),
        BinaryOp::Lt => ty.lt(a, b),
        BinaryOp::Gt => ty.gt(a, b),
        BinaryOp::LtEq => ty.compare(a, b).map(|o| o != Ordering::Greater),
        BinaryOp::GtEq => ty.compare(a, b).map(|o| o != Ordering::Less),
        _ => None,
    }
}

fn comparison(op: BinaryOp, left: Evaluator, right: Evaluator) -> Result<Evaluator> {
    let name = label(&left, op.symbol(), &right);
    if right.is_any() {
        let element = right
            .data_type()
            .element_type()
            .cloned()
            .unwrap_or(DataType::Null);
        let (ty, _) = reconcile_nodes(&[
            left.clone(),
            Evaluator::literal(Value::Null, element.clone()),
        ])?;
        let left = left.convert_implicit(&ty)?;
        return Evaluator::compute(name, DataType::Bool, vec![left, right])
            .key(("any", op))
            .build(move |args| {
                let value = args.get(0)?;
                let set = args.get(1)?;
                let Some(items) = set.as_array() else {
                    return Ok(Value::Null);
                };
                let mut unknown = false;
                for item in items {
                    match compare(op, &ty, &value, item) {
                        Some(true) => return Ok(Value::Bool(true)),
                        Some(false) => {}
                        None => unknown = true,
                    }
                }
                Ok(if unknown { Value::Null } else { Value::Bool(false) })
            });
    }
    let (ty, nodes) = reconcile_nodes(&[left, right])?;
    Evaluator::compute(name, DataType::Bool, nodes)
        .key(op)
        .build(move |args| {
            let (a, b) = (args.get(0)?, args.get(1)?);
            Ok(compare(op, &ty, &a, &b).map_or(Value::Null, Value::Bool))
        })
}

fn concat(left: Evaluator, right: Evaluator) -> Result<Evaluator> {
    let name = label(&left, "||", &right);
    let (lt, rt) = (left.data_type().clone(), right.data_type().clone());
    let array = match (&lt, &rt) {
        (DataType::Array(_), DataType::Array(_)) => Some(reconcile_nodes(&[left.clone(), right.clone()])?),
        (DataType::Array(e), _) if !right.is_untyped() => {
            let el = right.convert_implicit(e)?;
            Some((lt.clone(), vec![left.clone(), el]))
        }
        (_, DataType::Array(e)) if !left.is_untyped() => {
            let el = left.convert_implicit(e)?;
            Some((rt.clone(), vec![el, right.clone()]))
        }
        _ => None,
    };
    if let Some((ty, nodes)) = array {
        return Evaluator::compute(name, ty, nodes)
            .key("array_concat")
            .build(|args| {
                let (a, b) = (args.get(0)?, args.get(1)?);
                let mut items = Vec::new();
                for v in [a, b] {
                    match v {
                        Value::Null => {}
                        Value::Array(values) => items.extend(values.iter().cloned()),
                        other => items.push(other),
                    }
                }
                Ok(Value::array(items))
            });
    }
    let left = left.cast(&DataType::Text)?;
    let right = right.cast(&DataType::Text)?;
    Evaluator::compute(name, DataType::Text, vec![left, right])
        .key("concat")
        .build(|args| match (args.get(0)?, args.get(1)?) {
            (Value::Text(a), Value::Text(b)) => Ok(Value::text(format!("{}{}", a, b))),
            _ => Ok(Value::Null),
        })
}

fn json_member(op: BinaryOp, left: Evaluator, right: Evaluator) -> Result<Evaluator> {
    let name = label(&left, op.symbol(), &right);
    let left = left.convert_implicit(&DataType::Jsonb)?;
    let right = if right.is_untyped() {
        right.cast(&DataType::Text)?
    } else {
        right
    };
    if !matches!(
        right.data_type(),
        DataType::Text | DataType::Integer | DataType::BigInt
    ) {
        return Err(operator_error(&left, op.symbol(), &right));
    }
    let as_text = op == BinaryOp::JsonGetText;
    let ty = if as_text { DataType::Text } else { DataType::Jsonb };
    Evaluator::compute(name, ty, vec![left, right])
        .key(op)
        .build(move |args| {
            let json = args.get(0)?;
            let key = args.get(1)?;
            let Value::Jsonb(json) = json else {
                return Ok(Value::Null);
            };
            let member = match (&*json, &key) {
                (serde_json::Value::Object(map), Value::Text(k)) => map.get(&**k),
                (serde_json::Value::Array(items), k) => match k.as_i64() {
                    Some(i) if i >= 0 => items.get(i as usize),
                    Some(i) => items.len().checked_sub(i.unsigned_abs() as usize).and_then(|i| items.get(i)),
                    None => None,
                },
                _ => None,
            };
            Ok(match member {
                None | Some(serde_json::Value::Null) if as_text => Value::Null,
                None => Value::Null,
                Some(serde_json::Value::String(s)) if as_text => Value::text(s),
                Some(other) if as_text => Value::text(other.to_string()),
                Some(other) => Value::jsonb(other.clone()),
            })
        })
}

fn arithmetic(op: BinaryOp, left: Evaluator, right: Evaluator) -> Result<Evaluator> {
    let name = label(&left, op.symbol(), &right);
    let (lt, rt) = (left.data_type().clone(), right.data_type().clone());
    if lt.is_temporal() || rt.is_temporal() {
        return temporal(op, name, left, right);
    }
    let numeric = |e: &Evaluator| e.is_untyped() || e.data_type().is_numeric() || *e.data_type() == DataType::Null;
    if !numeric(&left) || !numeric(&right) {
        return Err(operator_error(&left, op.symbol(), &right));
    }
    let (mut ty, mut nodes) = reconcile_nodes(&[left.clone(), right.clone()])?;
    if !ty.is_numeric() {
        // two untyped or null operands
        ty = DataType::Integer;
        nodes = vec![left.convert_implicit(&ty)?, right.convert_implicit(&ty)?];
    }
    let result_ty = ty.clone();
    Evaluator::compute(name, result_ty, nodes)
        .key(op)
        .build(move |args| {
            let (a, b) = (args.get(0)?, args.get(1)?);
            if a.is_null() || b.is_null() {
                return Ok(Value::Null);
            }
            numeric_op(op, &ty, &a, &b)
        })
}

fn numeric_op(op: BinaryOp, ty: &DataType, a: &Value, b: &Value) -> Result<Value> {
    match ty {
        DataType::Float => {
            let (x, y) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
            let r = match op {
                BinaryOp::Plus => x + y,
                BinaryOp::Minus => x - y,
                BinaryOp::Multiply => x * y,
                BinaryOp::Divide | BinaryOp::Modulo if y == 0.0 => {
                    return Err(DbError::DivisionByZero)
                }
                BinaryOp::Divide => x / y,
                BinaryOp::Modulo => x % y,
                _ => return Err(DbError::OperatorNotFound(op.symbol().to_string())),
            };
            Ok(Value::float(r))
        }
        _ => {
            let (x, y) = (a.as_i64().unwrap_or_default(), b.as_i64().unwrap_or_default());
            let r = match op {
                BinaryOp::Plus => x.checked_add(y),
                BinaryOp::Minus => x.checked_sub(y),
                BinaryOp::Multiply => x.checked_mul(y),
                BinaryOp::Divide | BinaryOp::Modulo if y == 0 => {
                    return Err(DbError::DivisionByZero)
                }
                BinaryOp::Divide => x.checked_div(y),
                BinaryOp::Modulo => x.checked_rem(y),
                _ => return Err(DbError::OperatorNotFound(op.symbol().to_string())),
            };
            let r = r.ok_or_else(|| DbError::OutOfRange(ty.to_string()))?;
            if *ty == DataType::Integer {
                i32::try_from(r)
                    .map(Value::Integer)
                    .map_err(|_| DbError::OutOfRange("integer".into()))
            } else {
                Ok(Value::BigInt(r))
            }
        }
    }
}

/// Date, timestamp and interval arithmetic.
fn temporal(op: BinaryOp, name: String, left: Evaluator, right: Evaluator) -> Result<Evaluator> {
    let settle = |e: &Evaluator, other: &DataType| -> Result<Evaluator> {
        if !e.is_untyped() {
            return Ok(e.clone());
        }
        match (op, other) {
            (BinaryOp::Minus, DataType::Timestamp) | (BinaryOp::Minus, DataType::Date) => e
                .cast(&DataType::Interval)
                .or_else(|_| e.cast(other)),
            (_, DataType::Interval) => e.cast(&DataType::Interval).or_else(|_| e.cast(&DataType::Timestamp)),
            _ => e.cast(&DataType::Interval),
        }
    };
    let left = settle(&left, right.data_type())?;
    let right = settle(&right, left.data_type())?;
    let (lt, rt) = (left.data_type().clone(), right.data_type().clone());
    let ty = match (op, &lt, &rt) {
        (BinaryOp::Plus, DataType::Date | DataType::Timestamp, DataType::Interval)
        | (BinaryOp::Plus, DataType::Interval, DataType::Date | DataType::Timestamp)
        | (BinaryOp::Minus, DataType::Date | DataType::Timestamp, DataType::Interval) => DataType::Timestamp,
        (BinaryOp::Plus | BinaryOp::Minus, DataType::Interval, DataType::Interval) => DataType::Interval,
        (BinaryOp::Minus, DataType::Timestamp | DataType::Date, DataType::Timestamp) | (BinaryOp::Minus, DataType::Timestamp, DataType::Date) => {
            DataType::Interval
        }
        (BinaryOp::Minus, DataType::Date, DataType::Date) => DataType::Integer,
        (BinaryOp::Plus, DataType::Date, DataType::Integer) | (BinaryOp::Minus, DataType::Date, DataType::Integer) => DataType::Date,
        (BinaryOp::Plus, DataType::Integer, DataType::Date) => DataType::Date,
        _ => return Err(operator_error(&left, op.symbol(), &right)),
    };
    Evaluator::compute(name, ty, vec![left, right])
        .key(("temporal", op))
        .build(move |args| {
            let (a, b) = (args.get(0)?, args.get(1)?);
            if a.is_null() || b.is_null() {
                return Ok(Value::Null);
            }
            temporal_op(op, a, b)
        })
}

fn temporal_op(op: BinaryOp, a: Value, b: Value) -> Result<Value> {
    let out_of_range = || DbError::OutOfRange("timestamp".into());
    let minus = op == BinaryOp::Minus;
    Ok(match (a, b) {
        (Value::Interval(x), Value::Interval(y)) => {
            Value::Interval(if minus { x.add(y.negate()) } else { x.add(y) })
        }
        (Value::Interval(i), Value::Timestamp(t)) | (Value::Timestamp(t), Value::Interval(i)) => {
            let i = if minus { i.negate() } else { i };
            Value::Timestamp(i.apply(t).ok_or_else(out_of_range)?)
        }
        (Value::Interval(i), Value::Date(d)) | (Value::Date(d), Value::Interval(i)) => {
            let i = if minus { i.negate() } else { i };
            Value::Timestamp(i.apply_date(d).ok_or_else(out_of_range)?)
        }
        (Value::Date(x), Value::Date(y)) => Value::Integer((x - y).num_days() as i32),
        (Value::Timestamp(x), Value::Timestamp(y)) => Value::Interval(Interval::between(x, y)),
        (Value::Date(x), Value::Timestamp(y)) => {
            Value::Interval(Interval::between(x.and_time(chrono::NaiveTime::MIN), y))
        }
        (Value::Timestamp(x), Value::Date(y)) => {
            Value::Interval(Interval::between(x, y.and_time(chrono::NaiveTime::MIN)))
        }
        (Value::Date(d), n) | (n, Value::Date(d)) => {
            let days = n.as_i64().unwrap_or_default();
            let days = if minus { -days } else { days };
            Value::Date(
                d.checked_add_signed(Duration::days(days))
                    .ok_or_else(out_of_range)?,
            )
        }
        (a, b) => {
            return Err(DbError::OperatorNotFound(format!(
                "{} {} {}",
                a.data_type(),
                op.symbol(),
                b.data_type()
            )))
        }
    })
}

/// Builds a unary operator node.
pub fn unary(op: UnaryOp, operand: Evaluator) -> Result<Evaluator> {
    match op {
        UnaryOp::Not => {
            let name = format!("NOT {}", operand.name());
            let operand = operand.convert_implicit(&DataType::Bool)?;
            Evaluator::compute(name, DataType::Bool, vec![operand])
                .key("not")
                .build(|args| Ok(args.get(0)?.as_bool().map_or(Value::Null, |b| Value::Bool(!b))))
        }
        UnaryOp::Plus | UnaryOp::Minus => {
            let operand = if operand.is_untyped() {
                operand.cast(&DataType::Float)?
            } else {
                operand
            };
            let ty = operand.data_type().clone();
            if !ty.is_numeric() && ty != DataType::Interval && ty != DataType::Null {
                return Err(DbError::OperatorNotFound(format!(
                    "{} {}",
                    if op == UnaryOp::Minus { "-" } else { "+" },
                    ty
                )));
            }
            if op == UnaryOp::Plus {
                return Ok(operand);
            }
            let name = format!("-{}", operand.name());
            Evaluator::compute(name, ty, vec![operand])
                .key("negate")
                .build(|args| {
                    Ok(match args.get(0)? {
                        Value::Integer(i) => Value::Integer(
                            i.checked_neg()
                                .ok_or_else(|| DbError::OutOfRange("integer".into()))?,
                        ),
                        Value::BigInt(i) => Value::BigInt(
                            i.checked_neg()
                                .ok_or_else(|| DbError::OutOfRange("bigint".into()))?,
                        ),
                        Value::Float(f) => Value::float(-f.0),
                        Value::Interval(i) => Value::Interval(i.negate()),
                        _ => Value::Null,
                    })
                })
        }
    }
}

pub fn is_null(operand: Evaluator, negated: bool) -> Result<Evaluator> {
    let name = format!(
        "{} IS {}NULL",
        operand.name(),
        if negated { "NOT " } else { "" }
    );
    Evaluator::compute(name, DataType::Bool, vec![operand])
        .key(("is_null", negated))
        .build(move |args| Ok(Value::Bool(args.get(0)?.is_null() != negated)))
}

/// `expr [NOT] IN (list)` with three-valued semantics.
pub fn in_list(operand: Evaluator, list: Vec<Evaluator>, negated: bool) -> Result<Evaluator> {
    let name = format!("{} {}IN (...)", operand.name(), if negated { "NOT " } else { "" });
    let mut nodes = vec![operand];
    nodes.extend(list);
    let (ty, nodes) = reconcile_nodes(&nodes)?;
    Evaluator::compute(name, DataType::Bool, nodes)
        .key(("in", negated))
        .build(move |args| {
            let value = args.get(0)?;
            let mut unknown = false;
            for i in 1..args.len() {
                match ty.equals(&value, &args.get(i)?) {
                    Some(true) => return Ok(Value::Bool(!negated)),
                    Some(false) => {}
                    None => unknown = true,
                }
            }
            Ok(if unknown {
                Value::Null
            } else {
                Value::Bool(negated)
            })
        })
}

pub fn between(
    operand: Evaluator,
    low: Evaluator,
    high: Evaluator,
    negated: bool,
) -> Result<Evaluator> {
    let name = format!(
        "{} {}BETWEEN {} AND {}",
        operand.name(),
        if negated { "NOT " } else { "" },
        low.name(),
        high.name()
    );
    let (ty, nodes) = reconcile_nodes(&[operand, low, high])?;
    Evaluator::compute(name, DataType::Bool, nodes)
        .key(("between", negated))
        .build(move |args| {
            let (v, lo, hi) = (args.get(0)?, args.get(1)?, args.get(2)?);
            let above = ty.compare(&v, &lo).map(|o| o != Ordering::Less);
            let below = ty.compare(&v, &hi).map(|o| o != Ordering::Greater);
            let inside = match (above, below) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            };
            Ok(inside.map_or(Value::Null, |b| Value::Bool(b != negated)))
        })
}

pub fn like(
    operand: Evaluator,
    pattern: Evaluator,
    negated: bool,
    case_insensitive: bool,
) -> Result<Evaluator> {
    let name = format!(
        "{} {}{} {}",
        operand.name(),
        if negated { "NOT " } else { "" },
        if case_insensitive { "ILIKE" } else { "LIKE" },
        pattern.name()
    );
    let operand = operand.convert_implicit(&DataType::Text)?;
    let pattern = pattern.convert_implicit(&DataType::Text)?;
    let compiled = match pattern.constant_value() {
        Some(Value::Text(p)) => Some(LikeMatcher::new(p, case_insensitive)?),
        _ => None,
    };
    Evaluator::compute(name, DataType::Bool, vec![operand, pattern])
        .key(("like", negated, case_insensitive))
        .build(move |args| {
            let Value::Text(text) = args.get(0)? else {
                return Ok(Value::Null);
            };
            let matched = match &compiled {
                Some(matcher) => matcher.is_match(&text),
                None => match args.get(1)? {
                    Value::Text(p) => LikeMatcher::new(&p, case_insensitive)?.is_match(&text),
                    _ => return Ok(Value::Null),
                },
            };
            Ok(Value::Bool(matched != negated))
        })
}

/// `CASE [operand] WHEN .. THEN .. [ELSE ..] END`, evaluated lazily.
pub fn case(
    operand: Option<Evaluator>,
    branches: Vec<(Evaluator, Evaluator)>,
    else_result: Option<Evaluator>,
) -> Result<Evaluator> {
    let conditions: Vec<Evaluator> = match &operand {
        Some(operand) => branches
            .iter()
            .map(|(when, _)| comparison(BinaryOp::Eq, operand.clone(), when.clone()))
            .collect::<Result<_>>()?,
        None => branches
            .iter()
            .map(|(when, _)| when.convert_implicit(&DataType::Bool))
            .collect::<Result<_>>()?,
    };
    let mut results: Vec<Evaluator> = branches.into_iter().map(|(_, then)| then).collect();
    let has_else = else_result.is_some();
    results.extend(else_result);
    let (ty, results) = reconcile_nodes(&results)?;
    let count = conditions.len();
    let mut deps = conditions;
    deps.extend(results);
    Evaluator::compute("case", ty, deps)
        .key(("case", count, has_else))
        .build(move |args| {
            for i in 0..count {
                if args.get(i)?.as_bool() == Some(true) {
                    return args.get(count + i);
                }
            }
            if has_else {
                args.get(2 * count)
            } else {
                Ok(Value::Null)
            }
        })
}

/// First non-null argument.
pub fn coalesce(args: Vec<Evaluator>) -> Result<Evaluator> {
    let (ty, nodes) = reconcile_nodes(&args)?;
    Evaluator::compute("coalesce", ty, nodes)
        .key("coalesce")
        .build(|args| {
            for i in 0..args.len() {
                let v = args.get(i)?;
                if !v.is_null() {
                    return Ok(v);
                }
            }
            Ok(Value::Null)
        })
}

pub fn array(items: Vec<Evaluator>) -> Result<Evaluator> {
    let (ty, nodes) = if items.is_empty() {
        (DataType::Text, Vec::new())
    } else {
        reconcile_nodes(&items)?
    };
    Evaluator::compute("array", ty.array_of(), nodes)
        .key("array")
        .build(|args| Ok(Value::array(args.all()?)))
}

/// 1-based array subscript; out-of-range subscripts yield null.
pub fn subscript(array: Evaluator, index: Evaluator) -> Result<Evaluator> {
    let Some(element) = array.data_type().element_type().cloned() else {
        return Err(DbError::Query(format!(
            "cannot subscript type {} because it is not an array",
            array.data_type()
        )));
    };
    let index = index.convert_implicit(&DataType::BigInt)?;
    let name = format!("{}[{}]", array.name(), index.name());
    Evaluator::compute(name, element, vec![array, index])
        .key("subscript")
        .build(|args| {
            let (array, index) = (args.get(0)?, args.get(1)?);
            let (Some(items), Some(i)) = (array.as_array(), index.as_i64()) else {
                return Ok(Value::Null);
            };
            Ok(usize::try_from(i - 1)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .unwrap_or(Value::Null))
        })
}

/// `ANY(array)`: marks the array as a set for the enclosing comparison.
pub fn any(array: Evaluator) -> Result<Evaluator> {
    if array.data_type().element_type().is_none() {
        return Err(DbError::Query(format!(
            "op ANY/ALL (array) requires array on right side, got {}",
            array.data_type()
        )));
    }
    let name = format!("ANY({})", array.name());
    let ty = array.data_type().clone();
    Evaluator::compute(name, ty, vec![array])
        .key("any")
        .any()
        .build(|args| args.get(0))
}
