//! Builds evaluators from expression trees against a scope selection.

use crate::aggregation::is_aggregate;
use crate::ast::{Expr, Literal};
use crate::error::{DbError, Result};
use crate::selection::Selection;
use crate::types::{DataType, Value};

use super::cache::ExpressionCache;
use super::evaluator::{hash_of, Evaluator};
use super::functions::FunctionRegistry;
use super::operators;

/// Shared resources for building expressions.
#[derive(Clone, Copy)]
pub struct BuildContext<'a> {
    pub functions: &'a FunctionRegistry,
    pub cache: Option<&'a ExpressionCache>,
    /// Schema version; part of the cache key
    pub epoch: u64,
}

impl<'a> BuildContext<'a> {
    pub fn new(functions: &'a FunctionRegistry) -> Self {
        Self {
            functions,
            cache: None,
            epoch: 0,
        }
    }
}

/// Output columns of an aggregation, used while building the expressions
/// evaluated on top of it.
#[derive(Debug, Clone)]
pub struct GroupingScope {
    /// Selection the group keys and aggregate arguments were built against
    pub base: Selection,
    /// Group key hash (as built over `base`) and its output column
    pub keys: Vec<(u64, Evaluator)>,
    /// Aggregate call and its output column
    pub aggregates: Vec<(Expr, Evaluator)>,
}

/// Builds [`Evaluator`]s for expressions over the columns of one selection.
pub struct ExpressionBuilder<'a> {
    scope: &'a Selection,
    ctx: BuildContext<'a>,
    grouping: Option<&'a GroupingScope>,
    clause: &'static str,
}

impl<'a> ExpressionBuilder<'a> {
    pub fn new(scope: &'a Selection, ctx: BuildContext<'a>) -> Self {
        Self {
            scope,
            ctx,
            grouping: None,
            clause: "this context",
        }
    }

    /// Resolves aggregate calls and group keys to aggregation outputs.
    pub fn grouped(mut self, grouping: &'a GroupingScope) -> Self {
        self.grouping = Some(grouping);
        self
    }

    /// Clause name used in "aggregates are not allowed" errors.
    pub fn clause(mut self, clause: &'static str) -> Self {
        self.clause = clause;
        self
    }

    pub fn build(&self, expr: &Expr) -> Result<Evaluator> {
        match (self.ctx.cache, self.grouping) {
            (Some(cache), None) => {
                let key = (self.scope.cache_scope(), self.ctx.epoch, hash_of(expr));
                cache.get_or_build(key, || self.node(expr))
            }
            _ => self.node(expr),
        }
    }

    /// Builds a predicate, requiring a boolean result.
    pub fn build_predicate(&self, expr: &Expr) -> Result<Evaluator> {
        let node = self.build(expr)?;
        match node.data_type() {
            DataType::Bool | DataType::Null => node.convert_implicit(&DataType::Bool),
            _ if node.is_untyped() => node.cast(&DataType::Bool),
            other => Err(DbError::Query(format!(
                "argument of {} must be type boolean, not type {}",
                self.clause, other
            ))),
        }
    }

    fn node(&self, expr: &Expr) -> Result<Evaluator> {
        if let Some(grouping) = self.grouping {
            if let Some(resolved) = self.resolve_grouped(expr, grouping)? {
                return Ok(resolved);
            }
        }
        match expr {
            Expr::Literal(literal) => Ok(literal_node(literal)),
            Expr::Column { table, name } => self.scope.get_column(table.as_deref(), name),
            Expr::Binary { op, left, right } => {
                operators::binary(*op, self.node(left)?, self.node(right)?)
            }
            Expr::Unary { op, expr } => operators::unary(*op, self.node(expr)?),
            Expr::IsNull { expr, negated } => operators::is_null(self.node(expr)?, *negated),
            Expr::InList {
                expr,
                list,
                negated,
            } => operators::in_list(self.node(expr)?, self.nodes(list)?, *negated),
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => operators::between(
                self.node(expr)?,
                self.node(low)?,
                self.node(high)?,
                *negated,
            ),
            Expr::Like {
                expr,
                pattern,
                negated,
                case_insensitive,
            } => operators::like(
                self.node(expr)?,
                self.node(pattern)?,
                *negated,
                *case_insensitive,
            ),
            Expr::Case {
                operand,
                branches,
                else_result,
            } => {
                let operand = operand.as_ref().map(|o| self.node(o)).transpose()?;
                let branches = branches
                    .iter()
                    .map(|(when, then)| Ok((self.node(when)?, self.node(then)?)))
                    .collect::<Result<Vec<_>>>()?;
                let else_result = else_result.as_ref().map(|e| self.node(e)).transpose()?;
                operators::case(operand, branches, else_result)
            }
            Expr::Cast { expr, to } => self.node(expr)?.cast(to),
            Expr::Function {
                name,
                args,
                distinct: _,
                star,
            } => self.function(name, args, *star),
            Expr::Array(items) => operators::array(self.nodes(items)?),
            Expr::Subscript { expr, index } => {
                operators::subscript(self.node(expr)?, self.node(index)?)
            }
            Expr::Any(expr) => operators::any(self.node(expr)?),
            Expr::Default => Err(DbError::Query(format!(
                "DEFAULT is not allowed in {}",
                self.clause
            ))),
        }
    }

    fn nodes(&self, exprs: &[Expr]) -> Result<Vec<Evaluator>> {
        exprs.iter().map(|e| self.node(e)).collect()
    }

    fn function(&self, name: &str, args: &[Expr], star: bool) -> Result<Evaluator> {
        let lower = name.to_lowercase();
        if star || (is_aggregate(&lower) && !self.ctx.functions.contains(&lower)) {
            return Err(DbError::AggregateNotAllowed(self.clause.to_string()));
        }
        let args = self.nodes(args)?;
        match lower.as_str() {
            "coalesce" => operators::coalesce(args),
            "concat" => {
                let args = args
                    .into_iter()
                    .map(|a| if a.is_untyped() { Ok(a) } else { a.cast(&DataType::Text) })
                    .collect::<Result<Vec<_>>>()?;
                self.ctx.functions.call(&lower, args)
            }
            _ => self.ctx.functions.call(&lower, args),
        }
    }

    /// Maps aggregate calls and group-key expressions to aggregation
    /// outputs. Columns that are neither grouped nor aggregated are errors.
    fn resolve_grouped(&self, expr: &Expr, grouping: &GroupingScope) -> Result<Option<Evaluator>> {
        if let Expr::Function { name, .. } = expr {
            if is_aggregate(&name.to_lowercase()) {
                return grouping
                    .aggregates
                    .iter()
                    .find(|(call, _)| call == expr)
                    .map(|(_, output)| Some(output.clone()))
                    .ok_or_else(|| DbError::Internal(format!("unbound aggregate {}", name)));
            }
        }
        if matches!(expr, Expr::Literal(_)) {
            return Ok(None);
        }
        let over_base = ExpressionBuilder::new(&grouping.base, self.ctx).clause(self.clause);
        if let Ok(built) = over_base.node(expr) {
            if let Some((_, output)) = grouping.keys.iter().find(|(hash, _)| *hash == built.hash()) {
                return Ok(Some(output.clone()));
            }
        }
        if let Expr::Column { table, name } = expr {
            let qualified = match table {
                Some(table) => format!("{}.{}", table, name),
                None => name.clone(),
            };
            return Err(DbError::NotGrouped(qualified));
        }
        Ok(None)
    }
}

fn literal_node(literal: &Literal) -> Evaluator {
    match literal {
        Literal::Null => Evaluator::literal(Value::Null, DataType::Null),
        Literal::Bool(b) => Evaluator::constant(Value::Bool(*b)),
        Literal::Integer(i) => match i32::try_from(*i) {
            Ok(small) => Evaluator::constant(Value::Integer(small)),
            Err(_) => Evaluator::constant(Value::BigInt(*i)),
        },
        Literal::Float(f) => Evaluator::constant(Value::Float(*f)),
        Literal::String(s) => Evaluator::untyped_text(s),
    }
}
