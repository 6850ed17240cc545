//! Predicate to plan rewrite.
//!
//! Comparisons between an indexed expression and constants become index
//! lookups; `AND` intersects and `OR` unites the rewritten sides. Anything
//! else is a sequential scan over the base.

use crate::ast::{BinaryOp, Expr};
use crate::error::Result;
use crate::eval::{literal_prefix, BuildContext, Evaluator, ExpressionBuilder};
use crate::index::{IndexKey, IndexOp};
use crate::types::{DataType, Value};

use super::{FilterKind, Selection};

/// Builds the plan for `base WHERE predicate`.
pub(crate) fn build_filter(
    base: &Selection,
    predicate: &Expr,
    ctx: BuildContext<'_>,
) -> Result<Selection> {
    let builder = FilterBuilder {
        base,
        exprs: ExpressionBuilder::new(base, ctx).clause("WHERE"),
    };
    let plan = builder.build(predicate)?;
    tracing::debug!(base = base.id(), plan = plan.kind_name(), "filter plan");
    Ok(plan)
}

struct FilterBuilder<'a> {
    base: &'a Selection,
    exprs: ExpressionBuilder<'a>,
}

impl FilterBuilder<'_> {
    fn build(&self, expr: &Expr) -> Result<Selection> {
        let predicate = self.exprs.build_predicate(expr)?;
        if let Some(value) = predicate.constant_value() {
            return Ok(match value.as_bool() {
                Some(true) => self.base.clone(),
                _ => Selection::empty(self.base),
            });
        }
        let rewritten = match expr {
            Expr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => Some(self.and(left, right)?),
            Expr::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => self.or(left, right)?,
            Expr::Binary { op, left, right } if op.is_comparison() => {
                self.comparison(*op, left, right)?
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => self.in_list(expr, list, *negated)?,
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => self.between(expr, low, high, *negated)?,
            Expr::Like {
                expr,
                pattern,
                negated: false,
                case_insensitive: false,
            } => self.starts_with(expr, pattern, &predicate)?,
            _ => None,
        };
        Ok(rewritten.unwrap_or_else(|| self.base.seq_scan(predicate)))
    }

    fn and(&self, left: &Expr, right: &Expr) -> Result<Selection> {
        let left = self.build(left)?;
        let right = self.build(right)?;
        if left.is_empty_node() || right.is_empty_node() {
            return Ok(Selection::empty(self.base));
        }
        if left.same_as(self.base) {
            return Ok(right);
        }
        if right.same_as(self.base) {
            return Ok(left);
        }
        Ok(self.base.and(left, right))
    }

    /// `None` when either side needs a full scan: the whole disjunction is
    /// then scanned once.
    fn or(&self, left: &Expr, right: &Expr) -> Result<Option<Selection>> {
        let left = self.build(left)?;
        let right = self.build(right)?;
        if left.same_as(self.base) || right.same_as(self.base) {
            return Ok(Some(self.base.clone()));
        }
        if left.is_empty_node() {
            return Ok(Some(right));
        }
        if right.is_empty_node() {
            return Ok(Some(left));
        }
        if left.is_seq_scan() || right.is_seq_scan() {
            return Ok(None);
        }
        Ok(Some(self.base.or(left, right)))
    }

    /// Splits `expr` into a non-constant operand the index could cover.
    fn operand(&self, expr: &Expr) -> Result<Option<Evaluator>> {
        let node = self.exprs.build(expr)?;
        Ok((!node.is_constant() && !node.is_any() && !node.is_impure()).then_some(node))
    }

    /// Value of a constant operand converted to the indexed operand's type.
    /// `None` when the conversion is not implicit.
    fn key_value(&self, operand: &Evaluator, constant: &Expr) -> Result<Option<Value>> {
        let node = self.exprs.build(constant)?;
        if !node.is_constant() || node.is_any() {
            return Ok(None);
        }
        Ok(node
            .convert_implicit(operand.data_type())
            .ok()
            .and_then(|c| c.constant_value().cloned()))
    }

    fn comparison(&self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Option<Selection>> {
        let (operand, constant, op) = match self.operand(left)? {
            Some(operand) => (operand, right, op),
            None => match self.operand(right)? {
                Some(operand) => (operand, left, flip(op)),
                None => return Ok(None),
            },
        };
        let Some(value) = self.key_value(&operand, constant)? else {
            return Ok(None);
        };
        if value.is_null() {
            return Ok(Some(Selection::empty(self.base)));
        }
        let Some(index) = self.base.get_index(std::slice::from_ref(&operand))? else {
            return Ok(None);
        };
        let key = IndexKey::single(value);
        let (kind, op) = match op {
            BinaryOp::Eq => (FilterKind::Eq, IndexOp::eq(key)),
            BinaryOp::NotEq => (FilterKind::Ineq, IndexOp::Neq { key }),
            BinaryOp::Gt => (FilterKind::Ineq, IndexOp::Gt { key }),
            BinaryOp::GtEq => (FilterKind::Ineq, IndexOp::Ge { key }),
            BinaryOp::Lt => (FilterKind::Ineq, IndexOp::Lt { key }),
            BinaryOp::LtEq => (FilterKind::Ineq, IndexOp::Le { key }),
            _ => return Ok(None),
        };
        Ok(Some(self.base.index_filter(index, vec![op], kind, vec![operand])))
    }

    fn in_list(&self, expr: &Expr, list: &[Expr], negated: bool) -> Result<Option<Selection>> {
        let Some(operand) = self.operand(expr)? else {
            return Ok(None);
        };
        let mut keys = Vec::with_capacity(list.len());
        let mut has_null = false;
        for item in list {
            match self.key_value(&operand, item)? {
                None => return Ok(None),
                Some(Value::Null) => has_null = true,
                Some(value) => keys.push(IndexKey::single(value)),
            }
        }
        keys.sort();
        keys.dedup();
        // `x NOT IN (.., NULL)` is never true, nor is `x IN ()`
        if (negated && has_null) || (!negated && keys.is_empty()) {
            return Ok(Some(Selection::empty(self.base)));
        }
        let Some(index) = self.base.get_index(std::slice::from_ref(&operand))? else {
            return Ok(None);
        };
        let (kind, ops) = if negated {
            (FilterKind::NotIn, vec![IndexOp::Nin { keys }])
        } else {
            (FilterKind::In, keys.into_iter().map(IndexOp::eq).collect())
        };
        Ok(Some(self.base.index_filter(index, ops, kind, vec![operand])))
    }

    fn between(
        &self,
        expr: &Expr,
        low: &Expr,
        high: &Expr,
        negated: bool,
    ) -> Result<Option<Selection>> {
        let Some(operand) = self.operand(expr)? else {
            return Ok(None);
        };
        let (Some(lo), Some(hi)) = (self.key_value(&operand, low)?, self.key_value(&operand, high)?)
        else {
            return Ok(None);
        };
        if lo.is_null() || hi.is_null() {
            return Ok(None);
        }
        let Some(index) = self.base.get_index(std::slice::from_ref(&operand))? else {
            return Ok(None);
        };
        let (lo, hi) = (IndexKey::single(lo), IndexKey::single(hi));
        let op = if negated {
            IndexOp::Outside { lo, hi }
        } else {
            IndexOp::Inside { lo, hi }
        };
        Ok(Some(self.base.index_filter(
            index,
            vec![op],
            FilterKind::Between,
            vec![operand],
        )))
    }

    fn starts_with(
        &self,
        expr: &Expr,
        pattern: &Expr,
        predicate: &Evaluator,
    ) -> Result<Option<Selection>> {
        let Some(operand) = self.operand(expr)? else {
            return Ok(None);
        };
        if operand.data_type() != &DataType::Text {
            return Ok(None);
        }
        let pattern = self.exprs.build(pattern)?;
        let Some(Value::Text(pattern)) = pattern.constant_value() else {
            return Ok(None);
        };
        let Some((prefix, bare)) = literal_prefix(pattern) else {
            return Ok(None);
        };
        let Some(index) = self.base.get_index(std::slice::from_ref(&operand))? else {
            return Ok(None);
        };
        let op = IndexOp::StartsWith { prefix };
        let lookup = self
            .base
            .index_filter(index, vec![op], FilterKind::StartsWith, vec![operand]);
        if bare {
            Ok(Some(lookup))
        } else {
            Ok(Some(lookup.residual_scan(predicate.clone())))
        }
    }
}

/// Operator with swapped operands: `c < x` is `x > c`.
fn flip(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Lt => BinaryOp::Gt,
        BinaryOp::LtEq => BinaryOp::GtEq,
        BinaryOp::Gt => BinaryOp::Lt,
        BinaryOp::GtEq => BinaryOp::LtEq,
        other => other,
    }
}
