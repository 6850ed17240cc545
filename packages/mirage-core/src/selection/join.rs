//! Inner, left and cross joins.

use crate::ast::{BinaryOp, Expr, JoinKind};
use crate::error::Result;
use crate::eval::{BuildContext, Evaluator, ExpressionBuilder};
use crate::index::{Index, IndexKey, IndexOp, QueryIndex, RowIter};
use crate::row::{next_namespace, Lineage, Row, RowData};
use crate::transaction::Transaction;
use crate::types::Value;

use super::{ColumnBinding, PlanNode, Selection, SelectionKind};

/// Per-left-row index lookup replacing the nested loop.
pub(crate) struct JoinLookup {
    /// Key computed from the left row
    left_key: Evaluator,
    /// Index of the right selection
    index: Index,
}

pub(crate) struct JoinNode {
    left: Selection,
    right: Selection,
    kind: JoinKind,
    /// Predicate over the join's own columns
    on: Option<Evaluator>,
    lookup: Option<JoinLookup>,
}

pub(crate) fn join(
    left: &Selection,
    right: &Selection,
    kind: JoinKind,
    on: Option<&Expr>,
    ctx: BuildContext<'_>,
) -> Result<Selection> {
    let id = next_namespace();
    let columns: Vec<ColumnBinding> = left
        .columns()
        .iter()
        .chain(right.columns())
        .enumerate()
        .map(|(i, c)| ColumnBinding {
            qualifier: c.qualifier.clone(),
            name: c.name.clone(),
            evaluator: Evaluator::column(id, i, c.evaluator.data_type().clone(), &c.name),
        })
        .collect();
    let node = |on, lookup| JoinNode {
        left: left.clone(),
        right: right.clone(),
        kind,
        on,
        lookup,
    };
    let (on, lookup) = match on {
        Some(expr) => {
            let scope = Selection::new(id, columns.clone(), SelectionKind::Join(node(None, None)));
            let predicate = ExpressionBuilder::new(&scope, ctx)
                .clause("JOIN conditions")
                .build_predicate(expr)?;
            (Some(predicate), find_lookup(left, right, expr, ctx)?)
        }
        None => (None, None),
    };
    tracing::debug!(
        join = id,
        kind = ?kind,
        lookup = lookup.is_some(),
        "join plan"
    );
    Ok(Selection::new(id, columns, SelectionKind::Join(node(on, lookup))))
}

/// First `left_expr = right_expr` conjunct of `on` with an index on the
/// right-hand expression.
fn find_lookup(
    left: &Selection,
    right: &Selection,
    on: &Expr,
    ctx: BuildContext<'_>,
) -> Result<Option<JoinLookup>> {
    match on {
        Expr::Binary {
            op: BinaryOp::And,
            left: a,
            right: b,
        } => match find_lookup(left, right, a, ctx)? {
            Some(lookup) => Ok(Some(lookup)),
            None => find_lookup(left, right, b, ctx),
        },
        Expr::Binary {
            op: BinaryOp::Eq,
            left: a,
            right: b,
        } => match equality_lookup(left, right, a, b, ctx)? {
            Some(lookup) => Ok(Some(lookup)),
            None => equality_lookup(left, right, b, a, ctx),
        },
        _ => Ok(None),
    }
}

fn equality_lookup(
    left: &Selection,
    right: &Selection,
    left_expr: &Expr,
    right_expr: &Expr,
    ctx: BuildContext<'_>,
) -> Result<Option<JoinLookup>> {
    let (Ok(left_key), Ok(right_key)) = (
        ExpressionBuilder::new(left, ctx).build(left_expr),
        ExpressionBuilder::new(right, ctx).build(right_expr),
    ) else {
        return Ok(None);
    };
    if left_key.is_constant() || right_key.is_constant() {
        return Ok(None);
    }
    let Ok(left_key) = left_key.convert_implicit(right_key.data_type()) else {
        return Ok(None);
    };
    Ok(right
        .get_index(std::slice::from_ref(&right_key))?
        .map(|index| JoinLookup { left_key, index }))
}

impl JoinNode {
    fn joined(&self, this: &Selection, left: &Row, right: Option<&Row>, t: &Transaction) -> Result<Row> {
        let mut values = self.left.values_of(left, t)?;
        match right {
            Some(right) => values.extend(self.right.values_of(right, t)?),
            None => values.extend(std::iter::repeat(Value::Null).take(self.right.columns().len())),
        }
        Ok(RowData::derived(
            this.id(),
            values,
            Lineage::Joined(left.clone(), right.cloned()),
        ))
    }

    /// Joined rows for one left row.
    fn matches(
        &self,
        this: &Selection,
        left: &Row,
        right_rows: Option<&[Row]>,
        t: &Transaction,
    ) -> Result<Vec<Row>> {
        let candidates: Vec<Row> = match (&self.lookup, right_rows) {
            (Some(lookup), _) => {
                let key = lookup.left_key.get(Some(left), t)?;
                if key.is_null() {
                    Vec::new()
                } else {
                    let op = IndexOp::eq(IndexKey::single(key));
                    lookup.index.enumerate(&op, t).collect::<Result<_>>()?
                }
            }
            (None, Some(rows)) => rows.to_vec(),
            (None, None) => self.right.rows(t)?,
        };
        let mut out = Vec::new();
        for right in &candidates {
            let row = self.joined(this, left, Some(right), t)?;
            let keep = match &self.on {
                Some(on) => on.test(Some(&row), t)?,
                None => true,
            };
            if keep {
                out.push(row);
            }
        }
        if out.is_empty() && self.kind == JoinKind::Left {
            out.push(self.joined(this, left, None, t)?);
        }
        Ok(out)
    }
}

impl PlanNode for JoinNode {
    fn kind(&self) -> &'static str {
        "join"
    }

    fn enumerate<'a>(&'a self, this: &'a Selection, t: &'a Transaction) -> RowIter<'a> {
        let right_rows = match &self.lookup {
            Some(_) => None,
            None => match self.right.rows(t) {
                Ok(rows) => Some(rows),
                Err(e) => return Box::new(std::iter::once(Err(e))),
            },
        };
        Box::new(self.left.enumerate(t).flat_map(move |left| {
            let rows = left.and_then(|left| self.matches(this, &left, right_rows.as_deref(), t));
            match rows {
                Ok(rows) => rows.into_iter().map(Ok).collect::<Vec<_>>(),
                Err(e) => vec![Err(e)],
            }
        }))
    }

    fn has_item(&self, _this: &Selection, row: &Row, t: &Transaction) -> Result<bool> {
        let (left, right) = match &row.lineage {
            Lineage::Joined(left, right) => (left, right),
            _ => return Ok(false),
        };
        if !self.left.has_item(left, t)? {
            return Ok(false);
        }
        match right {
            Some(right) => {
                if !self.right.has_item(right, t)? {
                    return Ok(false);
                }
                match &self.on {
                    Some(on) => on.test(Some(row), t),
                    None => Ok(true),
                }
            }
            None => Ok(self.kind == JoinKind::Left),
        }
    }

    fn entropy(&self, t: &Transaction) -> f64 {
        let left = self.left.entropy(t);
        match &self.lookup {
            Some(_) => left,
            None => left * self.right.entropy(t).max(1.0),
        }
    }

    fn detail(&self) -> Option<String> {
        let mut detail = format!("{:?}", self.kind).to_lowercase();
        if let Some(on) = &self.on {
            detail.push_str(&format!(" on {}", on.name()));
        }
        if self.lookup.is_some() {
            detail.push_str(" (index lookup)");
        }
        Some(detail)
    }

    fn children(&self) -> Vec<&Selection> {
        vec![&self.left, &self.right]
    }
}
