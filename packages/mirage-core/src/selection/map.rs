//! Projection.

use crate::error::{DbError, Result};
use crate::eval::Evaluator;
use crate::index::{Index, RowIter};
use crate::row::{next_namespace, Lineage, Row, RowData};
use crate::transaction::Transaction;

use super::{ColumnBinding, PlanNode, Selection, SelectionKind};

pub(crate) struct MapNode {
    base: Selection,
    /// Output expressions over the base's columns
    exprs: Vec<Evaluator>,
}

pub(crate) fn map(base: &Selection, items: Vec<(String, Evaluator)>) -> Result<Selection> {
    let id = next_namespace();
    let mut columns = Vec::with_capacity(items.len());
    let mut exprs = Vec::with_capacity(items.len());
    for (i, (name, expr)) in items.into_iter().enumerate() {
        if !reads_base(base, &expr) {
            return Err(DbError::MultiOrigin);
        }
        columns.push(ColumnBinding::new(
            None,
            &name,
            Evaluator::column(id, i, expr.data_type().clone(), &name),
        ));
        exprs.push(expr);
    }
    Ok(Selection::new(
        id,
        columns,
        SelectionKind::Map(MapNode {
            base: base.clone(),
            exprs,
        }),
    ))
}

/// Whether every column `expr` reads is one of `base`'s columns.
fn reads_base(base: &Selection, expr: &Evaluator) -> bool {
    expr.used_columns().iter().all(|used| {
        base.columns()
            .iter()
            .any(|c| c.evaluator.used_columns().contains(used))
    })
}

impl MapNode {
    pub(crate) fn project(&self, this: &Selection, row: &Row, t: &Transaction) -> Result<Row> {
        let values = self
            .exprs
            .iter()
            .map(|e| e.get(Some(row), t))
            .collect::<Result<Vec<_>>>()?;
        Ok(RowData::derived(this.id(), values, Lineage::Derived(row.clone())))
    }
}

impl PlanNode for MapNode {
    fn kind(&self) -> &'static str {
        "map"
    }

    fn enumerate<'a>(&'a self, this: &'a Selection, t: &'a Transaction) -> RowIter<'a> {
        Box::new(
            self.base
                .enumerate(t)
                .map(move |row| row.and_then(|row| self.project(this, &row, t))),
        )
    }

    fn has_item(&self, _this: &Selection, row: &Row, t: &Transaction) -> Result<bool> {
        match row.parent() {
            Some(parent) => self.base.has_item(parent, t),
            None => Ok(false),
        }
    }

    fn entropy(&self, t: &Transaction) -> f64 {
        self.base.entropy(t)
    }

    /// Remaps output columns to the expressions computing them.
    fn get_index(&self, this: &Selection, exprs: &[Evaluator]) -> Result<Option<Index>> {
        let mut base_exprs = Vec::with_capacity(exprs.len());
        for expr in exprs {
            let own = expr.origin() == Some(this.id());
            match expr.column_index().filter(|_| own) {
                Some(i) => match self.exprs.get(i) {
                    Some(base_expr) => base_exprs.push(base_expr.clone()),
                    None => return Ok(None),
                },
                None => return Ok(None),
            }
        }
        Ok(self.base.get_index(&base_exprs)?.map(|index| Index::Projected {
            base: Box::new(index),
            expressions: exprs.to_vec(),
            map: this.clone(),
        }))
    }

    fn detail(&self) -> Option<String> {
        let names: Vec<&str> = self.exprs.iter().map(|e| e.name()).collect();
        Some(names.join(", "))
    }

    fn children(&self) -> Vec<&Selection> {
        vec![&self.base]
    }
}
