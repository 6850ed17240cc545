//! Table and subquery aliases (`FROM t AS x (a, b)`).

use crate::error::{DbError, Result};
use crate::eval::Evaluator;
use crate::index::{Index, RowIter};
use crate::row::{next_namespace, Row};
use crate::transaction::Transaction;

use super::{ColumnBinding, PlanNode, Selection, SelectionKind};

/// Renames a selection. Columns keep the base evaluators, so predicates
/// on aliased names resolve to the base's indices unchanged.
pub(crate) struct AliasNode {
    base: Selection,
    name: String,
}

pub(crate) fn alias(base: &Selection, name: &str, renames: &[String]) -> Result<Selection> {
    let width = base.columns().len();
    if renames.len() > width {
        return Err(DbError::Query(format!(
            "table \"{}\" has {} columns available but {} columns specified",
            name,
            width,
            renames.len()
        )));
    }
    let columns = base
        .columns()
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let renamed = renames.get(i).unwrap_or(&column.name);
            ColumnBinding::new(Some(name), renamed, column.evaluator.clone())
        })
        .collect();
    Ok(Selection::new(
        next_namespace(),
        columns,
        SelectionKind::Alias(AliasNode {
            base: base.clone(),
            name: name.to_string(),
        }),
    ))
}

impl PlanNode for AliasNode {
    fn kind(&self) -> &'static str {
        "alias"
    }

    fn enumerate<'a>(&'a self, _this: &'a Selection, t: &'a Transaction) -> RowIter<'a> {
        self.base.enumerate(t)
    }

    fn has_item(&self, _this: &Selection, row: &Row, t: &Transaction) -> Result<bool> {
        self.base.has_item(row, t)
    }

    fn entropy(&self, t: &Transaction) -> f64 {
        self.base.entropy(t)
    }

    fn get_index(&self, _this: &Selection, exprs: &[Evaluator]) -> Result<Option<Index>> {
        self.base.get_index(exprs)
    }

    fn detail(&self) -> Option<String> {
        Some(self.name.clone())
    }

    fn children(&self) -> Vec<&Selection> {
        vec![&self.base]
    }
}
