//! `UNION [ALL]`.

use std::collections::HashSet;

use crate::error::{DbError, Result};
use crate::eval::Evaluator;
use crate::index::RowIter;
use crate::row::{next_namespace, Lineage, Row, RowData};
use crate::transaction::Transaction;
use crate::types::{reconcile_types, Value};

use super::{ColumnBinding, PlanNode, Selection, SelectionKind};

pub(crate) struct UnionNode {
    left: Selection,
    right: Selection,
    all: bool,
    /// Left columns converted to the common types
    left_columns: Vec<Evaluator>,
    right_columns: Vec<Evaluator>,
}

pub(crate) fn union(left: &Selection, right: &Selection, all: bool) -> Result<Selection> {
    if left.columns().len() != right.columns().len() {
        return Err(DbError::Query(
            "each UNION query must have the same number of columns".to_string(),
        ));
    }
    let id = next_namespace();
    let mut columns = Vec::new();
    let mut left_columns = Vec::new();
    let mut right_columns = Vec::new();
    for (i, (l, r)) in left.columns().iter().zip(right.columns()).enumerate() {
        let (lt, rt) = (l.evaluator.data_type(), r.evaluator.data_type());
        let ty = reconcile_types([lt, rt]).map_err(|_| DbError::cast(rt, lt))?;
        left_columns.push(l.evaluator.convert_implicit(&ty)?);
        right_columns.push(r.evaluator.convert_implicit(&ty)?);
        columns.push(ColumnBinding::new(None, &l.name, Evaluator::column(id, i, ty, &l.name)));
    }
    Ok(Selection::new(
        id,
        columns,
        SelectionKind::Union(UnionNode {
            left: left.clone(),
            right: right.clone(),
            all,
            left_columns,
            right_columns,
        }),
    ))
}

fn convert(columns: &[Evaluator], row: &Row, t: &Transaction) -> Result<Vec<Value>> {
    columns.iter().map(|c| c.get(Some(row), t)).collect()
}

impl PlanNode for UnionNode {
    fn kind(&self) -> &'static str {
        if self.all {
            "union_all"
        } else {
            "union"
        }
    }

    fn enumerate<'a>(&'a self, this: &'a Selection, t: &'a Transaction) -> RowIter<'a> {
        let left = self
            .left
            .enumerate(t)
            .map(move |row| (row, &self.left_columns));
        let right = self
            .right
            .enumerate(t)
            .map(move |row| (row, &self.right_columns));
        let mut seen: HashSet<Vec<Value>> = HashSet::new();
        let all = self.all;
        Box::new(left.chain(right).filter_map(move |(row, columns)| {
            let derived = row.and_then(|row| {
                let values = convert(columns, &row, t)?;
                Ok((values, row))
            });
            match derived {
                Ok((values, row)) => {
                    if !all && !seen.insert(values.clone()) {
                        return None;
                    }
                    Some(Ok(RowData::derived(this.id(), values, Lineage::Derived(row))))
                }
                Err(e) => Some(Err(e)),
            }
        }))
    }

    fn has_item(&self, _this: &Selection, row: &Row, t: &Transaction) -> Result<bool> {
        match row.parent() {
            Some(parent) => Ok(self.left.has_item(parent, t)? || self.right.has_item(parent, t)?),
            None => Ok(false),
        }
    }

    fn entropy(&self, t: &Transaction) -> f64 {
        self.left.entropy(t) + self.right.entropy(t)
    }

    fn children(&self) -> Vec<&Selection> {
        vec![&self.left, &self.right]
    }
}
