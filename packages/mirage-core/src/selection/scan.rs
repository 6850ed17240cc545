//! Leaf selections: table scans, constant rows and the empty selection.

use std::sync::Arc;

use crate::error::{DbError, Result};
use crate::eval::{reconcile_nodes, Evaluator};
use crate::index::{Index, RowIter};
use crate::row::{next_namespace, Row, RowData, RowOwner};
use crate::table::Table;
use crate::transaction::Transaction;

use super::{ColumnBinding, PlanNode, Selection, SelectionKind};

pub(crate) struct ScanNode {
    pub table: Arc<Table>,
}

pub(crate) fn scan(table: Arc<Table>) -> Selection {
    let columns = table
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            ColumnBinding::new(Some(&table.name), &c.name, table.column_evaluator(i))
        })
        .collect();
    Selection::new(table.id, columns, SelectionKind::Scan(ScanNode { table }))
}

impl PlanNode for ScanNode {
    fn kind(&self) -> &'static str {
        "table"
    }

    fn enumerate<'a>(&'a self, _this: &'a Selection, t: &'a Transaction) -> RowIter<'a> {
        match t.rows(self.table.id) {
            Some(rows) => Box::new(rows.values().cloned().map(Ok)),
            None => Box::new(std::iter::empty()),
        }
    }

    fn has_item(&self, _this: &Selection, row: &Row, t: &Transaction) -> Result<bool> {
        Ok(row.table_id() == Some(self.table.id) && t.row(self.table.id, row.handle.id).is_some())
    }

    fn entropy(&self, t: &Transaction) -> f64 {
        t.row_count(self.table.id) as f64
    }

    fn get_index(&self, _this: &Selection, exprs: &[Evaluator]) -> Result<Option<Index>> {
        Ok(self
            .table
            .find_index(exprs)
            .map(|index| Index::Table(index.clone())))
    }

    fn detail(&self) -> Option<String> {
        Some(self.table.name.clone())
    }

    fn children(&self) -> Vec<&Selection> {
        Vec::new()
    }
}

pub(crate) struct EmptyNode {
    pub base: Selection,
}

impl PlanNode for EmptyNode {
    fn kind(&self) -> &'static str {
        "empty"
    }

    fn enumerate<'a>(&'a self, _this: &'a Selection, _t: &'a Transaction) -> RowIter<'a> {
        Box::new(std::iter::empty())
    }

    fn has_item(&self, _this: &Selection, _row: &Row, _t: &Transaction) -> Result<bool> {
        Ok(false)
    }

    fn entropy(&self, _t: &Transaction) -> f64 {
        0.0
    }

    fn children(&self) -> Vec<&Selection> {
        Vec::new()
    }
}

pub(crate) struct ValuesNode {
    rows: Vec<Vec<Evaluator>>,
}

/// One row without columns.
pub(crate) fn unit() -> Selection {
    Selection::new(
        next_namespace(),
        Vec::new(),
        SelectionKind::Values(ValuesNode {
            rows: vec![Vec::new()],
        }),
    )
}

/// Builds a `VALUES` list. Each column takes the common type of its
/// entries.
pub(crate) fn values(rows: Vec<Vec<Evaluator>>) -> Result<Selection> {
    let width = rows.first().map_or(0, Vec::len);
    if width == 0 {
        return Err(DbError::Query("VALUES lists must not be empty".to_string()));
    }
    if rows.iter().any(|r| r.len() != width) {
        return Err(DbError::Query(
            "VALUES lists must all be the same length".to_string(),
        ));
    }
    if let Some(e) = rows.iter().flatten().find(|e| !e.is_constant()) {
        return Err(DbError::Query(format!(
            "VALUES entry \"{}\" must be a constant expression",
            e.name()
        )));
    }
    let mut converted: Vec<Vec<Evaluator>> = vec![Vec::with_capacity(width); rows.len()];
    let id = next_namespace();
    let mut columns = Vec::with_capacity(width);
    for col in 0..width {
        let entries: Vec<Evaluator> = rows.iter().map(|r| r[col].clone()).collect();
        let (ty, entries) = reconcile_nodes(&entries)?;
        for (row, entry) in converted.iter_mut().zip(entries) {
            row.push(entry);
        }
        let name = format!("column{}", col + 1);
        columns.push(ColumnBinding::new(None, &name, Evaluator::column(id, col, ty, &name)));
    }
    Ok(Selection::new(
        id,
        columns,
        SelectionKind::Values(ValuesNode { rows: converted }),
    ))
}

impl PlanNode for ValuesNode {
    fn kind(&self) -> &'static str {
        "values"
    }

    fn enumerate<'a>(&'a self, this: &'a Selection, t: &'a Transaction) -> RowIter<'a> {
        Box::new(self.rows.iter().enumerate().map(move |(position, row)| {
            let values = row
                .iter()
                .map(|e| e.get(None, t))
                .collect::<Result<Vec<_>>>()?;
            Ok(RowData::positional(this.id(), position, values))
        }))
    }

    fn has_item(&self, this: &Selection, row: &Row, _t: &Transaction) -> Result<bool> {
        Ok(row.handle.owner == RowOwner::Selection(this.id()))
    }

    fn entropy(&self, _t: &Transaction) -> f64 {
        self.rows.len() as f64
    }

    fn detail(&self) -> Option<String> {
        Some(format!("{} rows", self.rows.len()))
    }

    fn children(&self) -> Vec<&Selection> {
        Vec::new()
    }
}
