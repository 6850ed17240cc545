//! Ordered table index stored in the transaction.

use crate::ast::Expr;
use crate::error::{DbError, Result};
use crate::eval::Evaluator;
use crate::row::{Row, TableId};
use crate::selection::Explanation;
use crate::transaction::{PMap, Transaction};

use super::{IndexKey, IndexOp, QueryIndex, RowIter};

/// Index over one or more expressions of a table's rows.
///
/// The key-to-rows mapping lives in the [`Transaction`] under this index's
/// id, so it forks, commits and rolls back together with the rows.
#[derive(Debug, Clone)]
pub struct BTreeIndex {
    pub id: u64,
    pub name: String,
    pub table_id: TableId,
    pub table_name: String,
    pub expressions: Vec<Evaluator>,
    /// Expressions as declared, used to rebuild after a column change
    pub definition: Vec<Expr>,
    pub unique: bool,
}

impl BTreeIndex {
    /// Evaluates the key of `row`.
    pub fn key_of(&self, row: &Row, t: &Transaction) -> Result<IndexKey> {
        self.expressions
            .iter()
            .map(|e| e.get(Some(row), t))
            .collect::<Result<Vec<_>>>()
            .map(IndexKey)
    }

    /// Adds `row` under its key, enforcing uniqueness.
    pub fn index_row(&self, t: &mut Transaction, row: &Row) -> Result<()> {
        let key = self.key_of(row, t)?;
        if self.unique && !key.has_null() {
            let taken = t
                .index_entries(self.id)
                .and_then(|entries| entries.get(&key))
                .is_some_and(|ids| ids.keys().any(|id| *id != row.handle.id));
            if taken {
                let names: Vec<&str> = self.expressions.iter().map(|e| e.name()).collect();
                return Err(DbError::UniqueViolation {
                    constraint: self.name.clone(),
                    key: format!("Key ({})={} already exists", names.join(", "), key),
                });
            }
        }
        tracing::trace!(index = %self.name, key = %key, row = row.handle.id, "index row");
        let entries = t.index_entries_mut(self.id);
        match entries.get_mut(&key) {
            Some(ids) => {
                ids.insert(row.handle.id, ());
            }
            None => {
                let mut ids = PMap::new();
                ids.insert(row.handle.id, ());
                entries.insert(key, ids);
            }
        }
        Ok(())
    }

    /// Removes `row` from under its key.
    pub fn unindex_row(&self, t: &mut Transaction, row: &Row) -> Result<()> {
        let key = self.key_of(row, t)?;
        tracing::trace!(index = %self.name, key = %key, row = row.handle.id, "unindex row");
        let entries = t.index_entries_mut(self.id);
        let emptied = match entries.get_mut(&key) {
            Some(ids) => {
                ids.remove(&row.handle.id);
                ids.is_empty()
            }
            None => false,
        };
        if emptied {
            entries.remove(&key);
        }
        Ok(())
    }

    /// Indexes every current row of the table.
    pub fn populate(&self, t: &mut Transaction) -> Result<()> {
        let rows: Vec<Row> = t
            .rows(self.table_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default();
        t.drop_index(self.id);
        for row in &rows {
            self.index_row(t, row)?;
        }
        Ok(())
    }

    /// Whether the key expressions are exactly `exprs`, in order.
    pub fn covers(&self, exprs: &[Evaluator]) -> bool {
        self.expressions.len() == exprs.len()
            && self
                .expressions
                .iter()
                .zip(exprs)
                .all(|(a, b)| a.hash() == b.hash())
    }
}

impl QueryIndex for BTreeIndex {
    fn expressions(&self) -> &[Evaluator] {
        &self.expressions
    }

    fn entropy(&self, op: &IndexOp, t: &Transaction) -> f64 {
        let Some(entries) = t.index_entries(self.id) else {
            return 0.0;
        };
        let (lo, hi) = op.bounds();
        entries
            .range(lo, hi)
            .filter(|(key, _)| op.matches(key))
            .map(|(_, ids)| ids.len())
            .sum::<usize>() as f64
    }

    fn enumerate<'a>(&'a self, op: &'a IndexOp, t: &'a Transaction) -> RowIter<'a> {
        let (Some(entries), Some(rows)) = (t.index_entries(self.id), t.rows(self.table_id)) else {
            return Box::new(std::iter::empty());
        };
        let (lo, hi) = op.bounds();
        Box::new(
            entries
                .range(lo, hi)
                .filter(move |(key, _)| op.matches(key))
                .flat_map(|(_, ids)| ids.keys())
                .map(move |id| {
                    rows.get(id).cloned().ok_or_else(|| {
                        DbError::Internal(format!(
                            "index {} references missing row {}",
                            self.name, id
                        ))
                    })
                }),
        )
    }

    fn iterate_keys<'a>(&'a self, t: &'a Transaction) -> Box<dyn Iterator<Item = IndexKey> + 'a> {
        match t.index_entries(self.id) {
            Some(entries) => Box::new(entries.keys().cloned()),
            None => Box::new(std::iter::empty()),
        }
    }

    fn explain(&self) -> Explanation {
        let exprs: Vec<&str> = self.expressions.iter().map(|e| e.name()).collect();
        Explanation::leaf(
            self.id,
            "btree_index",
            format!("{} on {}({})", self.name, self.table_name, exprs.join(", ")),
        )
    }
}
