//! Table schema and row storage.
//!
//! A table is an immutable schema description; its rows and index entries
//! live in a [`Transaction`]. Every mutation:
//! - coerces values to the declared column types
//! - enforces not-null constraints
//! - maintains every index, which enforces uniqueness

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{DbError, Result};
use crate::eval::Evaluator;
use crate::index::BTreeIndex;
use crate::row::{next_namespace, next_row_id, Row, RowData, TableId};
use crate::transaction::Transaction;
use crate::types::Value;

use super::column::Column;
use super::relation::Relation;
use super::validation;

/// Table schema.
#[derive(Debug, Clone)]
pub struct Table {
    /// Row namespace in the transaction
    pub id: TableId,
    /// Table name
    pub name: String,
    /// Column definitions in declaration order
    pub columns: Vec<Column>,
    /// Indices maintained on every mutation
    pub indexes: Vec<Arc<BTreeIndex>>,
    /// Name of the index enforcing the primary key
    pub primary_key: Option<String>,
    /// Foreign key relations to other tables
    pub relations: Vec<Relation>,
    /// Rejects every mutation
    pub read_only: bool,
}

impl Table {
    /// Creates a new table with the given name and columns.
    ///
    /// # Arguments
    /// * `name` - Table name
    /// * `columns` - Column definitions
    ///
    /// # Returns
    /// `Result<Table>` containing the created table or an error.
    pub fn new(name: &str, columns: Vec<Column>) -> Result<Self> {
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(DbError::ColumnAlreadyExists {
                    table: name.to_string(),
                    column: column.name.clone(),
                });
            }
        }
        Ok(Self {
            id: next_namespace(),
            name: name.to_string(),
            columns,
            indexes: Vec::new(),
            primary_key: None,
            relations: Vec::new(),
            read_only: false,
        })
    }

    /// Expression reading column `position` of this table's rows.
    pub fn column_evaluator(&self, position: usize) -> Evaluator {
        let column = &self.columns[position];
        Evaluator::column(self.id, position, column.data_type.clone(), &column.name)
    }

    /// Position of a column by name.
    pub fn column_position(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| DbError::ColumnNotFound {
                column: format!("{}.{}", self.name, name),
            })
    }

    /// Index whose key expressions are exactly `exprs`.
    pub fn find_index(&self, exprs: &[Evaluator]) -> Option<&Arc<BTreeIndex>> {
        self.indexes.iter().find(|index| index.covers(exprs))
    }

    pub fn index_named(&self, name: &str) -> Option<&Arc<BTreeIndex>> {
        self.indexes.iter().find(|index| index.name == name)
    }

    /// Unique index over exactly the named columns.
    pub fn unique_index_on(&self, columns: &[String]) -> Option<&Arc<BTreeIndex>> {
        let exprs = columns
            .iter()
            .map(|c| self.column_position(c).map(|p| self.column_evaluator(p)))
            .collect::<Result<Vec<_>>>()
            .ok()?;
        self.indexes
            .iter()
            .find(|index| index.unique && index.covers(&exprs))
    }

    pub fn row_count(&self, t: &Transaction) -> usize {
        t.row_count(self.id)
    }

    /// Advances the sequence of a serial column.
    ///
    /// # Arguments
    /// * `t` - Transaction holding the counter
    /// * `position` - Column position
    ///
    /// # Returns
    /// The next sequence value, starting at 1.
    pub fn next_serial(&self, t: &mut Transaction, position: usize) -> i64 {
        let name = self.columns[position].sequence_name();
        let next = t.counter(self.id, &name) + 1;
        t.set_counter(self.id, &name, next);
        next
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(DbError::ReadOnly(self.name.clone()));
        }
        Ok(())
    }

    /// Inserts a row.
    ///
    /// # Arguments
    /// * `t` - Transaction to write into
    /// * `values` - One value per column, in declaration order
    ///
    /// # Returns
    /// `Result<Row>` containing the stored row or a constraint error.
    pub fn insert(&self, t: &mut Transaction, values: Vec<Value>) -> Result<Row> {
        self.check_writable()?;
        let values = validation::coerce_row(self, values)?;
        let row = RowData::stored(self.id, next_row_id(), values);
        t.rows_mut(self.id).insert(row.handle.id, row.clone());
        for index in &self.indexes {
            index.index_row(t, &row)?;
        }
        tracing::trace!(table = %self.name, row = row.handle.id, "insert");
        Ok(row)
    }

    /// Replaces the values of a stored row, keeping its identity.
    pub fn update(&self, t: &mut Transaction, old: &Row, values: Vec<Value>) -> Result<Row> {
        self.check_writable()?;
        if t.row(self.id, old.handle.id).is_none() {
            return Err(DbError::Internal(format!(
                "row {} of {} vanished before update",
                old.handle.id, self.name
            )));
        }
        let values = validation::coerce_row(self, values)?;
        for index in &self.indexes {
            index.unindex_row(t, old)?;
        }
        let row = RowData::stored(self.id, old.handle.id, values);
        t.rows_mut(self.id).insert(row.handle.id, row.clone());
        for index in &self.indexes {
            index.index_row(t, &row)?;
        }
        tracing::trace!(table = %self.name, row = row.handle.id, "update");
        Ok(row)
    }

    /// Removes a stored row.
    pub fn delete(&self, t: &mut Transaction, row: &Row) -> Result<()> {
        self.check_writable()?;
        for index in &self.indexes {
            index.unindex_row(t, row)?;
        }
        t.rows_mut(self.id).remove(&row.handle.id);
        tracing::trace!(table = %self.name, row = row.handle.id, "delete");
        Ok(())
    }

    /// Stored rows in id order.
    pub fn rows(&self, t: &Transaction) -> Vec<Row> {
        t.rows(self.id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }
}
