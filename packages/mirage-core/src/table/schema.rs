//! Catalog of tables, versioned on every definition change.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{DbError, Result};
use crate::index::BTreeIndex;

use super::table::Table;

/// Table definitions of a database.
///
/// `version` increases on every change so that plans and cached
/// expressions built against an older catalog can be told apart.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub version: u64,
    pub tables: BTreeMap<String, Arc<Table>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Result<&Arc<Table>> {
        self.tables.get(name).ok_or_else(|| DbError::TableNotFound {
            table: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Adds or replaces a table definition.
    pub fn put(&mut self, table: impl Into<Arc<Table>>) -> Arc<Table> {
        let table = table.into();
        self.tables.insert(table.name.clone(), table.clone());
        self.version += 1;
        table
    }

    pub fn remove(&mut self, name: &str) -> Result<Arc<Table>> {
        let table = self.tables.remove(name).ok_or_else(|| DbError::TableNotFound {
            table: name.to_string(),
        })?;
        self.version += 1;
        Ok(table)
    }

    /// Table owning the index named `name`.
    pub fn index_owner(&self, name: &str) -> Option<(&Arc<Table>, &Arc<BTreeIndex>)> {
        self.tables
            .values()
            .find_map(|table| table.index_named(name).map(|index| (table, index)))
    }

    /// Tables with a foreign key into `name`, other than `name` itself.
    pub fn referencing(&self, name: &str) -> Vec<&Arc<Table>> {
        self.tables
            .values()
            .filter(|t| t.name != name && t.relations.iter().any(|r| r.to_table == name))
            .collect()
    }
}
