use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{DbError, Result};
use crate::index::IndexKey;
use crate::row::{Row, RowId, TableId};

use super::pmap::PMap;

static NEXT_TRANSACTION: AtomicU64 = AtomicU64::new(1);

/// Index content: key to the set of row ids carrying that key.
pub type IndexEntries = PMap<IndexKey, PMap<RowId, ()>>;

/// Identity of the transaction a fork was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkOrigin {
    pub id: u64,
    pub version: u64,
}

#[derive(Clone, Default)]
struct Store {
    rows: PMap<TableId, PMap<RowId, Row>>,
    indexes: PMap<u64, IndexEntries>,
    counters: PMap<(TableId, String), i64>,
}

/// Snapshot of all mutable database state: table rows, index entries and
/// sequence counters.
///
/// Cloning is O(1) and yields an independent snapshot; writes copy only the
/// touched paths of the underlying persistent maps. Every write bumps the
/// version, which lets [`Transaction::commit`] detect a parent that changed
/// after a fork was taken.
#[derive(Clone)]
pub struct Transaction {
    id: u64,
    version: u64,
    origin: Option<ForkOrigin>,
    store: Store,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("origin", &self.origin)
            .field("tables", &self.store.rows.len())
            .field("indexes", &self.store.indexes.len())
            .finish()
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    /// Creates an empty root transaction.
    pub fn new() -> Self {
        Self {
            id: NEXT_TRANSACTION.fetch_add(1, Ordering::Relaxed),
            version: 0,
            origin: None,
            store: Store::default(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn origin(&self) -> Option<ForkOrigin> {
        self.origin
    }

    /// Creates a child sharing all current state with this transaction.
    pub fn fork(&self) -> Transaction {
        Transaction {
            id: NEXT_TRANSACTION.fetch_add(1, Ordering::Relaxed),
            version: 0,
            origin: Some(ForkOrigin {
                id: self.id,
                version: self.version,
            }),
            store: self.store.clone(),
        }
    }

    /// Publishes this fork's state into `parent`.
    ///
    /// Fails with [`DbError::TransactionConflict`] if `parent` is not the
    /// transaction this fork was taken from, or if it was written to since.
    pub fn commit(self, parent: &mut Transaction) -> Result<()> {
        let origin = self.origin.ok_or_else(|| {
            DbError::TransactionConflict("cannot commit a root transaction".to_string())
        })?;
        if origin.id != parent.id {
            return Err(DbError::TransactionConflict(format!(
                "transaction {} was not forked from transaction {}",
                self.id, parent.id
            )));
        }
        if origin.version != parent.version {
            tracing::error!(
                parent = parent.id,
                forked_at = origin.version,
                current = parent.version,
                "commit conflict"
            );
            return Err(DbError::TransactionConflict(format!(
                "transaction {} changed since fork (version {} -> {})",
                parent.id, origin.version, parent.version
            )));
        }
        parent.store = self.store;
        parent.version += 1;
        Ok(())
    }

    /// Discards this fork.
    pub fn rollback(self) {
        tracing::trace!(transaction = self.id, "rollback");
    }

    /// Replaces this transaction's state with a snapshot's, keeping its
    /// identity and bumping its version.
    pub fn restore_from(&mut self, snapshot: &Transaction) {
        self.store = snapshot.store.clone();
        self.version += 1;
    }

    pub fn rows(&self, table: TableId) -> Option<&PMap<RowId, Row>> {
        self.store.rows.get(&table)
    }

    pub fn row_count(&self, table: TableId) -> usize {
        self.rows(table).map_or(0, |rows| rows.len())
    }

    pub fn row(&self, table: TableId, id: RowId) -> Option<&Row> {
        self.rows(table)?.get(&id)
    }

    pub fn rows_mut(&mut self, table: TableId) -> &mut PMap<RowId, Row> {
        self.version += 1;
        let rows = &mut self.store.rows;
        if !rows.contains_key(&table) {
            rows.insert(table, PMap::new());
        }
        rows.get_mut(&table).unwrap_or_else(|| unreachable!("rows slot inserted above"))
    }

    /// Removes every row of a table.
    pub fn drop_rows(&mut self, table: TableId) {
        self.version += 1;
        self.store.rows.remove(&table);
        let counters: Vec<(TableId, String)> = self
            .store
            .counters
            .keys()
            .filter(|(t, _)| *t == table)
            .cloned()
            .collect();
        for key in counters {
            self.store.counters.remove(&key);
        }
    }

    pub fn index_entries(&self, index: u64) -> Option<&IndexEntries> {
        self.store.indexes.get(&index)
    }

    pub fn index_entries_mut(&mut self, index: u64) -> &mut IndexEntries {
        self.version += 1;
        let indexes = &mut self.store.indexes;
        if !indexes.contains_key(&index) {
            indexes.insert(index, PMap::new());
        }
        indexes
            .get_mut(&index)
            .unwrap_or_else(|| unreachable!("index slot inserted above"))
    }

    pub fn drop_index(&mut self, index: u64) {
        self.version += 1;
        self.store.indexes.remove(&index);
    }

    /// Current value of a sequence counter (0 when never set).
    pub fn counter(&self, table: TableId, name: &str) -> i64 {
        self.store
            .counters
            .get(&(table, name.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn set_counter(&mut self, table: TableId, name: &str, value: i64) {
        self.version += 1;
        self.store.counters.insert((table, name.to_string()), value);
    }
}
