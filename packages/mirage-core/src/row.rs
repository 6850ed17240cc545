//! Row identities and row payloads.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::types::Value;

/// Identifier of a table's row namespace.
pub type TableId = u64;
/// Identifier of a selection's row namespace.
pub type SelectionId = u64;
/// Identifier of a row within its owner.
pub type RowId = u64;

static NEXT_NAMESPACE: AtomicU64 = AtomicU64::new(1);
static NEXT_ROW: AtomicU64 = AtomicU64::new(1);
static NULL: Value = Value::Null;

/// Allocates a fresh namespace id, shared by tables, indices and selections.
pub fn next_namespace() -> u64 {
    NEXT_NAMESPACE.fetch_add(1, Ordering::Relaxed)
}

/// Allocates a fresh row id.
pub fn next_row_id() -> RowId {
    NEXT_ROW.fetch_add(1, Ordering::Relaxed)
}

/// Who produced a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowOwner {
    /// Stored in a table
    Table(TableId),
    /// Derived by a selection (projection, join, aggregation, ...)
    Selection(SelectionId),
}

/// Stable identity of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowHandle {
    pub owner: RowOwner,
    pub id: RowId,
}

/// Where a derived row came from.
#[derive(Debug, Clone)]
pub enum Lineage {
    /// Stored row, or a row with no parent
    Base,
    /// Computed from one parent row
    Derived(Row),
    /// Produced by a join; the right side is absent for unmatched outer rows
    Joined(Row, Option<Row>),
}

/// Row payload: identity, positional values and lineage.
#[derive(Debug)]
pub struct RowData {
    pub handle: RowHandle,
    pub values: Vec<Value>,
    pub lineage: Lineage,
}

/// Immutable, shared row.
pub type Row = Arc<RowData>;

impl RowData {
    /// Creates a stored row of a table.
    pub fn stored(table: TableId, id: RowId, values: Vec<Value>) -> Row {
        Arc::new(RowData {
            handle: RowHandle {
                owner: RowOwner::Table(table),
                id,
            },
            values,
            lineage: Lineage::Base,
        })
    }

    /// Creates a row derived by a selection from its parent rows.
    ///
    /// The id depends only on the parents, so enumerating the same
    /// selection twice yields the same handles.
    pub fn derived(selection: SelectionId, values: Vec<Value>, lineage: Lineage) -> Row {
        let id = match &lineage {
            Lineage::Base => next_row_id(),
            Lineage::Derived(parent) | Lineage::Joined(parent, None) => parent.handle.id,
            Lineage::Joined(left, Some(right)) => {
                let mut hasher = DefaultHasher::new();
                (left.handle, right.handle).hash(&mut hasher);
                hasher.finish()
            }
        };
        Self::with_id(selection, id, values, lineage)
    }

    /// Creates a parentless row of a selection, identified by its position
    /// in the selection's output.
    pub fn positional(selection: SelectionId, position: usize, values: Vec<Value>) -> Row {
        Self::with_id(selection, position as RowId, values, Lineage::Base)
    }

    fn with_id(selection: SelectionId, id: RowId, values: Vec<Value>, lineage: Lineage) -> Row {
        Arc::new(RowData {
            handle: RowHandle {
                owner: RowOwner::Selection(selection),
                id,
            },
            values,
            lineage,
        })
    }

    pub fn get(&self, index: usize) -> &Value {
        self.values.get(index).unwrap_or(&NULL)
    }

    /// Parent row for derived rows.
    pub fn parent(&self) -> Option<&Row> {
        match &self.lineage {
            Lineage::Derived(parent) => Some(parent),
            _ => None,
        }
    }

    pub fn table_id(&self) -> Option<TableId> {
        match self.handle.owner {
            RowOwner::Table(id) => Some(id),
            RowOwner::Selection(_) => None,
        }
    }
}
