//! Indices as seen from selections: a table index, optionally restricted to
//! the rows of a filter or remapped through a projection.

use std::fmt;
use std::sync::Arc;

use crate::eval::Evaluator;
use crate::selection::{Explanation, Selection};
use crate::transaction::Transaction;

use super::btree::BTreeIndex;
use super::{IndexKey, IndexOp, QueryIndex, RowIter};

/// Index usable by a selection.
#[derive(Clone)]
pub enum Index {
    /// Table index, yields stored rows
    Table(Arc<BTreeIndex>),
    /// Keeps only rows that belong to `filter`
    Restrictive { base: Box<Index>, filter: Selection },
    /// Yields `map`'s projection of the base rows; `expressions` are the
    /// key expressions as seen over `map`'s output
    Projected {
        base: Box<Index>,
        expressions: Vec<Evaluator>,
        map: Selection,
    },
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Index::Table(index) => write!(f, "Index({})", index.name),
            Index::Restrictive { base, filter } => {
                write!(f, "Restrictive({:?} in #{})", base, filter.id())
            }
            Index::Projected { base, map, .. } => write!(f, "Projected({:?} via #{})", base, map.id()),
        }
    }
}

impl Index {
    /// Underlying table index.
    pub fn table_index(&self) -> &Arc<BTreeIndex> {
        match self {
            Index::Table(index) => index,
            Index::Restrictive { base, .. } | Index::Projected { base, .. } => base.table_index(),
        }
    }

    /// Whether the index yields every row under each key, with no filter
    /// restricting it.
    pub fn is_unrestricted(&self) -> bool {
        match self {
            Index::Table(_) => true,
            Index::Restrictive { .. } => false,
            Index::Projected { base, .. } => base.is_unrestricted(),
        }
    }

    pub fn restrict(self, filter: &Selection) -> Index {
        Index::Restrictive {
            base: Box::new(self),
            filter: filter.clone(),
        }
    }
}

impl QueryIndex for Index {
    fn expressions(&self) -> &[Evaluator] {
        match self {
            Index::Table(index) => &index.expressions,
            Index::Restrictive { base, .. } => base.expressions(),
            Index::Projected { expressions, .. } => expressions,
        }
    }

    fn entropy(&self, op: &IndexOp, t: &Transaction) -> f64 {
        match self {
            Index::Table(index) => index.entropy(op, t),
            Index::Restrictive { base, .. } | Index::Projected { base, .. } => base.entropy(op, t),
        }
    }

    fn enumerate<'a>(&'a self, op: &'a IndexOp, t: &'a Transaction) -> RowIter<'a> {
        match self {
            Index::Table(index) => index.enumerate(op, t),
            Index::Restrictive { base, filter } => {
                Box::new(base.enumerate(op, t).filter_map(move |row| {
                    let keep = row.and_then(|row| Ok(filter.has_item(&row, t)?.then_some(row)));
                    keep.transpose()
                }))
            }
            Index::Projected { base, map, .. } => Box::new(
                base.enumerate(op, t)
                    .map(move |row| row.and_then(|row| map.project(&row, t))),
            ),
        }
    }

    fn iterate_keys<'a>(&'a self, t: &'a Transaction) -> Box<dyn Iterator<Item = IndexKey> + 'a> {
        match self {
            Index::Table(index) => index.iterate_keys(t),
            Index::Restrictive { base, .. } | Index::Projected { base, .. } => base.iterate_keys(t),
        }
    }

    fn explain(&self) -> Explanation {
        match self {
            Index::Table(index) => index.explain(),
            Index::Restrictive { base, filter } => Explanation::leaf(
                filter.id(),
                "restrictive_index",
                format!("rows of #{}", filter.id()),
            )
            .with_child(base.explain()),
            Index::Projected { base, map, .. } => Explanation::leaf(
                map.id(),
                "selection_index",
                format!("through #{}", map.id()),
            )
            .with_child(base.explain()),
        }
    }
}
