//! Filter nodes: sequential scans, index lookups and their combinations.
//!
//! Every filter is a pass-through node over the same base: it yields a
//! subset of the base's rows.

use std::collections::HashSet;

use crate::error::Result;
use crate::eval::Evaluator;
use crate::index::{Index, IndexKey, IndexOp, QueryIndex, RowIter};
use crate::row::{Row, RowHandle};
use crate::transaction::Transaction;

use super::{PlanNode, Selection};

/// Entropy of a sequential scan relative to its base.
const SEQ_SCAN_FACTOR: f64 = 1.5;

/// Kind of predicate an index filter answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Eq,
    Ineq,
    In,
    NotIn,
    StartsWith,
    Between,
}

impl FilterKind {
    pub fn name(&self) -> &'static str {
        match self {
            FilterKind::Eq => "eq_filter",
            FilterKind::Ineq => "ineq_filter",
            FilterKind::In => "in_filter",
            FilterKind::NotIn => "not_in_filter",
            FilterKind::StartsWith => "starts_with_filter",
            FilterKind::Between => "between_filter",
        }
    }
}

pub(crate) struct SeqScanFilter {
    pub base: Selection,
    pub predicate: Evaluator,
    /// Re-checks rows of an index lookup instead of scanning a table
    pub residual: bool,
}

impl PlanNode for SeqScanFilter {
    fn kind(&self) -> &'static str {
        "seq_scan"
    }

    fn enumerate<'a>(&'a self, _this: &'a Selection, t: &'a Transaction) -> RowIter<'a> {
        Box::new(self.base.enumerate(t).filter_map(move |row| {
            row.and_then(|row| Ok(self.predicate.test(Some(&row), t)?.then_some(row)))
                .transpose()
        }))
    }

    fn has_item(&self, _this: &Selection, row: &Row, t: &Transaction) -> Result<bool> {
        Ok(self.base.has_item(row, t)? && self.predicate.test(Some(row), t)?)
    }

    fn entropy(&self, t: &Transaction) -> f64 {
        if self.residual {
            self.base.entropy(t)
        } else {
            self.base.entropy(t) * SEQ_SCAN_FACTOR
        }
    }

    fn get_index(&self, this: &Selection, exprs: &[Evaluator]) -> Result<Option<Index>> {
        Ok(self.base.get_index(exprs)?.map(|index| index.restrict(this)))
    }

    fn detail(&self) -> Option<String> {
        Some(self.predicate.name().to_string())
    }

    fn children(&self) -> Vec<&Selection> {
        vec![&self.base]
    }
}

pub(crate) struct IndexFilter {
    pub base: Selection,
    pub index: Index,
    /// Disjoint lookups whose union is the filter's result
    pub ops: Vec<IndexOp>,
    pub kind: FilterKind,
    /// Key expressions over the base's columns
    pub keys: Vec<Evaluator>,
}

impl IndexFilter {
    fn key_of(&self, row: &Row, t: &Transaction) -> Result<IndexKey> {
        self.keys
            .iter()
            .map(|k| k.get(Some(row), t))
            .collect::<Result<Vec<_>>>()
            .map(IndexKey)
    }
}

impl PlanNode for IndexFilter {
    fn kind(&self) -> &'static str {
        self.kind.name()
    }

    fn enumerate<'a>(&'a self, _this: &'a Selection, t: &'a Transaction) -> RowIter<'a> {
        Box::new(self.ops.iter().flat_map(move |op| self.index.enumerate(op, t)))
    }

    fn has_item(&self, _this: &Selection, row: &Row, t: &Transaction) -> Result<bool> {
        if !self.base.has_item(row, t)? {
            return Ok(false);
        }
        let key = self.key_of(row, t)?;
        Ok(self.ops.iter().any(|op| op.matches(&key)))
    }

    fn entropy(&self, t: &Transaction) -> f64 {
        self.ops.iter().map(|op| self.index.entropy(op, t)).sum()
    }

    fn get_index(&self, this: &Selection, exprs: &[Evaluator]) -> Result<Option<Index>> {
        Ok(self.base.get_index(exprs)?.map(|index| index.restrict(this)))
    }

    fn detail(&self) -> Option<String> {
        let keys: Vec<&str> = self.keys.iter().map(|k| k.name()).collect();
        let ops: Vec<String> = self.ops.iter().map(|op| op.to_string()).collect();
        Some(format!("({}) {}", keys.join(", "), ops.join(" | ")))
    }

    fn children(&self) -> Vec<&Selection> {
        Vec::new()
    }
}

/// Intersection of two filters over the same base.
pub(crate) struct AndFilter {
    pub base: Selection,
    pub left: Selection,
    pub right: Selection,
}

impl PlanNode for AndFilter {
    fn kind(&self) -> &'static str {
        "and"
    }

    fn enumerate<'a>(&'a self, _this: &'a Selection, t: &'a Transaction) -> RowIter<'a> {
        let (driver, check) = if self.left.entropy(t) <= self.right.entropy(t) {
            (&self.left, &self.right)
        } else {
            (&self.right, &self.left)
        };
        tracing::trace!(driver = driver.kind_name(), check = check.kind_name(), "and filter");
        Box::new(driver.enumerate(t).filter_map(move |row| {
            row.and_then(|row| Ok(check.has_item(&row, t)?.then_some(row)))
                .transpose()
        }))
    }

    fn has_item(&self, _this: &Selection, row: &Row, t: &Transaction) -> Result<bool> {
        Ok(self.left.has_item(row, t)? && self.right.has_item(row, t)?)
    }

    fn entropy(&self, t: &Transaction) -> f64 {
        self.left.entropy(t).min(self.right.entropy(t))
    }

    fn get_index(&self, this: &Selection, exprs: &[Evaluator]) -> Result<Option<Index>> {
        Ok(self.base.get_index(exprs)?.map(|index| index.restrict(this)))
    }

    fn children(&self) -> Vec<&Selection> {
        vec![&self.left, &self.right]
    }
}

/// Union of two index-driven filters over the same base.
pub(crate) struct OrFilter {
    pub base: Selection,
    pub left: Selection,
    pub right: Selection,
}

impl PlanNode for OrFilter {
    fn kind(&self) -> &'static str {
        "or"
    }

    fn enumerate<'a>(&'a self, _this: &'a Selection, t: &'a Transaction) -> RowIter<'a> {
        let mut seen: HashSet<RowHandle> = HashSet::new();
        Box::new(
            self.left
                .enumerate(t)
                .chain(self.right.enumerate(t))
                .filter_map(move |row| match row {
                    Ok(row) => seen.insert(row.handle).then_some(Ok(row)),
                    Err(e) => Some(Err(e)),
                }),
        )
    }

    fn has_item(&self, _this: &Selection, row: &Row, t: &Transaction) -> Result<bool> {
        Ok(self.left.has_item(row, t)? || self.right.has_item(row, t)?)
    }

    fn entropy(&self, t: &Transaction) -> f64 {
        self.left.entropy(t) + self.right.entropy(t)
    }

    fn get_index(&self, this: &Selection, exprs: &[Evaluator]) -> Result<Option<Index>> {
        Ok(self.base.get_index(exprs)?.map(|index| index.restrict(this)))
    }

    fn children(&self) -> Vec<&Selection> {
        vec![&self.left, &self.right]
    }
}
