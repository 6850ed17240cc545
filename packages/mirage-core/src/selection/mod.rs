//! Selections: lazy, composable row-producing plan nodes.
//!
//! A [`Selection`] describes the rows obtained by applying one operation to
//! another selection (or to a table). Building one is cheap and side-effect
//! free; rows are only produced when it is enumerated against a
//! [`Transaction`].
//!
//! Every selection exposes its output as columns that read positional
//! values of the rows it yields. Pass-through nodes (filters, ordering,
//! limits, distinct, aliases) yield their input's rows unchanged and share
//! its columns; the other nodes produce rows in a namespace of their own.

mod alias;
mod explain;
mod filter;
mod filter_builder;
mod join;
mod map;
mod ordering;
mod scan;
mod union;

use std::fmt;
use std::sync::Arc;

use crate::aggregation::AggregationNode;
use crate::ast::{Expr, JoinKind};
use crate::error::{DbError, Result};
use crate::eval::{BuildContext, Evaluator};
use crate::index::{Index, IndexOp, RowIter};
use crate::row::{next_namespace, Row, SelectionId};
use crate::table::Table;
use crate::transaction::Transaction;
use crate::types::Value;

pub use explain::Explanation;
pub use filter::FilterKind;
pub use ordering::SortKey;

use alias::AliasNode;
use filter::{AndFilter, IndexFilter, OrFilter, SeqScanFilter};
use join::JoinNode;
use map::MapNode;
use ordering::{DistinctNode, LimitNode, OrderByNode};
use scan::{EmptyNode, ScanNode, ValuesNode};
use union::UnionNode;

/// Named output column of a selection.
#[derive(Debug, Clone)]
pub struct ColumnBinding {
    /// Table or alias name the column can be qualified with
    pub qualifier: Option<String>,
    pub name: String,
    pub evaluator: Evaluator,
}

impl ColumnBinding {
    pub fn new(qualifier: Option<&str>, name: &str, evaluator: Evaluator) -> Self {
        Self {
            qualifier: qualifier.map(str::to_string),
            name: name.to_string(),
            evaluator,
        }
    }
}

/// Contract every plan node implements.
pub(crate) trait PlanNode: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Rows of this node; restartable.
    fn enumerate<'a>(&'a self, this: &'a Selection, t: &'a Transaction) -> RowIter<'a>;

    /// Whether `row` is one of the rows `enumerate` yields.
    fn has_item(&self, this: &Selection, row: &Row, t: &Transaction) -> Result<bool>;

    /// Expected row count.
    fn entropy(&self, t: &Transaction) -> f64;

    /// Index over `exprs` (built against this node's columns) that yields
    /// rows of this node.
    fn get_index(&self, _this: &Selection, _exprs: &[Evaluator]) -> Result<Option<Index>> {
        Ok(None)
    }

    fn detail(&self) -> Option<String> {
        None
    }

    fn children(&self) -> Vec<&Selection>;
}

pub(crate) enum SelectionKind {
    Scan(ScanNode),
    Empty(EmptyNode),
    Values(ValuesNode),
    SeqScan(SeqScanFilter),
    Index(IndexFilter),
    And(AndFilter),
    Or(OrFilter),
    Map(MapNode),
    Join(JoinNode),
    Aggregation(AggregationNode),
    OrderBy(OrderByNode),
    Limit(LimitNode),
    Distinct(DistinctNode),
    Alias(AliasNode),
    Union(UnionNode),
}

impl SelectionKind {
    fn node(&self) -> &dyn PlanNode {
        match self {
            SelectionKind::Scan(n) => n,
            SelectionKind::Empty(n) => n,
            SelectionKind::Values(n) => n,
            SelectionKind::SeqScan(n) => n,
            SelectionKind::Index(n) => n,
            SelectionKind::And(n) => n,
            SelectionKind::Or(n) => n,
            SelectionKind::Map(n) => n,
            SelectionKind::Join(n) => n,
            SelectionKind::Aggregation(n) => n,
            SelectionKind::OrderBy(n) => n,
            SelectionKind::Limit(n) => n,
            SelectionKind::Distinct(n) => n,
            SelectionKind::Alias(n) => n,
            SelectionKind::Union(n) => n,
        }
    }
}

struct SelectionInner {
    id: SelectionId,
    columns: Vec<ColumnBinding>,
    kind: SelectionKind,
}

/// Immutable, shareable plan node.
#[derive(Clone)]
pub struct Selection(Arc<SelectionInner>);

impl fmt::Debug for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let columns: Vec<&str> = self.0.columns.iter().map(|c| c.name.as_str()).collect();
        f.debug_struct("Selection")
            .field("id", &self.0.id)
            .field("kind", &self.kind_name())
            .field("columns", &columns)
            .finish()
    }
}

impl Selection {
    pub(crate) fn new(id: SelectionId, columns: Vec<ColumnBinding>, kind: SelectionKind) -> Self {
        Selection(Arc::new(SelectionInner { id, columns, kind }))
    }

    /// Node sharing `base`'s columns and rows.
    fn pass_through(base: &Selection, kind: SelectionKind) -> Self {
        Self::new(next_namespace(), base.columns().to_vec(), kind)
    }

    pub fn id(&self) -> SelectionId {
        self.0.id
    }

    pub fn columns(&self) -> &[ColumnBinding] {
        &self.0.columns
    }

    pub fn kind_name(&self) -> &'static str {
        self.0.kind.node().kind()
    }

    pub(crate) fn kind(&self) -> &SelectionKind {
        &self.0.kind
    }

    /// Resolves a possibly qualified column name.
    pub fn get_column(&self, qualifier: Option<&str>, name: &str) -> Result<Evaluator> {
        let display = match qualifier {
            Some(q) => format!("{}.{}", q, name),
            None => name.to_string(),
        };
        let mut found = self.columns().iter().filter(|c| {
            c.name == name && qualifier.map_or(true, |q| c.qualifier.as_deref() == Some(q))
        });
        match (found.next(), found.next()) {
            (Some(column), None) => Ok(column.evaluator.clone()),
            (Some(_), Some(_)) => Err(DbError::AmbiguousColumn { column: display }),
            (None, _) => Err(DbError::ColumnNotFound { column: display }),
        }
    }

    /// Scope whose columns an expression built over this selection reads;
    /// used as the expression cache key.
    pub fn cache_scope(&self) -> SelectionId {
        match self.kind() {
            SelectionKind::Scan(scan) => scan.table.id,
            SelectionKind::SeqScan(SeqScanFilter { base, .. })
            | SelectionKind::Index(IndexFilter { base, .. })
            | SelectionKind::And(AndFilter { base, .. })
            | SelectionKind::Or(OrFilter { base, .. })
            | SelectionKind::Empty(EmptyNode { base })
            | SelectionKind::OrderBy(OrderByNode { base, .. })
            | SelectionKind::Limit(LimitNode { base, .. })
            | SelectionKind::Distinct(DistinctNode { base }) => base.cache_scope(),
            _ => self.id(),
        }
    }

    pub fn enumerate<'a>(&'a self, t: &'a Transaction) -> RowIter<'a> {
        self.0.kind.node().enumerate(self, t)
    }

    /// Collects every row.
    pub fn rows(&self, t: &Transaction) -> Result<Vec<Row>> {
        self.enumerate(t).collect()
    }

    pub fn has_item(&self, row: &Row, t: &Transaction) -> Result<bool> {
        self.0.kind.node().has_item(self, row, t)
    }

    pub fn entropy(&self, t: &Transaction) -> f64 {
        self.0.kind.node().entropy(t)
    }

    pub fn get_index(&self, exprs: &[Evaluator]) -> Result<Option<Index>> {
        if exprs.is_empty() {
            return Ok(None);
        }
        self.0.kind.node().get_index(self, exprs)
    }

    pub fn explain(&self, t: &Transaction, with_entropy: bool) -> Explanation {
        let node = self.0.kind.node();
        let mut explanation = Explanation::new(self.id(), node.kind())
            .with_entropy(with_entropy.then(|| node.entropy(t)));
        explanation.detail = node.detail();
        for child in node.children() {
            explanation = explanation.with_child(child.explain(t, with_entropy));
        }
        if let SelectionKind::Index(filter) = self.kind() {
            explanation = explanation.with_child(crate::index::QueryIndex::explain(&filter.index));
        }
        explanation
    }

    /// Full sequential scan filter (not a residual check over a lookup).
    pub fn is_seq_scan(&self) -> bool {
        matches!(self.kind(), SelectionKind::SeqScan(filter) if !filter.residual)
    }

    /// Table of a plain, unfiltered scan.
    pub fn scanned_table(&self) -> Option<&Arc<Table>> {
        match self.kind() {
            SelectionKind::Scan(scan) => Some(&scan.table),
            _ => None,
        }
    }

    pub fn is_empty_node(&self) -> bool {
        matches!(self.kind(), SelectionKind::Empty(_))
    }

    pub fn same_as(&self, other: &Selection) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Values of `row` for every output column.
    pub fn values_of(&self, row: &Row, t: &Transaction) -> Result<Vec<Value>> {
        self.columns()
            .iter()
            .map(|c| c.evaluator.get(Some(row), t))
            .collect()
    }

    /// Row this selection yields for an input row; identity for every node
    /// but projections.
    pub fn project(&self, row: &Row, t: &Transaction) -> Result<Row> {
        match self.kind() {
            SelectionKind::Map(map) => map.project(self, row, t),
            _ => Ok(row.clone()),
        }
    }

    pub fn scan(table: Arc<Table>) -> Selection {
        scan::scan(table)
    }

    /// One row without columns: the scope of `SELECT` without `FROM` and of
    /// expressions that read no table.
    pub fn unit() -> Selection {
        scan::unit()
    }

    /// Node yielding nothing, with `base`'s columns.
    pub fn empty(base: &Selection) -> Selection {
        Self::pass_through(base, SelectionKind::Empty(EmptyNode { base: base.clone() }))
    }

    /// Constant rows; every row holds one constant expression per column.
    pub fn values(rows: Vec<Vec<Evaluator>>) -> Result<Selection> {
        scan::values(rows)
    }

    /// Rows satisfying `predicate`, rewritten to index lookups where possible.
    pub fn filter(&self, predicate: &Expr, ctx: BuildContext<'_>) -> Result<Selection> {
        filter_builder::build_filter(self, predicate, ctx)
    }

    /// Sequential filter with an already built predicate.
    pub fn seq_scan(&self, predicate: Evaluator) -> Selection {
        Self::pass_through(
            self,
            SelectionKind::SeqScan(SeqScanFilter {
                base: self.clone(),
                predicate,
                residual: false,
            }),
        )
    }

    /// Re-check of `predicate` over an index lookup that only approximates it.
    pub(crate) fn residual_scan(&self, predicate: Evaluator) -> Selection {
        Self::pass_through(
            self,
            SelectionKind::SeqScan(SeqScanFilter {
                base: self.clone(),
                predicate,
                residual: true,
            }),
        )
    }

    pub(crate) fn index_filter(
        &self,
        index: Index,
        ops: Vec<IndexOp>,
        kind: FilterKind,
        keys: Vec<Evaluator>,
    ) -> Selection {
        Self::pass_through(
            self,
            SelectionKind::Index(IndexFilter {
                base: self.clone(),
                index,
                ops,
                kind,
                keys,
            }),
        )
    }

    pub(crate) fn and(&self, left: Selection, right: Selection) -> Selection {
        Self::pass_through(
            self,
            SelectionKind::And(AndFilter {
                base: self.clone(),
                left,
                right,
            }),
        )
    }

    pub(crate) fn or(&self, left: Selection, right: Selection) -> Selection {
        Self::pass_through(
            self,
            SelectionKind::Or(OrFilter {
                base: self.clone(),
                left,
                right,
            }),
        )
    }

    /// Projection computing one output column per `(name, expression)`.
    pub fn map(&self, items: Vec<(String, Evaluator)>) -> Result<Selection> {
        map::map(self, items)
    }

    pub fn join(
        left: &Selection,
        right: &Selection,
        kind: JoinKind,
        on: Option<&Expr>,
        ctx: BuildContext<'_>,
    ) -> Result<Selection> {
        join::join(left, right, kind, on, ctx)
    }

    pub fn order_by(&self, keys: Vec<SortKey>) -> Selection {
        if keys.is_empty() {
            return self.clone();
        }
        Self::pass_through(
            self,
            SelectionKind::OrderBy(OrderByNode {
                base: self.clone(),
                keys,
            }),
        )
    }

    pub fn limit(&self, limit: Option<usize>, offset: usize) -> Selection {
        if limit.is_none() && offset == 0 {
            return self.clone();
        }
        Self::pass_through(
            self,
            SelectionKind::Limit(LimitNode {
                base: self.clone(),
                limit,
                offset,
            }),
        )
    }

    pub fn distinct(&self) -> Selection {
        Self::pass_through(
            self,
            SelectionKind::Distinct(DistinctNode { base: self.clone() }),
        )
    }

    /// Renames the selection (and optionally its columns).
    pub fn alias(&self, name: &str, columns: &[String]) -> Result<Selection> {
        alias::alias(self, name, columns)
    }

    pub fn union(left: &Selection, right: &Selection, all: bool) -> Result<Selection> {
        union::union(left, right, all)
    }
}
