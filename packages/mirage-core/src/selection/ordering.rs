//! Ordering, limiting and de-duplication. None of these report an index.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::error::Result;
use crate::eval::Evaluator;
use crate::index::RowIter;
use crate::row::Row;
use crate::transaction::Transaction;
use crate::types::Value;

use super::{PlanNode, Selection};

/// One `ORDER BY` term.
#[derive(Debug, Clone)]
pub struct SortKey {
    pub expr: Evaluator,
    pub desc: bool,
    pub nulls_first: bool,
}

impl SortKey {
    /// Ascending puts nulls last, descending puts them first.
    pub fn new(expr: Evaluator, desc: bool, nulls_first: Option<bool>) -> Self {
        Self {
            expr,
            desc,
            nulls_first: nulls_first.unwrap_or(desc),
        }
    }

    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) if self.nulls_first => Ordering::Less,
            (true, false) => Ordering::Greater,
            (false, true) if self.nulls_first => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) if self.desc => b.cmp(a),
            (false, false) => a.cmp(b),
        }
    }
}

pub(crate) struct OrderByNode {
    pub base: Selection,
    pub keys: Vec<SortKey>,
}

impl OrderByNode {
    fn sorted(&self, t: &Transaction) -> Result<Vec<Row>> {
        let mut keyed = self
            .base
            .enumerate(t)
            .map(|row| {
                let row = row?;
                let key = self
                    .keys
                    .iter()
                    .map(|k| k.expr.get(Some(&row), t))
                    .collect::<Result<Vec<_>>>()?;
                Ok((key, row))
            })
            .collect::<Result<Vec<_>>>()?;
        keyed.sort_by(|(a, _), (b, _)| {
            self.keys
                .iter()
                .zip(a.iter().zip(b))
                .map(|(key, (a, b))| key.compare(a, b))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }
}

impl PlanNode for OrderByNode {
    fn kind(&self) -> &'static str {
        "order_by"
    }

    fn enumerate<'a>(&'a self, _this: &'a Selection, t: &'a Transaction) -> RowIter<'a> {
        match self.sorted(t) {
            Ok(rows) => Box::new(rows.into_iter().map(Ok)),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }

    fn has_item(&self, _this: &Selection, row: &Row, t: &Transaction) -> Result<bool> {
        self.base.has_item(row, t)
    }

    fn entropy(&self, t: &Transaction) -> f64 {
        self.base.entropy(t)
    }

    fn detail(&self) -> Option<String> {
        let keys: Vec<String> = self
            .keys
            .iter()
            .map(|k| format!("{} {}", k.expr.name(), if k.desc { "desc" } else { "asc" }))
            .collect();
        Some(keys.join(", "))
    }

    fn children(&self) -> Vec<&Selection> {
        vec![&self.base]
    }
}

pub(crate) struct LimitNode {
    pub base: Selection,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl PlanNode for LimitNode {
    fn kind(&self) -> &'static str {
        "limit"
    }

    fn enumerate<'a>(&'a self, _this: &'a Selection, t: &'a Transaction) -> RowIter<'a> {
        let rows = self.base.enumerate(t).skip(self.offset);
        match self.limit {
            Some(limit) => Box::new(rows.take(limit)),
            None => Box::new(rows),
        }
    }

    fn has_item(&self, this: &Selection, row: &Row, t: &Transaction) -> Result<bool> {
        if !self.base.has_item(row, t)? {
            return Ok(false);
        }
        for candidate in self.enumerate(this, t) {
            if candidate?.handle == row.handle {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn entropy(&self, t: &Transaction) -> f64 {
        let remaining = (self.base.entropy(t) - self.offset as f64).max(0.0);
        match self.limit {
            Some(limit) => remaining.min(limit as f64),
            None => remaining,
        }
    }

    fn detail(&self) -> Option<String> {
        Some(match self.limit {
            Some(limit) => format!("limit {} offset {}", limit, self.offset),
            None => format!("offset {}", self.offset),
        })
    }

    fn children(&self) -> Vec<&Selection> {
        vec![&self.base]
    }
}

pub(crate) struct DistinctNode {
    pub base: Selection,
}

impl PlanNode for DistinctNode {
    fn kind(&self) -> &'static str {
        "distinct"
    }

    fn enumerate<'a>(&'a self, this: &'a Selection, t: &'a Transaction) -> RowIter<'a> {
        let mut seen: HashSet<Vec<Value>> = HashSet::new();
        Box::new(self.base.enumerate(t).filter_map(move |row| {
            let row = match row {
                Ok(row) => row,
                Err(e) => return Some(Err(e)),
            };
            match this.values_of(&row, t) {
                Ok(values) => seen.insert(values).then_some(Ok(row)),
                Err(e) => Some(Err(e)),
            }
        }))
    }

    fn has_item(&self, this: &Selection, row: &Row, t: &Transaction) -> Result<bool> {
        if !self.base.has_item(row, t)? {
            return Ok(false);
        }
        let values = this.values_of(row, t)?;
        for candidate in self.enumerate(this, t) {
            let candidate = candidate?;
            if this.values_of(&candidate, t)? == values {
                return Ok(candidate.handle == row.handle);
            }
        }
        Ok(false)
    }

    fn entropy(&self, t: &Transaction) -> f64 {
        self.base.entropy(t)
    }

    fn children(&self) -> Vec<&Selection> {
        vec![&self.base]
    }
}
