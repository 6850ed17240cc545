//! The aggregation plan node and its execution strategies.

use std::collections::HashMap;

use crate::ast::Expr;
use crate::error::{DbError, Result};
use crate::eval::{BuildContext, Evaluator, ExpressionBuilder, GroupingScope};
use crate::index::{Index, IndexKey, IndexOp, QueryIndex, RowIter};
use crate::row::{next_namespace, Row, RowData, RowOwner};
use crate::selection::{ColumnBinding, PlanNode, Selection, SelectionKind};
use crate::transaction::Transaction;
use crate::types::Value;

use super::{is_aggregate, Accumulator, BoundAggregate};

/// How an aggregation computes its groups.
#[derive(Debug, Clone)]
pub enum AggregationStrategy {
    /// Closed form over an unfiltered table, no rows visited
    Trivial,
    /// One group per key of an index matching the group-by tuple
    Index(Index),
    /// One pass over the input, hashing group keys
    Sequential,
}

impl AggregationStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            AggregationStrategy::Trivial => "trivial",
            AggregationStrategy::Index(_) => "index",
            AggregationStrategy::Sequential => "sequential",
        }
    }
}

pub(crate) struct AggregationNode {
    base: Selection,
    keys: Vec<Evaluator>,
    aggregates: Vec<BoundAggregate>,
    strategy: AggregationStrategy,
}

/// Aggregate calls in `exprs`, outermost first and without duplicates.
pub fn collect_aggregates<'a>(exprs: impl IntoIterator<Item = &'a Expr>) -> Vec<Expr> {
    let mut calls: Vec<Expr> = Vec::new();
    for expr in exprs {
        expr.walk(&mut |e| {
            if e.is_aggregate_call(&is_aggregate) {
                if !calls.contains(e) {
                    calls.push(e.clone());
                }
                return false;
            }
            true
        });
    }
    calls
}

/// Builds `base GROUP BY group_by` computing `calls`.
///
/// Returns the aggregation and the scope resolving group keys and
/// aggregate calls to its output columns.
pub fn build_aggregation(
    base: &Selection,
    group_by: &[Expr],
    calls: &[Expr],
    ctx: BuildContext<'_>,
) -> Result<(Selection, GroupingScope)> {
    let key_builder = ExpressionBuilder::new(base, ctx).clause("GROUP BY");
    let mut keys: Vec<Evaluator> = Vec::with_capacity(group_by.len());
    for expr in group_by {
        let key = key_builder.build(expr)?;
        if !keys.iter().any(|k| k.hash() == key.hash()) {
            keys.push(key);
        }
    }

    let arg_builder = ExpressionBuilder::new(base, ctx).clause("aggregate function calls");
    let mut aggregates = Vec::with_capacity(calls.len());
    for call in calls {
        let Expr::Function {
            name,
            args,
            distinct,
            star,
        } = call
        else {
            return Err(DbError::Internal(format!("{:?} is not an aggregate call", call)));
        };
        let args = args
            .iter()
            .map(|a| arg_builder.build(a))
            .collect::<Result<Vec<_>>>()?;
        aggregates.push(BoundAggregate::bind(name, args, *distinct, *star)?);
    }

    let strategy = choose_strategy(base, &keys, &aggregates)?;
    tracing::debug!(
        strategy = strategy.name(),
        keys = keys.len(),
        aggregates = aggregates.len(),
        "aggregation plan"
    );

    let id = next_namespace();
    let mut columns = Vec::with_capacity(keys.len() + aggregates.len());
    for key in &keys {
        let i = columns.len();
        let output = Evaluator::column(id, i, key.data_type().clone(), key.name());
        columns.push(ColumnBinding::new(None, key.name(), output));
    }
    for aggregate in &aggregates {
        let i = columns.len();
        let name = aggregate.function.name();
        let output = Evaluator::column(id, i, aggregate.output_type.clone(), name);
        columns.push(ColumnBinding::new(None, name, output));
    }
    let grouping = GroupingScope {
        base: base.clone(),
        keys: keys
            .iter()
            .zip(&columns)
            .map(|(k, c)| (k.hash(), c.evaluator.clone()))
            .collect(),
        aggregates: calls
            .iter()
            .cloned()
            .zip(columns[keys.len()..].iter().map(|c| c.evaluator.clone()))
            .collect(),
    };
    let node = AggregationNode {
        base: base.clone(),
        keys,
        aggregates,
        strategy,
    };
    Ok((
        Selection::new(id, columns, SelectionKind::Aggregation(node)),
        grouping,
    ))
}

fn choose_strategy(
    base: &Selection,
    keys: &[Evaluator],
    aggregates: &[BoundAggregate],
) -> Result<AggregationStrategy> {
    if keys.is_empty() {
        let trivial = base.scanned_table().is_some()
            && !aggregates.is_empty()
            && aggregates.iter().all(|a| a.compute_trivial(0).is_some());
        return Ok(if trivial {
            AggregationStrategy::Trivial
        } else {
            AggregationStrategy::Sequential
        });
    }
    if aggregates.iter().all(|a| a.supports_index(keys)) {
        if let Some(index) = base.get_index(keys)? {
            return Ok(AggregationStrategy::Index(index));
        }
    }
    Ok(AggregationStrategy::Sequential)
}

impl AggregationNode {
    fn output(&self, this: &Selection, position: usize, values: Vec<Value>) -> Row {
        RowData::positional(this.id(), position, values)
    }

    fn trivial(&self, this: &Selection, t: &Transaction) -> Result<Vec<Row>> {
        let count = self
            .base
            .scanned_table()
            .map_or(0, |table| t.row_count(table.id));
        let values = self
            .aggregates
            .iter()
            .map(|a| {
                a.compute_trivial(count)
                    .ok_or_else(|| DbError::Internal(format!("{} has no closed form", a)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(vec![self.output(this, 0, values)])
    }

    fn from_index(&self, this: &Selection, index: &Index, t: &Transaction) -> Result<Vec<Row>> {
        let mut out = Vec::new();
        for key in index.iterate_keys(t) {
            let op = IndexOp::Eq {
                key: key.clone(),
                match_null: true,
            };
            let rows = if index.is_unrestricted() {
                index.entropy(&op, t) as usize
            } else {
                let mut count = 0;
                for row in index.enumerate(&op, t) {
                    row?;
                    count += 1;
                }
                count
            };
            if rows == 0 {
                continue;
            }
            let mut values = key.0.clone();
            for aggregate in &self.aggregates {
                values.push(aggregate.compute_from_index(&self.keys, &key, rows)?);
            }
            out.push(self.output(this, out.len(), values));
        }
        Ok(out)
    }

    fn sequential(&self, this: &Selection, t: &Transaction) -> Result<Vec<Row>> {
        let mut positions: HashMap<IndexKey, usize> = HashMap::new();
        let mut groups: Vec<(IndexKey, Vec<Box<dyn Accumulator>>)> = Vec::new();
        for row in self.base.enumerate(t) {
            let row = row?;
            let key = IndexKey(
                self.keys
                    .iter()
                    .map(|k| k.get(Some(&row), t))
                    .collect::<Result<Vec<_>>>()?,
            );
            let position = match positions.get(&key) {
                Some(&position) => position,
                None => {
                    let accumulators = self.aggregates.iter().map(|a| a.create_group()).collect();
                    groups.push((key.clone(), accumulators));
                    positions.insert(key, groups.len() - 1);
                    groups.len() - 1
                }
            };
            let (_, accumulators) = &mut groups[position];
            for (aggregate, accumulator) in self.aggregates.iter().zip(accumulators.iter_mut()) {
                aggregate.feed_row(accumulator.as_mut(), &row, t)?;
            }
        }
        if groups.is_empty() && self.keys.is_empty() {
            let accumulators = self.aggregates.iter().map(|a| a.create_group()).collect();
            groups.push((IndexKey(Vec::new()), accumulators));
        }
        groups
            .into_iter()
            .enumerate()
            .map(|(position, (key, accumulators))| {
                let mut values = key.0;
                for accumulator in accumulators {
                    values.push(accumulator.finish()?);
                }
                Ok(self.output(this, position, values))
            })
            .collect()
    }

    fn groups(&self, this: &Selection, t: &Transaction) -> Result<Vec<Row>> {
        match &self.strategy {
            AggregationStrategy::Trivial => self.trivial(this, t),
            AggregationStrategy::Index(index) => self.from_index(this, index, t),
            AggregationStrategy::Sequential => self.sequential(this, t),
        }
    }
}

impl PlanNode for AggregationNode {
    fn kind(&self) -> &'static str {
        "aggregate"
    }

    fn enumerate<'a>(&'a self, this: &'a Selection, t: &'a Transaction) -> RowIter<'a> {
        match self.groups(this, t) {
            Ok(rows) => Box::new(rows.into_iter().map(Ok)),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }

    fn has_item(&self, this: &Selection, row: &Row, _t: &Transaction) -> Result<bool> {
        Ok(row.handle.owner == RowOwner::Selection(this.id()))
    }

    fn entropy(&self, t: &Transaction) -> f64 {
        match &self.strategy {
            _ if self.keys.is_empty() => 1.0,
            AggregationStrategy::Index(index) => index.iterate_keys(t).count() as f64,
            _ => self.base.entropy(t),
        }
    }

    fn detail(&self) -> Option<String> {
        let keys: Vec<&str> = self.keys.iter().map(|k| k.name()).collect();
        let aggregates: Vec<String> = self.aggregates.iter().map(|a| a.to_string()).collect();
        Some(format!(
            "{} by ({}) computing {}",
            self.strategy.name(),
            keys.join(", "),
            aggregates.join(", ")
        ))
    }

    fn children(&self) -> Vec<&Selection> {
        vec![&self.base]
    }
}
