//! Query planning: `FROM`, `WHERE`, grouping, projection, ordering and
//! set operations.

use crate::aggregation::{build_aggregation, collect_aggregates};
use crate::ast::{
    Expr, FromItem, JoinKind, Literal, OrderByExpr, Query, Select, SelectItem, SetExpr,
};
use crate::error::{DbError, Result};
use crate::eval::{Evaluator, ExpressionBuilder};
use crate::selection::{Selection, SortKey};
use crate::transaction::Transaction;

use super::Planner;

/// One output column of a projection before it is built.
#[derive(Debug, Clone)]
pub(super) struct OutputItem {
    pub name: String,
    pub expr: Expr,
}

impl Planner<'_> {
    /// Builds the selection computing `query`.
    pub fn plan_query(&self, query: &Query) -> Result<Selection> {
        let planned = match &query.body {
            SetExpr::Select(select) => self.plan_select(select, &query.order_by)?,
            body => {
                let set = self.plan_set(body)?;
                let keys = self.output_sort_keys(&set, &query.order_by, None)?;
                set.order_by(keys)
            }
        };
        let empty = Transaction::new();
        let limit = self.row_count(query.limit.as_ref(), "LIMIT", &empty)?;
        let offset = self.row_count(query.offset.as_ref(), "OFFSET", &empty)?;
        Ok(planned.limit(limit, offset.unwrap_or(0)))
    }

    fn plan_set(&self, body: &SetExpr) -> Result<Selection> {
        match body {
            SetExpr::Select(select) => self.plan_select(select, &[]),
            SetExpr::Values(rows) => self.plan_values(rows),
            SetExpr::Union { left, right, all } => {
                Selection::union(&self.plan_set(left)?, &self.plan_set(right)?, *all)
            }
            SetExpr::Query(query) => self.plan_query(query),
        }
    }

    fn plan_values(&self, rows: &[Vec<Expr>]) -> Result<Selection> {
        let unit = Selection::unit();
        let builder = ExpressionBuilder::new(&unit, self.ctx).clause("VALUES");
        let rows = rows
            .iter()
            .map(|row| row.iter().map(|e| builder.build(e)).collect::<Result<Vec<_>>>())
            .collect::<Result<Vec<_>>>()?;
        Selection::values(rows)
    }

    /// `LIMIT` / `OFFSET` argument; `None` when absent or null.
    fn row_count(
        &self,
        expr: Option<&Expr>,
        clause: &'static str,
        t: &Transaction,
    ) -> Result<Option<usize>> {
        let Some(expr) = expr else {
            return Ok(None);
        };
        let value = self.constant(expr, clause, t)?;
        if value.is_null() {
            return Ok(None);
        }
        let count = value
            .as_i64()
            .ok_or_else(|| DbError::Query(format!("argument of {} must be an integer", clause)))?;
        usize::try_from(count)
            .map(Some)
            .map_err(|_| DbError::Query(format!("{} must not be negative", clause)))
    }

    pub(super) fn plan_from(&self, from: &[FromItem]) -> Result<Selection> {
        let mut items = from.iter();
        let Some(first) = items.next() else {
            return Ok(Selection::unit());
        };
        let mut plan = self.plan_from_item(first)?;
        for item in items {
            let right = self.plan_from_item(item)?;
            plan = Selection::join(&plan, &right, JoinKind::Cross, None, self.ctx)?;
        }
        Ok(plan)
    }

    fn plan_from_item(&self, item: &FromItem) -> Result<Selection> {
        match item {
            FromItem::Table { name, alias } => {
                let scan = Selection::scan(self.schema.get(name)?.clone());
                match alias {
                    Some(alias) => scan.alias(&alias.name, &alias.columns),
                    None => Ok(scan),
                }
            }
            FromItem::Subquery { query, alias } => {
                self.plan_query(query)?.alias(&alias.name, &alias.columns)
            }
            FromItem::Join {
                left,
                right,
                kind,
                on,
            } => {
                if *kind != JoinKind::Cross && on.is_none() {
                    return Err(DbError::Query(
                        "JOIN requires an ON condition".to_string(),
                    ));
                }
                let left = self.plan_from_item(left)?;
                let right = self.plan_from_item(right)?;
                Selection::join(&left, &right, *kind, on.as_ref(), self.ctx)
            }
        }
    }

    fn plan_select(&self, select: &Select, order_by: &[OrderByExpr]) -> Result<Selection> {
        let from = self.plan_from(&select.from)?;
        let filtered = match &select.selection {
            Some(predicate) => from.filter(predicate, self.ctx)?,
            None => from,
        };
        let items = expand_projection(&select.projection, &filtered, !select.from.is_empty())?;

        // Without DISTINCT, rows are sorted before the projection so that
        // keys may use columns that are not projected.
        let sort_exprs: Vec<(Expr, &OrderByExpr)> = if select.distinct {
            Vec::new()
        } else {
            order_by
                .iter()
                .map(|o| Ok((substitute_output(&o.expr, &items, "ORDER BY")?, o)))
                .collect::<Result<Vec<_>>>()?
        };
        let group_by = select
            .group_by
            .iter()
            .map(|e| self.group_key(e, &items, &filtered))
            .collect::<Result<Vec<_>>>()?;

        let calls = collect_aggregates(
            items
                .iter()
                .map(|i| &i.expr)
                .chain(select.having.as_ref())
                .chain(sort_exprs.iter().map(|(e, _)| e)),
        );
        let aggregated = !group_by.is_empty() || !calls.is_empty() || select.having.is_some();

        let (scope, grouping) = if aggregated {
            let (aggregation, grouping) = build_aggregation(&filtered, &group_by, &calls, self.ctx)?;
            let scope = match &select.having {
                Some(having) => {
                    let predicate = ExpressionBuilder::new(&aggregation, self.ctx)
                        .grouped(&grouping)
                        .clause("HAVING")
                        .build_predicate(having)?;
                    aggregation.seq_scan(predicate)
                }
                None => aggregation,
            };
            (scope, Some(grouping))
        } else {
            (filtered, None)
        };

        let mut builder = ExpressionBuilder::new(&scope, self.ctx).clause("SELECT");
        if let Some(grouping) = &grouping {
            builder = builder.grouped(grouping);
        }
        let projection = items
            .iter()
            .map(|item| Ok((item.name.clone(), builder.build(&item.expr)?)))
            .collect::<Result<Vec<_>>>()?;

        if !select.distinct {
            let keys = sort_exprs
                .iter()
                .map(|(expr, o)| Ok(SortKey::new(builder.build(expr)?, o.desc, o.nulls_first)))
                .collect::<Result<Vec<_>>>()?;
            return scope.order_by(keys).map(projection);
        }

        let projected_exprs: Vec<Evaluator> = projection.iter().map(|(_, e)| e.clone()).collect();
        let output = scope.map(projection)?.distinct();
        let keys = self.output_sort_keys(&output, order_by, Some((&builder, projected_exprs.as_slice())))?;
        Ok(output.order_by(keys))
    }

    /// `GROUP BY` entry with ordinals and output names resolved.
    fn group_key(&self, expr: &Expr, items: &[OutputItem], base: &Selection) -> Result<Expr> {
        if let Expr::Column { table: None, name } = expr {
            if base.get_column(None, name).is_err() {
                if let Some(item) = items.iter().find(|i| &i.name == name) {
                    return Ok(item.expr.clone());
                }
            }
            return Ok(expr.clone());
        }
        substitute_ordinal(expr, items, "GROUP BY")
    }

    /// Sort keys over the output columns of `output`.
    ///
    /// With `projected`, keys that are neither ordinals nor output names
    /// must match a projected expression (`SELECT DISTINCT`).
    fn output_sort_keys(
        &self,
        output: &Selection,
        order_by: &[OrderByExpr],
        projected: Option<(&ExpressionBuilder<'_>, &[Evaluator])>,
    ) -> Result<Vec<SortKey>> {
        order_by
            .iter()
            .map(|o| {
                let key = self.output_sort_key(output, &o.expr, projected)?;
                Ok(SortKey::new(key, o.desc, o.nulls_first))
            })
            .collect()
    }

    fn output_sort_key(
        &self,
        output: &Selection,
        expr: &Expr,
        projected: Option<(&ExpressionBuilder<'_>, &[Evaluator])>,
    ) -> Result<Evaluator> {
        if let Some(position) = ordinal(expr, "ORDER BY", output.columns().len())? {
            return Ok(output.columns()[position].evaluator.clone());
        }
        if let Expr::Column { table: None, name } = expr {
            if let Some(column) = output.columns().iter().find(|c| &c.name == name) {
                return Ok(column.evaluator.clone());
            }
        }
        match projected {
            Some((builder, exprs)) => {
                let built = builder.build(expr)?;
                exprs
                    .iter()
                    .position(|e| e.hash() == built.hash())
                    .map(|i| output.columns()[i].evaluator.clone())
                    .ok_or_else(|| {
                        DbError::Query(
                            "for SELECT DISTINCT, ORDER BY expressions must appear in select list"
                                .to_string(),
                        )
                    })
            }
            None => ExpressionBuilder::new(output, self.ctx)
                .clause("ORDER BY")
                .build(expr),
        }
    }
}

/// Expands wildcards and names every projected expression.
pub(super) fn expand_projection(
    projection: &[SelectItem],
    scope: &Selection,
    has_from: bool,
) -> Result<Vec<OutputItem>> {
    let mut items = Vec::new();
    for item in projection {
        match item {
            SelectItem::Wildcard => {
                if !has_from {
                    return Err(DbError::Query(
                        "SELECT * with no tables specified is not valid".to_string(),
                    ));
                }
                items.extend(scope.columns().iter().map(|c| OutputItem {
                    name: c.name.clone(),
                    expr: Expr::Column {
                        table: c.qualifier.clone(),
                        name: c.name.clone(),
                    },
                }));
            }
            SelectItem::QualifiedWildcard(qualifier) => {
                let before = items.len();
                items.extend(
                    scope
                        .columns()
                        .iter()
                        .filter(|c| c.qualifier.as_deref() == Some(qualifier))
                        .map(|c| OutputItem {
                            name: c.name.clone(),
                            expr: Expr::qcol(qualifier, &c.name),
                        }),
                );
                if items.len() == before {
                    return Err(DbError::Query(format!(
                        "missing FROM-clause entry for table \"{}\"",
                        qualifier
                    )));
                }
            }
            SelectItem::Expr { expr, alias } => items.push(OutputItem {
                name: alias.clone().unwrap_or_else(|| output_name(expr)),
                expr: expr.clone(),
            }),
        }
    }
    Ok(items)
}

/// Column name Postgres gives an unaliased expression.
pub(super) fn output_name(expr: &Expr) -> String {
    match expr {
        Expr::Column { name, .. } => name.clone(),
        Expr::Function { name, .. } => name.to_lowercase(),
        Expr::Cast { expr, .. } | Expr::Subscript { expr, .. } => output_name(expr),
        Expr::Case { .. } => "case".to_string(),
        Expr::Array(_) => "array".to_string(),
        _ => "?column?".to_string(),
    }
}

/// 0-based position of an integer literal key among `len` outputs.
fn ordinal(expr: &Expr, clause: &str, len: usize) -> Result<Option<usize>> {
    let Expr::Literal(Literal::Integer(n)) = expr else {
        return Ok(None);
    };
    match usize::try_from(*n) {
        Ok(position) if (1..=len).contains(&position) => Ok(Some(position - 1)),
        _ => Err(DbError::Query(format!(
            "{} position {} is not in select list",
            clause, n
        ))),
    }
}

fn substitute_ordinal(expr: &Expr, items: &[OutputItem], clause: &str) -> Result<Expr> {
    match ordinal(expr, clause, items.len())? {
        Some(position) => Ok(items[position].expr.clone()),
        None => Ok(expr.clone()),
    }
}

/// Replaces an ordinal or an output name by the projected expression.
fn substitute_output(expr: &Expr, items: &[OutputItem], clause: &str) -> Result<Expr> {
    if let Expr::Column { table: None, name } = expr {
        if let Some(item) = items.iter().find(|i| &i.name == name) {
            return Ok(item.expr.clone());
        }
        return Ok(expr.clone());
    }
    substitute_ordinal(expr, items, clause)
}
