//! `INSERT`, `UPDATE` and `DELETE`.

use std::collections::HashSet;
use std::sync::Arc;

use crate::ast::{Delete, Expr, Insert, InsertSource, SelectItem, Update};
use crate::database::{QueryResult, ResultColumn};
use crate::error::{DbError, Result};
use crate::eval::{Evaluator, ExpressionBuilder};
use crate::index::{IndexKey, QueryIndex};
use crate::row::Row;
use crate::selection::Selection;
use crate::table::{Schema, Table};
use crate::transaction::Transaction;
use crate::types::Value;

use super::select::expand_projection;
use super::{assignment, Planner};

impl Planner<'_> {
    pub(super) fn insert(&self, t: &mut Transaction, insert: &Insert) -> Result<QueryResult> {
        let table = self.schema.get(&insert.table)?.clone();
        let targets = match &insert.columns {
            Some(names) => target_columns(&table, names)?,
            None => (0..table.columns.len()).collect(),
        };
        let sources = self.insert_sources(&table, &targets, insert, t)?;

        let mut inserted = Vec::with_capacity(sources.len());
        for source in sources {
            let mut values = Vec::with_capacity(table.columns.len());
            for position in 0..table.columns.len() {
                let provided = targets
                    .iter()
                    .position(|&target| target == position)
                    .and_then(|i| source.get(i).cloned().flatten());
                values.push(match provided {
                    Some(value) => value,
                    None => column_default(&table, t, position)?,
                });
            }
            let row = table.insert(t, values)?;
            check_references(self.schema, &table, &row, t)?;
            inserted.push(row);
        }
        tracing::debug!(table = %table.name, rows = inserted.len(), "insert");
        self.modified("INSERT", &table, None, &insert.returning, &inserted, t)
    }

    /// Values of every source row for the target columns; `None` marks an
    /// explicit `DEFAULT`.
    fn insert_sources(
        &self,
        table: &Table,
        targets: &[usize],
        insert: &Insert,
        t: &Transaction,
    ) -> Result<Vec<Vec<Option<Value>>>> {
        let width_check = |width: usize| {
            if width > targets.len() {
                return Err(DbError::Query(
                    "INSERT has more expressions than target columns".to_string(),
                ));
            }
            if width < targets.len() && insert.columns.is_some() {
                return Err(DbError::Query(
                    "INSERT has more target columns than expressions".to_string(),
                ));
            }
            Ok(())
        };
        match &insert.source {
            InsertSource::DefaultValues => Ok(vec![Vec::new()]),
            InsertSource::Values(rows) => {
                let unit = Selection::unit();
                let builder = ExpressionBuilder::new(&unit, self.ctx).clause("VALUES");
                rows.iter()
                    .map(|row| {
                        width_check(row.len())?;
                        row.iter()
                            .zip(targets)
                            .map(|(expr, &position)| match expr {
                                Expr::Default => Ok(None),
                                expr => {
                                    let node = builder.build(expr)?;
                                    let node = assignment(node, &table.columns[position])?;
                                    node.get(None, t).map(Some)
                                }
                            })
                            .collect()
                    })
                    .collect()
            }
            InsertSource::Query(query) => {
                let plan = self.plan_query(query)?;
                width_check(plan.columns().len())?;
                let converters = plan
                    .columns()
                    .iter()
                    .zip(targets)
                    .map(|(c, &position)| assignment(c.evaluator.clone(), &table.columns[position]))
                    .collect::<Result<Vec<_>>>()?;
                plan.rows(t)?
                    .iter()
                    .map(|row| {
                        converters
                            .iter()
                            .map(|c| c.get(Some(row), t).map(Some))
                            .collect()
                    })
                    .collect()
            }
        }
    }

    pub(super) fn update(&self, t: &mut Transaction, update: &Update) -> Result<QueryResult> {
        let table = self.schema.get(&update.table)?.clone();
        let scope = target_scope(&table, update.alias.as_deref())?;
        let builder = ExpressionBuilder::new(&scope, self.ctx).clause("UPDATE");
        let mut assigned = HashSet::new();
        let assignments = update
            .assignments
            .iter()
            .map(|a| {
                let position = table.column_position(&a.column)?;
                if !assigned.insert(position) {
                    return Err(DbError::Query(format!(
                        "multiple assignments to same column \"{}\"",
                        a.column
                    )));
                }
                let value = match &a.value {
                    Expr::Default => None,
                    expr => Some(assignment(builder.build(expr)?, &table.columns[position])?),
                };
                Ok((position, value))
            })
            .collect::<Result<Vec<(usize, Option<Evaluator>)>>>()?;

        let targets = self.target_rows(&scope, update.selection.as_ref(), t)?;
        let mut updated = Vec::with_capacity(targets.len());
        for row in &targets {
            let mut values = row.values.clone();
            for (position, value) in &assignments {
                values[*position] = match value {
                    Some(node) => node.get(Some(row), t)?,
                    None => column_default(&table, t, *position)?,
                };
            }
            let new = table.update(t, row, values)?;
            check_references(self.schema, &table, &new, t)?;
            check_referenced(self.schema, &table, row, Some(&new), t)?;
            updated.push(new);
        }
        tracing::debug!(table = %table.name, rows = updated.len(), "update");
        self.modified("UPDATE", &table, update.alias.as_deref(), &update.returning, &updated, t)
    }

    pub(super) fn delete(&self, t: &mut Transaction, delete: &Delete) -> Result<QueryResult> {
        let table = self.schema.get(&delete.table)?.clone();
        let scope = target_scope(&table, delete.alias.as_deref())?;
        let targets = self.target_rows(&scope, delete.selection.as_ref(), t)?;
        for row in &targets {
            table.delete(t, row)?;
            check_referenced(self.schema, &table, row, None, t)?;
        }
        tracing::debug!(table = %table.name, rows = targets.len(), "delete");
        self.modified("DELETE", &table, delete.alias.as_deref(), &delete.returning, &targets, t)
    }

    fn target_rows(
        &self,
        scope: &Selection,
        predicate: Option<&Expr>,
        t: &Transaction,
    ) -> Result<Vec<Row>> {
        match predicate {
            Some(predicate) => scope.filter(predicate, self.ctx)?.rows(t),
            None => scope.rows(t),
        }
    }

    /// Result of a data modification, with its `RETURNING` rows.
    fn modified(
        &self,
        command: &str,
        table: &Arc<Table>,
        alias: Option<&str>,
        returning: &[SelectItem],
        rows: &[Row],
        t: &Transaction,
    ) -> Result<QueryResult> {
        let mut result = QueryResult::command(command, rows.len());
        if returning.is_empty() {
            return Ok(result);
        }
        let scope = target_scope(table, alias)?;
        let builder = ExpressionBuilder::new(&scope, self.ctx).clause("RETURNING");
        let outputs = expand_projection(returning, &scope, true)?
            .into_iter()
            .map(|item| Ok((item.name, builder.build(&item.expr)?)))
            .collect::<Result<Vec<_>>>()?;
        result.columns = outputs
            .iter()
            .map(|(name, node)| ResultColumn {
                name: name.clone(),
                data_type: node.data_type().clone(),
            })
            .collect();
        result.rows = rows
            .iter()
            .map(|row| outputs.iter().map(|(_, node)| node.get(Some(row), t)).collect())
            .collect::<Result<Vec<_>>>()?;
        Ok(result)
    }
}

fn target_columns(table: &Table, names: &[String]) -> Result<Vec<usize>> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(|name| {
            let position = table.column_position(name)?;
            if !seen.insert(position) {
                return Err(DbError::Query(format!(
                    "column \"{}\" specified more than once",
                    name
                )));
            }
            Ok(position)
        })
        .collect()
}

fn target_scope(table: &Arc<Table>, alias: Option<&str>) -> Result<Selection> {
    let scan = Selection::scan(table.clone());
    match alias {
        Some(alias) => scan.alias(alias, &[]),
        None => Ok(scan),
    }
}

/// Value of an omitted column: next serial, declared default or null.
fn column_default(table: &Table, t: &mut Transaction, position: usize) -> Result<Value> {
    let column = &table.columns[position];
    if column.serial {
        return Ok(Value::BigInt(table.next_serial(t, position)));
    }
    match &column.default {
        Some(default) => default.get(None, t),
        None => Ok(Value::Null),
    }
}

fn key_of(row: &Row, positions: &[usize]) -> Option<Vec<Value>> {
    let key: Vec<Value> = positions.iter().map(|&i| row.get(i).clone()).collect();
    (!key.iter().any(Value::is_null)).then_some(key)
}

/// Every foreign key of `row` must match a row of the referenced table.
pub(crate) fn check_references(
    schema: &Schema,
    table: &Table,
    row: &Row,
    t: &Transaction,
) -> Result<()> {
    for relation in &table.relations {
        let Some(key) = key_of(row, &relation.columns) else {
            continue;
        };
        let target: &Table = if relation.to_table == table.name {
            table
        } else {
            schema.get(&relation.to_table)?
        };
        let index = target.unique_index_on(&relation.to_columns).ok_or_else(|| {
            DbError::Internal(format!(
                "no unique index on {}({}) for {}",
                target.name,
                relation.to_columns.join(", "),
                relation.name
            ))
        })?;
        if index.eq_first(&IndexKey(key), t)?.is_none() {
            return Err(DbError::ForeignKeyViolation {
                operation: "insert or update",
                table: table.name.clone(),
                constraint: relation.name.clone(),
            });
        }
    }
    Ok(())
}

/// No row may still reference the key `old` had, unless `new` keeps it.
pub(crate) fn check_referenced(
    schema: &Schema,
    table: &Table,
    old: &Row,
    new: Option<&Row>,
    t: &Transaction,
) -> Result<()> {
    for child in schema.tables.values() {
        for relation in child.relations.iter().filter(|r| r.to_table == table.name) {
            let positions = relation
                .to_columns
                .iter()
                .map(|c| table.column_position(c))
                .collect::<Result<Vec<_>>>()?;
            let Some(key) = key_of(old, &positions) else {
                continue;
            };
            if new.and_then(|new| key_of(new, &positions)).as_ref() == Some(&key) {
                continue;
            }
            let referenced = child.rows(t).iter().any(|r| {
                !(child.id == table.id && r.handle == old.handle)
                    && key_of(r, &relation.columns).as_ref() == Some(&key)
            });
            if referenced {
                return Err(DbError::ForeignKeyViolation {
                    operation: "update or delete",
                    table: table.name.clone(),
                    constraint: relation.name.clone(),
                });
            }
        }
    }
    Ok(())
}
