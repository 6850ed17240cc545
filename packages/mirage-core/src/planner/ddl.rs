//! `CREATE`, `ALTER` and `DROP` of tables and indices.
//!
//! Every operation rewrites the [`Schema`] (bumping its version) and brings
//! the rows and index entries of the given transaction in line with the
//! new definitions.

use std::sync::Arc;

use crate::ast::{
    AlterAction, AlterTable, ColumnDef, CreateIndex, CreateTable, Expr, Statement,
    TableConstraint,
};
use crate::database::QueryResult;
use crate::error::{DbError, Result};
use crate::eval::{BuildContext, ExpressionBuilder};
use crate::index::BTreeIndex;
use crate::row::{next_namespace, RowData};
use crate::selection::Selection;
use crate::table::{validation, Column, Relation, Schema, Table};
use crate::transaction::Transaction;
use crate::types::{DataType, Value};

use super::{assignment, check_references, statement_name};

/// Runs a DDL statement.
///
/// Expressions are built without the expression cache: the scopes they
/// are built against keep their ids while column positions move.
pub(crate) fn execute_ddl(
    schema: &mut Schema,
    t: &mut Transaction,
    statement: &Statement,
    ctx: BuildContext<'_>,
) -> Result<QueryResult> {
    let ctx = BuildContext::new(ctx.functions);
    match statement {
        Statement::CreateTable(create) => create_table(schema, t, create, ctx),
        Statement::CreateIndex(create) => create_index(schema, t, create, ctx),
        Statement::AlterTable(alter) => alter_table(schema, t, alter, ctx),
        Statement::DropTable { name, if_exists } => drop_table(schema, t, name, *if_exists),
        Statement::DropIndex { name, if_exists } => drop_index(schema, t, name, *if_exists),
        other => Err(DbError::Internal(format!(
            "{} is not a schema change",
            statement_name(other)
        ))),
    }
}

fn create_table(
    schema: &mut Schema,
    t: &mut Transaction,
    create: &CreateTable,
    ctx: BuildContext<'_>,
) -> Result<QueryResult> {
    if schema.contains(&create.name) {
        if create.if_not_exists {
            return Ok(QueryResult::command("CREATE TABLE", 0));
        }
        return Err(DbError::TableAlreadyExists(create.name.clone()));
    }
    let columns = create
        .columns
        .iter()
        .map(|def| column_from_def(def, ctx))
        .collect::<Result<Vec<_>>>()?;
    let mut table = Table::new(&create.name, columns)?;

    let column_keys: Vec<&ColumnDef> = create.columns.iter().filter(|c| c.primary_key).collect();
    if column_keys.len() > 1 {
        return Err(multiple_primary_keys(&create.name));
    }
    let mut primary_key: Option<(Option<String>, Vec<String>)> = column_keys
        .first()
        .map(|c| (None, vec![c.name.clone()]));
    let mut uniques: Vec<(Option<String>, Vec<String>)> = create
        .columns
        .iter()
        .filter(|c| c.unique && !c.primary_key)
        .map(|c| (None, vec![c.name.clone()]))
        .collect();
    let mut relations = Vec::new();
    for (position, def) in create.columns.iter().enumerate() {
        if let Some(reference) = &def.references {
            relations.push((
                None,
                vec![position],
                reference.table.clone(),
                reference.column.clone().map(|c| vec![c]),
            ));
        }
    }
    for constraint in &create.constraints {
        match constraint {
            TableConstraint::PrimaryKey { name, columns } => {
                if primary_key.is_some() {
                    return Err(multiple_primary_keys(&create.name));
                }
                primary_key = Some((name.clone(), columns.clone()));
            }
            TableConstraint::Unique { name, columns } => {
                uniques.push((name.clone(), columns.clone()))
            }
            TableConstraint::ForeignKey {
                name,
                columns,
                foreign_table,
                foreign_columns,
            } => {
                let positions = columns
                    .iter()
                    .map(|c| table.column_position(c))
                    .collect::<Result<Vec<_>>>()?;
                relations.push((
                    name.clone(),
                    positions,
                    foreign_table.clone(),
                    Some(foreign_columns.clone()),
                ));
            }
        }
    }
    let mut new_indexes = Vec::new();
    if let Some((name, columns)) = primary_key {
        for column in &columns {
            let position = table.column_position(column)?;
            table.columns[position].not_null = true;
        }
        let name = name.unwrap_or_else(|| format!("{}_pkey", table.name));
        table.primary_key = Some(name.clone());
        new_indexes.push((name, columns));
    }
    for (name, columns) in uniques {
        let name = name.unwrap_or_else(|| format!("{}_{}_key", table.name, columns.join("_")));
        new_indexes.push((name, columns));
    }
    let mut table = Arc::new(table);
    for (name, columns) in new_indexes {
        ensure_index_name_free(schema, &table, &name)?;
        let definition: Vec<Expr> = columns.iter().map(|c| Expr::col(c)).collect();
        let index = build_index(&table, name, &definition, true, ctx)?;
        Arc::make_mut(&mut table).indexes.push(Arc::new(index));
    }

    for (name, columns, to_table, to_columns) in relations {
        let target: &Table = if to_table == table.name {
            &table
        } else {
            schema.get(&to_table)?
        };
        let to_columns = match to_columns {
            Some(to_columns) => to_columns,
            None => primary_key_columns(target).ok_or_else(|| {
                DbError::Query(format!(
                    "there is no primary key for referenced table \"{}\"",
                    to_table
                ))
            })?,
        };
        if to_columns.len() != columns.len() {
            return Err(DbError::Query(
                "number of referencing and referenced columns for foreign key disagree"
                    .to_string(),
            ));
        }
        if target.unique_index_on(&to_columns).is_none() {
            return Err(DbError::Query(format!(
                "there is no unique constraint matching given keys for referenced table \"{}\"",
                to_table
            )));
        }
        let names: Vec<&str> = columns.iter().map(|&i| table.columns[i].name.as_str()).collect();
        let name = name.unwrap_or_else(|| format!("{}_{}_fkey", table.name, names.join("_")));
        Arc::make_mut(&mut table).relations.push(Relation {
            name,
            columns,
            to_table,
            to_columns,
        });
    }

    for index in &table.indexes {
        index.populate(t)?;
    }
    tracing::info!(
        table = %table.name,
        columns = table.columns.len(),
        indexes = table.indexes.len(),
        "created table"
    );
    schema.put(table);
    Ok(QueryResult::command("CREATE TABLE", 0))
}

fn multiple_primary_keys(table: &str) -> DbError {
    DbError::Query(format!(
        "multiple primary keys for table \"{}\" are not allowed",
        table
    ))
}

/// Column names of the primary key of `table`.
fn primary_key_columns(table: &Table) -> Option<Vec<String>> {
    let index = table.index_named(table.primary_key.as_deref()?)?;
    index
        .definition
        .iter()
        .map(|e| match e {
            Expr::Column { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

fn column_from_def(def: &ColumnDef, ctx: BuildContext<'_>) -> Result<Column> {
    let mut column = Column::new(&def.name, def.data_type.clone());
    column.not_null = def.not_null || def.primary_key;
    column.serial = def.serial;
    if def.serial && !matches!(def.data_type, DataType::Integer | DataType::BigInt) {
        return Err(DbError::Query(format!(
            "serial column \"{}\" must be of an integer type",
            def.name
        )));
    }
    if let Some(default) = &def.default {
        let unit = Selection::unit();
        let node = ExpressionBuilder::new(&unit, ctx)
            .clause("DEFAULT expressions")
            .build(default)?;
        column.default = Some(assignment(node, &column)?);
    }
    Ok(column)
}

fn ensure_index_name_free(schema: &Schema, table: &Table, name: &str) -> Result<()> {
    if schema.index_owner(name).is_some() || table.index_named(name).is_some() {
        return Err(DbError::IndexAlreadyExists(name.to_string()));
    }
    Ok(())
}

/// Builds an index over `definition`, evaluated against rows of `table`.
fn build_index(
    table: &Arc<Table>,
    name: String,
    definition: &[Expr],
    unique: bool,
    ctx: BuildContext<'_>,
) -> Result<BTreeIndex> {
    let scope = Selection::scan(table.clone());
    let builder = ExpressionBuilder::new(&scope, ctx).clause("index expressions");
    let expressions = definition
        .iter()
        .map(|expr| {
            let node = builder.build(expr)?;
            if node.is_impure() {
                return Err(DbError::Query(
                    "functions in index expression must be marked IMMUTABLE".to_string(),
                ));
            }
            Ok(node)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(BTreeIndex {
        id: next_namespace(),
        name,
        table_id: table.id,
        table_name: table.name.clone(),
        expressions,
        definition: definition.to_vec(),
        unique,
    })
}

fn create_index(
    schema: &mut Schema,
    t: &mut Transaction,
    create: &CreateIndex,
    ctx: BuildContext<'_>,
) -> Result<QueryResult> {
    let table = schema.get(&create.table)?.clone();
    if table.read_only {
        return Err(DbError::ReadOnly(table.name.clone()));
    }
    if create.expressions.is_empty() {
        return Err(DbError::Query("an index needs at least one expression".to_string()));
    }
    let name = create
        .name
        .clone()
        .unwrap_or_else(|| default_index_name(&table.name, &create.expressions));
    if schema.index_owner(&name).is_some() {
        if create.if_not_exists {
            return Ok(QueryResult::command("CREATE INDEX", 0));
        }
        return Err(DbError::IndexAlreadyExists(name));
    }
    let index = Arc::new(build_index(&table, name, &create.expressions, create.unique, ctx)?);
    index.populate(t)?;
    tracing::info!(
        table = %table.name,
        index = %index.name,
        unique = index.unique,
        "created index"
    );
    let mut updated = (*table).clone();
    updated.indexes.push(index);
    schema.put(updated);
    Ok(QueryResult::command("CREATE INDEX", 0))
}

fn default_index_name(table: &str, expressions: &[Expr]) -> String {
    let parts: Vec<String> = expressions
        .iter()
        .map(|e| match e {
            Expr::Column { name, .. } => name.clone(),
            _ => "expr".to_string(),
        })
        .collect();
    format!("{}_{}_idx", table, parts.join("_"))
}

fn alter_table(
    schema: &mut Schema,
    t: &mut Transaction,
    alter: &AlterTable,
    ctx: BuildContext<'_>,
) -> Result<QueryResult> {
    let table = schema.get(&alter.table)?.clone();
    if table.read_only {
        return Err(DbError::ReadOnly(table.name.clone()));
    }
    match &alter.action {
        AlterAction::AddColumn(def) => add_column(schema, t, &table, def, ctx)?,
        AlterAction::DropColumn { name, if_exists } => {
            drop_column(schema, t, &table, name, *if_exists, ctx)?
        }
    }
    Ok(QueryResult::command("ALTER TABLE", 0))
}

fn add_column(
    schema: &mut Schema,
    t: &mut Transaction,
    table: &Arc<Table>,
    def: &ColumnDef,
    ctx: BuildContext<'_>,
) -> Result<()> {
    if table.columns.iter().any(|c| c.name == def.name) {
        return Err(DbError::ColumnAlreadyExists {
            table: table.name.clone(),
            column: def.name.clone(),
        });
    }
    if def.primary_key {
        return Err(DbError::NotSupported(
            "adding a primary key column".to_string(),
        ));
    }
    let column = column_from_def(def, ctx)?;
    let mut updated = (**table).clone();
    updated.columns.push(column.clone());
    let position = updated.columns.len() - 1;

    for row in table.rows(t) {
        let value = if column.serial {
            Value::BigInt(updated.next_serial(t, position))
        } else {
            match &column.default {
                Some(default) => default.get(None, t)?,
                None => Value::Null,
            }
        };
        let mut values = row.values.clone();
        values.push(value);
        let values = validation::coerce_row(&updated, values)?;
        t.rows_mut(table.id)
            .insert(row.handle.id, RowData::stored(table.id, row.handle.id, values));
    }

    let mut updated = Arc::new(updated);
    if def.unique {
        let name = format!("{}_{}_key", table.name, def.name);
        ensure_index_name_free(schema, &updated, &name)?;
        let index = build_index(&updated, name, &[Expr::col(&def.name)], true, ctx)?;
        index.populate(t)?;
        Arc::make_mut(&mut updated).indexes.push(Arc::new(index));
    }
    if let Some(reference) = &def.references {
        let target: &Table = if reference.table == table.name {
            &updated
        } else {
            schema.get(&reference.table)?
        };
        let to_columns = match &reference.column {
            Some(column) => vec![column.clone()],
            None => primary_key_columns(target).ok_or_else(|| {
                DbError::Query(format!(
                    "there is no primary key for referenced table \"{}\"",
                    reference.table
                ))
            })?,
        };
        if target.unique_index_on(&to_columns).is_none() {
            return Err(DbError::Query(format!(
                "there is no unique constraint matching given keys for referenced table \"{}\"",
                reference.table
            )));
        }
        Arc::make_mut(&mut updated).relations.push(Relation {
            name: format!("{}_{}_fkey", table.name, def.name),
            columns: vec![position],
            to_table: reference.table.clone(),
            to_columns,
        });
        for row in updated.rows(t) {
            check_references(schema, &updated, &row, t)?;
        }
    }
    tracing::info!(table = %table.name, column = %def.name, "added column");
    schema.put(updated);
    Ok(())
}

fn drop_column(
    schema: &mut Schema,
    t: &mut Transaction,
    table: &Arc<Table>,
    name: &str,
    if_exists: bool,
    ctx: BuildContext<'_>,
) -> Result<()> {
    let Some(position) = table.columns.iter().position(|c| c.name == name) else {
        if if_exists {
            return Ok(());
        }
        return Err(DbError::ColumnNotFound {
            column: format!("{}.{}", table.name, name),
        });
    };
    let depended_on = schema.tables.values().any(|other| {
        other
            .relations
            .iter()
            .any(|r| r.to_table == table.name && r.to_columns.iter().any(|c| c == name))
    });
    if depended_on {
        return Err(DbError::Query(format!(
            "cannot drop column {} of table {} because other objects depend on it",
            name, table.name
        )));
    }

    let mut updated = (**table).clone();
    updated.columns.remove(position);
    updated.relations = table
        .relations
        .iter()
        .filter(|r| !r.columns.contains(&position))
        .map(|r| Relation {
            columns: r
                .columns
                .iter()
                .map(|&i| if i > position { i - 1 } else { i })
                .collect(),
            ..r.clone()
        })
        .collect();
    updated.indexes = Vec::new();

    let (dropped, kept): (Vec<_>, Vec<_>) = table.indexes.iter().partition(|index| {
        index
            .expressions
            .iter()
            .any(|e| e.used_columns().iter().any(|&(_, i)| i == position))
    });
    for index in &dropped {
        t.drop_index(index.id);
        if updated.primary_key.as_deref() == Some(index.name.as_str()) {
            updated.primary_key = None;
        }
    }

    for row in table.rows(t) {
        let mut values = row.values.clone();
        values.remove(position);
        t.rows_mut(table.id)
            .insert(row.handle.id, RowData::stored(table.id, row.handle.id, values));
    }

    let mut updated = Arc::new(updated);
    for index in kept {
        t.drop_index(index.id);
        let rebuilt = build_index(&updated, index.name.clone(), &index.definition, index.unique, ctx)?;
        rebuilt.populate(t)?;
        Arc::make_mut(&mut updated).indexes.push(Arc::new(rebuilt));
    }
    tracing::info!(
        table = %table.name,
        column = name,
        dropped_indexes = dropped.len(),
        "dropped column"
    );
    schema.put(updated);
    Ok(())
}

fn drop_table(
    schema: &mut Schema,
    t: &mut Transaction,
    name: &str,
    if_exists: bool,
) -> Result<QueryResult> {
    let table = match schema.get(name) {
        Ok(table) => table.clone(),
        Err(_) if if_exists => return Ok(QueryResult::command("DROP TABLE", 0)),
        Err(e) => return Err(e),
    };
    if let Some(child) = schema.referencing(name).first() {
        return Err(DbError::Query(format!(
            "cannot drop table {} because table {} depends on it",
            name, child.name
        )));
    }
    for index in &table.indexes {
        t.drop_index(index.id);
    }
    t.drop_rows(table.id);
    schema.remove(name)?;
    tracing::info!(table = name, "dropped table");
    Ok(QueryResult::command("DROP TABLE", 0))
}

fn drop_index(
    schema: &mut Schema,
    t: &mut Transaction,
    name: &str,
    if_exists: bool,
) -> Result<QueryResult> {
    let Some((table, index)) = schema.index_owner(name) else {
        if if_exists {
            return Ok(QueryResult::command("DROP INDEX", 0));
        }
        return Err(DbError::IndexNotFound(name.to_string()));
    };
    let (table, index) = (table.clone(), index.clone());
    if table.primary_key.as_deref() == Some(name) {
        return Err(DbError::Query(format!(
            "cannot drop index {} because constraint {} on table {} requires it",
            name, name, table.name
        )));
    }
    let references = schema.tables.values().flat_map(|other| &other.relations).any(|r| {
        r.to_table == table.name
            && index.unique
            && table.unique_index_on(&r.to_columns).map(|i| i.id) == Some(index.id)
    });
    if references {
        return Err(DbError::Query(format!(
            "cannot drop index {} because a foreign key on table {} requires it",
            name, table.name
        )));
    }
    let mut updated = (*table).clone();
    updated.indexes.retain(|i| i.id != index.id);
    t.drop_index(index.id);
    schema.put(updated);
    tracing::info!(table = %table.name, index = name, "dropped index");
    Ok(QueryResult::command("DROP INDEX", 0))
}
