//! Statement planning and execution.
//!
//! Queries become [`Selection`] trees; DML statements plan the selection
//! of their target rows and then mutate the table inside the given
//! [`Transaction`]; DDL statements rewrite the [`Schema`].

mod ddl;
mod dml;
mod select;

use crate::ast::{Expr, Statement};
use crate::config::DbConfig;
use crate::database::{QueryResult, ResultColumn};
use crate::error::{DbError, Result};
use crate::eval::{BuildContext, Evaluator};
use crate::selection::Selection;
use crate::table::{Column, Schema};
use crate::transaction::Transaction;
use crate::types::Value;

pub(crate) use ddl::execute_ddl;
pub(crate) use dml::{check_referenced, check_references};

/// Plans and runs statements against one version of the schema.
pub struct Planner<'a> {
    schema: &'a Schema,
    ctx: BuildContext<'a>,
    config: &'a DbConfig,
}

impl<'a> Planner<'a> {
    pub fn new(schema: &'a Schema, ctx: BuildContext<'a>, config: &'a DbConfig) -> Self {
        Self {
            schema,
            ctx,
            config,
        }
    }

    /// Runs a query or DML statement.
    pub fn execute(&self, t: &mut Transaction, statement: &Statement) -> Result<QueryResult> {
        match statement {
            Statement::Select(query) => self.query(t, query),
            Statement::Insert(insert) => self.insert(t, insert),
            Statement::Update(update) => self.update(t, update),
            Statement::Delete(delete) => self.delete(t, delete),
            Statement::Explain(inner) => self.explain(t, inner),
            other => Err(DbError::Internal(format!(
                "{} is not a query or data modification",
                statement_name(other)
            ))),
        }
    }

    /// Plan of a query, as returned by `EXPLAIN`.
    pub fn explain(&self, t: &Transaction, statement: &Statement) -> Result<QueryResult> {
        let Statement::Select(query) = statement else {
            return Err(DbError::NotSupported(format!(
                "EXPLAIN {}",
                statement_name(statement)
            )));
        };
        let plan = self.top_level(query)?;
        let explanation = plan.explain(t, self.config.explain_entropy);
        let rows: Vec<Vec<Value>> = explanation
            .to_string()
            .lines()
            .map(|line| vec![Value::text(line)])
            .collect();
        Ok(QueryResult {
            command: "EXPLAIN".to_string(),
            columns: vec![ResultColumn {
                name: "QUERY PLAN".to_string(),
                data_type: crate::types::DataType::Text,
            }],
            row_count: rows.len(),
            rows,
            plan: Some(explanation),
        })
    }

    fn query(&self, t: &Transaction, query: &crate::ast::Query) -> Result<QueryResult> {
        let plan = self.top_level(query)?;
        let rows = plan
            .rows(t)?
            .iter()
            .map(|row| plan.values_of(row, t))
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(plan = plan.kind_name(), rows = rows.len(), "select");
        Ok(QueryResult {
            command: "SELECT".to_string(),
            columns: result_columns(&plan),
            row_count: rows.len(),
            rows,
            plan: None,
        })
    }

    /// Query plan with the configured row cap applied.
    fn top_level(&self, query: &crate::ast::Query) -> Result<Selection> {
        let plan = self.plan_query(query)?;
        match (&query.limit, self.config.default_limit) {
            (None, Some(limit)) => Ok(plan.limit(Some(limit), 0)),
            _ => Ok(plan),
        }
    }

    /// Evaluates an expression that reads no columns.
    fn constant(&self, expr: &Expr, clause: &'static str, t: &Transaction) -> Result<Value> {
        let unit = Selection::unit();
        let node = crate::eval::ExpressionBuilder::new(&unit, self.ctx)
            .clause(clause)
            .build(expr)?;
        node.get(None, t)
    }
}

/// Output columns of a selection.
pub(crate) fn result_columns(selection: &Selection) -> Vec<ResultColumn> {
    selection
        .columns()
        .iter()
        .map(|c| ResultColumn {
            name: c.name.clone(),
            data_type: c.evaluator.data_type().clone(),
        })
        .collect()
}

/// Converts a value stored into `column`: implicit conversions, untyped
/// literals and numeric narrowing are allowed.
pub(crate) fn assignment(node: Evaluator, column: &Column) -> Result<Evaluator> {
    let ty = &column.data_type;
    if node.is_untyped() || node.data_type().can_convert_implicit(ty) {
        return node.convert_implicit(ty);
    }
    if node.data_type().is_numeric() && ty.is_numeric() {
        return node.cast(ty);
    }
    Err(DbError::cast(node.data_type(), ty))
}

pub(crate) fn is_ddl(statement: &Statement) -> bool {
    matches!(
        statement,
        Statement::CreateTable(_)
            | Statement::CreateIndex(_)
            | Statement::AlterTable(_)
            | Statement::DropTable { .. }
            | Statement::DropIndex { .. }
    )
}

pub(crate) fn statement_name(statement: &Statement) -> &'static str {
    match statement {
        Statement::CreateTable(_) => "CREATE TABLE",
        Statement::CreateIndex(_) => "CREATE INDEX",
        Statement::AlterTable(_) => "ALTER TABLE",
        Statement::DropTable { .. } => "DROP TABLE",
        Statement::DropIndex { .. } => "DROP INDEX",
        Statement::Insert(_) => "INSERT",
        Statement::Update(_) => "UPDATE",
        Statement::Delete(_) => "DELETE",
        Statement::Select(_) => "SELECT",
        Statement::Explain(_) => "EXPLAIN",
        Statement::Begin => "BEGIN",
        Statement::Commit => "COMMIT",
        Statement::Rollback => "ROLLBACK",
    }
}
