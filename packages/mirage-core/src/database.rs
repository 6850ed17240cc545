//! Database container: schema, committed state, sessions and backups.

use std::sync::{Arc, Mutex, RwLock};

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::ast::Statement;
use crate::config::DbConfig;
use crate::error::{DbError, Result};
use crate::eval::{BuildContext, ExpressionCache, FunctionDefinition, FunctionRegistry};
use crate::planner::{execute_ddl, is_ddl, statement_name, Planner};
use crate::selection::Explanation;
use crate::table::{Schema, Table};
use crate::transaction::{Transaction, TransactionHandle};
use crate::types::{DataType, Value};

/// Name and type of a result column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultColumn {
    pub name: String,
    pub data_type: DataType,
}

/// Outcome of one statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// Command tag (`SELECT`, `INSERT`, `CREATE TABLE`, ...)
    pub command: String,
    pub columns: Vec<ResultColumn>,
    pub rows: Vec<Vec<Value>>,
    /// Rows returned by a query or affected by a data modification
    pub row_count: usize,
    /// Plan tree of an `EXPLAIN`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Explanation>,
}

impl QueryResult {
    /// Result without rows.
    pub fn command(command: &str, row_count: usize) -> Self {
        Self {
            command: command.to_string(),
            columns: Vec::new(),
            rows: Vec::new(),
            row_count,
            plan: None,
        }
    }

    /// Position of the column named `name`.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Values of column `name`, one per row.
    pub fn values(&self, name: &str) -> Option<Vec<Value>> {
        let position = self.column(name)?;
        Some(self.rows.iter().map(|r| r[position].clone()).collect())
    }

    /// First value of the first row.
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|r| r.first())
    }
}

/// O(1) snapshot of the committed state.
///
/// Only restorable while the schema is unchanged.
#[derive(Debug, Clone)]
pub struct Backup {
    snapshot: Arc<Transaction>,
    schema_version: u64,
}

impl Backup {
    pub fn schema_version(&self) -> u64 {
        self.schema_version
    }
}

/// In-memory relational database.
pub struct Database {
    config: DbConfig,
    schema: RwLock<Schema>,
    /// Latest committed state
    committed: ArcSwap<Transaction>,
    /// Serializes publication into `committed`
    publish_lock: Mutex<()>,
    functions: RwLock<FunctionRegistry>,
    cache: Option<ExpressionCache>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .field("committed", &self.committed.load())
            .finish()
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    /// Creates an empty database with the default configuration.
    pub fn new() -> Self {
        Self::with_config(DbConfig::default())
    }

    /// Creates an empty database.
    ///
    /// # Arguments
    /// * `config` - Database configuration
    ///
    /// # Returns
    /// A database with the built-in functions registered and no tables.
    pub fn with_config(config: DbConfig) -> Self {
        let cache = ExpressionCache::with_capacity(config.expression_cache_capacity);
        Self {
            config,
            schema: RwLock::new(Schema::new()),
            committed: ArcSwap::from_pointee(Transaction::new()),
            publish_lock: Mutex::new(()),
            functions: RwLock::new(FunctionRegistry::with_builtins()),
            cache,
        }
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Opens a session for multi-statement transactions.
    pub fn session(&self) -> Session<'_> {
        Session {
            db: self,
            open: None,
        }
    }

    /// Executes one statement in its own transaction.
    ///
    /// # Arguments
    /// * `statement` - Statement to execute; `BEGIN`, `COMMIT` and
    ///   `ROLLBACK` need a [`Session`]
    ///
    /// # Returns
    /// `Result<QueryResult>` containing the rows or the affected row count.
    pub fn execute(&self, statement: &Statement) -> Result<QueryResult> {
        match statement {
            Statement::Begin | Statement::Commit | Statement::Rollback => Err(
                DbError::NotSupported(format!("{} outside of a session", statement_name(statement))),
            ),
            _ => self.session().execute(statement),
        }
    }

    /// Gets a table definition.
    pub fn get_table(&self, name: &str) -> Result<Arc<Table>> {
        let schema = self.schema.read().map_err(|_| DbError::LockPoisoned)?;
        schema.get(name).cloned()
    }

    /// Lists all table names in order.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let schema = self.schema.read().map_err(|_| DbError::LockPoisoned)?;
        Ok(schema.tables.keys().cloned().collect())
    }

    pub fn schema_version(&self) -> Result<u64> {
        let schema = self.schema.read().map_err(|_| DbError::LockPoisoned)?;
        Ok(schema.version)
    }

    /// Latest committed state.
    pub fn snapshot(&self) -> Arc<Transaction> {
        self.committed.load_full()
    }

    /// Registers a scalar function overload.
    pub fn register_function(&self, definition: FunctionDefinition) -> Result<()> {
        let mut functions = self.functions.write().map_err(|_| DbError::LockPoisoned)?;
        tracing::info!(function = %definition.signature(), "registered function");
        functions.register(definition);
        if let Some(cache) = &self.cache {
            cache.clear();
        }
        Ok(())
    }

    /// Marks a table read-only; every later mutation of it fails.
    pub fn freeze_table(&self, name: &str) -> Result<()> {
        let mut schema = self.schema.write().map_err(|_| DbError::LockPoisoned)?;
        let mut table = (**schema.get(name)?).clone();
        table.read_only = true;
        schema.put(table);
        tracing::info!(table = name, "table frozen");
        Ok(())
    }

    /// Captures the committed state in O(1).
    pub fn backup(&self) -> Result<Backup> {
        let schema = self.schema.read().map_err(|_| DbError::LockPoisoned)?;
        Ok(Backup {
            snapshot: self.committed.load_full(),
            schema_version: schema.version,
        })
    }

    /// Replaces the committed state with a backup's.
    ///
    /// Fails with [`DbError::StaleBackup`] if the schema changed since the
    /// backup was taken.
    pub fn restore(&self, backup: &Backup) -> Result<()> {
        let schema = self.schema.read().map_err(|_| DbError::LockPoisoned)?;
        if schema.version != backup.schema_version {
            tracing::error!(
                captured = backup.schema_version,
                current = schema.version,
                "stale backup"
            );
            return Err(DbError::StaleBackup {
                captured: backup.schema_version,
                current: schema.version,
            });
        }
        let _guard = self.publish_lock.lock().map_err(|_| DbError::LockPoisoned)?;
        let mut current = (*self.committed.load_full()).clone();
        current.restore_from(&backup.snapshot);
        self.committed.store(Arc::new(current));
        tracing::info!(schema_version = schema.version, "restored backup");
        Ok(())
    }

    /// Publishes a fork of the committed state.
    fn publish(&self, fork: Transaction) -> Result<()> {
        let _guard = self.publish_lock.lock().map_err(|_| DbError::LockPoisoned)?;
        let mut parent = (*self.committed.load_full()).clone();
        fork.commit(&mut parent)?;
        self.committed.store(Arc::new(parent));
        Ok(())
    }

    /// Runs a query or DML statement against `t`.
    fn run(&self, t: &mut Transaction, statement: &Statement) -> Result<QueryResult> {
        let schema = self.schema.read().map_err(|_| DbError::LockPoisoned)?;
        let functions = self.functions.read().map_err(|_| DbError::LockPoisoned)?;
        let ctx = BuildContext {
            functions: &functions,
            cache: self.cache.as_ref(),
            epoch: schema.version,
        };
        tracing::debug!(statement = statement_name(statement), transaction = t.id(), "execute");
        Planner::new(&schema, ctx, &self.config).execute(t, statement)
    }

    /// Runs a statement in a fork of the committed state, publishing its
    /// writes.
    fn autocommit(&self, statement: &Statement) -> Result<QueryResult> {
        let mut fork = self.committed.load().fork();
        let result = match self.run(&mut fork, statement) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    statement = statement_name(statement),
                    error = %e,
                    "statement failed, rolling back"
                );
                fork.rollback();
                return Err(e);
            }
        };
        if fork.version() == 0 {
            fork.rollback();
        } else {
            self.publish(fork)?;
        }
        Ok(result)
    }

    /// Applies a schema change and the row rewrite it implies.
    fn run_ddl(&self, statement: &Statement) -> Result<QueryResult> {
        let mut schema = self.schema.write().map_err(|_| DbError::LockPoisoned)?;
        let functions = self.functions.read().map_err(|_| DbError::LockPoisoned)?;
        let mut next = schema.clone();
        let mut fork = self.committed.load().fork();
        let result = execute_ddl(&mut next, &mut fork, statement, BuildContext::new(&functions))?;
        self.publish(fork)?;
        if next.version != schema.version {
            *schema = next;
            if let Some(cache) = &self.cache {
                cache.clear();
            }
        }
        Ok(result)
    }
}

struct OpenTransaction {
    transaction: Transaction,
    schema_version: u64,
}

/// Connection-like handle running statements, optionally inside an
/// explicit transaction.
///
/// An open transaction is rolled back when the session is dropped.
pub struct Session<'db> {
    db: &'db Database,
    open: Option<OpenTransaction>,
}

impl Session<'_> {
    pub fn in_transaction(&self) -> bool {
        self.open.is_some()
    }

    /// Executes one statement.
    ///
    /// Inside a transaction every statement runs in its own fork (see
    /// [`DbConfig::statement_forks`]), so a failing statement leaves the
    /// transaction as it was.
    pub fn execute(&mut self, statement: &Statement) -> Result<QueryResult> {
        match statement {
            Statement::Begin => self.begin(),
            Statement::Commit => self.commit(),
            Statement::Rollback => {
                match self.open.take() {
                    Some(open) => open.transaction.rollback(),
                    None => tracing::warn!("there is no transaction in progress"),
                }
                Ok(QueryResult::command("ROLLBACK", 0))
            }
            s if is_ddl(s) => {
                if self.open.is_some() {
                    return Err(DbError::NotSupported(format!(
                        "{} inside a transaction",
                        statement_name(s)
                    )));
                }
                self.db.run_ddl(s)
            }
            s => match &mut self.open {
                Some(open) => {
                    let current = self.db.schema_version()?;
                    if current != open.schema_version {
                        return Err(DbError::TransactionConflict(format!(
                            "schema changed since the transaction began (version {} -> {})",
                            open.schema_version, current
                        )));
                    }
                    if !self.db.config.statement_forks {
                        return self.db.run(&mut open.transaction, s);
                    }
                    let mut handle = TransactionHandle::fork(&mut open.transaction);
                    let result = self.db.run(handle.transaction_mut(), s)?;
                    handle.commit()?;
                    Ok(result)
                }
                None => self.db.autocommit(s),
            },
        }
    }

    /// Executes statements in order, stopping at the first error.
    pub fn execute_all(&mut self, statements: &[Statement]) -> Result<Vec<QueryResult>> {
        statements.iter().map(|s| self.execute(s)).collect()
    }

    fn begin(&mut self) -> Result<QueryResult> {
        if self.open.is_some() {
            return Err(DbError::Query(
                "there is already a transaction in progress".to_string(),
            ));
        }
        let schema_version = self.db.schema_version()?;
        let transaction = self.db.committed.load().fork();
        tracing::debug!(transaction = transaction.id(), "begin");
        self.open = Some(OpenTransaction {
            transaction,
            schema_version,
        });
        Ok(QueryResult::command("BEGIN", 0))
    }

    fn commit(&mut self) -> Result<QueryResult> {
        match self.open.take() {
            Some(open) => {
                tracing::debug!(transaction = open.transaction.id(), "commit");
                self.db.publish(open.transaction)?;
            }
            None => tracing::warn!("there is no transaction in progress"),
        }
        Ok(QueryResult::command("COMMIT", 0))
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if let Some(open) = self.open.take() {
            tracing::warn!(
                transaction = open.transaction.id(),
                "session closed with an open transaction, rolling back"
            );
            open.transaction.rollback();
        }
    }
}
