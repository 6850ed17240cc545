//! Embeddable in-memory relational database engine.
//!
//! Provides a typed scalar system, a versioned persistent store with
//! fork/commit/rollback and O(1) backups, constant-folding expression
//! evaluation, index-aware selection pipelines and grouped aggregation.

pub mod aggregation;
pub mod ast;
pub mod config;
pub mod database;
pub mod error;
pub mod eval;
pub mod index;
pub mod planner;
pub mod row;
pub mod selection;
pub mod table;
pub mod transaction;
pub mod types;

pub use config::DbConfig;
pub use database::{Backup, Database, QueryResult, ResultColumn, Session};
pub use error::{DbError, Result};
pub use types::{DataType, Value};
