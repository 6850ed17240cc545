//! Database error types.

use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, DbError>;

/// Database operation errors.
///
/// Most variants are user-facing query errors. The variants listed by
/// [`DbError::is_fatal`] report broken engine invariants and must not be
/// retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    /// Table not found
    #[error("relation \"{table}\" does not exist")]
    TableNotFound { table: String },

    /// Table already exists
    #[error("relation \"{0}\" already exists")]
    TableAlreadyExists(String),

    /// Column not found in the current scope
    #[error("column \"{column}\" does not exist")]
    ColumnNotFound { column: String },

    /// Column already exists in table
    #[error("column \"{column}\" of relation \"{table}\" already exists")]
    ColumnAlreadyExists { table: String, column: String },

    /// Column name matches several columns of the scope
    #[error("column reference \"{column}\" is ambiguous")]
    AmbiguousColumn { column: String },

    /// Index not found
    #[error("index \"{0}\" does not exist")]
    IndexNotFound(String),

    /// Index already exists
    #[error("relation \"{0}\" already exists")]
    IndexAlreadyExists(String),

    /// Value or expression cannot be converted between types
    #[error("cannot cast type {from} to {to}")]
    Cast { from: String, to: String },

    /// Text could not be parsed as the requested type
    #[error("invalid input syntax for type {ty}: \"{value}\"")]
    InvalidValue { ty: String, value: String },

    /// No operator accepts the operand types
    #[error("operator does not exist: {0}")]
    OperatorNotFound(String),

    /// No function overload matches the argument types
    #[error("function {0} does not exist")]
    FunctionNotFound(String),

    /// Several overloads match equally well
    #[error("function {0} is not unique")]
    AmbiguousFunction(String),

    /// Column used outside of an aggregate in a grouped query
    #[error("column \"{0}\" must appear in the GROUP BY clause or be used in an aggregate function")]
    NotGrouped(String),

    /// Aggregate used where only scalar expressions are allowed
    #[error("aggregate functions are not allowed in {0}")]
    AggregateNotAllowed(String),

    /// Not-null constraint violated
    #[error("null value in column \"{column}\" of relation \"{table}\" violates not-null constraint")]
    NotNullViolation { table: String, column: String },

    /// Unique or primary key constraint violated
    #[error("duplicate key value violates unique constraint \"{constraint}\": {key}")]
    UniqueViolation { constraint: String, key: String },

    /// Foreign key constraint violated
    #[error("{operation} on table \"{table}\" violates foreign key constraint \"{constraint}\"")]
    ForeignKeyViolation {
        operation: &'static str,
        table: String,
        constraint: String,
    },

    /// Mutation of a read-only relation
    #[error("permission denied for relation {0}")]
    ReadOnly(String),

    /// Integer or float division by zero
    #[error("division by zero")]
    DivisionByZero,

    /// Numeric overflow
    #[error("{0} out of range")]
    OutOfRange(String),

    /// Any other SQL-semantic error
    #[error("{0}")]
    Query(String),

    /// Recognized but intentionally unimplemented feature
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Commit onto a parent that changed since the fork
    #[error("transaction conflict: {0}")]
    TransactionConflict(String),

    /// Expression mixes columns of un-joined selections
    #[error("expression references columns from several un-joined selections")]
    MultiOrigin,

    /// Backup captured under an older schema
    #[error("cannot restore backup taken at schema version {captured} (current: {current})")]
    StaleBackup { captured: u64, current: u64 },

    /// Lock poisoned (RwLock poisoned)
    #[error("lock poisoned")]
    LockPoisoned,

    /// Any other broken engine invariant
    #[error("internal error: {0}")]
    Internal(String),
}

impl DbError {
    /// Whether this error reports a broken invariant rather than a bad query.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DbError::TransactionConflict(_)
                | DbError::MultiOrigin
                | DbError::StaleBackup { .. }
                | DbError::LockPoisoned
                | DbError::Internal(_)
        )
    }

    pub(crate) fn cast(from: impl ToString, to: impl ToString) -> Self {
        DbError::Cast {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub(crate) fn invalid(ty: impl ToString, value: impl ToString) -> Self {
        DbError::InvalidValue {
            ty: ty.to_string(),
            value: value.to_string(),
        }
    }
}
