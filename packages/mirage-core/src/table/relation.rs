//! Foreign key relation between tables.

/// Foreign key relation between tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// Constraint name
    pub name: String,
    /// Referencing column positions in the source table
    pub columns: Vec<usize>,
    /// Name of the referenced table
    pub to_table: String,
    /// Referenced column names in the target table
    pub to_columns: Vec<String>,
}
