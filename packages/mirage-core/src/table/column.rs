//! Column definition within a table.

use crate::eval::Evaluator;
use crate::types::DataType;

/// Column definition within a table.
#[derive(Debug, Clone)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Declared type; stored values always have this type or are null
    pub data_type: DataType,
    /// Rejects nulls
    pub not_null: bool,
    /// Draws missing values from the table's sequence counter
    pub serial: bool,
    /// Value for inserts that omit the column (constant or impure)
    pub default: Option<Evaluator>,
}

impl Column {
    /// Creates a nullable column without default.
    ///
    /// # Arguments
    /// * `name` - Column name
    /// * `data_type` - Declared type
    ///
    /// # Returns
    /// A new Column instance.
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            not_null: false,
            serial: false,
            default: None,
        }
    }

    /// Name of the sequence counter backing a serial column.
    pub fn sequence_name(&self) -> String {
        format!("{}_seq", self.name)
    }
}
