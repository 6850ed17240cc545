//! Validation of row values against a table schema.

use crate::error::{DbError, Result};
use crate::types::{cast_value, Value};

use super::table::Table;

/// Coerces `values` to the column types and enforces not-null constraints.
///
/// # Arguments
/// * `table` - Table whose columns define the row shape
/// * `values` - One value per column
///
/// # Returns
/// `Result<Vec<Value>>` with every value of its column's type, or null.
pub(crate) fn coerce_row(table: &Table, values: Vec<Value>) -> Result<Vec<Value>> {
    if values.len() != table.columns.len() {
        return Err(DbError::Internal(format!(
            "{} values for the {} columns of {}",
            values.len(),
            table.columns.len(),
            table.name
        )));
    }
    table
        .columns
        .iter()
        .zip(values)
        .map(|(column, value)| {
            if value.is_null() {
                if column.not_null {
                    return Err(DbError::NotNullViolation {
                        table: table.name.clone(),
                        column: column.name.clone(),
                    });
                }
                return Ok(Value::Null);
            }
            if value.data_type() == column.data_type {
                Ok(value)
            } else {
                cast_value(value, &column.data_type)
            }
        })
        .collect()
}
