//! Common-type resolution for operators, `IN`, `UNION` and `CASE`.

use crate::error::{DbError, Result};

use super::data_type::DataType;

/// Reconciles a list of types to their most general common type.
///
/// Types are folded pairwise through [`DataType::prefer`]; the first
/// incompatible pair fails with a cast error naming both types. An empty
/// list (or a list of bare nulls) reconciles to `text`, as untyped literals
/// do in postgres.
pub fn reconcile_types<'a>(types: impl IntoIterator<Item = &'a DataType>) -> Result<DataType> {
    let mut current = DataType::Null;
    for ty in types {
        current = current
            .prefer(ty)
            .ok_or_else(|| DbError::cast(ty, &current))?;
    }
    if current == DataType::Null {
        return Ok(DataType::Text);
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widens_numerics() {
        let ty = reconcile_types(&[DataType::Integer, DataType::BigInt]).unwrap();
        assert_eq!(ty, DataType::BigInt);
        let ty = reconcile_types(&[DataType::BigInt, DataType::Float, DataType::Integer]).unwrap();
        assert_eq!(ty, DataType::Float);
    }

    #[test]
    fn null_promotes_to_anything() {
        let ty = reconcile_types(&[DataType::Null, DataType::Date]).unwrap();
        assert_eq!(ty, DataType::Date);
        assert_eq!(reconcile_types(&[DataType::Null]).unwrap(), DataType::Text);
    }

    #[test]
    fn rejects_integer_and_text() {
        let err = reconcile_types(&[DataType::Integer, DataType::Text]).unwrap_err();
        assert!(matches!(err, DbError::Cast { .. }));
    }

    #[test]
    fn arrays_reconcile_element_wise() {
        let ty = reconcile_types(&[
            DataType::Integer.array_of(),
            DataType::Float.array_of(),
        ])
        .unwrap();
        assert_eq!(ty, DataType::Float.array_of());
    }
}
