//! Scalar type system: data types, values, casting and implicit conversion.

mod cast;
mod data_type;
mod interval;
mod reconcile;
mod value;

pub use cast::{cast_value, parse_text};
pub use data_type::DataType;
pub use interval::Interval;
pub use reconcile::reconcile_types;
pub use value::{PathValue, Point, Value};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use chrono::NaiveDate;
    use ntest::timeout;
    use std::sync::Arc;

    #[timeout(1000)]
    #[test]
    fn test_three_valued_comparisons() {
        let ty = DataType::Integer;
        assert_eq!(ty.equals(&Value::Integer(1), &Value::Integer(1)), Some(true));
        assert_eq!(ty.equals(&Value::Integer(1), &Value::Null), None);
        assert_eq!(ty.lt(&Value::Integer(1), &Value::Integer(2)), Some(true));
        assert_eq!(ty.gt(&Value::Null, &Value::Integer(2)), None);
    }

    #[timeout(1000)]
    #[test]
    fn test_numeric_equality_across_widths() {
        assert_eq!(Value::Integer(3), Value::BigInt(3));
        assert_eq!(Value::BigInt(3), Value::float(3.0));
        assert!(Value::Integer(2) < Value::float(2.5));
    }

    #[timeout(1000)]
    #[test]
    fn test_large_bigints_compare_exactly_with_floats() {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let hash = |v: &Value| {
            let mut h = DefaultHasher::new();
            v.hash(&mut h);
            h.finish()
        };
        let exact = Value::BigInt(1 << 53);
        let next = Value::BigInt((1 << 53) + 1);
        let float = Value::float(9_007_199_254_740_992.0);
        assert_eq!(exact, float);
        assert_eq!(hash(&exact), hash(&float));
        assert_ne!(next, float);
        assert!(next > float);
        assert!(Value::BigInt(i64::MAX) < Value::float(9.3e18));
        assert!(Value::BigInt(i64::MIN) > Value::float(-9.3e18));
        assert!(Value::BigInt(-3) < Value::float(-2.5));
        assert!(Value::BigInt(i64::MAX) < Value::float(f64::NAN));
    }

    #[timeout(1000)]
    #[test]
    fn test_nulls_sort_last() {
        let mut values = vec![Value::Null, Value::Integer(2), Value::Integer(1)];
        values.sort();
        assert_eq!(values, vec![Value::Integer(1), Value::Integer(2), Value::Null]);
    }

    #[timeout(1000)]
    #[test]
    fn test_path_equality_is_always_true() {
        let a = Value::Path(Arc::new(PathValue {
            closed: false,
            points: vec![Point::new(0.0, 0.0)],
        }));
        let b = Value::Path(Arc::new(PathValue {
            closed: true,
            points: vec![Point::new(1.0, 1.0), Point::new(2.0, 2.0)],
        }));
        assert_eq!(DataType::Path.equals(&a, &b), Some(true));
    }

    #[timeout(1000)]
    #[test]
    fn test_cast_text_to_scalars() {
        let text = DataType::Text;
        assert_eq!(
            text.cast(Value::text(" 42 "), &DataType::Integer).unwrap(),
            Value::Integer(42)
        );
        assert_eq!(
            text.cast(Value::text("yes"), &DataType::Bool).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            text.cast(Value::text("2024-02-29"), &DataType::Date).unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert_eq!(
            text.cast(Value::text("{1,2,NULL}"), &DataType::Integer.array_of())
                .unwrap(),
            Value::array(vec![Value::Integer(1), Value::Integer(2), Value::Null])
        );
    }

    #[timeout(1000)]
    #[test]
    fn test_cast_errors_name_both_types() {
        let err = DataType::Bool.cast(Value::Bool(true), &DataType::Date).unwrap_err();
        assert_eq!(
            err,
            DbError::Cast {
                from: "boolean".into(),
                to: "date".into()
            }
        );
        let err = DataType::Text
            .cast(Value::text("abc"), &DataType::Integer)
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidValue { .. }));
    }

    #[timeout(1000)]
    #[test]
    fn test_integer_narrowing_checks_range() {
        let err = DataType::BigInt
            .cast(Value::BigInt(i64::MAX), &DataType::Integer)
            .unwrap_err();
        assert!(matches!(err, DbError::OutOfRange(_)));
        assert_eq!(
            DataType::Float.cast(Value::float(2.6), &DataType::Integer).unwrap(),
            Value::Integer(3)
        );
    }

    #[timeout(1000)]
    #[test]
    fn test_implicit_conversion_rules() {
        assert!(DataType::Integer.can_convert_implicit(&DataType::BigInt));
        assert!(!DataType::BigInt.can_convert_implicit(&DataType::Integer));
        assert!(DataType::Null.can_convert_implicit(&DataType::Jsonb));
        assert!(!DataType::Integer.can_convert_implicit(&DataType::Text));
        assert!(DataType::Integer.can_cast(&DataType::Text));
    }

    #[timeout(1000)]
    #[test]
    fn test_interval_parse_and_display() {
        let interval = Interval::parse("1 day 2 hours").unwrap();
        assert_eq!(interval.days, 1);
        assert_eq!(interval.to_string(), "1 day 02:00:00");
        assert_eq!(Interval::parse("01:30").unwrap().micros, 90 * 60 * 1_000_000);
        assert!(Interval::parse("soon").is_none());
    }

    #[timeout(1000)]
    #[test]
    fn test_array_display_quotes_elements() {
        let value = Value::array(vec![Value::text("a b"), Value::Null, Value::text("c")]);
        assert_eq!(value.to_string(), "{\"a b\",NULL,c}");
    }
}
