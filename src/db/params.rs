//! Parameter binding utilities for database queries.
//!
//! Binds positional [`Value`]s to queries on the `Any` driver. When the
//! backend reports parameter types for a prepared statement (PostgreSQL
//! does), each value is encoded as that type: the server reuses the cached
//! statement and rejects a binary payload of another width, e.g. an `int8`
//! sent to an `int4` parameter.

use crate::error::{DbError, DbResult};
use crate::models::Value;
use sqlx::Any;
use sqlx::any::{AnyArguments, AnyTypeInfoKind};
use sqlx::query::Query;

/// A value narrowed to the wire type of its parameter.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Param {
    Null,
    Bool(bool),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Real(f32),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
}

/// Encode `value` for a parameter of type `kind`. Without a reported type the
/// value keeps its natural width.
pub(crate) fn coerce(value: &Value, kind: Option<AnyTypeInfoKind>) -> Result<Param, String> {
    use AnyTypeInfoKind as K;

    let param = match (value, kind) {
        (Value::Null, _) => Param::Null,

        (Value::Bool(v), Some(K::SmallInt)) => Param::SmallInt(i16::from(*v)),
        (Value::Bool(v), Some(K::Integer)) => Param::Integer(i32::from(*v)),
        (Value::Bool(v), Some(K::BigInt)) => Param::BigInt(i64::from(*v)),
        (Value::Bool(v), _) => Param::Bool(*v),

        (Value::Int(v), Some(K::SmallInt)) => Param::SmallInt(
            i16::try_from(*v).map_err(|_| format!("{} out of range for SMALLINT", v))?,
        ),
        (Value::Int(v), Some(K::Integer)) => Param::Integer(
            i32::try_from(*v).map_err(|_| format!("{} out of range for INTEGER", v))?,
        ),
        (Value::Int(v), Some(K::Real)) => Param::Real(*v as f32),
        (Value::Int(v), Some(K::Double)) => Param::Double(*v as f64),
        (Value::Int(v), Some(K::Bool)) => Param::Bool(*v != 0),
        (Value::Int(v), Some(K::Text)) => Param::Text(v.to_string()),
        (Value::Int(v), _) => Param::BigInt(*v),

        (Value::Float(v), Some(K::Real)) => Param::Real(*v as f32),
        (Value::Float(v), Some(K::Text)) => Param::Text(v.to_string()),
        (Value::Float(v), _) => Param::Double(*v),

        (Value::Text(v), _) => Param::Text(v.clone()),
        (Value::Bytes(v), _) => Param::Bytes(v.clone()),
    };
    Ok(param)
}

fn bind_param<'q>(
    query: Query<'q, Any, AnyArguments<'q>>,
    param: Param,
) -> Query<'q, Any, AnyArguments<'q>> {
    match param {
        Param::Null => query.bind(None::<String>),
        Param::Bool(v) => query.bind(v),
        Param::SmallInt(v) => query.bind(v),
        Param::Integer(v) => query.bind(v),
        Param::BigInt(v) => query.bind(v),
        Param::Real(v) => query.bind(v),
        Param::Double(v) => query.bind(v),
        Param::Text(v) => query.bind(v),
        Param::Bytes(v) => query.bind(v),
    }
}

/// Bind every parameter in order, encoding each as its reported type.
///
/// `kinds` may be shorter than `values` (or empty) when the backend does
/// not report parameter types.
pub(crate) fn bind_all<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    values: &[Value],
    kinds: &[AnyTypeInfoKind],
) -> DbResult<Query<'q, Any, AnyArguments<'q>>> {
    for (index, value) in values.iter().enumerate() {
        let param = coerce(value, kinds.get(index).copied()).map_err(|e| {
            DbError::invalid_input(format!("Parameter {}: {}", index + 1, e))
        })?;
        query = bind_param(query, param);
    }
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_narrowed_to_reported_width() {
        assert_eq!(
            coerce(&Value::Int(7), Some(AnyTypeInfoKind::Integer)),
            Ok(Param::Integer(7))
        );
        assert_eq!(
            coerce(&Value::Int(7), Some(AnyTypeInfoKind::SmallInt)),
            Ok(Param::SmallInt(7))
        );
        assert_eq!(
            coerce(&Value::Int(7), Some(AnyTypeInfoKind::BigInt)),
            Ok(Param::BigInt(7))
        );
    }

    #[test]
    fn test_int_without_reported_type_keeps_width() {
        assert_eq!(coerce(&Value::Int(7), None), Ok(Param::BigInt(7)));
        assert_eq!(coerce(&Value::Float(1.5), None), Ok(Param::Double(1.5)));
    }

    #[test]
    fn test_int_out_of_range_for_parameter() {
        let err = coerce(&Value::Int(i64::from(i32::MAX) + 1), Some(AnyTypeInfoKind::Integer))
            .unwrap_err();
        assert!(err.contains("out of range for INTEGER"));
        assert!(coerce(&Value::Int(40_000), Some(AnyTypeInfoKind::SmallInt)).is_err());
    }

    #[test]
    fn test_cross_kind_conversions() {
        assert_eq!(
            coerce(&Value::Float(2.5), Some(AnyTypeInfoKind::Real)),
            Ok(Param::Real(2.5))
        );
        assert_eq!(
            coerce(&Value::Int(3), Some(AnyTypeInfoKind::Double)),
            Ok(Param::Double(3.0))
        );
        assert_eq!(
            coerce(&Value::Int(42), Some(AnyTypeInfoKind::Text)),
            Ok(Param::Text("42".to_string()))
        );
        assert_eq!(
            coerce(&Value::Bool(true), Some(AnyTypeInfoKind::Integer)),
            Ok(Param::Integer(1))
        );
        assert_eq!(
            coerce(&Value::Null, Some(AnyTypeInfoKind::Integer)),
            Ok(Param::Null)
        );
    }
}
