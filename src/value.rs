//! Value conversion between SeaQuery and may_postgres.
//!
//! Bind values travel through the crate as `sea_query::Value`. This module
//! turns them into `ToSql` trait objects for `may_postgres`, decodes result
//! rows back into `Value`s, and answers the "is this the zero value" question
//! used by inserts and the empty-filter guard.

use crate::executor::EngineError;
use crate::row::Row;
use bytes::BytesMut;
use may_postgres::types::ToSql;
use postgres_types::{to_sql_checked, IsNull, Type};
use sea_query::Value;
use std::error::Error as StdError;

/// Integer bind that adapts to the parameter type the server declared.
///
/// A `sea_query::Value::BigInt` bound against an `integer` column would be
/// rejected by the wire protocol, so the width is chosen at bind time.
#[derive(Debug, Clone, Copy)]
struct FlexInt(i64);

impl ToSql for FlexInt {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        match *ty {
            Type::INT2 => i16::try_from(self.0)?.to_sql(ty, out),
            Type::INT4 => i32::try_from(self.0)?.to_sql(ty, out),
            _ => self.0.to_sql(ty, out),
        }
    }

    fn accepts(ty: &Type) -> bool {
        matches!(*ty, Type::INT2 | Type::INT4 | Type::INT8)
    }

    to_sql_checked!();
}

fn int_param(v: Option<i64>) -> Box<dyn ToSql> {
    Box::new(v.map(FlexInt))
}

fn to_param(value: &Value) -> Result<Box<dyn ToSql>, EngineError> {
    let param: Box<dyn ToSql> = match value {
        Value::Bool(v) => Box::new(*v),
        Value::TinyInt(v) => int_param(v.map(i64::from)),
        Value::SmallInt(v) => int_param(v.map(i64::from)),
        Value::Int(v) => int_param(v.map(i64::from)),
        Value::BigInt(v) => int_param(*v),
        Value::TinyUnsigned(v) => int_param(v.map(i64::from)),
        Value::SmallUnsigned(v) => int_param(v.map(i64::from)),
        Value::Unsigned(v) => int_param(v.map(i64::from)),
        Value::BigUnsigned(v) => {
            let v = v
                .map(|u| {
                    i64::try_from(u).map_err(|_| {
                        EngineError::Other(format!(
                            "BigUnsigned value {} exceeds i64::MAX ({}), cannot be safely cast to i64",
                            u,
                            i64::MAX
                        ))
                    })
                })
                .transpose()?;
            int_param(v)
        }
        Value::Float(v) => Box::new(*v),
        Value::Double(v) => Box::new(*v),
        Value::String(v) => Box::new(v.clone()),
        Value::Char(v) => Box::new(v.map(|c| c.to_string())),
        Value::Bytes(v) => Box::new(v.clone()),
        Value::Json(v) => Box::new(v.as_ref().map(|j| {
            let j: &serde_json::Value = j;
            j.clone()
        })),
        Value::ChronoDate(v) => Box::new(v.as_ref().map(|d| {
            let d: &chrono::NaiveDate = d;
            *d
        })),
        Value::ChronoTime(v) => Box::new(v.as_ref().map(|t| {
            let t: &chrono::NaiveTime = t;
            *t
        })),
        Value::ChronoDateTime(v) => Box::new(v.as_ref().map(|t| {
            let t: &chrono::NaiveDateTime = t;
            *t
        })),
        Value::ChronoDateTimeUtc(v) => Box::new(v.as_ref().map(|t| {
            let t: &chrono::DateTime<chrono::Utc> = t;
            *t
        })),
        Value::ChronoDateTimeWithTimeZone(v) => Box::new(v.as_ref().map(|t| {
            let t: &chrono::DateTime<chrono::FixedOffset> = t;
            *t
        })),
        Value::Uuid(v) => Box::new(v.as_ref().map(|u| {
            let u: &uuid::Uuid = u;
            *u
        })),
        Value::Decimal(v) => Box::new(v.as_ref().map(|d| {
            let d: &rust_decimal::Decimal = d;
            *d
        })),
        _ => {
            return Err(EngineError::Other(format!(
                "Unsupported value type in query: {:?}",
                value
            )));
        }
    };
    Ok(param)
}

/// Convert SeaQuery values to may_postgres `ToSql` parameters and run `f` with them.
///
/// # Errors
///
/// Returns `EngineError::Other` if an unsupported value type is encountered.
pub fn with_converted_params<F, R>(values: &[Value], f: F) -> Result<R, EngineError>
where
    F: FnOnce(&[&dyn ToSql]) -> Result<R, EngineError>,
{
    let owned = values
        .iter()
        .map(to_param)
        .collect::<Result<Vec<_>, _>>()?;
    let params: Vec<&dyn ToSql> = owned.iter().map(|p| &**p).collect();
    f(&params)
}

fn column_value(row: &may_postgres::Row, idx: usize, ty: &Type) -> Result<Value, EngineError> {
    let value = match *ty {
        Type::BOOL => Value::from(row.try_get::<_, Option<bool>>(idx)?),
        Type::INT2 => Value::from(row.try_get::<_, Option<i16>>(idx)?.map(i64::from)),
        Type::INT4 => Value::from(row.try_get::<_, Option<i32>>(idx)?.map(i64::from)),
        Type::INT8 => Value::from(row.try_get::<_, Option<i64>>(idx)?),
        Type::FLOAT4 => Value::from(row.try_get::<_, Option<f32>>(idx)?),
        Type::FLOAT8 => Value::from(row.try_get::<_, Option<f64>>(idx)?),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            Value::from(row.try_get::<_, Option<String>>(idx)?)
        }
        Type::BYTEA => Value::from(row.try_get::<_, Option<Vec<u8>>>(idx)?),
        Type::JSON | Type::JSONB => Value::from(row.try_get::<_, Option<serde_json::Value>>(idx)?),
        Type::DATE => Value::from(row.try_get::<_, Option<chrono::NaiveDate>>(idx)?),
        Type::TIME => Value::from(row.try_get::<_, Option<chrono::NaiveTime>>(idx)?),
        Type::TIMESTAMP => Value::from(row.try_get::<_, Option<chrono::NaiveDateTime>>(idx)?),
        Type::TIMESTAMPTZ => {
            Value::from(row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)?)
        }
        Type::UUID => Value::from(row.try_get::<_, Option<uuid::Uuid>>(idx)?),
        Type::NUMERIC => Value::from(row.try_get::<_, Option<rust_decimal::Decimal>>(idx)?),
        _ => {
            return Err(EngineError::Parse(format!(
                "unsupported column type {} at index {}",
                ty.name(),
                idx
            )));
        }
    };
    Ok(value)
}

/// Decode a driver row into a [`Row`]. Every integer width widens to `BigInt`.
pub fn decode_row(row: &may_postgres::Row) -> Result<Row, EngineError> {
    let mut decoded = Row::default();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = column_value(row, idx, column.type_())?;
        decoded.push(column.name(), value);
    }
    Ok(decoded)
}

fn int_of(value: &Value) -> Option<Option<i128>> {
    let v = match value {
        Value::TinyInt(v) => v.map(i128::from),
        Value::SmallInt(v) => v.map(i128::from),
        Value::Int(v) => v.map(i128::from),
        Value::BigInt(v) => v.map(i128::from),
        Value::TinyUnsigned(v) => v.map(i128::from),
        Value::SmallUnsigned(v) => v.map(i128::from),
        Value::Unsigned(v) => v.map(i128::from),
        Value::BigUnsigned(v) => v.map(i128::from),
        _ => return None,
    };
    Some(v)
}

/// Whether `value` is NULL or its type's zero value (`0`, `""`, `false`, nil UUID, ...)
pub fn is_zero_value(value: &Value) -> bool {
    if let Some(v) = int_of(value) {
        return v.unwrap_or(0) == 0;
    }
    match value {
        Value::Bool(v) => !v.unwrap_or(false),
        Value::Float(v) => v.unwrap_or(0.0) == 0.0,
        Value::Double(v) => v.unwrap_or(0.0) == 0.0,
        Value::String(v) => v.as_deref().map_or(true, str::is_empty),
        Value::Bytes(v) => v.as_ref().map_or(true, |b| b.is_empty()),
        Value::Uuid(v) => v.as_ref().map_or(true, |u| {
            let u: &uuid::Uuid = u;
            u.is_nil()
        }),
        Value::Decimal(v) => v.as_ref().map_or(true, |d| {
            let d: &rust_decimal::Decimal = d;
            d.is_zero()
        }),
        Value::Json(v) => v.is_none(),
        Value::Char(v) => v.is_none(),
        Value::ChronoDate(v) => v.is_none(),
        Value::ChronoTime(v) => v.is_none(),
        Value::ChronoDateTime(v) => v.is_none(),
        Value::ChronoDateTimeUtc(v) => v.is_none(),
        Value::ChronoDateTimeWithTimeZone(v) => v.is_none(),
        _ => false,
    }
}

/// Normalised key for matching related rows to their parents.
///
/// Integer widths are erased so an `INT4` foreign key matches an `INT8`
/// primary key. `None` for NULL.
pub fn value_key(value: &Value) -> Option<String> {
    if let Some(v) = int_of(value) {
        return v.map(|i| i.to_string());
    }
    match value {
        Value::String(v) => v.clone(),
        Value::Uuid(v) => v.as_ref().map(|u| {
            let u: &uuid::Uuid = u;
            u.to_string()
        }),
        Value::Bool(None)
        | Value::Float(None)
        | Value::Double(None)
        | Value::Bytes(None)
        | Value::Json(None)
        | Value::Char(None) => None,
        other => Some(format!("{other:?}")),
    }
}
