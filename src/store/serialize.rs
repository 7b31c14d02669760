//! Schema-directed row <-> SQL conversion.
//!
//! Table shape is a runtime value (a [`crate::schema::Schema`]), so
//! statements can't be built with `sqlx::query!`'s compile-time column
//! checking. Values are rendered to escaped SQL literals instead.

use crate::error::StoreError;
use crate::schema::{Column, ColumnType};
use crate::store::value::Scalar;

/// Render a single-quoted SQL string literal, doubling embedded quotes.
#[must_use]
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Render a [`Scalar`] as a SQL literal suitable for splicing into an
/// `INSERT`/`UPDATE` statement, validated against the column's declared type.
pub fn scalar_to_sql(table: &str, column: &Column, value: &Scalar) -> Result<String, StoreError> {
    if value.is_null() {
        if column.optional {
            return Ok("NULL".to_string());
        }
        return Err(StoreError::SchemaConflict {
            table: table.to_string(),
            column: column.name.clone(),
            message: "non-optional column received a null value".to_string(),
        });
    }

    let mismatch = || StoreError::SchemaConflict {
        table: table.to_string(),
        column: column.name.clone(),
        message: format!("value {value:?} does not match declared type {:?}", column.ty),
    };

    let rendered = match (&column.ty, value) {
        (ColumnType::Boolean, Scalar::Bool(b)) => (if *b { "1" } else { "0" }).to_string(),
        (ColumnType::Int, Scalar::Int(i)) => i.to_string(),
        (ColumnType::Float, Scalar::Float(f)) => quote(&f.to_string()),
        (ColumnType::String, Scalar::Str(s)) => quote(s),
        (ColumnType::BigInt, Scalar::BigInt(s)) => quote(s),
        (ColumnType::Bytes, Scalar::Bytes(s)) => quote(&s.to_lowercase()),
        (ColumnType::Enum(_), Scalar::Str(s)) => quote(s),
        (ColumnType::Reference(_), Scalar::Str(s)) => quote(s),
        (ColumnType::List(inner), Scalar::List(items)) => {
            let json = scalar_list_to_json(inner, items).map_err(|_| mismatch())?;
            quote(&json)
        }
        _ => return Err(mismatch()),
    };

    Ok(rendered)
}

fn scalar_list_to_json(inner: &ColumnType, items: &[Scalar]) -> Result<String, ()> {
    let json_items: Result<Vec<serde_json::Value>, ()> = items
        .iter()
        .map(|item| scalar_to_json(inner, item))
        .collect();
    Ok(serde_json::Value::Array(json_items?).to_string())
}

fn scalar_to_json(ty: &ColumnType, value: &Scalar) -> Result<serde_json::Value, ()> {
    Ok(match (ty, value) {
        (_, Scalar::Null) => serde_json::Value::Null,
        (ColumnType::Boolean, Scalar::Bool(b)) => serde_json::Value::Bool(*b),
        (ColumnType::Int, Scalar::Int(i)) => serde_json::Value::Number((*i).into()),
        (ColumnType::Float, Scalar::Float(f)) => {
            serde_json::Number::from_f64(*f).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null)
        }
        (ColumnType::String | ColumnType::Enum(_) | ColumnType::Reference(_), Scalar::Str(s)) => {
            serde_json::Value::String(s.clone())
        }
        (ColumnType::BigInt, Scalar::BigInt(s)) => serde_json::Value::String(s.clone()),
        (ColumnType::Bytes, Scalar::Bytes(s)) => serde_json::Value::String(s.to_lowercase()),
        (ColumnType::List(inner), Scalar::List(items)) => serde_json::Value::Array(
            items
                .iter()
                .map(|i| scalar_to_json(inner, i))
                .collect::<Result<_, _>>()?,
        ),
        _ => return Err(()),
    })
}

/// Parse a JSON text column back into a `Scalar::List` per the declared
/// inner element type.
pub fn json_to_scalar_list(inner: &ColumnType, text: &str) -> Result<Scalar, StoreError> {
    let parsed: serde_json::Value = serde_json::from_str(text).map_err(|e| StoreError::Other {
        message: format!("invalid JSON in list column: {e}"),
    })?;
    let items = parsed.as_array().ok_or_else(|| StoreError::Other {
        message: "list column did not decode to a JSON array".to_string(),
    })?;
    let scalars = items
        .iter()
        .map(|v| json_value_to_scalar(inner, v))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Scalar::List(scalars))
}

fn json_value_to_scalar(ty: &ColumnType, v: &serde_json::Value) -> Result<Scalar, StoreError> {
    if v.is_null() {
        return Ok(Scalar::Null);
    }
    Ok(match ty {
        ColumnType::Boolean => Scalar::Bool(v.as_bool().unwrap_or_default()),
        ColumnType::Int => Scalar::Int(v.as_i64().unwrap_or_default()),
        ColumnType::Float => Scalar::Float(v.as_f64().unwrap_or_default()),
        ColumnType::String | ColumnType::Enum(_) | ColumnType::Reference(_) => {
            Scalar::Str(v.as_str().unwrap_or_default().to_string())
        }
        ColumnType::BigInt => Scalar::BigInt(v.as_str().unwrap_or_default().to_string()),
        ColumnType::Bytes => Scalar::Bytes(v.as_str().unwrap_or_default().to_lowercase()),
        ColumnType::List(inner) => json_to_scalar_list(inner, &v.to_string())?,
    })
}
