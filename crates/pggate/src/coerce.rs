//! Type-aware value normalization against column metadata.

use crate::error::{GateError, GateResult};
use crate::meta::{ColumnMeta, TableMeta, TypeFamily};
use crate::sql::Bind;
use crate::value::{Value, parse_date, parse_time, parse_timestamp, parse_timestamptz};

/// Normalize `value` for `column`.
///
/// Empty text means "no value" for non-text columns and becomes `NULL`
/// (or an error when the column is `NOT NULL`). Text bound to date/time
/// columns is parsed into the typed value.
pub(crate) fn coerce(column: &ColumnMeta, value: Value) -> GateResult<Value> {
    let Value::Text(text) = value else {
        return Ok(value);
    };

    if text.is_empty() && column.family.empty_means_null() {
        if column.nullable {
            return Ok(Value::Null);
        }
        return Err(GateError::validation(format!(
            "column '{}' requires a value",
            column.name
        )));
    }

    if !column.family.is_temporal() {
        return Ok(Value::Text(text));
    }

    let parsed = match column.family {
        TypeFamily::Date => parse_date(&text).map(Value::Date),
        TypeFamily::Time => parse_time(&text).map(Value::Time),
        TypeFamily::Timestamp => parse_timestamp(&text).map(Value::Timestamp),
        TypeFamily::TimestampTz => parse_timestamptz(&text).map(Value::TimestampTz),
        _ => None,
    };
    parsed.ok_or_else(|| {
        GateError::validation(format!(
            "invalid {} value '{text}' for column '{}'",
            column.data_type, column.name
        ))
    })
}

/// Coerce bound values whose column is known; others pass through.
pub(crate) fn coerce_binds(meta: &TableMeta, binds: Vec<Bind>) -> GateResult<Vec<Value>> {
    binds
        .into_iter()
        .map(|bind| match bind.column.as_deref().and_then(|c| meta.column(c)) {
            Some(column) => coerce(column, bind.value),
            None => Ok(bind.value),
        })
        .collect()
}
