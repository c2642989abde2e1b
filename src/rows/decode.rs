use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use serde_json::Value as WireValue;

use crate::engine::{EngineRow, TypeCode};
use crate::error::DriverError;
use crate::types::Value;

/// Decode every column of `row` into `dest`.
///
/// # Errors
/// Fails on the first column whose type has no conversion, whose wire value
/// does not match its declared type, or when `dest` is too short.
pub(crate) fn decode_row(row: &EngineRow, dest: &mut [Value]) -> Result<(), DriverError> {
    if dest.len() < row.size() {
        return Err(DriverError::Parameter(format!(
            "destination has {} slots but the row has {} columns",
            dest.len(),
            row.size()
        )));
    }
    for (index, slot) in dest.iter_mut().enumerate().take(row.size()) {
        let (type_code, wire) = row
            .column(index)
            .ok_or_else(|| DriverError::Decode(format!("column {index} is missing")))?;
        *slot = decode_column(type_code, wire)?;
    }
    Ok(())
}

/// Convert one wire value according to the engine's type code.
///
/// # Errors
/// Returns [`DriverError::UnsupportedColumnType`] for arrays, structs, numerics,
/// JSON and unspecified types, and [`DriverError::Decode`] for malformed values.
pub fn decode_column(type_code: TypeCode, wire: &WireValue) -> Result<Value, DriverError> {
    match type_code {
        TypeCode::Array
        | TypeCode::Struct
        | TypeCode::Numeric
        | TypeCode::Json
        | TypeCode::Unspecified => return Err(DriverError::UnsupportedColumnType(type_code)),
        _ => {}
    }
    if wire.is_null() {
        return Ok(Value::Null);
    }

    match type_code {
        TypeCode::Int64 => decode_int64(wire).map(Value::Int),
        TypeCode::Float64 => decode_float64(wire).map(Value::Float),
        TypeCode::String => expect_str(type_code, wire).map(|s| Value::Text(s.to_owned())),
        TypeCode::Bytes => {
            // The column value is a base64 encoded string.
            let encoded = expect_str(type_code, wire)?;
            STANDARD
                .decode(encoded)
                .map(Value::Bytes)
                .map_err(|e| DriverError::Decode(format!("invalid base64 in BYTES column: {e}")))
        }
        TypeCode::Bool => wire
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| mismatch(type_code, wire)),
        TypeCode::Date => decode_date(expect_str(type_code, wire)?).map(Value::Date),
        TypeCode::Timestamp => {
            decode_timestamp(expect_str(type_code, wire)?).map(Value::Timestamp)
        }
        other => Err(DriverError::UnsupportedColumnType(other)),
    }
}

fn decode_int64(wire: &WireValue) -> Result<i64, DriverError> {
    match wire {
        WireValue::String(s) => s
            .parse::<i64>()
            .map_err(|e| DriverError::Decode(format!("invalid INT64 {s:?}: {e}"))),
        WireValue::Number(n) => n.as_i64().ok_or_else(|| mismatch(TypeCode::Int64, wire)),
        _ => Err(mismatch(TypeCode::Int64, wire)),
    }
}

fn decode_float64(wire: &WireValue) -> Result<f64, DriverError> {
    match wire {
        WireValue::Number(n) => n.as_f64().ok_or_else(|| mismatch(TypeCode::Float64, wire)),
        WireValue::String(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            _ => Err(mismatch(TypeCode::Float64, wire)),
        },
        _ => Err(mismatch(TypeCode::Float64, wire)),
    }
}

fn decode_date(s: &str) -> Result<DateTime<Local>, DriverError> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| DriverError::Decode(format!("invalid DATE {s:?}: {e}")))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| DriverError::Decode(format!("invalid DATE {s:?}")))?;
    // Midnight can fall into a DST gap; take the first instant that exists.
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .or_else(|| Local.from_local_datetime(&(midnight + chrono::Duration::hours(1))).earliest())
        .ok_or_else(|| DriverError::Decode(format!("DATE {s:?} has no local midnight")))
}

fn decode_timestamp(s: &str) -> Result<DateTime<Utc>, DriverError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DriverError::Decode(format!("invalid TIMESTAMP {s:?}: {e}")))
}

fn expect_str(type_code: TypeCode, wire: &WireValue) -> Result<&str, DriverError> {
    wire.as_str().ok_or_else(|| mismatch(type_code, wire))
}

fn mismatch(type_code: TypeCode, wire: &WireValue) -> DriverError {
    DriverError::Decode(format!("cannot decode {wire} as {type_code:?}"))
}
