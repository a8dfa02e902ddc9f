//! Row decoding from PostgreSQL into JSON

use crate::provider::RowMode;
use cascade_core::ColumnMeta;
use serde_json::{Map, Number, Value as JsonValue};
use sqlx::postgres::{PgRow, PgTypeInfo};
use sqlx::{Column, Row, TypeInfo, ValueRef};

/// Column descriptions of a result set
pub fn column_meta(row: &PgRow) -> Vec<ColumnMeta> {
    row.columns()
        .iter()
        .map(|column| ColumnMeta::new(column.name(), column.type_info().name().to_ascii_lowercase()))
        .collect()
}

pub fn convert_row(row: &PgRow, mode: RowMode) -> Result<JsonValue, sqlx::Error> {
    match mode {
        RowMode::Object => {
            let mut obj = Map::with_capacity(row.len());
            for column in row.columns() {
                let value = extract_column(row, column.ordinal(), column.type_info())?;
                obj.insert(column.name().to_string(), value);
            }
            Ok(JsonValue::Object(obj))
        }
        RowMode::Array => {
            let mut cells = Vec::with_capacity(row.len());
            for column in row.columns() {
                cells.push(extract_column(row, column.ordinal(), column.type_info())?);
            }
            Ok(JsonValue::Array(cells))
        }
    }
}

fn extract_column(row: &PgRow, idx: usize, type_info: &PgTypeInfo) -> Result<JsonValue, sqlx::Error> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(JsonValue::Null);
    }

    let type_name = type_info.name().to_ascii_uppercase();
    let value = match type_name.as_str() {
        "BOOL" | "BOOLEAN" => JsonValue::Bool(row.try_get::<bool, _>(idx)?),
        "INT2" => JsonValue::from(row.try_get::<i16, _>(idx)?),
        "INT4" => JsonValue::from(row.try_get::<i32, _>(idx)?),
        "INT8" => JsonValue::from(row.try_get::<i64, _>(idx)?),
        "FLOAT4" => float(row.try_get::<f32, _>(idx)? as f64),
        "FLOAT8" => float(row.try_get::<f64, _>(idx)?),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => JsonValue::String(row.try_get::<String, _>(idx)?),
        "UUID" => JsonValue::String(row.try_get::<sqlx::types::Uuid, _>(idx)?.to_string()),
        "TIMESTAMP" => {
            let ts = row.try_get::<chrono::NaiveDateTime, _>(idx)?;
            JsonValue::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }
        "TIMESTAMPTZ" => {
            let ts = row.try_get::<chrono::DateTime<chrono::Utc>, _>(idx)?;
            JsonValue::String(ts.to_rfc3339())
        }
        "DATE" => JsonValue::String(row.try_get::<chrono::NaiveDate, _>(idx)?.to_string()),
        "TIME" => {
            let time = row.try_get::<chrono::NaiveTime, _>(idx)?;
            JsonValue::String(time.format("%H:%M:%S%.f").to_string())
        }
        "JSON" | "JSONB" => row.try_get::<JsonValue, _>(idx)?,
        "BYTEA" => JsonValue::String(bytes_to_hex(&row.try_get::<Vec<u8>, _>(idx)?)),
        // numeric and other types without a decoder: cast in the statement to get text
        _ => match row.try_get::<String, _>(idx) {
            Ok(text) => JsonValue::String(text),
            Err(_) => JsonValue::String(bytes_to_hex(&row.try_get_unchecked::<Vec<u8>, _>(idx)?)),
        },
    };
    Ok(value)
}

fn float(v: f64) -> JsonValue {
    Number::from_f64(v).map(JsonValue::Number).unwrap_or(JsonValue::Null)
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("\\x{}", hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_and_float_encoding() {
        assert_eq!(bytes_to_hex(&[0xde, 0xad, 0x01]), "\\xdead01");
        assert_eq!(float(1.5), serde_json::json!(1.5));
        assert_eq!(float(f64::NAN), JsonValue::Null);
    }
}
