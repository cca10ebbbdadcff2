//! Neutral scan holders and database-specific column decoding.
//!
//! # Architecture
//!
//! Scanning uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders extract each column into a [`Value`]
//!
//! A [`Value`] is the "any" holder the materialization engine works with: it
//! keeps the raw driver-returned shape (text stays text, bytes stay bytes)
//! and records SQL NULL explicitly.

use crate::db::DatabaseType;
use crate::error::{DbError, DbResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo};

// =============================================================================
// Scan Holder
// =============================================================================

/// A single scanned column value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
    Json(JsonValue),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Timestamp(_) => "timestamp",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::Json(_) => "json",
        }
    }

    /// Text or raw bytes, the two shapes a driver uses for byte sequences.
    pub fn as_byte_sequence(&self) -> Option<&[u8]> {
        match self {
            Self::Text(s) => Some(s.as_bytes()),
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Convert to a JSON value. Bytes become lossy UTF-8 text.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(v) => JsonValue::Bool(*v),
            Self::Int(v) => JsonValue::from(*v),
            Self::UInt(v) => JsonValue::from(*v),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(v.to_string())),
            Self::Text(v) => JsonValue::String(v.clone()),
            Self::Bytes(v) => JsonValue::String(String::from_utf8_lossy(v).into_owned()),
            Self::Timestamp(_) | Self::Date(_) | Self::Time(_) => {
                JsonValue::String(self.to_string())
            }
            Self::Json(v) => v.clone(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::UInt(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(v) => write!(f, "{}", v),
            Self::Bytes(v) => write!(f, "{}", String::from_utf8_lossy(v)),
            Self::Timestamp(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S%.f")),
            Self::Date(v) => write!(f, "{}", v),
            Self::Time(v) => write!(f, "{}", v),
            Self::Json(v) => write!(f, "{}", v),
        }
    }
}

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Timestamp,
    Date,
    Time,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    // Temporal types
    if lower.contains("datetime") || lower.contains("timestamp") {
        return TypeCategory::Timestamp;
    }
    if lower == "date" {
        return TypeCategory::Date;
    }
    if lower == "time" {
        return TypeCategory::Time;
    }

    if lower.contains("int") || lower.contains("serial") || lower == "year" {
        return TypeCategory::Integer;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bit" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || lower == "enum" || lower == "set" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Row Scanning Trait
// =============================================================================

/// A driver row that can be scanned into neutral holders.
pub trait ScanRow {
    /// Column names in cursor order.
    fn column_names(&self) -> Vec<String>;

    /// Decode every column into a [`Value`].
    ///
    /// Fails on the first column the driver cannot decode at all.
    fn scan_values(&self) -> DbResult<Vec<Value>>;
}

fn column_names<R: Row>(row: &R) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

/// Decode column `idx` as `Option<T>`.
fn get<'r, R, T>(row: &'r R, idx: usize) -> Result<Option<T>, sqlx::Error>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<Option<T>, usize>(idx)
}

/// Try each decode in turn, keeping the first success or the last error.
macro_rules! first_ok {
    ($first:expr $(, $rest:expr)* $(,)?) => {{
        let mut result = $first;
        $(
            if result.is_err() {
                result = $rest;
            }
        )*
        result
    }};
}

fn or_null<T>(value: Option<T>, f: impl FnOnce(T) -> Value) -> Value {
    value.map(f).unwrap_or(Value::Null)
}

fn scan_all<R: Row>(
    row: &R,
    db: DatabaseType,
    decode: fn(&R, usize, TypeCategory) -> Result<Value, sqlx::Error>,
) -> DbResult<Vec<Value>> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            let category = categorize_type(col.type_info().name(), db);
            decode(row, idx, category).map_err(|e| DbError::scan(col.name(), e.to_string()))
        })
        .collect()
}

impl ScanRow for MySqlRow {
    fn column_names(&self) -> Vec<String> {
        column_names(self)
    }

    fn scan_values(&self) -> DbResult<Vec<Value>> {
        scan_all(self, DatabaseType::MySql, mysql::decode_column)
    }
}

impl ScanRow for SqliteRow {
    fn column_names(&self) -> Vec<String> {
        column_names(self)
    }

    fn scan_values(&self) -> DbResult<Vec<Value>> {
        scan_all(self, DatabaseType::SQLite, sqlite::decode_column)
    }
}

/// A fully fetched row from either backend.
pub enum DbRow {
    MySql(MySqlRow),
    SQLite(SqliteRow),
}

impl DbRow {
    pub fn db_type(&self) -> DatabaseType {
        match self {
            Self::MySql(_) => DatabaseType::MySql,
            Self::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

impl ScanRow for DbRow {
    fn column_names(&self) -> Vec<String> {
        match self {
            Self::MySql(row) => row.column_names(),
            Self::SQLite(row) => row.column_names(),
        }
    }

    fn scan_values(&self) -> DbResult<Vec<Value>> {
        match self {
            Self::MySql(row) => row.scan_values(),
            Self::SQLite(row) => row.scan_values(),
        }
    }
}

impl std::fmt::Debug for DbRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbRow")
            .field("db_type", &self.db_type())
            .field("columns", &self.column_names())
            .finish()
    }
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(
        row: &MySqlRow,
        idx: usize,
        category: TypeCategory,
    ) -> Result<Value, sqlx::Error> {
        match category {
            TypeCategory::Decimal => {
                get::<_, RawDecimal>(row, idx).map(|v| or_null(v, |d| Value::Text(d.0)))
            }
            TypeCategory::Integer => decode_integer(row, idx),
            // TINYINT(1) is reported as BOOLEAN; keep the integer the server sent
            TypeCategory::Boolean => first_ok!(
                decode_integer(row, idx),
                get::<_, bool>(row, idx).map(|v| or_null(v, Value::Bool)),
            ),
            TypeCategory::Float => first_ok!(
                get::<_, f64>(row, idx).map(|v| or_null(v, Value::Float)),
                get::<_, f32>(row, idx).map(|v| or_null(v, |f| Value::Float(f as f64))),
            ),
            TypeCategory::Binary => get::<_, Vec<u8>>(row, idx).map(|v| or_null(v, Value::Bytes)),
            TypeCategory::Json => {
                get::<_, JsonValue>(row, idx).map(|v| or_null(v, Value::Json))
            }
            TypeCategory::Timestamp => first_ok!(
                get::<_, NaiveDateTime>(row, idx).map(|v| or_null(v, Value::Timestamp)),
                get::<_, DateTime<Utc>>(row, idx)
                    .map(|v| or_null(v, |t| Value::Timestamp(t.naive_utc()))),
            ),
            TypeCategory::Date => get::<_, NaiveDate>(row, idx).map(|v| or_null(v, Value::Date)),
            // TIME may exceed 24h; keep the driver's text form when it does
            TypeCategory::Time => first_ok!(
                get::<_, NaiveTime>(row, idx).map(|v| or_null(v, Value::Time)),
                decode_text(row, idx),
            ),
            TypeCategory::Text | TypeCategory::Unknown => decode_text(row, idx),
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> Result<Value, sqlx::Error> {
        first_ok!(
            get::<_, i64>(row, idx).map(|v| or_null(v, Value::Int)),
            get::<_, u64>(row, idx).map(|v| or_null(v, Value::UInt)),
        )
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> Result<Value, sqlx::Error> {
        first_ok!(
            get::<_, String>(row, idx).map(|v| or_null(v, Value::Text)),
            get::<_, Vec<u8>>(row, idx).map(|v| or_null(v, Value::Bytes)),
        )
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(
        row: &SqliteRow,
        idx: usize,
        category: TypeCategory,
    ) -> Result<Value, sqlx::Error> {
        match category {
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => first_ok!(
                get::<_, i64>(row, idx).map(|v| or_null(v, Value::Int)),
                get::<_, bool>(row, idx).map(|v| or_null(v, Value::Bool)),
            ),
            TypeCategory::Float | TypeCategory::Decimal => first_ok!(
                get::<_, f64>(row, idx).map(|v| or_null(v, Value::Float)),
                decode_integer(row, idx),
            ),
            TypeCategory::Binary => get::<_, Vec<u8>>(row, idx).map(|v| or_null(v, Value::Bytes)),
            TypeCategory::Json => first_ok!(
                get::<_, JsonValue>(row, idx).map(|v| or_null(v, Value::Json)),
                decode_text(row, idx),
            ),
            TypeCategory::Timestamp => first_ok!(
                get::<_, NaiveDateTime>(row, idx).map(|v| or_null(v, Value::Timestamp)),
                decode_text(row, idx),
            ),
            TypeCategory::Date => first_ok!(
                get::<_, NaiveDate>(row, idx).map(|v| or_null(v, Value::Date)),
                decode_text(row, idx),
            ),
            TypeCategory::Time => first_ok!(
                get::<_, NaiveTime>(row, idx).map(|v| or_null(v, Value::Time)),
                decode_text(row, idx),
            ),
            TypeCategory::Text => decode_text(row, idx),
            TypeCategory::Unknown => decode_dynamic(row, idx),
        }
    }

    fn decode_integer(row: &SqliteRow, idx: usize) -> Result<Value, sqlx::Error> {
        first_ok!(
            get::<_, i64>(row, idx).map(|v| or_null(v, Value::Int)),
            get::<_, f64>(row, idx).map(|v| or_null(v, Value::Float)),
            decode_text(row, idx),
        )
    }

    fn decode_text(row: &SqliteRow, idx: usize) -> Result<Value, sqlx::Error> {
        first_ok!(
            get::<_, String>(row, idx).map(|v| or_null(v, Value::Text)),
            get::<_, Vec<u8>>(row, idx).map(|v| or_null(v, Value::Bytes)),
        )
    }

    /// Expression columns have no declared type; follow the stored value.
    fn decode_dynamic(row: &SqliteRow, idx: usize) -> Result<Value, sqlx::Error> {
        first_ok!(
            get::<_, i64>(row, idx).map(|v| or_null(v, Value::Int)),
            get::<_, f64>(row, idx).map(|v| or_null(v, Value::Float)),
            decode_text(row, idx),
        )
    }
}
