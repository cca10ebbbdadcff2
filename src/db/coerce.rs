//! Conversion of scanned [`Value`]s into typed record fields.
//!
//! Three rule sets exist:
//! - [`Rule::Driver`]: what the driver itself accepts when scanning straight
//!   into a destination. Used for nullable-capable fields in the direct pass
//!   and for positional column scans.
//! - [`Rule::Staged`]: the lenient rules applied to non-nullable fields after
//!   the row was scanned into neutral holders.
//! - [`Rule::Declared`]: one canonical conversion per declared kind from any
//!   source value, parsing text where needed.

use crate::db::types::Value;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

/// Declared kind of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Bool,
    Int,
    UInt,
    Float,
    String,
    Bytes,
    Timestamp,
    Date,
    Time,
    Map,
    /// Untyped slot holding whatever the driver returned
    Any,
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Float => "float",
            Self::String => "string",
            Self::Bytes => "bytes",
            Self::Timestamp => "timestamp",
            Self::Date => "date",
            Self::Time => "time",
            Self::Map => "map",
            Self::Any => "any",
        };
        write!(f, "{}", name)
    }
}

/// Conversion rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Driver,
    Staged,
    Declared,
}

/// A value that could not be converted to a field's kind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot convert {from} to {to}: {message}")]
pub struct CoercionError {
    pub from: &'static str,
    pub to: FieldKind,
    pub message: String,
}

impl CoercionError {
    fn new(value: &Value, to: FieldKind, message: impl Into<String>) -> Self {
        Self {
            from: value.type_name(),
            to,
            message: message.into(),
        }
    }

    fn mismatch(value: &Value, to: FieldKind) -> Self {
        Self::new(value, to, "type mismatch")
    }

    fn out_of_range(value: &Value, to: FieldKind) -> Self {
        Self::new(value, to, format!("{} is out of range", value))
    }
}

/// A type that can receive a column value.
///
/// `NULLABLE` types can represent SQL NULL and are scanned in the direct pass;
/// plain scalars are staged.
pub trait FieldValue: Sized + 'static {
    const KIND: FieldKind;
    const NULLABLE: bool = false;

    /// Convert a non-NULL value.
    fn convert(value: &Value, rule: Rule) -> Result<Self, CoercionError>;

    /// The value representing SQL NULL.
    fn from_null() -> Result<Self, CoercionError> {
        Err(CoercionError::mismatch(&Value::Null, Self::KIND))
    }

    fn coerce(value: &Value, rule: Rule) -> Result<Self, CoercionError> {
        if value.is_null() {
            Self::from_null()
        } else {
            Self::convert(value, rule)
        }
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

fn text(value: &Value, to: FieldKind) -> Result<&str, CoercionError> {
    let bytes = value
        .as_byte_sequence()
        .ok_or_else(|| CoercionError::mismatch(value, to))?;
    std::str::from_utf8(bytes).map_err(|e| CoercionError::new(value, to, e.to_string()))
}

fn is_empty_text(value: &Value) -> bool {
    value.as_byte_sequence().is_some_and(|b| b.is_empty())
}

/// Boolean literals the driver accepts for text columns.
fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn float_to_integer(value: &Value, v: f64, to: FieldKind) -> Result<i128, CoercionError> {
    if !v.is_finite() {
        return Err(CoercionError::out_of_range(value, to));
    }
    Ok(v.trunc() as i128)
}

fn integer(value: &Value, rule: Rule, to: FieldKind) -> Result<i128, CoercionError> {
    match (value, rule) {
        (Value::Int(v), _) => Ok(i128::from(*v)),
        (Value::UInt(v), _) => Ok(i128::from(*v)),
        // The driver only accepts floats that format as integers
        (Value::Float(v), Rule::Driver) if v.fract() == 0.0 => float_to_integer(value, *v, to),
        (Value::Float(v), Rule::Staged | Rule::Declared) => float_to_integer(value, *v, to),
        (Value::Bool(v), _) => Ok(i128::from(*v)),
        (Value::Text(_) | Value::Bytes(_), Rule::Driver) => text(value, to)?
            .parse::<i128>()
            .map_err(|e| CoercionError::new(value, to, e.to_string())),
        (Value::Text(_) | Value::Bytes(_), Rule::Declared) => {
            let s = text(value, to)?.trim();
            if s.is_empty() {
                return Ok(0);
            }
            match s.parse::<i128>() {
                Ok(v) => Ok(v),
                Err(e) => match s.parse::<f64>() {
                    Ok(f) => float_to_integer(value, f, to),
                    Err(_) => Err(CoercionError::new(value, to, e.to_string())),
                },
            }
        }
        _ => Err(CoercionError::mismatch(value, to)),
    }
}

fn float(value: &Value, rule: Rule, to: FieldKind) -> Result<f64, CoercionError> {
    match (value, rule) {
        (Value::Float(v), _) => Ok(*v),
        (Value::Int(v), _) => Ok(*v as f64),
        (Value::UInt(v), _) => Ok(*v as f64),
        (Value::Bool(v), _) => Ok(if *v { 1.0 } else { 0.0 }),
        (Value::Text(_) | Value::Bytes(_), Rule::Driver) => text(value, to)?
            .parse::<f64>()
            .map_err(|e| CoercionError::new(value, to, e.to_string())),
        (Value::Text(_) | Value::Bytes(_), Rule::Declared) => {
            let s = text(value, to)?.trim();
            if s.is_empty() {
                return Ok(0.0);
            }
            s.parse::<f64>()
                .map_err(|e| CoercionError::new(value, to, e.to_string()))
        }
        _ => Err(CoercionError::mismatch(value, to)),
    }
}

const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.naive_utc())
        .ok()
        .or_else(|| {
            TIMESTAMP_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

fn declared_timestamp(value: &Value, to: FieldKind) -> Result<NaiveDateTime, CoercionError> {
    match value {
        Value::Timestamp(v) => Ok(*v),
        Value::Date(d) => Ok(d.and_time(NaiveTime::MIN)),
        Value::Int(secs) => DateTime::from_timestamp(*secs, 0)
            .map(|t| t.naive_utc())
            .ok_or_else(|| CoercionError::out_of_range(value, to)),
        Value::Text(_) | Value::Bytes(_) => {
            let s = text(value, to)?.trim();
            parse_timestamp(s).ok_or_else(|| {
                CoercionError::new(value, to, format!("unrecognised timestamp '{}'", s))
            })
        }
        _ => Err(CoercionError::mismatch(value, to)),
    }
}

// =============================================================================
// Scalars
// =============================================================================

impl FieldValue for bool {
    const KIND: FieldKind = FieldKind::Bool;

    fn convert(value: &Value, rule: Rule) -> Result<Self, CoercionError> {
        match (value, rule) {
            (Value::Bool(v), _) => Ok(*v),
            (Value::Int(_) | Value::UInt(_), Rule::Driver) => {
                match integer(value, rule, Self::KIND)? {
                    0 => Ok(false),
                    1 => Ok(true),
                    _ => Err(CoercionError::out_of_range(value, Self::KIND)),
                }
            }
            (Value::Int(v), _) => Ok(*v != 0),
            (Value::UInt(v), _) => Ok(*v != 0),
            (Value::Float(v), Rule::Declared) => Ok(*v != 0.0),
            // A single '1' or '0' byte, as BIT(1) and TINYINT text encodings produce
            (Value::Text(_) | Value::Bytes(_), Rule::Staged) => match value.as_byte_sequence() {
                Some([b'1']) => Ok(true),
                Some([b'0']) => Ok(false),
                _ => Err(CoercionError::mismatch(value, Self::KIND)),
            },
            (Value::Text(_) | Value::Bytes(_), Rule::Driver) => parse_bool(text(value, Self::KIND)?)
                .ok_or_else(|| CoercionError::mismatch(value, Self::KIND)),
            (Value::Text(_) | Value::Bytes(_), Rule::Declared) => {
                let s = text(value, Self::KIND)?.trim();
                if s.is_empty() {
                    return Ok(false);
                }
                parse_bool(s)
                    .or_else(|| s.parse::<f64>().ok().map(|f| f != 0.0))
                    .ok_or_else(|| CoercionError::mismatch(value, Self::KIND))
            }
            _ => Err(CoercionError::mismatch(value, Self::KIND)),
        }
    }
}

macro_rules! impl_integer_field {
    ($kind:ident: $($ty:ty),+) => {
        $(
            impl FieldValue for $ty {
                const KIND: FieldKind = FieldKind::$kind;

                fn convert(value: &Value, rule: Rule) -> Result<Self, CoercionError> {
                    let wide = integer(value, rule, Self::KIND)?;
                    <$ty>::try_from(wide).map_err(|_| CoercionError::out_of_range(value, Self::KIND))
                }
            }
        )+
    };
}

impl_integer_field!(Int: i8, i16, i32, i64);
impl_integer_field!(UInt: u8, u16, u32, u64);

impl FieldValue for f64 {
    const KIND: FieldKind = FieldKind::Float;

    fn convert(value: &Value, rule: Rule) -> Result<Self, CoercionError> {
        float(value, rule, Self::KIND)
    }
}

impl FieldValue for f32 {
    const KIND: FieldKind = FieldKind::Float;

    fn convert(value: &Value, rule: Rule) -> Result<Self, CoercionError> {
        float(value, rule, Self::KIND).map(|v| v as f32)
    }
}

impl FieldValue for String {
    const KIND: FieldKind = FieldKind::String;

    /// Every rule formats the value; byte sequences are taken as text.
    fn convert(value: &Value, _rule: Rule) -> Result<Self, CoercionError> {
        Ok(match value {
            Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Value::Json(JsonValue::String(s)) => s.clone(),
            other => other.to_string(),
        })
    }
}

// =============================================================================
// Temporal
// =============================================================================

// Driver and staged rules require the exact temporal type.

impl FieldValue for NaiveDateTime {
    const KIND: FieldKind = FieldKind::Timestamp;

    fn convert(value: &Value, rule: Rule) -> Result<Self, CoercionError> {
        match (value, rule) {
            (Value::Timestamp(v), _) => Ok(*v),
            (_, Rule::Declared) => declared_timestamp(value, Self::KIND),
            _ => Err(CoercionError::mismatch(value, Self::KIND)),
        }
    }
}

impl FieldValue for DateTime<Utc> {
    const KIND: FieldKind = FieldKind::Timestamp;

    fn convert(value: &Value, rule: Rule) -> Result<Self, CoercionError> {
        NaiveDateTime::convert(value, rule).map(|t| t.and_utc())
    }
}

impl FieldValue for NaiveDate {
    const KIND: FieldKind = FieldKind::Date;

    fn convert(value: &Value, rule: Rule) -> Result<Self, CoercionError> {
        match (value, rule) {
            (Value::Date(v), _) => Ok(*v),
            (Value::Text(_) | Value::Bytes(_), Rule::Declared) => {
                let s = text(value, Self::KIND)?.trim();
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .or_else(|| parse_timestamp(s).map(|t| t.date()))
                    .ok_or_else(|| {
                        CoercionError::new(value, Self::KIND, format!("unrecognised date '{}'", s))
                    })
            }
            (_, Rule::Declared) => declared_timestamp(value, Self::KIND).map(|t| t.date()),
            _ => Err(CoercionError::mismatch(value, Self::KIND)),
        }
    }
}

impl FieldValue for NaiveTime {
    const KIND: FieldKind = FieldKind::Time;

    fn convert(value: &Value, rule: Rule) -> Result<Self, CoercionError> {
        match (value, rule) {
            (Value::Time(v), _) => Ok(*v),
            (Value::Timestamp(v), Rule::Declared) => Ok(v.time()),
            (Value::Text(_) | Value::Bytes(_), Rule::Declared) => {
                let s = text(value, Self::KIND)?.trim();
                NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
                    .ok()
                    .or_else(|| parse_timestamp(s).map(|t| t.time()))
                    .ok_or_else(|| {
                        CoercionError::new(value, Self::KIND, format!("unrecognised time '{}'", s))
                    })
            }
            _ => Err(CoercionError::mismatch(value, Self::KIND)),
        }
    }
}

// =============================================================================
// Nullable-capable
// =============================================================================

impl<V: FieldValue> FieldValue for Option<V> {
    const KIND: FieldKind = V::KIND;
    const NULLABLE: bool = true;

    fn convert(value: &Value, rule: Rule) -> Result<Self, CoercionError> {
        if rule == Rule::Declared && is_empty_text(value) {
            return Ok(None);
        }
        V::convert(value, rule).map(Some)
    }

    fn from_null() -> Result<Self, CoercionError> {
        Ok(None)
    }
}

impl FieldValue for Vec<u8> {
    const KIND: FieldKind = FieldKind::Bytes;
    const NULLABLE: bool = true;

    fn convert(value: &Value, _rule: Rule) -> Result<Self, CoercionError> {
        Ok(match value.as_byte_sequence() {
            Some(bytes) => bytes.to_vec(),
            None => value.to_string().into_bytes(),
        })
    }

    fn from_null() -> Result<Self, CoercionError> {
        Ok(Vec::new())
    }
}

impl FieldValue for Map<String, JsonValue> {
    const KIND: FieldKind = FieldKind::Map;
    const NULLABLE: bool = true;

    fn convert(value: &Value, rule: Rule) -> Result<Self, CoercionError> {
        match value {
            Value::Json(JsonValue::Object(map)) => Ok(map.clone()),
            Value::Text(_) | Value::Bytes(_) => {
                if rule == Rule::Declared && is_empty_text(value) {
                    return Ok(Map::new());
                }
                let bytes = value.as_byte_sequence().unwrap_or_default();
                serde_json::from_slice(bytes)
                    .map_err(|e| CoercionError::new(value, Self::KIND, e.to_string()))
            }
            _ => Err(CoercionError::mismatch(value, Self::KIND)),
        }
    }

    fn from_null() -> Result<Self, CoercionError> {
        Ok(Map::new())
    }
}

impl FieldValue for JsonValue {
    const KIND: FieldKind = FieldKind::Any;
    const NULLABLE: bool = true;

    fn convert(value: &Value, _rule: Rule) -> Result<Self, CoercionError> {
        Ok(value.to_json())
    }

    fn from_null() -> Result<Self, CoercionError> {
        Ok(JsonValue::Null)
    }
}
