//! Query-related data models.
//!
//! This module defines positional query parameters and write results.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

/// A positional parameter value, bound by the driver to the next `?`.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    /// NULL value
    Null,
    Bool(bool),
    /// Signed integer (stored as i64 for maximum range)
    Int(i64),
    /// Unsigned integer
    UInt(u64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Timestamp without time zone
    Timestamp(NaiveDateTime),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Timestamp(_) => "timestamp",
        }
    }
}

macro_rules! impl_from_param {
    ($variant:ident as $target:ty: $($source:ty),+) => {
        $(
            impl From<$source> for QueryParam {
                fn from(value: $source) -> Self {
                    QueryParam::$variant(<$target>::from(value))
                }
            }
        )+
    };
}

impl_from_param!(Bool as bool: bool);
impl_from_param!(Int as i64: i8, i16, i32, i64);
impl_from_param!(UInt as u64: u8, u16, u32, u64);
impl_from_param!(Float as f64: f32, f64);
impl_from_param!(String as String: String, &str);
impl_from_param!(Bytes as Vec<u8>: Vec<u8>, &[u8]);
impl_from_param!(Timestamp as NaiveDateTime: NaiveDateTime);

impl From<DateTime<Utc>> for QueryParam {
    fn from(value: DateTime<Utc>) -> Self {
        QueryParam::Timestamp(value.naive_utc())
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(QueryParam::Null)
    }
}

/// Build a `Vec<QueryParam>` from heterogeneous values.
///
/// ```
/// use ephemeral_db::params;
/// let args = params![7, "Alice", None::<i64>];
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::models::QueryParam>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::models::QueryParam::from($value)),+]
    };
}

/// Metadata returned by a mutating statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Identifier generated by the last INSERT, 0 when none was generated
    pub last_insert_id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param_types() {
        assert!(QueryParam::Null.is_null());
        assert!(!QueryParam::Bool(true).is_null());
        assert_eq!(QueryParam::Int(42).type_name(), "int");
        assert_eq!(
            QueryParam::String("hello".to_string()).type_name(),
            "string"
        );
    }

    #[test]
    fn test_from_conversions() {
        assert_eq!(QueryParam::from(7), QueryParam::Int(7));
        assert_eq!(QueryParam::from(7u8), QueryParam::UInt(7));
        assert_eq!(QueryParam::from(1.5f32), QueryParam::Float(1.5));
        assert_eq!(QueryParam::from("a"), QueryParam::String("a".into()));
        assert_eq!(QueryParam::from(None::<i32>), QueryParam::Null);
        assert_eq!(QueryParam::from(Some(true)), QueryParam::Bool(true));
    }

    #[test]
    fn test_params_macro() {
        let args = crate::params![7, "Alice", false];
        assert_eq!(
            args,
            vec![
                QueryParam::Int(7),
                QueryParam::String("Alice".into()),
                QueryParam::Bool(false)
            ]
        );
        assert!(crate::params![].is_empty());
    }
}
