//! Row materialization into typed records and generic maps.
//!
//! # Algorithm
//!
//! [`RowMapper::new`] resolves every declared field against the cursor's
//! columns once per query. For each row, [`RowMapper::map_values`] then runs
//! two passes:
//!
//! 1. **Direct pass**: nullable-capable fields take their value under the
//!    driver's own conversion rules. The first failure stops the row; it is
//!    reported as a scan error and the partially populated record is kept.
//! 2. **Staged pass**: non-nullable fields are converted from the neutral
//!    holder. NULL leaves the field at its default. A value that cannot be
//!    converted leaves the field at its default and is reported as a
//!    [`SkippedField`] instead of failing the row.
//!
//! In [`CoercionMode::Declared`] every field goes through the staged pass
//! using the declared-kind rules.

use crate::config::CoercionMode;
use crate::db::coerce::{FieldValue, Rule};
use crate::db::record::{Record, RecordDescriptor};
use crate::db::types::{ScanRow, Value};
use crate::error::{DbError, DbResult};
use serde::Serialize;
use serde::ser::SerializeMap;
use tracing::warn;

/// A field left at its default because the column value did not fit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedField {
    pub field: &'static str,
    pub column: String,
    pub reason: String,
}

/// Outcome of materializing one row.
#[derive(Debug)]
pub struct Materialized<T> {
    /// Best-effort record; partially populated when `scan_error` is set.
    pub record: T,
    pub skipped: Vec<SkippedField>,
    pub scan_error: Option<DbError>,
}

impl<T> Materialized<T> {
    /// True when every matched field was assigned.
    pub fn is_complete(&self) -> bool {
        self.scan_error.is_none() && self.skipped.is_empty()
    }

    /// The record, or the scan error if the row could not be scanned.
    ///
    /// Skipped fields are not errors.
    pub fn into_result(self) -> DbResult<T> {
        match self.scan_error {
            Some(err) => Err(err),
            None => Ok(self.record),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Direct,
    Staged,
}

#[derive(Debug, Clone, Copy)]
struct Binding {
    field: usize,
    column: usize,
    pass: Pass,
}

/// Maps rows of one result set into `T`.
pub struct RowMapper<T: Record> {
    descriptor: RecordDescriptor<T>,
    columns: Vec<String>,
    bindings: Vec<Binding>,
    staged_rule: Rule,
}

impl<T: Record> RowMapper<T> {
    /// Resolve `T`'s fields against the cursor columns.
    ///
    /// Fields without a column and columns without a field are ignored. When a
    /// column name repeats, the first occurrence is used.
    pub fn new(columns: &[String], mode: CoercionMode) -> Self {
        let descriptor = T::describe();
        let bindings = descriptor
            .fields()
            .iter()
            .enumerate()
            .filter_map(|(field, descriptor)| {
                let column = columns.iter().position(|c| c == descriptor.column())?;
                let pass = match mode {
                    CoercionMode::Staged if descriptor.is_nullable() => Pass::Direct,
                    _ => Pass::Staged,
                };
                Some(Binding {
                    field,
                    column,
                    pass,
                })
            })
            .collect();

        let staged_rule = match mode {
            CoercionMode::Staged => Rule::Staged,
            CoercionMode::Declared => Rule::Declared,
        };

        Self {
            descriptor,
            columns: columns.to_vec(),
            bindings,
            staged_rule,
        }
    }

    /// Number of declared fields that matched a column.
    pub fn matched_fields(&self) -> usize {
        self.bindings.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Scan a driver row and materialize it.
    pub fn map_row<R: ScanRow>(&self, row: &R) -> Materialized<T> {
        match row.scan_values() {
            Ok(values) => self.map_values(&values),
            Err(err) => Materialized {
                record: T::default(),
                skipped: Vec::new(),
                scan_error: Some(err),
            },
        }
    }

    /// Materialize already scanned values, in cursor column order.
    pub fn map_values(&self, values: &[Value]) -> Materialized<T> {
        let mut record = T::default();
        let fields = self.descriptor.fields();

        for binding in self.bindings.iter().filter(|b| b.pass == Pass::Direct) {
            let field = &fields[binding.field];
            let Some(value) = values.get(binding.column) else {
                return self.scan_failure(record, field.column(), "column missing from row");
            };
            if let Err(err) = field.assign(&mut record, value, Rule::Driver) {
                return self.scan_failure(record, field.column(), err.to_string());
            }
        }

        let mut skipped = Vec::new();
        for binding in self.bindings.iter().filter(|b| b.pass == Pass::Staged) {
            let field = &fields[binding.field];
            let value = match values.get(binding.column) {
                Some(value) if !(value.is_null() && !field.is_nullable()) => value,
                _ => continue,
            };
            if let Err(err) = field.assign(&mut record, value, self.staged_rule) {
                warn!(
                    field = field.name(),
                    column = field.column(),
                    error = %err,
                    "Skipping field that cannot hold the column value"
                );
                skipped.push(SkippedField {
                    field: field.name(),
                    column: field.column().to_string(),
                    reason: err.to_string(),
                });
            }
        }

        Materialized {
            record,
            skipped,
            scan_error: None,
        }
    }

    fn scan_failure(&self, record: T, column: &str, message: impl Into<String>) -> Materialized<T> {
        Materialized {
            record,
            skipped: Vec::new(),
            scan_error: Some(DbError::scan(column, message)),
        }
    }
}

/// Column-ordered map of a row's non-NULL values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowMap {
    entries: Vec<(String, Value)>,
}

impl RowMap {
    /// Build from parallel column and value lists, omitting NULLs.
    pub fn from_columns(columns: Vec<String>, values: Vec<Value>) -> Self {
        let entries = columns
            .into_iter()
            .zip(values)
            .filter(|(_, value)| !value.is_null())
            .collect();
        Self { entries }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn contains_key(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn into_entries(self) -> Vec<(String, Value)> {
        self.entries
    }
}

impl Serialize for RowMap {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Scan a driver row into a [`RowMap`] with raw values.
pub fn row_to_map<R: ScanRow>(row: &R) -> DbResult<RowMap> {
    Ok(RowMap::from_columns(row.column_names(), row.scan_values()?))
}

/// Destinations for the leading columns of a row, scanned positionally.
///
/// Implemented for tuples of one to four [`FieldValue`]s. Values are
/// converted under the driver's rules.
pub trait FromColumns: Sized {
    const WIDTH: usize;

    fn from_values(columns: &[String], values: &[Value]) -> DbResult<Self>;
}

fn column_value<V: FieldValue>(columns: &[String], values: &[Value], idx: usize) -> DbResult<V> {
    let name = columns
        .get(idx)
        .cloned()
        .unwrap_or_else(|| idx.to_string());
    let value = values.get(idx).ok_or_else(|| {
        DbError::scan(
            name.clone(),
            format!("expected at least {} columns, got {}", idx + 1, values.len()),
        )
    })?;
    V::coerce(value, Rule::Driver).map_err(|e| DbError::scan(name, e.to_string()))
}

macro_rules! impl_from_columns {
    ($width:expr; $($ty:ident => $idx:tt),+) => {
        impl<$($ty: FieldValue),+> FromColumns for ($($ty,)+) {
            const WIDTH: usize = $width;

            fn from_values(columns: &[String], values: &[Value]) -> DbResult<Self> {
                Ok(($(column_value::<$ty>(columns, values, $idx)?,)+))
            }
        }
    };
}

impl_from_columns!(1; A => 0);
impl_from_columns!(2; A => 0, B => 1);
impl_from_columns!(3; A => 0, B => 1, C => 2);
impl_from_columns!(4; A => 0, B => 1, C => 2, D => 3);
