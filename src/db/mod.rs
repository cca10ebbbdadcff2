//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Read/write connection pool management and tunnel registration
//! - Query execution
//! - Materialization of rows into records and maps
//! - Type mappings and value coercion
//! - Query timing diagnostics
//! - Database dispatch macros for reducing code duplication

#[macro_use]
pub mod macros;
pub mod coerce;
pub mod diagnostics;
pub mod executor;
pub mod global;
pub mod materialize;
pub mod params;
pub mod pool;
pub mod record;
pub mod tunnel;
pub mod types;

pub use coerce::{CoercionError, FieldKind, FieldValue, Rule};
pub use diagnostics::{is_logging, render_query, set_logging};
pub use executor::QueryExecutor;
pub use macros::DatabaseType;
pub use materialize::{FromColumns, Materialized, RowMap, RowMapper, SkippedField, row_to_map};
pub use pool::{Connector, DbPool, PoolManager, PoolSlot, SqlxConnector};
pub use record::{FieldDescriptor, Record, RecordDescriptor, snake_case};
pub use tunnel::{TcpDialer, TunnelDialer, TunnelRegistry, TunnelStream};
pub use types::{DbRow, ScanRow, Value};
