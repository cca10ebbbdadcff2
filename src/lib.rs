//! Database access layer for short-lived function instances.
//!
//! Two lazily initialised connection pools (read replica and primary) are
//! resolved once per process from the environment and reused across
//! invocations. Query helpers return typed records instead of raw cursors.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod telemetry;

pub use config::{CoercionMode, DatabaseSettings};
pub use db::{PoolManager, PoolSlot, QueryExecutor, Record, RecordDescriptor};
pub use error::{DbError, DbResult};
pub use models::{ExecResult, QueryParam};
