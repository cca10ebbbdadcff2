//! Process-wide default pools.
//!
//! The first call to any function here loads [`DatabaseSettings`] from the
//! environment and creates the shared [`PoolManager`]; later calls reuse it.
//! Hosts that need a custom connector install their own manager first with
//! [`install`].
//!
//! ```no_run
//! use ephemeral_db::db::{Record, RecordDescriptor, global};
//! use ephemeral_db::params;
//!
//! #[derive(Default)]
//! struct Todo {
//!     id: i64,
//!     title: String,
//! }
//!
//! impl Record for Todo {
//!     fn describe() -> RecordDescriptor<Self> {
//!         RecordDescriptor::new()
//!             .field("id", |t: &mut Todo, v| t.id = v)
//!             .field("title", |t: &mut Todo, v| t.title = v)
//!     }
//! }
//!
//! # async fn run() -> ephemeral_db::DbResult<()> {
//! let todo: Option<Todo> = global::fetch_one("SELECT id, title FROM todos WHERE id = ?", &params![7]).await?;
//! global::execute("INSERT INTO todos (title) VALUES (?)", &params!["write docs"]).await?;
//! global::close_all().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::DatabaseSettings;
use crate::db::coerce::FieldValue;
use crate::db::diagnostics;
use crate::db::materialize::{FromColumns, Materialized, RowMap};
use crate::db::pool::{DbPool, PoolManager};
use crate::db::record::Record;
use crate::db::types::DbRow;
use crate::error::DbResult;
use crate::models::{ExecResult, QueryParam};
use std::sync::OnceLock;
use tracing::debug;

static GLOBAL: OnceLock<PoolManager> = OnceLock::new();

/// The shared manager, created from the environment on first use.
pub fn manager() -> DbResult<&'static PoolManager> {
    if let Some(manager) = GLOBAL.get() {
        return Ok(manager);
    }

    let settings = DatabaseSettings::from_env()?;
    Ok(GLOBAL.get_or_init(|| {
        debug!(settings = ?settings, "Creating process-wide pool manager");
        if settings.logging {
            diagnostics::set_logging(true);
        }
        PoolManager::new(settings)
    }))
}

/// Use `manager` as the shared manager.
///
/// Fails, returning the manager, if one was already created.
pub fn install(manager: PoolManager) -> Result<(), PoolManager> {
    GLOBAL.set(manager)
}

pub async fn get_pool(read_only: bool) -> DbResult<DbPool> {
    manager()?.get_pool(read_only).await
}

pub async fn close_all() -> DbResult<()> {
    match GLOBAL.get() {
        Some(manager) => manager.close_all().await,
        None => Ok(()),
    }
}

pub async fn fetch_one<T: Record>(query: &str, params: &[QueryParam]) -> DbResult<Option<T>> {
    manager()?.executor().fetch_one(query, params).await
}

pub async fn fetch_one_detailed<T: Record>(
    query: &str,
    params: &[QueryParam],
) -> DbResult<Option<Materialized<T>>> {
    manager()?.executor().fetch_one_detailed(query, params).await
}

pub async fn fetch_all<T: Record>(query: &str, params: &[QueryParam]) -> DbResult<Vec<T>> {
    manager()?.executor().fetch_all(query, params).await
}

pub async fn fetch_column<C: FromColumns>(query: &str, params: &[QueryParam]) -> DbResult<C> {
    manager()?.executor().fetch_column(query, params).await
}

pub async fn fetch_column_slice<V: FieldValue>(
    query: &str,
    params: &[QueryParam],
) -> DbResult<Vec<V>> {
    manager()?.executor().fetch_column_slice(query, params).await
}

pub async fn fetch_all_as_maps(query: &str, params: &[QueryParam]) -> DbResult<Vec<RowMap>> {
    manager()?.executor().fetch_all_as_maps(query, params).await
}

pub async fn fetch_rows(query: &str, params: &[QueryParam]) -> DbResult<Vec<DbRow>> {
    manager()?.executor().fetch_rows(query, params).await
}

pub async fn execute(query: &str, params: &[QueryParam]) -> DbResult<ExecResult> {
    manager()?.executor().execute(query, params).await
}
