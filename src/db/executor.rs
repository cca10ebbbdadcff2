//! Query execution helpers.
//!
//! Each helper obtains a pool from its [`PoolManager`], runs one
//! parameterized statement and hands the fetched rows to the materialization
//! engine. Reads go to the read pool, [`QueryExecutor::execute`] to the write
//! pool. Rows are fully fetched before the connection returns to the pool.
//!
//! # Architecture
//!
//! The executor uses database-specific implementations organized in submodules:
//! - `mysql`: MySQL-specific fetch and execute
//! - `sqlite`: SQLite-specific fetch and execute
//!
//! Each submodule provides identical functionality adapted to the database's type system.

use crate::config::CoercionMode;
use crate::db::coerce::{FieldValue, Rule};
use crate::db::diagnostics::QueryTimer;
use crate::db::materialize::{FromColumns, Materialized, RowMap, RowMapper, row_to_map};
use crate::db::pool::{DbPool, PoolManager};
use crate::db::record::Record;
use crate::db::types::{DbRow, ScanRow};
use crate::error::{DbError, DbResult};
use crate::models::{ExecResult, QueryParam};
use tracing::debug;

/// Query helpers bound to a [`PoolManager`].
#[derive(Debug, Clone, Copy)]
pub struct QueryExecutor<'m> {
    manager: &'m PoolManager,
    mode: CoercionMode,
}

impl<'m> QueryExecutor<'m> {
    /// Executor using the manager's configured coercion mode.
    pub fn new(manager: &'m PoolManager) -> Self {
        Self {
            manager,
            mode: manager.coercion(),
        }
    }

    /// Override the coercion mode for this executor.
    pub fn with_coercion(mut self, mode: CoercionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn coercion(&self) -> CoercionMode {
        self.mode
    }

    async fn read_pool(&self) -> DbResult<DbPool> {
        self.manager.get_pool(true).await
    }

    /// First row as `T`, or `None` when the query yields no rows.
    pub async fn fetch_one<T: Record>(
        &self,
        query: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<T>> {
        self.fetch_one_detailed(query, params)
            .await?
            .map(Materialized::into_result)
            .transpose()
    }

    /// Like [`fetch_one`](Self::fetch_one), keeping the partly filled record
    /// alongside its skipped fields and scan error.
    pub async fn fetch_one_detailed<T: Record>(
        &self,
        query: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<Materialized<T>>> {
        let _timer = QueryTimer::start(query, params);
        let pool = self.read_pool().await?;
        debug!(sql = %query, params = params.len(), "Fetching one row");

        Ok(impl_db_dispatch!(&pool, {
            MySql(p) => mysql::fetch_optional(p, query, params)
                .await?
                .map(|row| materialize_row::<T, _>(&row, self.mode)),
            SQLite(p) => sqlite::fetch_optional(p, query, params)
                .await?
                .map(|row| materialize_row::<T, _>(&row, self.mode)),
        }))
    }

    /// Every row as `T`, in cursor order. Empty when the query yields no rows.
    pub async fn fetch_all<T: Record>(
        &self,
        query: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<T>> {
        self.fetch_all_detailed(query, params)
            .await?
            .into_iter()
            .map(Materialized::into_result)
            .collect()
    }

    /// Like [`fetch_all`](Self::fetch_all), keeping per-row skipped fields and
    /// scan errors for the caller to inspect.
    pub async fn fetch_all_detailed<T: Record>(
        &self,
        query: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<Materialized<T>>> {
        let _timer = QueryTimer::start(query, params);
        let pool = self.read_pool().await?;
        debug!(sql = %query, params = params.len(), "Fetching all rows");

        Ok(impl_db_dispatch!(&pool, {
            MySql(p) => materialize_rows(&mysql::fetch_all(p, query, params).await?, self.mode),
            SQLite(p) => materialize_rows(&sqlite::fetch_all(p, query, params).await?, self.mode),
        }))
    }

    /// Leading columns of the first row, scanned positionally.
    ///
    /// Fails with [`DbError::NoRows`] when the query yields no rows.
    pub async fn fetch_column<C: FromColumns>(
        &self,
        query: &str,
        params: &[QueryParam],
    ) -> DbResult<C> {
        let _timer = QueryTimer::start(query, params);
        let pool = self.read_pool().await?;
        debug!(sql = %query, params = params.len(), width = C::WIDTH, "Fetching columns");

        impl_db_dispatch!(&pool, {
            MySql(p) => match mysql::fetch_optional(p, query, params).await? {
                Some(row) => scan_columns(&row),
                None => Err(DbError::NoRows),
            },
            SQLite(p) => match sqlite::fetch_optional(p, query, params).await? {
                Some(row) => scan_columns(&row),
                None => Err(DbError::NoRows),
            },
        })
    }

    /// First column of every row. The first value that cannot be converted
    /// fails the whole call.
    pub async fn fetch_column_slice<V: FieldValue>(
        &self,
        query: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<V>> {
        let _timer = QueryTimer::start(query, params);
        let pool = self.read_pool().await?;
        debug!(sql = %query, params = params.len(), "Fetching column slice");

        impl_db_dispatch!(&pool, {
            MySql(p) => first_column(&mysql::fetch_all(p, query, params).await?),
            SQLite(p) => first_column(&sqlite::fetch_all(p, query, params).await?),
        })
    }

    /// Every row as a column-ordered map of raw values, NULLs omitted.
    pub async fn fetch_all_as_maps(
        &self,
        query: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<RowMap>> {
        let _timer = QueryTimer::start(query, params);
        let pool = self.read_pool().await?;
        debug!(sql = %query, params = params.len(), "Fetching rows as maps");

        impl_db_dispatch!(&pool, {
            MySql(p) => mysql::fetch_all(p, query, params).await?.iter().map(row_to_map).collect(),
            SQLite(p) => sqlite::fetch_all(p, query, params).await?.iter().map(row_to_map).collect(),
        })
    }

    /// Raw driver rows from the read pool.
    pub async fn fetch_rows(&self, query: &str, params: &[QueryParam]) -> DbResult<Vec<DbRow>> {
        let _timer = QueryTimer::start(query, params);
        let pool = self.read_pool().await?;
        debug!(sql = %query, params = params.len(), "Fetching raw rows");

        Ok(impl_db_dispatch!(&pool, {
            MySql(p) => mysql::fetch_all(p, query, params)
                .await?
                .into_iter()
                .map(DbRow::MySql)
                .collect(),
            SQLite(p) => sqlite::fetch_all(p, query, params)
                .await?
                .into_iter()
                .map(DbRow::SQLite)
                .collect(),
        }))
    }

    /// Run a mutating statement on the write pool.
    pub async fn execute(&self, query: &str, params: &[QueryParam]) -> DbResult<ExecResult> {
        let _timer = QueryTimer::start(query, params);
        let pool = self.manager.get_pool(false).await?;
        debug!(sql = %query, params = params.len(), "Executing write operation");

        impl_db_dispatch!(&pool, {
            MySql(p) => mysql::execute(p, query, params).await,
            SQLite(p) => sqlite::execute(p, query, params).await,
        })
    }
}

// =============================================================================
// Common Helper Functions
// =============================================================================

fn materialize_row<T: Record, R: ScanRow>(row: &R, mode: CoercionMode) -> Materialized<T> {
    RowMapper::<T>::new(&row.column_names(), mode).map_row(row)
}

fn materialize_rows<T: Record, R: ScanRow>(rows: &[R], mode: CoercionMode) -> Vec<Materialized<T>> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    // Columns are resolved once per result set
    let mapper = RowMapper::<T>::new(&first.column_names(), mode);
    rows.iter().map(|row| mapper.map_row(row)).collect()
}

fn scan_columns<C: FromColumns, R: ScanRow>(row: &R) -> DbResult<C> {
    C::from_values(&row.column_names(), &row.scan_values()?)
}

fn first_column<V: FieldValue, R: ScanRow>(rows: &[R]) -> DbResult<Vec<V>> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let column = first
        .column_names()
        .into_iter()
        .next()
        .ok_or_else(|| DbError::scan("0", "query returned no columns"))?;

    rows.iter()
        .map(|row| {
            let values = row.scan_values()?;
            let value = values
                .first()
                .ok_or_else(|| DbError::scan(column.clone(), "row has no columns"))?;
            V::coerce(value, Rule::Driver).map_err(|e| DbError::scan(column.clone(), e.to_string()))
        })
        .collect()
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// The code structure is intentionally parallel to make differences obvious.

mod mysql {
    use super::*;
    use crate::db::params::bind_mysql_param;
    use sqlx::mysql::MySqlRow;
    use sqlx::{Executor, MySqlPool};

    pub async fn fetch_all(
        pool: &MySqlPool,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<MySqlRow>> {
        // When params is empty, use raw SQL to avoid prepared statement issues
        if params.is_empty() {
            return Ok(pool.fetch_all(sql).await?);
        }
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_mysql_param(query, param);
        }
        Ok(query.fetch_all(pool).await?)
    }

    pub async fn fetch_optional(
        pool: &MySqlPool,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<MySqlRow>> {
        if params.is_empty() {
            return Ok(pool.fetch_optional(sql).await?);
        }
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_mysql_param(query, param);
        }
        Ok(query.fetch_optional(pool).await?)
    }

    pub async fn execute(pool: &MySqlPool, sql: &str, params: &[QueryParam]) -> DbResult<ExecResult> {
        // Some statements (e.g. CREATE PROCEDURE) don't support prepared statements
        let result = if params.is_empty() {
            pool.execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_param(query, param);
            }
            query.execute(pool).await?
        };

        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: result.last_insert_id(),
        })
    }
}

mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_param;
    use sqlx::sqlite::SqliteRow;
    use sqlx::{Executor, SqlitePool};

    pub async fn fetch_all(
        pool: &SqlitePool,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<SqliteRow>> {
        if params.is_empty() {
            return Ok(pool.fetch_all(sql).await?);
        }
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_sqlite_param(query, param);
        }
        Ok(query.fetch_all(pool).await?)
    }

    pub async fn fetch_optional(
        pool: &SqlitePool,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<SqliteRow>> {
        if params.is_empty() {
            return Ok(pool.fetch_optional(sql).await?);
        }
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_sqlite_param(query, param);
        }
        Ok(query.fetch_optional(pool).await?)
    }

    pub async fn execute(
        pool: &SqlitePool,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<ExecResult> {
        let result = if params.is_empty() {
            pool.execute(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            query.execute(pool).await?
        };

        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            // Negative rowids cannot be represented; report none
            last_insert_id: u64::try_from(result.last_insert_rowid()).unwrap_or(0),
        })
    }
}
