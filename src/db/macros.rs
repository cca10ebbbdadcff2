//! Backend dispatch over [`DbPool`](crate::db::DbPool).
//!
//! The pool manager, executor and row types each hold either a MySQL or a
//! SQLite handle. `impl_db_dispatch!` writes the match over both so call sites
//! read as one expression per backend.

/// Backend behind a pool or row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    MySql,
    SQLite,
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MySql => write!(f, "MySQL"),
            Self::SQLite => write!(f, "SQLite"),
        }
    }
}

/// Match a `DbPool` and evaluate one body per backend.
///
/// Both arms usually share the same body text and differ only in the concrete
/// pool type bound to `$p`.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(pool, {
///     MySql(p) => mysql::fetch_rows(p, sql, params).await,
///     SQLite(p) => sqlite::fetch_rows(p, sql, params).await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::pool::DbPool::$variant($p) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_type_debug() {
        assert_eq!(format!("{:?}", DatabaseType::MySql), "MySql");
        assert_eq!(format!("{:?}", DatabaseType::SQLite), "SQLite");
    }

    #[test]
    fn test_database_type_display() {
        assert_eq!(DatabaseType::MySql.to_string(), "MySQL");
        assert_eq!(DatabaseType::SQLite.to_string(), "SQLite");
        assert_ne!(DatabaseType::MySql, DatabaseType::SQLite);
    }
}
