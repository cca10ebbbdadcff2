//! Connection pool management.
//!
//! A [`PoolManager`] owns two lazily initialised pool slots, `read` and
//! `write`, built from one set of [`DatabaseSettings`].
//!
//! # Design Decisions
//!
//! - **`OnceCell` per slot**: single-flight initialisation. Concurrent first
//!   callers wait for one attempt and share its pool
//! - **Cells swapped on close**: `close_all` replaces each cell with an empty
//!   one, so the next access initialises again instead of reusing a closed pool
//! - **Lazy connect then ping**: the driver pool is created without
//!   connecting and one connection is probed before the slot is considered
//!   ready, so an unreachable database fails the first access
//!
//! # Concurrency Safety
//!
//! - The slot locks are held only to clone or swap the `Arc<OnceCell>`, never
//!   across an await on the database
//! - Closing while queries are in flight is the caller's responsibility:
//!   pools handed out before `close_all` are closed underneath their users

use crate::config::{CoercionMode, DatabaseSettings, PoolOptions};
use crate::db::DatabaseType;
use crate::db::executor::QueryExecutor;
use crate::db::tunnel::{TcpDialer, TunnelDialer, TunnelRegistry};
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionConfig, Network};
use async_trait::async_trait;
use sqlx::pool::PoolOptions as SqlxPoolOptions;
use sqlx::{
    Connection, MySqlPool, SqlitePool, mysql::MySqlConnectOptions, sqlite::SqliteConnectOptions,
};
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock as TokioRwLock};
use tracing::{debug, info};

/// MySQL port used when the address has none.
pub const DEFAULT_MYSQL_PORT: u16 = 3306;

/// One of the two pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolSlot {
    Read,
    Write,
}

impl PoolSlot {
    pub fn from_read_only(read_only: bool) -> Self {
        if read_only { Self::Read } else { Self::Write }
    }
}

impl std::fmt::Display for PoolSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Close the connection pool.
    pub async fn close(&self) {
        impl_db_dispatch!(self, {
            MySql(p) => p.close().await,
            SQLite(p) => p.close().await,
        })
    }

    pub fn is_closed(&self) -> bool {
        impl_db_dispatch!(self, {
            MySql(p) => p.is_closed(),
            SQLite(p) => p.is_closed(),
        })
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::MySql(_) => DatabaseType::MySql,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Check out one connection and probe it.
    pub async fn ping(&self) -> DbResult<()> {
        impl_db_dispatch!(self, {
            MySql(p) => {
                let mut conn = p.acquire().await?;
                conn.ping().await?;
                Ok(())
            },
            SQLite(p) => {
                let mut conn = p.acquire().await?;
                conn.ping().await?;
                Ok(())
            },
        })
    }
}

/// Opens a driver pool for a resolved configuration.
///
/// The returned pool may connect lazily; the manager probes it afterwards.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, config: &ConnectionConfig) -> DbResult<DbPool>;
}

/// Default connector backed by sqlx pools.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlxConnector;

impl SqlxConnector {
    fn pool_options<DB: sqlx::Database>(opts: &PoolOptions) -> SqlxPoolOptions<DB> {
        SqlxPoolOptions::<DB>::new()
            .max_connections(opts.max_connections_or_default())
            .min_connections(opts.min_connections_or_default())
            .idle_timeout(Some(opts.idle_timeout_or_default()))
            .max_lifetime(Some(opts.max_lifetime_or_default()))
            .acquire_timeout(opts.acquire_timeout_or_default())
    }

    fn mysql_options(config: &ConnectionConfig) -> DbResult<MySqlConnectOptions> {
        if config.address.is_empty() {
            return Err(DbError::config(format!(
                "No address configured for the {} pool",
                config.slot
            )));
        }

        let mut options = MySqlConnectOptions::new()
            .username(&config.user)
            .password(&config.password)
            .charset("utf8mb4");

        options = match config.network {
            Network::Unix => options.socket(&config.address),
            _ => {
                let (host, port) = config.host_and_port();
                options.host(host).port(port.unwrap_or(DEFAULT_MYSQL_PORT))
            }
        };

        if !config.database.is_empty() {
            options = options.database(&config.database);
        }
        Ok(options)
    }

    fn sqlite_options(config: &ConnectionConfig) -> DbResult<SqliteConnectOptions> {
        if config.address.is_empty() {
            return Err(DbError::config(format!(
                "No SQLite file configured for the {} pool",
                config.slot
            )));
        }
        Ok(SqliteConnectOptions::new()
            .filename(&config.address)
            .create_if_missing(true))
    }
}

#[async_trait]
impl Connector for SqlxConnector {
    async fn open(&self, config: &ConnectionConfig) -> DbResult<DbPool> {
        match config.network {
            Network::Sqlite => {
                let options = Self::sqlite_options(config)?;
                let pool = Self::pool_options::<sqlx::Sqlite>(&config.pool_options)
                    .connect_lazy_with(options);
                Ok(DbPool::SQLite(pool))
            }
            Network::Tcp | Network::Unix | Network::Tunnel { .. } => {
                let options = Self::mysql_options(config)?;
                let pool = Self::pool_options::<sqlx::MySql>(&config.pool_options)
                    .connect_lazy_with(options);
                Ok(DbPool::MySql(pool))
            }
        }
    }
}

type Slot = TokioRwLock<Arc<OnceCell<DbPool>>>;

/// Owner of the read and write pools.
pub struct PoolManager {
    settings: DatabaseSettings,
    connector: Arc<dyn Connector>,
    tunnels: TunnelRegistry,
    read: Slot,
    write: Slot,
}

impl PoolManager {
    /// Manager using the sqlx connector and direct TCP tunnel dialing.
    pub fn new(settings: DatabaseSettings) -> Self {
        Self::with_parts(settings, Arc::new(SqlxConnector), Arc::new(TcpDialer))
    }

    pub fn with_connector(settings: DatabaseSettings, connector: Arc<dyn Connector>) -> Self {
        Self::with_parts(settings, connector, Arc::new(TcpDialer))
    }

    pub fn with_parts(
        settings: DatabaseSettings,
        connector: Arc<dyn Connector>,
        dialer: Arc<dyn TunnelDialer>,
    ) -> Self {
        Self {
            settings,
            connector,
            tunnels: TunnelRegistry::new(dialer),
            read: TokioRwLock::new(Arc::new(OnceCell::new())),
            write: TokioRwLock::new(Arc::new(OnceCell::new())),
        }
    }

    /// The process-wide manager built from the environment.
    pub fn global() -> DbResult<&'static PoolManager> {
        crate::db::global::manager()
    }

    pub fn settings(&self) -> &DatabaseSettings {
        &self.settings
    }

    pub fn coercion(&self) -> CoercionMode {
        self.settings.coercion
    }

    pub fn tunnels(&self) -> &TunnelRegistry {
        &self.tunnels
    }

    /// Query helpers bound to this manager's pools.
    pub fn executor(&self) -> QueryExecutor<'_> {
        QueryExecutor::new(self)
    }

    fn slot(&self, slot: PoolSlot) -> &Slot {
        match slot {
            PoolSlot::Read => &self.read,
            PoolSlot::Write => &self.write,
        }
    }

    /// Pool for reads (`true`) or writes (`false`), initialising it on first use.
    pub async fn get_pool(&self, read_only: bool) -> DbResult<DbPool> {
        self.pool(PoolSlot::from_read_only(read_only)).await
    }

    /// Pool for `slot`, initialising it on first use.
    ///
    /// Errors are fatal-class ([`DbError::is_fatal`]) and leave the slot
    /// uninitialised; nothing is retried here.
    pub async fn pool(&self, slot: PoolSlot) -> DbResult<DbPool> {
        let cell = Arc::clone(&*self.slot(slot).read().await);

        // OnceCell::get_or_try_init ensures single-flight pool creation
        let pool = cell.get_or_try_init(|| self.initialize(slot)).await?;
        Ok(pool.clone())
    }

    /// Whether `slot` currently holds a ready pool.
    pub async fn is_initialized(&self, slot: PoolSlot) -> bool {
        self.slot(slot).read().await.initialized()
    }

    async fn initialize(&self, slot: PoolSlot) -> DbResult<DbPool> {
        let mut config = ConnectionConfig::resolve(&self.settings, slot);
        if config.credentials_from != slot {
            info!(
                slot = %slot,
                "Read credentials incomplete, using write credentials"
            );
        }

        config
            .pool_options
            .validate()
            .map_err(DbError::config)?;

        let tunnel = config
            .tunnel()
            .map(|(network, instance)| (network.to_string(), instance.to_string()));
        if let Some((network, instance)) = tunnel {
            let local_addr = self.tunnels.register(&network, &instance).await?;
            config = config.with_local_address(local_addr);
        }

        debug!(slot = %slot, dsn = %config.masked_dsn(), "Opening connection pool");
        let pool = self.connector.open(&config).await.map_err(|e| {
            if e.is_fatal() {
                e
            } else {
                DbError::connection(
                    format!("Failed to open the {} pool: {}", slot, e),
                    "Check the DATABASE_* environment variables",
                )
            }
        })?;

        if let Err(e) = pool.ping().await {
            pool.close().await;
            return Err(DbError::ping(format!(
                "{} pool ({}): {}",
                slot,
                config.masked_dsn(),
                e
            )));
        }

        info!(
            slot = %slot,
            db_type = %pool.db_type(),
            network = %config.network,
            max_connections = config.pool_options.max_connections_or_default(),
            "Connection pool ready"
        );
        Ok(pool)
    }

    /// Close both pools and registered tunnels, and reset the slots.
    ///
    /// Idempotent. A later [`get_pool`](Self::get_pool) initialises afresh.
    pub async fn close_all(&self) -> DbResult<()> {
        for slot in [PoolSlot::Read, PoolSlot::Write] {
            // Swap under lock, close outside lock
            let cell = {
                let mut guard = self.slot(slot).write().await;
                std::mem::replace(&mut *guard, Arc::new(OnceCell::new()))
            };
            if let Some(pool) = cell.get() {
                info!(slot = %slot, "Closing connection pool");
                pool.close().await;
            }
        }

        self.tunnels.shutdown().await;
        Ok(())
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("settings", &self.settings)
            .field("tunnels", &self.tunnels)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkMode;

    fn mysql_config(address: &str, network: Network) -> ConnectionConfig {
        let settings = DatabaseSettings {
            database: "app".into(),
            user: "writer".into(),
            password: "secret".into(),
            host: address.into(),
            ..DatabaseSettings::empty()
        };
        let mut config = ConnectionConfig::resolve(&settings, PoolSlot::Write);
        config.network = network;
        config
    }

    #[test]
    fn test_slot_from_read_only() {
        assert_eq!(PoolSlot::from_read_only(true), PoolSlot::Read);
        assert_eq!(PoolSlot::from_read_only(false), PoolSlot::Write);
        assert_eq!(PoolSlot::Read.to_string(), "read");
        assert_eq!(PoolSlot::Write.to_string(), "write");
    }

    #[test]
    fn test_mysql_options_tcp() {
        let options =
            SqlxConnector::mysql_options(&mysql_config("db.internal:3307", Network::Tcp)).unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 3307);
        assert_eq!(options.get_username(), "writer");
        assert_eq!(options.get_database(), Some("app"));
    }

    #[test]
    fn test_mysql_options_default_port_and_socket() {
        let options =
            SqlxConnector::mysql_options(&mysql_config("db.internal", Network::Tcp)).unwrap();
        assert_eq!(options.get_port(), DEFAULT_MYSQL_PORT);

        let options =
            SqlxConnector::mysql_options(&mysql_config("/var/run/mysqld.sock", Network::Unix))
                .unwrap();
        assert_eq!(
            options.get_socket().map(|p| p.to_string_lossy().into_owned()),
            Some("/var/run/mysqld.sock".to_string())
        );
    }

    #[test]
    fn test_missing_address_is_config_error() {
        let err = SqlxConnector::mysql_options(&mysql_config("", Network::Tcp)).unwrap_err();
        assert!(matches!(err, DbError::Config { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_unreachable_sqlite_fails_with_ping_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("app.db");
        let manager = PoolManager::new(DatabaseSettings::sqlite(path.to_string_lossy()));

        let err = manager.get_pool(false).await.unwrap_err();
        assert!(matches!(err, DbError::Ping { .. }), "got {:?}", err);
        assert!(err.is_fatal());
        assert!(!manager.is_initialized(PoolSlot::Write).await);
    }

    #[tokio::test]
    async fn test_invalid_pool_limits_are_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = DatabaseSettings::sqlite(dir.path().join("app.db").to_string_lossy());
        settings.max_connections = Some(0);
        assert_eq!(settings.mode, NetworkMode::Sqlite);

        let manager = PoolManager::new(settings);
        let err = manager.get_pool(true).await.unwrap_err();
        assert!(matches!(err, DbError::Config { .. }));
    }
}
