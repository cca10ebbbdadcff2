//! Environment-backed configuration.
//!
//! All values are read from the process environment through `clap`'s `env`
//! bindings. No argv is consulted by [`DatabaseSettings::from_env`], so the
//! settings can be loaded from inside any host process.

use crate::db::PoolSlot;
use crate::error::{DbError, DbResult};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, ValueEnum};
use std::time::Duration;

// Pool configuration defaults, sized for instances that are recycled often
pub const DEFAULT_MAX_CONNECTIONS: u32 = 1;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 0;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_MAX_LIFETIME_MS: u64 = 5_000;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Connection pool limits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolOptions {
    /// Maximum open connections (default: 1)
    pub max_connections: Option<u32>,
    /// Minimum idle connections kept open (default: 0)
    pub min_connections: Option<u32>,
    /// Idle timeout in milliseconds (default: 1000)
    pub idle_timeout_ms: Option<u64>,
    /// Connection lifetime in milliseconds (default: 5000)
    pub max_lifetime_ms: Option<u64>,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: Option<u64>,
}

impl PoolOptions {
    pub fn max_connections_or_default(&self) -> u32 {
        self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS)
    }

    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    pub fn idle_timeout_or_default(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms.unwrap_or(DEFAULT_IDLE_TIMEOUT_MS))
    }

    pub fn max_lifetime_or_default(&self) -> Duration {
        Duration::from_millis(self.max_lifetime_ms.unwrap_or(DEFAULT_MAX_LIFETIME_MS))
    }

    pub fn acquire_timeout_or_default(&self) -> Duration {
        Duration::from_secs(
            self.acquire_timeout_secs
                .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        )
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        let max = self.max_connections_or_default();
        if max == 0 {
            return Err("max_connections must be greater than 0".to_string());
        }
        let min = self.min_connections_or_default();
        if min > max {
            return Err(format!(
                "min_connections ({}) cannot exceed max_connections ({})",
                min, max
            ));
        }
        Ok(())
    }
}

/// How the driver reaches the database when no tunnel is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum NetworkMode {
    /// `host[:port]` over TCP
    #[default]
    Tcp,
    /// Path to a unix domain socket
    Unix,
    /// Path to a SQLite database file (local development and tests)
    Sqlite,
}

impl std::fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Unix => write!(f, "unix"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// How staged values are coerced into record fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CoercionMode {
    /// Only non-nullable fields are staged; lenient, lossy conversion
    #[default]
    Staged,
    /// Every field is converted according to its declared kind
    Declared,
}

/// Role-specific credentials exactly as found in the environment.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
    pub host: String,
    /// Managed-instance identifier for the secure tunnel, empty when unset.
    pub instance: String,
}

impl Credentials {
    /// A role is usable on its own when user, password and some address exist.
    ///
    /// A configured tunnel instance stands in for the address because the
    /// address is redirected to the tunnel's loopback endpoint.
    pub fn is_complete(&self) -> bool {
        !self.user.is_empty()
            && !self.password.is_empty()
            && (!self.host.is_empty() || !self.instance.is_empty())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"****")
            .field("host", &self.host)
            .field("instance", &self.instance)
            .finish()
    }
}

/// Database settings resolved from the environment.
#[derive(Clone, Parser)]
#[command(
    name = "ephemeral-db",
    about = "Database settings for short-lived function instances",
    version
)]
pub struct DatabaseSettings {
    /// Database (schema) name
    #[arg(long, env = "DATABASE_NAME", default_value = "")]
    pub database: String,

    /// Network mode used when no tunnel instance is configured
    #[arg(long, value_enum, env = "DATABASE_MODE", default_value = "tcp")]
    pub mode: NetworkMode,

    /// Primary host, socket path or SQLite file
    #[arg(long, env = "DATABASE_HOST", default_value = "")]
    pub host: String,

    #[arg(long, env = "DATABASE_USERNAME", default_value = "")]
    pub user: String,

    #[arg(long, env = "DATABASE_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,

    /// Managed instance reached through the secure tunnel for the primary
    #[arg(long, env = "DATABASE_INSTANCES", default_value = "")]
    pub instance: String,

    /// Read-replica host, socket path or SQLite file
    #[arg(long, env = "DATABASE_READ_HOST", default_value = "")]
    pub read_host: String,

    #[arg(long, env = "DATABASE_READ_USERNAME", default_value = "")]
    pub read_user: String,

    #[arg(
        long,
        env = "DATABASE_READ_PASSWORD",
        default_value = "",
        hide_env_values = true
    )]
    pub read_password: String,

    /// Managed instance reached through the secure tunnel for the replica
    #[arg(long, env = "DATABASE_READ_INSTANCES", default_value = "")]
    pub read_instance: String,

    /// Log every query with its elapsed time (`1`, `true`, `yes`, `on`, ...)
    #[arg(
        long,
        env = "DATABASE_LOGGING",
        action = ArgAction::Set,
        default_value_t = false,
        value_parser = BoolishValueParser::new()
    )]
    pub logging: bool,

    /// Coercion applied when materializing records
    #[arg(long, value_enum, env = "DATABASE_COERCION", default_value = "staged")]
    pub coercion: CoercionMode,

    #[arg(long, env = "DATABASE_MAX_CONNECTIONS")]
    pub max_connections: Option<u32>,

    #[arg(long, env = "DATABASE_MIN_CONNECTIONS")]
    pub min_connections: Option<u32>,

    #[arg(long, env = "DATABASE_IDLE_TIMEOUT_MS")]
    pub idle_timeout_ms: Option<u64>,

    #[arg(long, env = "DATABASE_MAX_LIFETIME_MS")]
    pub max_lifetime_ms: Option<u64>,

    #[arg(long, env = "DATABASE_ACQUIRE_TIMEOUT_SECS")]
    pub acquire_timeout_secs: Option<u64>,
}

impl DatabaseSettings {
    /// Load settings from the process environment only.
    pub fn from_env() -> DbResult<Self> {
        Self::try_parse_from([env!("CARGO_PKG_NAME")])
            .map_err(|e| DbError::config(e.to_string()))
    }

    /// Settings for a local SQLite file, with the same file for both roles.
    pub fn sqlite(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            mode: NetworkMode::Sqlite,
            host: path,
            user: "local".to_string(),
            password: "local".to_string(),
            ..Self::empty()
        }
    }

    /// Settings with every value unset.
    pub fn empty() -> Self {
        Self {
            database: String::new(),
            mode: NetworkMode::Tcp,
            host: String::new(),
            user: String::new(),
            password: String::new(),
            instance: String::new(),
            read_host: String::new(),
            read_user: String::new(),
            read_password: String::new(),
            read_instance: String::new(),
            logging: false,
            coercion: CoercionMode::Staged,
            max_connections: None,
            min_connections: None,
            idle_timeout_ms: None,
            max_lifetime_ms: None,
            acquire_timeout_secs: None,
        }
    }

    /// Raw credentials for one role, without any fallback applied.
    pub fn credentials(&self, slot: PoolSlot) -> Credentials {
        match slot {
            PoolSlot::Read => Credentials {
                user: self.read_user.clone(),
                password: self.read_password.clone(),
                host: self.read_host.clone(),
                instance: self.read_instance.clone(),
            },
            PoolSlot::Write => Credentials {
                user: self.user.clone(),
                password: self.password.clone(),
                host: self.host.clone(),
                instance: self.instance.clone(),
            },
        }
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            idle_timeout_ms: self.idle_timeout_ms,
            max_lifetime_ms: self.max_lifetime_ms,
            acquire_timeout_secs: self.acquire_timeout_secs,
        }
    }
}

impl std::fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("database", &self.database)
            .field("mode", &self.mode)
            .field("write", &self.credentials(PoolSlot::Write))
            .field("read", &self.credentials(PoolSlot::Read))
            .field("logging", &self.logging)
            .field("coercion", &self.coercion)
            .field("pool", &self.pool_options())
            .finish()
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> DatabaseSettings {
        let mut argv = vec!["ephemeral-db"];
        argv.extend_from_slice(args);
        DatabaseSettings::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_pool_options_defaults() {
        let opts = PoolOptions::default();
        assert_eq!(opts.max_connections_or_default(), 1);
        assert_eq!(opts.min_connections_or_default(), 0);
        assert_eq!(opts.idle_timeout_or_default(), Duration::from_secs(1));
        assert_eq!(opts.max_lifetime_or_default(), Duration::from_secs(5));
        assert_eq!(opts.acquire_timeout_or_default(), Duration::from_secs(30));
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_pool_options_validation() {
        let zero = PoolOptions {
            max_connections: Some(0),
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let inverted = PoolOptions {
            max_connections: Some(2),
            min_connections: Some(3),
            ..Default::default()
        };
        let err = inverted.validate().unwrap_err();
        assert!(err.contains("cannot exceed"));
    }

    #[test]
    fn test_parse_credentials_per_role() {
        let settings = parse(&[
            "--user",
            "writer",
            "--password",
            "wpass",
            "--host",
            "primary:3306",
            "--read-user",
            "reader",
            "--read-password",
            "rpass",
            "--read-host",
            "replica:3306",
        ]);

        let write = settings.credentials(PoolSlot::Write);
        assert_eq!(write.user, "writer");
        assert_eq!(write.host, "primary:3306");

        let read = settings.credentials(PoolSlot::Read);
        assert_eq!(read.user, "reader");
        assert_eq!(read.password, "rpass");
        assert!(read.is_complete());
    }

    #[test]
    fn test_parse_modes() {
        assert_eq!(parse(&[]).mode, NetworkMode::Tcp);
        assert_eq!(parse(&["--mode", "unix"]).mode, NetworkMode::Unix);
        assert_eq!(parse(&["--mode", "sqlite"]).mode, NetworkMode::Sqlite);
        assert_eq!(
            parse(&["--coercion", "declared"]).coercion,
            CoercionMode::Declared
        );
    }

    #[test]
    fn test_credentials_completeness() {
        let mut creds = Credentials {
            user: "u".into(),
            password: "p".into(),
            host: String::new(),
            instance: String::new(),
        };
        assert!(!creds.is_complete());

        creds.instance = "project:region:db".into();
        assert!(creds.is_complete());

        creds.password.clear();
        assert!(!creds.is_complete());
    }

    #[test]
    fn test_debug_masks_passwords() {
        let settings = parse(&["--password", "hunter2", "--read-password", "s3cret"]);
        let rendered = format!("{:?}", settings);
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("****"));
    }

    #[test]
    fn test_logging_accepts_boolish_values() {
        for value in ["1", "true", "yes", "on"] {
            assert!(parse(&["--logging", value]).logging, "{}", value);
        }
        for value in ["0", "false", "no", "off"] {
            assert!(!parse(&["--logging", value]).logging, "{}", value);
        }
        assert!(DatabaseSettings::try_parse_from(["ephemeral-db", "--logging", "maybe"]).is_err());
    }

    #[test]
    fn test_sqlite_settings() {
        let settings = DatabaseSettings::sqlite("/tmp/app.db");
        assert_eq!(settings.mode, NetworkMode::Sqlite);
        assert!(settings.credentials(PoolSlot::Write).is_complete());
        assert!(!settings.credentials(PoolSlot::Read).is_complete());
    }
}
