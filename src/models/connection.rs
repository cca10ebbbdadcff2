//! Connection-related data models.
//!
//! This module defines the resolved configuration a pool slot is opened with.

use crate::config::{Credentials, DatabaseSettings, NetworkMode, PoolOptions};
use crate::db::PoolSlot;
use std::net::SocketAddr;

/// Network the driver dials for a resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Network {
    Tcp,
    Unix,
    Sqlite,
    /// Loopback forwarder registered under `name` for a managed instance.
    Tunnel { name: String, instance: String },
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Unix => write!(f, "unix"),
            Self::Sqlite => write!(f, "sqlite"),
            Self::Tunnel { name, .. } => write!(f, "{}", name),
        }
    }
}

/// Network name a tunnel for the given role is registered under.
pub fn tunnel_network_name(role: PoolSlot) -> String {
    format!("tunnel_{}", role)
}

/// Fully resolved configuration for one pool slot.
///
/// Built once per slot initialisation and never mutated; redirecting the
/// address to a tunnel produces a new value.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Slot the pool is opened for.
    pub slot: PoolSlot,
    /// Role whose credentials were used. Differs from `slot` after fallback.
    pub credentials_from: PoolSlot,
    pub database: String,
    pub network: Network,
    pub user: String,
    /// Contains sensitive data - never log
    pub password: String,
    /// `host[:port]`, socket path or file path, depending on `network`.
    pub address: String,
    pub pool_options: PoolOptions,
}

impl ConnectionConfig {
    /// Resolve the configuration for `slot`.
    ///
    /// The read slot uses the read credentials only when they are complete;
    /// otherwise the write credentials are taken in full, never merged field
    /// by field. The write slot has no fallback.
    pub fn resolve(settings: &DatabaseSettings, slot: PoolSlot) -> Self {
        let mut role = slot;
        let mut creds = settings.credentials(slot);

        if slot == PoolSlot::Read && !creds.is_complete() {
            role = PoolSlot::Write;
            creds = settings.credentials(PoolSlot::Write);
        }

        Self::from_credentials(settings, slot, role, creds)
    }

    fn from_credentials(
        settings: &DatabaseSettings,
        slot: PoolSlot,
        role: PoolSlot,
        creds: Credentials,
    ) -> Self {
        let network = if creds.instance.is_empty() {
            match settings.mode {
                NetworkMode::Tcp => Network::Tcp,
                NetworkMode::Unix => Network::Unix,
                NetworkMode::Sqlite => Network::Sqlite,
            }
        } else {
            Network::Tunnel {
                name: tunnel_network_name(role),
                instance: creds.instance,
            }
        };

        Self {
            slot,
            credentials_from: role,
            database: settings.database.clone(),
            network,
            user: creds.user,
            password: creds.password,
            address: creds.host,
            pool_options: settings.pool_options(),
        }
    }

    /// The tunnel this configuration needs, as `(network name, instance)`.
    pub fn tunnel(&self) -> Option<(&str, &str)> {
        match &self.network {
            Network::Tunnel { name, instance } => Some((name, instance)),
            _ => None,
        }
    }

    /// Point the configuration at a tunnel's loopback endpoint.
    pub fn with_local_address(mut self, addr: SocketAddr) -> Self {
        self.address = addr.to_string();
        self
    }

    /// Split `address` into host and optional port.
    pub fn host_and_port(&self) -> (&str, Option<u16>) {
        match self.address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && !host.ends_with(':') => {
                match port.parse() {
                    Ok(port) => (host.trim_start_matches('[').trim_end_matches(']'), Some(port)),
                    Err(_) => (self.address.as_str(), None),
                }
            }
            _ => (self.address.as_str(), None),
        }
    }

    /// Display-safe DSN (password masked).
    pub fn masked_dsn(&self) -> String {
        match self.network {
            Network::Sqlite => format!("sqlite:{}", self.address),
            _ => format!(
                "mysql://{}:****@{}({})/{}",
                self.user, self.network, self.address, self.database
            ),
        }
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("slot", &self.slot)
            .field("credentials_from", &self.credentials_from)
            .field("dsn", &self.masked_dsn())
            .field("pool_options", &self.pool_options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> DatabaseSettings {
        DatabaseSettings {
            database: "app".into(),
            user: "writer".into(),
            password: "wpass".into(),
            host: "primary:3306".into(),
            read_user: "reader".into(),
            read_password: "rpass".into(),
            read_host: "replica:3306".into(),
            ..DatabaseSettings::empty()
        }
    }

    #[test]
    fn test_read_slot_uses_read_credentials() {
        let config = ConnectionConfig::resolve(&settings(), PoolSlot::Read);
        assert_eq!(config.credentials_from, PoolSlot::Read);
        assert_eq!(config.user, "reader");
        assert_eq!(config.address, "replica:3306");
        assert_eq!(config.network, Network::Tcp);
    }

    #[test]
    fn test_read_fallback_is_total() {
        for missing in ["user", "password", "host"] {
            let mut s = settings();
            match missing {
                "user" => s.read_user.clear(),
                "password" => s.read_password.clear(),
                _ => s.read_host.clear(),
            }
            let config = ConnectionConfig::resolve(&s, PoolSlot::Read);
            assert_eq!(config.slot, PoolSlot::Read);
            assert_eq!(config.credentials_from, PoolSlot::Write, "missing {}", missing);
            assert_eq!(config.user, "writer");
            assert_eq!(config.password, "wpass");
            assert_eq!(config.address, "primary:3306");
        }
    }

    #[test]
    fn test_write_slot_has_no_fallback() {
        let mut s = settings();
        s.user.clear();
        let config = ConnectionConfig::resolve(&s, PoolSlot::Write);
        assert_eq!(config.credentials_from, PoolSlot::Write);
        assert_eq!(config.user, "");
        assert_eq!(config.address, "primary:3306");
    }

    #[test]
    fn test_tunnel_instance_selects_tunnel_network() {
        let mut s = settings();
        s.read_host.clear();
        s.read_instance = "proj:region:replica".into();

        let config = ConnectionConfig::resolve(&s, PoolSlot::Read);
        assert_eq!(config.credentials_from, PoolSlot::Read);
        assert_eq!(config.tunnel(), Some(("tunnel_read", "proj:region:replica")));

        let redirected = config.with_local_address("127.0.0.1:40001".parse().unwrap());
        assert_eq!(redirected.host_and_port(), ("127.0.0.1", Some(40001)));
    }

    #[test]
    fn test_fallback_uses_write_tunnel() {
        let mut s = settings();
        s.read_user.clear();
        s.read_instance = "proj:region:replica".into();
        s.instance = "proj:region:primary".into();

        let config = ConnectionConfig::resolve(&s, PoolSlot::Read);
        assert_eq!(config.tunnel(), Some(("tunnel_write", "proj:region:primary")));
    }

    #[test]
    fn test_host_and_port() {
        let mut config = ConnectionConfig::resolve(&settings(), PoolSlot::Write);
        assert_eq!(config.host_and_port(), ("primary", Some(3306)));

        config.address = "db.internal".into();
        assert_eq!(config.host_and_port(), ("db.internal", None));

        config.address = "/cloudsql/proj:region:db".into();
        assert_eq!(config.host_and_port().1, None);
    }

    #[test]
    fn test_masked_dsn_hides_password() {
        let config = ConnectionConfig::resolve(&settings(), PoolSlot::Write);
        let dsn = config.masked_dsn();
        assert!(!dsn.contains("wpass"));
        assert!(dsn.contains("****"));
        assert!(!format!("{:?}", config).contains("wpass"));
    }
}
