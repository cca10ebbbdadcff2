//! Data models shared by the pool manager and the query layer.

pub mod connection;
pub mod query;

pub use connection::{ConnectionConfig, Network, tunnel_network_name};
pub use query::{ExecResult, QueryParam};
