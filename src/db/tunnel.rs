//! Secure tunnel registration for managed database instances.
//!
//! The driver only knows how to reach `host:port`. When a slot is configured
//! with a managed-instance identifier, a loopback forwarder is registered
//! under the slot's tunnel network name: it listens on `127.0.0.1:0`, and
//! every accepted socket is paired with a connection opened by the
//! [`TunnelDialer`] and pumped in both directions. The slot's address is then
//! redirected to the forwarder.
//!
//! # Design Decisions
//!
//! - **One forwarder per (network, instance)**: registering the same pair again
//!   returns the existing endpoint
//! - **`tokio::sync::Mutex` for the registry**: registration binds a socket,
//!   which is an await point
//! - **Accept loops are aborted on shutdown**: connections already forwarded
//!   finish on their own

use crate::error::{DbError, DbResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Pause after a failed accept before trying again.
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A bidirectional byte stream to a database instance.
pub trait TunnelStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> TunnelStream for T {}

/// Opens connections to a managed database instance.
#[async_trait]
pub trait TunnelDialer: Send + Sync {
    async fn dial(&self, instance: &str) -> std::io::Result<Box<dyn TunnelStream>>;
}

/// Dialer that treats the instance identifier as a `host:port` address.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl TunnelDialer for TcpDialer {
    async fn dial(&self, instance: &str) -> std::io::Result<Box<dyn TunnelStream>> {
        let stream = TcpStream::connect(instance).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

struct Forwarder {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

/// Registered tunnels, keyed by (network name, instance).
pub struct TunnelRegistry {
    dialer: Arc<dyn TunnelDialer>,
    forwarders: Mutex<HashMap<(String, String), Forwarder>>,
}

impl TunnelRegistry {
    pub fn new(dialer: Arc<dyn TunnelDialer>) -> Self {
        Self {
            dialer,
            forwarders: Mutex::new(HashMap::new()),
        }
    }

    /// Register a forwarder for `instance` under `network`.
    ///
    /// Returns the loopback address the driver should connect to. Idempotent
    /// per (network, instance).
    pub async fn register(&self, network: &str, instance: &str) -> DbResult<SocketAddr> {
        let key = (network.to_string(), instance.to_string());
        let mut forwarders = self.forwarders.lock().await;

        if let Some(existing) = forwarders.get(&key) {
            debug!(network, instance, addr = %existing.local_addr, "Reusing tunnel");
            return Ok(existing.local_addr);
        }

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| DbError::tunnel(network, format!("bind failed: {}", e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| DbError::tunnel(network, e.to_string()))?;

        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.dialer),
            network.to_string(),
            instance.to_string(),
        ));

        info!(network, instance, addr = %local_addr, "Registered tunnel");
        forwarders.insert(
            key,
            Forwarder {
                local_addr,
                accept_task,
            },
        );
        Ok(local_addr)
    }

    /// Loopback address of a registered tunnel.
    pub async fn local_addr(&self, network: &str, instance: &str) -> Option<SocketAddr> {
        let key = (network.to_string(), instance.to_string());
        self.forwarders.lock().await.get(&key).map(|f| f.local_addr)
    }

    pub async fn len(&self) -> usize {
        self.forwarders.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop accepting on every forwarder and forget them.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = {
            let mut forwarders = self.forwarders.lock().await;
            forwarders.drain().collect()
        };

        for ((network, instance), forwarder) in drained {
            info!(network = %network, instance = %instance, "Closing tunnel");
            forwarder.accept_task.abort();
        }
    }
}

impl std::fmt::Debug for TunnelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelRegistry").finish_non_exhaustive()
    }
}

/// Source of inbound tunnel connections.
#[async_trait]
trait Acceptor: Send + 'static {
    async fn accept(&mut self) -> std::io::Result<(TcpStream, SocketAddr)>;
}

#[async_trait]
impl Acceptor for TcpListener {
    async fn accept(&mut self) -> std::io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

async fn accept_loop<A: Acceptor>(
    mut listener: A,
    dialer: Arc<dyn TunnelDialer>,
    network: String,
    instance: String,
) {
    loop {
        let (mut inbound, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(network = %network, error = %e, "Tunnel accept failed");
                // Back off on persistent errors such as EMFILE
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };

        let dialer = Arc::clone(&dialer);
        let network = network.clone();
        let instance = instance.clone();
        tokio::spawn(async move {
            let mut outbound = match dialer.dial(&instance).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(network = %network, instance = %instance, error = %e, "Tunnel dial failed");
                    return;
                }
            };
            match tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await {
                Ok((sent, received)) => {
                    debug!(network = %network, %peer, sent, received, "Tunnel connection closed")
                }
                Err(e) => debug!(network = %network, %peer, error = %e, "Tunnel connection ended"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn echo_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (mut reader, mut writer) = socket.split();
                    let _ = tokio::io::copy(&mut reader, &mut writer).await;
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_forwarder_pipes_bytes() {
        let upstream = echo_server().await;
        let registry = TunnelRegistry::new(Arc::new(TcpDialer));

        let local = registry
            .register("tunnel_read", &upstream.to_string())
            .await
            .unwrap();
        assert!(local.ip().is_loopback());

        let mut client = TcpStream::connect(local).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        registry.shutdown().await;
    }

    struct FailingAcceptor {
        attempts: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl Acceptor for FailingAcceptor {
        async fn accept(&mut self) -> std::io::Result<(TcpStream, SocketAddr)> {
            self.attempts
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Err(std::io::Error::other("too many open files"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_errors_back_off() {
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let task = tokio::spawn(accept_loop(
            FailingAcceptor {
                attempts: Arc::clone(&attempts),
            },
            Arc::new(TcpDialer),
            "tunnel_read".to_string(),
            "db:1".to_string(),
        ));

        tokio::time::sleep(ACCEPT_RETRY_DELAY * 5 / 2).await;
        task.abort();

        // Attempts at 0, 1x and 2x the delay
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_register_is_idempotent_per_network_and_instance() {
        let registry = TunnelRegistry::new(Arc::new(TcpDialer));

        let a = registry.register("tunnel_read", "db:1").await.unwrap();
        let b = registry.register("tunnel_read", "db:1").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.len().await, 1);

        let c = registry.register("tunnel_write", "db:1").await.unwrap();
        assert_ne!(a, c);
        assert_eq!(registry.len().await, 2);
        assert_eq!(registry.local_addr("tunnel_write", "db:1").await, Some(c));

        registry.shutdown().await;
        assert!(registry.is_empty().await);
        assert_eq!(registry.local_addr("tunnel_read", "db:1").await, None);
    }
}
