//! TCP telemetry server for the rigmond daemon.
//!
//! The server:
//! - Listens on a TCP socket for rig and observer connections
//! - Assigns each connection a `ConnectionId` and spawns a
//!   `ConnectionHandler` for it
//! - Leaves all state to the registry actor; broadcast fanout happens
//!   through each handler's own event subscription
//! - Supports graceful shutdown via CancellationToken
//!
//! ```text
//! ┌─────────────────┐
//! │ TelemetryServer │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│  RegistryHandle │
//! │ (per connection)│     └─────────────────┘
//! └───────┬─────────┘
//!         │ broadcast::Receiver<RigEvent>
//!         ▼
//!   rig_update frames to this connection
//! ```

mod connection;

pub use connection::{ConnectionError, ConnectionHandler};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use rigmon_core::ProfileTable;

use crate::registry::{ConnectionId, RegistryHandle};

/// TCP server accepting telemetry connections.
pub struct TelemetryServer {
    listener: TcpListener,

    /// Handle to the rig registry
    registry: RegistryHandle,

    /// Tuning profiles handed to every connection's analyzer calls
    profiles: Arc<ProfileTable>,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Counter for assigning connection identities
    connection_counter: AtomicU64,
}

impl TelemetryServer {
    /// Binds the listener.
    pub async fn bind(
        addr: SocketAddr,
        registry: RegistryHandle,
        profiles: Arc<ProfileTable>,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr,
                error: e.to_string(),
            })?;

        Ok(Self {
            listener,
            registry,
            profiles,
            cancel_token,
            connection_counter: AtomicU64::new(0),
        })
    }

    /// Returns the bound address (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Runs the accept loop until the cancellation token fires.
    pub async fn run(&self) {
        info!(addr = ?self.local_addr(), "Telemetry server listening");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Telemetry server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.handle_connection(stream, peer),
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            // Keep accepting other connections
                        }
                    }
                }
            }
        }

        info!("Telemetry server stopped");
    }

    /// Spawns a handler task for a new connection.
    fn handle_connection(&self, stream: tokio::net::TcpStream, peer: SocketAddr) {
        let conn = ConnectionId::new(self.connection_counter.fetch_add(1, Ordering::Relaxed));
        let registry = self.registry.clone();
        let events = self.registry.subscribe();
        let profiles = Arc::clone(&self.profiles);
        let cancel_token = self.cancel_token.clone();

        tokio::spawn(async move {
            let handler =
                ConnectionHandler::new(conn, stream, peer, registry, profiles, events, cancel_token);
            handler.run().await;
        });
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_display() {
        let err = ServerError::Bind {
            addr: SocketAddr::from(([127, 0, 0, 1], 9001)),
            error: "address in use".to_string(),
        };
        assert!(err.to_string().contains("127.0.0.1:9001"));
        assert!(err.to_string().contains("address in use"));
    }
}
