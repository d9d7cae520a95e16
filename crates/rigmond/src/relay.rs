//! Relay bridge - transparent forwarding between a client connection and
//! the rig endpoint it declares.
//!
//! Independent of the session registry. A client's first `register`
//! frame names a `connectionDetails {ip, port}` endpoint; the bridge
//! dials it, forwards that frame verbatim, and from then on pumps bytes
//! in both directions with no interpretation. Closing either side of a
//! pair closes the other.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use rigmon_core::EndpointDescriptor;
use rigmon_protocol::{decode_frame, encode_frame, FrameError, RigMessage, ServerMessage};

/// Active forwarding pairs: inbound connection number -> rig endpoint.
type PairMap = Arc<Mutex<HashMap<u64, String>>>;

/// TCP server multiplexing relay pairs.
pub struct RelayServer {
    listener: TcpListener,
    cancel_token: CancellationToken,
    connection_counter: AtomicU64,
    pairs: PairMap,
}

impl RelayServer {
    /// Binds the relay listener.
    pub async fn bind(addr: SocketAddr, cancel_token: CancellationToken) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RelayError::Bind {
                addr,
                error: e.to_string(),
            })?;

        Ok(Self {
            listener,
            cancel_token,
            connection_counter: AtomicU64::new(0),
            pairs: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Returns the bound address (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Number of currently established forwarding pairs.
    pub async fn pair_count(&self) -> usize {
        self.pairs.lock().await.len()
    }

    /// Runs the accept loop until the cancellation token fires.
    pub async fn run(&self) {
        info!(addr = ?self.local_addr(), "Relay server listening");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Relay server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let conn_id = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            let pairs = Arc::clone(&self.pairs);
                            let cancel = self.cancel_token.clone();

                            tokio::spawn(async move {
                                debug!(conn_id, peer = %peer, "Relay client connected");
                                if let Err(e) = relay_session(conn_id, stream, &pairs, cancel).await {
                                    debug!(conn_id, error = %e, "Relay session ended with error");
                                }
                                pairs.lock().await.remove(&conn_id);
                                debug!(conn_id, "Relay client disconnected");
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept relay connection");
                        }
                    }
                }
            }
        }

        info!("Relay server stopped");
    }
}

/// Runs one relay pair to completion.
async fn relay_session(
    conn_id: u64,
    stream: TcpStream,
    pairs: &PairMap,
    cancel_token: CancellationToken,
) -> Result<(), RelayError> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = write_half;

    // Bootstrap: wait for the register frame naming the rig endpoint.
    // Anything else arriving before it is dropped.
    let (target, register_line) = loop {
        let mut line = String::new();
        let bytes_read = tokio::select! {
            _ = cancel_token.cancelled() => return Ok(()),
            result = reader.read_line(&mut line) => {
                result.map_err(|e| RelayError::Io(e.to_string()))?
            }
        };
        if bytes_read == 0 {
            // Closed before bootstrap; nothing to tear down.
            return Ok(());
        }

        let raw = line.trim();
        if raw.is_empty() {
            continue;
        }

        match decode_frame(raw) {
            Ok(RigMessage::Register {
                connection_details: Some(details),
                ..
            }) => match relay_target(&details) {
                Some(target) => break (target, line),
                None => {
                    send_error(&mut writer, "Missing rig connection details").await;
                    return Err(RelayError::MissingEndpoint);
                }
            },
            Ok(RigMessage::Register { .. }) => {
                send_error(&mut writer, "Missing rig connection details").await;
                return Err(RelayError::MissingEndpoint);
            }
            Ok(_) | Err(FrameError::UnknownKind(_)) => {
                debug!(conn_id, "Frame before relay registration, dropped");
            }
            Err(err) => {
                debug!(conn_id, error = %err, "Malformed frame before relay registration");
                send_error(&mut writer, "Invalid message format").await;
            }
        }
    };

    // Dial the rig and forward the bootstrap frame verbatim.
    let mut outbound = match TcpStream::connect(&target).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(conn_id, target = %target, error = %e, "Failed to dial rig endpoint");
            send_error(&mut writer, "Failed to reach rig").await;
            return Err(RelayError::Dial {
                target,
                error: e.to_string(),
            });
        }
    };
    outbound
        .write_all(register_line.as_bytes())
        .await
        .map_err(|e| RelayError::Io(e.to_string()))?;
    if !register_line.ends_with('\n') {
        outbound
            .write_all(b"\n")
            .await
            .map_err(|e| RelayError::Io(e.to_string()))?;
    }

    info!(conn_id, target = %target, "Relay pair established");
    pairs.lock().await.insert(conn_id, target.clone());

    // The line reader may have buffered bytes past the bootstrap frame;
    // they belong to the rig.
    let leftover = reader.buffer().to_vec();
    if !leftover.is_empty() {
        outbound
            .write_all(&leftover)
            .await
            .map_err(|e| RelayError::Io(e.to_string()))?;
    }

    // From here on: pure byte forwarding, both directions, until either
    // side closes.
    let read_half = reader.into_inner();
    let mut inbound = read_half
        .reunite(writer)
        .map_err(|e| RelayError::Io(e.to_string()))?;

    tokio::select! {
        _ = cancel_token.cancelled() => {
            debug!(conn_id, "Relay pair cancelled");
        }
        result = tokio::io::copy_bidirectional(&mut inbound, &mut outbound) => {
            match result {
                Ok((to_rig, to_client)) => {
                    debug!(conn_id, to_rig, to_client, "Relay pair closed");
                }
                Err(e) => {
                    debug!(conn_id, error = %e, "Relay pair closed with error");
                }
            }
        }
    }

    Ok(())
}

/// Extracts a dialable `ip:port` target from an endpoint descriptor.
fn relay_target(details: &EndpointDescriptor) -> Option<String> {
    let ip = details.ip.as_deref()?;
    let port = details.port?;
    if ip.is_empty() {
        return None;
    }
    Some(format!("{ip}:{port}"))
}

/// Best-effort error frame before giving up on a relay client.
async fn send_error(writer: &mut OwnedWriteHalf, message: &str) {
    if let Ok(json) = encode_frame(&ServerMessage::error(message)) {
        let _ = writer.write_all(json.as_bytes()).await;
        let _ = writer.write_all(b"\n").await;
    }
}

/// Errors that can occur in relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("failed to dial {target}: {error}")]
    Dial { target: String, error: String },

    #[error("register frame carried no dialable endpoint")]
    MissingEndpoint,
}
