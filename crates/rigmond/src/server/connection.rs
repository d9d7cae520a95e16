//! Connection handler for individual telemetry connections.
//!
//! Each connection gets its own `ConnectionHandler` that:
//! - Parses newline-delimited JSON frames
//! - Routes register/metrics/status/alert frames to the registry
//! - Runs the metric analyzer on telemetry reports
//! - Forwards registry update events to this connection as `rig_update`
//!
//! Handler-level failures become `error` frames; only transport errors
//! end the connection, and even those only unbind this one connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rigmon_core::{analyze, ProfileTable};
use rigmon_protocol::{decode_frame, encode_frame, FrameError, RigMessage, ServerMessage};

use crate::registry::{ConnectionId, RegistryError, RegistryHandle, RigEvent};

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Handler for a single telemetry connection.
pub struct ConnectionHandler {
    /// Registry-facing identity of this connection
    conn: ConnectionId,

    /// Remote peer address, for logs only
    peer: SocketAddr,

    /// Line reader over the read half
    reader: Lines<BufReader<OwnedReadHalf>>,

    /// Buffered writer for outgoing frames
    writer: BufWriter<OwnedWriteHalf>,

    /// Handle to the rig registry
    registry: RegistryHandle,

    /// Tuning profiles for the analyzer
    profiles: Arc<ProfileTable>,

    /// Registry events destined for this connection
    events: broadcast::Receiver<RigEvent>,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    pub fn new(
        conn: ConnectionId,
        stream: TcpStream,
        peer: SocketAddr,
        registry: RegistryHandle,
        profiles: Arc<ProfileTable>,
        events: broadcast::Receiver<RigEvent>,
        cancel_token: CancellationToken,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            conn,
            peer,
            reader: BufReader::new(read_half).lines(),
            writer: BufWriter::new(write_half),
            registry,
            profiles,
            events,
            cancel_token,
        }
    }

    /// Runs the connection to completion.
    ///
    /// Whatever ends the loop, the binding is cleared afterwards; the
    /// registry emits the final offline broadcast if this connection
    /// was bound.
    pub async fn run(mut self) {
        debug!(conn = %self.conn, peer = %self.peer, "Connection opened");

        match self.process().await {
            Ok(()) => debug!(conn = %self.conn, "Connection closing"),
            Err(ConnectionError::Eof) => debug!(conn = %self.conn, "Peer closed connection"),
            Err(e) => debug!(conn = %self.conn, error = %e, "Connection closed with error"),
        }

        self.registry.unbind(self.conn).await;
        info!(conn = %self.conn, peer = %self.peer, "Connection closed");
    }

    /// Main loop: inbound frames and outbound broadcast events.
    ///
    /// Each inbound frame is handled to completion before the next one;
    /// broadcast events interleave between frames. `next_line` is
    /// cancellation safe, so losing the race to an event cannot drop
    /// partial input.
    async fn process(&mut self) -> Result<(), ConnectionError> {
        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => return Ok(()),

                line = self.reader.next_line() => {
                    let line = line.map_err(|e| ConnectionError::Io(e.to_string()))?;
                    let Some(line) = line else {
                        return Err(ConnectionError::Eof);
                    };
                    let raw = line.trim();
                    if raw.is_empty() {
                        continue;
                    }
                    self.handle_frame(raw).await?;
                }

                event = self.events.recv() => {
                    self.forward_event(event).await?;
                }
            }
        }
    }

    /// Decodes and dispatches one inbound frame.
    ///
    /// Only transport-level failures propagate; every protocol or
    /// registry problem is answered with an `error` frame and the
    /// connection stays open.
    async fn handle_frame(&mut self, raw: &str) -> Result<(), ConnectionError> {
        let msg = match decode_frame(raw) {
            Ok(msg) => msg,
            Err(err @ FrameError::UnknownKind(_)) => {
                warn!(conn = %self.conn, error = %err, "Rejected frame of unknown kind");
                return self.send(ServerMessage::error(err.to_string())).await;
            }
            Err(err) => {
                debug!(conn = %self.conn, error = %err, "Rejected malformed frame");
                return self
                    .send(ServerMessage::error("Invalid message format"))
                    .await;
            }
        };

        self.dispatch(msg).await
    }

    /// Routes a decoded frame to the registry and replies.
    async fn dispatch(&mut self, msg: RigMessage) -> Result<(), ConnectionError> {
        match msg {
            RigMessage::Register {
                owner,
                name,
                connection_details,
            } => {
                match self
                    .registry
                    .register(self.conn, owner, name, connection_details)
                    .await
                {
                    Ok(record) => {
                        // Two distinct frames: the ack first, then the
                        // settings push. Clients listen for either.
                        self.send(ServerMessage::registered(&record)).await?;
                        self.send(ServerMessage::settings(&record)).await?;
                    }
                    Err(err) => self.send_registry_error(err).await?,
                }
            }

            RigMessage::Metrics { metrics } => {
                match self.registry.update_hardware(self.conn, metrics).await {
                    Ok(record) => {
                        // Recommendations go to the reporting rig only,
                        // never into the broadcast channel.
                        let recommendations = analyze(&record.hardware, &self.profiles);
                        if !recommendations.is_empty() {
                            debug!(
                                conn = %self.conn,
                                rig = %record.id,
                                count = recommendations.len(),
                                "Sending tuning recommendations"
                            );
                            self.send(ServerMessage::optimize(recommendations)).await?;
                        }
                    }
                    Err(err) => self.send_registry_error(err).await?,
                }
            }

            RigMessage::Status { status } => {
                // The broadcast to every connection (this one included)
                // arrives via the event channel.
                if let Err(err) = self.registry.set_status(self.conn, status).await {
                    self.send_registry_error(err).await?;
                }
            }

            RigMessage::Alert {
                alert_type,
                message,
            } => {
                if let Err(err) = self
                    .registry
                    .append_alert(self.conn, alert_type, message)
                    .await
                {
                    self.send_registry_error(err).await?;
                }
            }
        }

        Ok(())
    }

    /// Reports a registry failure back to the peer.
    async fn send_registry_error(&mut self, err: RegistryError) -> Result<(), ConnectionError> {
        warn!(conn = %self.conn, error = %err, "Registry operation failed");
        self.send(ServerMessage::error(err.to_string())).await
    }

    /// Forwards one registry event as a `rig_update` frame.
    async fn forward_event(
        &mut self,
        event: Result<RigEvent, broadcast::error::RecvError>,
    ) -> Result<(), ConnectionError> {
        match event {
            Ok(RigEvent::Updated { rig_id, record, .. }) => {
                self.send(ServerMessage::rig_update(rig_id, *record)).await
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // Best-effort delivery: a slow connection skips updates
                // rather than stalling anyone else.
                warn!(conn = %self.conn, skipped, "Broadcast receiver lagged, updates skipped");
                Ok(())
            }
            Err(broadcast::error::RecvError::Closed) => Err(ConnectionError::RegistryGone),
        }
    }

    /// Writes one frame, newline-terminated.
    async fn send(&mut self, msg: ServerMessage) -> Result<(), ConnectionError> {
        let json = encode_frame(&msg).map_err(|e| ConnectionError::Encode(e.to_string()))?;

        let write = async {
            self.writer.write_all(json.as_bytes()).await?;
            self.writer.write_all(b"\n").await?;
            self.writer.flush().await?;
            Ok::<(), std::io::Error>(())
        };

        match timeout(WRITE_TIMEOUT, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("connection closed")]
    Eof,

    #[error("write timeout")]
    WriteTimeout,

    #[error("failed to encode frame: {0}")]
    Encode(String),

    #[error("registry event channel closed")]
    RegistryGone,
}
