//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` is a cheap-to-clone handle for sending commands
//! to the registry actor and subscribing to rig events. One clone lives
//! in every connection handler task.

use tokio::sync::{broadcast, mpsc, oneshot};

use rigmon_core::{AlertKind, EndpointDescriptor, HardwareSnapshot, RigId, RigRecord, RigStatus};

use super::commands::{ConnectionId, RegistryCommand, RegistryError, RigEvent};

/// Handle for interacting with the registry actor.
///
/// All methods communicate with the actor via channels; a closed
/// channel surfaces as `RegistryError::ChannelClosed`.
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<RigEvent>,
}

impl RegistryHandle {
    /// Creates a new registry handle.
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<RigEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Creates or refreshes the record for (owner, name) and binds the
    /// connection to that identity.
    ///
    /// # Errors
    ///
    /// - `RegistryError::RegistryFull` at record capacity
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn register(
        &self,
        conn: ConnectionId,
        owner: impl Into<String>,
        name: impl Into<String>,
        endpoint: Option<EndpointDescriptor>,
    ) -> Result<RigRecord, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Register {
                conn,
                owner: owner.into(),
                name: name.into(),
                endpoint,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Replaces the bound rig's hardware snapshot; totals are
    /// recomputed by the actor.
    ///
    /// # Errors
    ///
    /// - `RegistryError::NotRegistered` if the connection has no binding
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn update_hardware(
        &self,
        conn: ConnectionId,
        snapshot: HardwareSnapshot,
    ) -> Result<RigRecord, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::UpdateHardware {
                conn,
                snapshot,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Sets the bound rig's status.
    ///
    /// # Errors
    ///
    /// - `RegistryError::NotRegistered` if the connection has no binding
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn set_status(
        &self,
        conn: ConnectionId,
        status: RigStatus,
    ) -> Result<RigRecord, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::SetStatus {
                conn,
                status,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Appends an alert to the bound rig.
    ///
    /// # Errors
    ///
    /// - `RegistryError::NotRegistered` if the connection has no binding
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn append_alert(
        &self,
        conn: ConnectionId,
        kind: AlertKind,
        message: impl Into<String>,
    ) -> Result<RigRecord, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::AppendAlert {
                conn,
                kind,
                message: message.into(),
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Clears a connection binding on disconnect.
    ///
    /// Fire-and-forget: send errors are ignored (the actor may be
    /// shutting down, which makes the binding moot anyway).
    pub async fn unbind(&self, conn: ConnectionId) {
        let _ = self.sender.send(RegistryCommand::Unbind { conn }).await;
    }

    /// Triggers a staleness sweep.
    ///
    /// Fire-and-forget: the liveness monitor does not wait for results.
    pub async fn sweep_stale(&self) {
        let _ = self.sender.send(RegistryCommand::SweepStale).await;
    }

    /// Gets a single rig record by identity.
    ///
    /// Returns `None` if the rig doesn't exist or the actor is gone.
    pub async fn get_rig(&self, id: RigId) -> Option<RigRecord> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::GetRig { id, respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Gets all rig records.
    ///
    /// Returns an empty vector if no rigs exist or the actor is gone.
    pub async fn all_rigs(&self) -> Vec<RigRecord> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::GetAllRigs { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Subscribes to rig events.
    ///
    /// Returns a broadcast receiver that sees every update event the
    /// registry publishes from the moment of the call.
    pub fn subscribe(&self) -> broadcast::Receiver<RigEvent> {
        self.event_sender.subscribe()
    }

    /// Returns `true` while the actor is still accepting commands.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
