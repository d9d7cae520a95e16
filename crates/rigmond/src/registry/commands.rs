//! Registry actor commands, errors, and events.
//!
//! Message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: commands sent to the actor
//! - `RegistryError`: errors registry operations can produce
//! - `RigEvent`: events published by the registry for subscribers

use std::fmt;

use rigmon_core::{AlertKind, EndpointDescriptor, HardwareSnapshot, RigId, RigRecord, RigStatus};
use thiserror::Error;
use tokio::sync::oneshot;

// ============================================================================
// Connection Identity
// ============================================================================

/// Identity of one live transport connection.
///
/// Assigned by the listener from a monotonic counter. The registry keys
/// connection bindings by this value; connection handlers never carry
/// rig identity themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wraps a raw connection number.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw connection number.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Mutating commands that callers need an answer for carry a oneshot
/// response channel; disconnect and sweep notifications are
/// fire-and-forget.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Create or refresh the record for (owner, name) and bind the
    /// connection to that identity. Last registration wins on an
    /// already-bound connection.
    Register {
        conn: ConnectionId,
        owner: String,
        name: String,
        endpoint: Option<EndpointDescriptor>,
        respond_to: oneshot::Sender<Result<RigRecord, RegistryError>>,
    },

    /// Replace the bound rig's hardware snapshot and recompute totals.
    UpdateHardware {
        conn: ConnectionId,
        snapshot: HardwareSnapshot,
        respond_to: oneshot::Sender<Result<RigRecord, RegistryError>>,
    },

    /// Set the bound rig's status. Publishes an update event.
    SetStatus {
        conn: ConnectionId,
        status: RigStatus,
        respond_to: oneshot::Sender<Result<RigRecord, RegistryError>>,
    },

    /// Append an alert to the bound rig. Publishes an update event.
    AppendAlert {
        conn: ConnectionId,
        kind: AlertKind,
        message: String,
        respond_to: oneshot::Sender<Result<RigRecord, RegistryError>>,
    },

    /// Connection closed: clear its binding and, if one existed, mark
    /// the rig offline and publish a final update. A no-op for
    /// connections that never registered.
    Unbind { conn: ConnectionId },

    /// Mark every rig that stopped reporting inside the staleness
    /// window as offline. Fired periodically by the liveness monitor.
    SweepStale,

    /// Get a single rig record by identity.
    GetRig {
        id: RigId,
        respond_to: oneshot::Sender<Option<RigRecord>>,
    },

    /// Get all rig records.
    GetAllRigs {
        respond_to: oneshot::Sender<Vec<RigRecord>>,
    },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// Operation arrived on a connection with no rig binding.
    #[error("rig not registered")]
    NotRegistered(ConnectionId),

    /// A binding pointed at an identity with no record.
    #[error("rig not found: {0}")]
    UnknownRig(String),

    /// The registry has reached its record capacity.
    #[error("registry is full (max: {max} rigs)")]
    RegistryFull { max: usize },

    /// The actor has shut down.
    #[error("registry channel closed")]
    ChannelClosed,
}

// ============================================================================
// Rig Events
// ============================================================================

/// Why a rig record update was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateReason {
    /// The rig sent an explicit status frame.
    StatusChange,

    /// The rig raised an alert.
    Alert,

    /// The rig's connection closed.
    Disconnect,

    /// The liveness monitor timed the rig out.
    LivenessTimeout,
}

impl fmt::Display for UpdateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StatusChange => write!(f, "status change"),
            Self::Alert => write!(f, "alert raised"),
            Self::Disconnect => write!(f, "connection closed"),
            Self::LivenessTimeout => write!(f, "liveness timeout"),
        }
    }
}

/// Events published by the registry to subscribers.
///
/// Every open telemetry connection subscribes and forwards these as
/// `rig_update` frames, the reporting rig's own connection included.
#[derive(Debug, Clone)]
pub enum RigEvent {
    /// A record changed in a way every connection should see.
    ///
    /// The record is boxed to reduce enum size variance.
    Updated {
        /// Canonical `owner-name` slug.
        rig_id: String,
        /// Snapshot of the record after the change.
        record: Box<RigRecord>,
        /// What triggered the update.
        reason: UpdateReason,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
        assert_eq!(ConnectionId::new(7).raw(), 7);
    }

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::NotRegistered(ConnectionId::new(3));
        assert_eq!(err.to_string(), "rig not registered");

        let err = RegistryError::UnknownRig("w1-rig1".to_string());
        assert_eq!(err.to_string(), "rig not found: w1-rig1");

        let err = RegistryError::RegistryFull { max: 1000 };
        assert_eq!(err.to_string(), "registry is full (max: 1000 rigs)");

        let err = RegistryError::ChannelClosed;
        assert_eq!(err.to_string(), "registry channel closed");
    }

    #[test]
    fn test_update_reason_display() {
        assert_eq!(UpdateReason::StatusChange.to_string(), "status change");
        assert_eq!(UpdateReason::Disconnect.to_string(), "connection closed");
        assert_eq!(UpdateReason::LivenessTimeout.to_string(), "liveness timeout");
    }

    #[tokio::test]
    async fn test_command_oneshot_pattern() {
        let (tx, rx) = oneshot::channel::<Result<(), RegistryError>>();

        tokio::spawn(async move {
            tx.send(Ok(())).ok();
        });

        let result = rx.await;
        assert!(result.is_ok());
    }
}
