//! Rig session registry using the actor pattern.
//!
//! The registry is the single owner of rig records and connection
//! bindings. It receives commands via a tokio mpsc channel and publishes
//! update events on a broadcast channel.
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │ Connection task │────▶│  RegistryActor  │────▶│ broadcast::Sender│
//! └─────────────────┘     └─────────────────┘     └──────────────────┘
//!         │                       │                        │
//!         │   RegistryCommand     │   RigEvent             │
//!         │   (mpsc channel)      │   (broadcast)          ▼
//!         ▼                       ▼                All connections
//!    register / metrics      HashMap<RigId,       receive rig_update
//!    status / alert          RigRecord>           frames
//! ```
//!
//! Routing every mutation through the one owning task is what makes
//! read-modify-write on a record atomic; see `RegistryActor`.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

mod actor;
mod commands;
mod handle;

pub use actor::{RegistryActor, MAX_RIGS};
pub use commands::{ConnectionId, RegistryCommand, RegistryError, RigEvent, UpdateReason};
pub use handle::RegistryHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 100;

/// Spawns the registry actor and returns a handle for interaction.
///
/// `stale_after` is the silence window after which the liveness sweep
/// marks a rig offline; the sweep itself is triggered externally (see
/// `crate::liveness`).
pub fn spawn_registry(stale_after: Duration) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = RegistryActor::new(cmd_rx, event_tx.clone(), stale_after);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, event_tx)
}
