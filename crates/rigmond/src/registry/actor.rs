//! Registry actor - owns all rig state and processes commands.
//!
//! The RegistryActor is the single owner of rig records and connection
//! bindings. It receives commands via an mpsc channel and publishes
//! events via broadcast. Because every mutation flows through this one
//! task, read-modify-write sequences on a record (snapshot, totals,
//! timestamp) are atomic without any locking.

use std::collections::HashMap;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use rigmon_core::{
    Alert, AlertKind, EndpointDescriptor, HardwareSnapshot, RigId, RigRecord, RigStatus,
};

use super::commands::{
    ConnectionId, RegistryCommand, RegistryError, RigEvent, UpdateReason,
};

/// Maximum number of rig records the registry can hold.
pub const MAX_RIGS: usize = 1_000;

/// Fallback staleness window if the configured one cannot be represented.
const FALLBACK_STALE_SECS: i64 = 300;

/// The registry actor - owns all rig state.
///
/// # Ownership
///
/// - `rigs`: record per rig identity. Records are never removed by this
///   core; they go `offline` and stay.
/// - `bindings`: live connection -> identity. Owned here, not by the
///   connection handlers, so a dying connection cannot take record
///   state with it.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Rig records keyed by (owner, name) identity
    rigs: HashMap<RigId, RigRecord>,

    /// Connection bindings: which identity each live connection speaks for
    bindings: HashMap<ConnectionId, RigId>,

    /// How long a rig may stay silent before the sweep marks it offline
    stale_after: ChronoDuration,

    /// Event publisher for broadcast to connected clients
    event_publisher: broadcast::Sender<RigEvent>,
}

impl RegistryActor {
    /// Creates a new registry actor.
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        event_publisher: broadcast::Sender<RigEvent>,
        stale_after: std::time::Duration,
    ) -> Self {
        let stale_after = ChronoDuration::from_std(stale_after).unwrap_or_else(|_| {
            warn!(
                "Configured staleness window out of range, using {}s",
                FALLBACK_STALE_SECS
            );
            ChronoDuration::seconds(FALLBACK_STALE_SECS)
        });

        Self {
            receiver,
            rigs: HashMap::new(),
            bindings: HashMap::new(),
            stale_after,
            event_publisher,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    pub async fn run(mut self) {
        info!("Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(rigs = self.rigs.len(), "Registry actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register {
                conn,
                owner,
                name,
                endpoint,
                respond_to,
            } => {
                let result = self.handle_register(conn, owner, name, endpoint);
                // Ignore send error - the connection may have dropped
                let _ = respond_to.send(result);
            }
            RegistryCommand::UpdateHardware {
                conn,
                snapshot,
                respond_to,
            } => {
                let result = self.handle_update_hardware(conn, snapshot);
                let _ = respond_to.send(result);
            }
            RegistryCommand::SetStatus {
                conn,
                status,
                respond_to,
            } => {
                let result = self.handle_set_status(conn, status);
                let _ = respond_to.send(result);
            }
            RegistryCommand::AppendAlert {
                conn,
                kind,
                message,
                respond_to,
            } => {
                let result = self.handle_append_alert(conn, kind, message);
                let _ = respond_to.send(result);
            }
            RegistryCommand::Unbind { conn } => {
                self.handle_unbind(conn);
            }
            RegistryCommand::SweepStale => {
                self.handle_sweep_stale();
            }
            RegistryCommand::GetRig { id, respond_to } => {
                let _ = respond_to.send(self.rigs.get(&id).cloned());
            }
            RegistryCommand::GetAllRigs { respond_to } => {
                let _ = respond_to.send(self.rigs.values().cloned().collect());
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    /// Creates or refreshes a record and binds the connection to it.
    ///
    /// Idempotent: repeating the same registration refreshes the
    /// endpoint and liveness but leaves settings and alert history
    /// untouched. At most one record per identity can ever exist
    /// because this task is the only writer.
    fn handle_register(
        &mut self,
        conn: ConnectionId,
        owner: String,
        name: String,
        endpoint: Option<EndpointDescriptor>,
    ) -> Result<RigRecord, RegistryError> {
        let id = RigId::new(owner, name);

        if !self.rigs.contains_key(&id) && self.rigs.len() >= MAX_RIGS {
            warn!(
                rig = %id,
                current = self.rigs.len(),
                max = MAX_RIGS,
                "Registry is full, rejecting registration"
            );
            return Err(RegistryError::RegistryFull { max: MAX_RIGS });
        }

        let record = match self.rigs.get_mut(&id) {
            Some(existing) => {
                existing.refresh(endpoint);
                existing.clone()
            }
            None => {
                let record = RigRecord::register(id.clone(), endpoint);
                self.rigs.insert(id.clone(), record.clone());
                record
            }
        };

        if let Some(previous) = self.bindings.insert(conn, id.clone()) {
            if previous != id {
                // Last registration wins on an already-bound connection.
                debug!(
                    conn = %conn,
                    old = %previous,
                    new = %id,
                    "Connection rebound to new identity"
                );
            }
        }

        info!(
            rig = %id,
            conn = %conn,
            total_rigs = self.rigs.len(),
            "Rig registered"
        );

        Ok(record)
    }

    /// Resolves the identity bound to a connection.
    fn bound_id(&self, conn: ConnectionId) -> Result<RigId, RegistryError> {
        self.bindings
            .get(&conn)
            .cloned()
            .ok_or(RegistryError::NotRegistered(conn))
    }

    /// Looks up the record for a connection's bound identity.
    fn bound_record(&mut self, conn: ConnectionId) -> Result<&mut RigRecord, RegistryError> {
        let id = self.bound_id(conn)?;
        let slug = id.slug();
        self.rigs
            .get_mut(&id)
            .ok_or(RegistryError::UnknownRig(slug))
    }

    /// Replaces the hardware snapshot and recomputes aggregate totals.
    fn handle_update_hardware(
        &mut self,
        conn: ConnectionId,
        snapshot: HardwareSnapshot,
    ) -> Result<RigRecord, RegistryError> {
        let record = self.bound_record(conn)?;
        record.apply_snapshot(snapshot);

        debug!(
            rig = %record.id,
            gpus = record.hardware.gpus.len(),
            total_hashrate = record.hardware.total_hashrate,
            total_power = record.hardware.total_power,
            "Hardware snapshot updated"
        );

        Ok(record.clone())
    }

    /// Sets the rig's status and publishes the change.
    fn handle_set_status(
        &mut self,
        conn: ConnectionId,
        status: RigStatus,
    ) -> Result<RigRecord, RegistryError> {
        let record = self.bound_record(conn)?;
        record.set_status(status);
        let snapshot = record.clone();

        info!(rig = %snapshot.id, status = %status, "Rig status changed");
        self.publish(&snapshot, UpdateReason::StatusChange);

        Ok(snapshot)
    }

    /// Appends an alert and publishes the change.
    fn handle_append_alert(
        &mut self,
        conn: ConnectionId,
        kind: AlertKind,
        message: String,
    ) -> Result<RigRecord, RegistryError> {
        let record = self.bound_record(conn)?;
        record.push_alert(Alert::new(kind, message));
        let snapshot = record.clone();

        info!(
            rig = %snapshot.id,
            kind = ?kind,
            alerts = snapshot.alerts.len(),
            "Rig alert raised"
        );
        self.publish(&snapshot, UpdateReason::Alert);

        Ok(snapshot)
    }

    /// Clears a connection binding on disconnect.
    ///
    /// A connection that never registered is a no-op, not an error -
    /// this covers disconnect before registration.
    fn handle_unbind(&mut self, conn: ConnectionId) {
        let Some(id) = self.bindings.remove(&conn) else {
            debug!(conn = %conn, "Disconnect before registration, nothing to unbind");
            return;
        };

        if let Some(record) = self.rigs.get_mut(&id) {
            record.set_status(RigStatus::Offline);
            let snapshot = record.clone();

            info!(rig = %id, conn = %conn, "Rig disconnected, marked offline");
            self.publish(&snapshot, UpdateReason::Disconnect);
        }
    }

    /// Marks silent rigs offline.
    ///
    /// The only path to `offline` without an explicit disconnect or
    /// status frame: transport-level close is not guaranteed after a
    /// power loss or network partition.
    fn handle_sweep_stale(&mut self) {
        let now = Utc::now();

        let stale: Vec<RigId> = self
            .rigs
            .iter()
            .filter(|(_, record)| {
                !record.status.is_offline() && record.is_stale(now, self.stale_after)
            })
            .map(|(id, _)| id.clone())
            .collect();

        if stale.is_empty() {
            debug!("No silent rigs to mark offline");
            return;
        }

        info!(count = stale.len(), "Marking silent rigs offline");

        for id in stale {
            if let Some(record) = self.rigs.get_mut(&id) {
                record.set_status(RigStatus::Offline);
                let snapshot = record.clone();

                warn!(
                    rig = %id,
                    last_seen = %snapshot.last_seen,
                    "Rig stopped reporting, marked offline"
                );
                self.publish(&snapshot, UpdateReason::LivenessTimeout);
            }
        }
    }

    /// Publishes an update event (ignored if nobody subscribes).
    fn publish(&self, record: &RigRecord, reason: UpdateReason) {
        let _ = self.event_publisher.send(RigEvent::Updated {
            rig_id: record.id.slug(),
            record: Box::new(record.clone()),
            reason,
        });
    }

    // ========================================================================
    // Accessors (for testing)
    // ========================================================================

    /// Returns the number of rig records.
    #[cfg(test)]
    fn rig_count(&self) -> usize {
        self.rigs.len()
    }

    /// Returns the number of live bindings.
    #[cfg(test)]
    fn binding_count(&self) -> usize {
        self.bindings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigmon_core::GpuReading;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn create_actor() -> (RegistryActor, broadcast::Receiver<RigEvent>) {
        let (_cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = broadcast::channel(16);
        let actor = RegistryActor::new(cmd_rx, event_tx, Duration::from_secs(300));
        (actor, event_rx)
    }

    fn register(actor: &mut RegistryActor, conn: u64, owner: &str, name: &str) -> RigRecord {
        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Register {
            conn: ConnectionId::new(conn),
            owner: owner.to_string(),
            name: name.to_string(),
            endpoint: None,
            respond_to: tx,
        });
        rx.try_recv()
            .expect("register response")
            .expect("registration succeeds")
    }

    fn reading(hashrate: f64, power: f64) -> GpuReading {
        GpuReading {
            model: "NVIDIA RTX 3080".to_string(),
            temperature: 65.0,
            fan_speed: 60.0,
            hashrate,
            power,
            memory: 0.0,
            core: 0.0,
        }
    }

    #[tokio::test]
    async fn test_register_creates_record_with_defaults() {
        let (mut actor, _events) = create_actor();

        let record = register(&mut actor, 1, "w1", "rig1");

        assert_eq!(record.id.slug(), "w1-rig1");
        assert_eq!(record.status, RigStatus::Online);
        assert!(record.settings.auto_optimize);
        assert_eq!(record.settings.power_limit, 80.0);
        assert_eq!(record.settings.target_temperature, 70.0);
        assert!(record.alerts.is_empty());
        assert_eq!(actor.rig_count(), 1);
        assert_eq!(actor.binding_count(), 1);
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let (mut actor, _events) = create_actor();

        let first = register(&mut actor, 1, "w1", "rig1");
        let second = register(&mut actor, 1, "w1", "rig1");

        assert_eq!(actor.rig_count(), 1);
        // Observable fields other than the timestamp are unchanged.
        assert_eq!(first.id, second.id);
        assert_eq!(first.status, second.status);
        assert_eq!(first.settings, second.settings);
        assert_eq!(first.alerts, second.alerts);
        assert_eq!(first.hardware, second.hardware);
    }

    #[tokio::test]
    async fn test_reregistration_preserves_settings_and_alerts() {
        let (mut actor, _events) = create_actor();

        register(&mut actor, 1, "w1", "rig1");

        // Mutate state the way a running system would.
        let id = RigId::new("w1", "rig1");
        if let Some(record) = actor.rigs.get_mut(&id) {
            record.settings.power_limit = 60.0;
            record.push_alert(Alert::new(AlertKind::System, "fan failure"));
        }

        // Same identity returns from a different connection.
        let record = register(&mut actor, 2, "w1", "rig1");

        assert_eq!(actor.rig_count(), 1);
        assert_eq!(record.settings.power_limit, 60.0);
        assert_eq!(record.alerts.len(), 1);
        assert_eq!(record.status, RigStatus::Online);
    }

    #[tokio::test]
    async fn test_registration_does_not_broadcast() {
        let (mut actor, mut events) = create_actor();

        register(&mut actor, 1, "w1", "rig1");

        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rebind_last_registration_wins() {
        let (mut actor, _events) = create_actor();

        register(&mut actor, 1, "w1", "rig1");
        register(&mut actor, 1, "w1", "rig2");

        // Two records, one binding, pointing at the newest identity.
        assert_eq!(actor.rig_count(), 2);
        assert_eq!(actor.binding_count(), 1);

        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::SetStatus {
            conn: ConnectionId::new(1),
            status: RigStatus::Mining,
            respond_to: tx,
        });
        let record = rx.try_recv().unwrap().unwrap();
        assert_eq!(record.id.slug(), "w1-rig2");
    }

    #[tokio::test]
    async fn test_update_hardware_recomputes_totals() {
        let (mut actor, _events) = create_actor();
        register(&mut actor, 1, "w1", "rig1");

        let snapshot = HardwareSnapshot {
            gpus: vec![reading(95.0, 220.0), reading(60.0, 180.0)],
            total_hashrate: 999.0,
            total_power: 999.0,
        };

        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::UpdateHardware {
            conn: ConnectionId::new(1),
            snapshot,
            respond_to: tx,
        });

        let record = rx.try_recv().unwrap().unwrap();
        assert_eq!(record.hardware.total_hashrate, 155.0);
        assert_eq!(record.hardware.total_power, 400.0);
    }

    #[tokio::test]
    async fn test_update_hardware_empty_snapshot_zeroes_totals() {
        let (mut actor, _events) = create_actor();
        register(&mut actor, 1, "w1", "rig1");

        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::UpdateHardware {
            conn: ConnectionId::new(1),
            snapshot: HardwareSnapshot {
                gpus: vec![],
                total_hashrate: 50.0,
                total_power: 50.0,
            },
            respond_to: tx,
        });

        let record = rx.try_recv().unwrap().unwrap();
        assert_eq!(record.hardware.total_hashrate, 0.0);
        assert_eq!(record.hardware.total_power, 0.0);
    }

    #[tokio::test]
    async fn test_update_hardware_requires_binding() {
        let (mut actor, _events) = create_actor();

        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::UpdateHardware {
            conn: ConnectionId::new(9),
            snapshot: HardwareSnapshot::default(),
            respond_to: tx,
        });

        let result = rx.try_recv().unwrap();
        assert!(matches!(result, Err(RegistryError::NotRegistered(_))));
    }

    #[tokio::test]
    async fn test_set_status_publishes_update() {
        let (mut actor, mut events) = create_actor();
        register(&mut actor, 1, "w1", "rig1");

        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::SetStatus {
            conn: ConnectionId::new(1),
            status: RigStatus::Mining,
            respond_to: tx,
        });
        assert!(rx.try_recv().unwrap().is_ok());

        match events.try_recv().unwrap() {
            RigEvent::Updated {
                rig_id,
                record,
                reason,
            } => {
                assert_eq!(rig_id, "w1-rig1");
                assert_eq!(record.status, RigStatus::Mining);
                assert_eq!(reason, UpdateReason::StatusChange);
            }
        }
    }

    #[tokio::test]
    async fn test_append_alert_keeps_arrival_order() {
        let (mut actor, mut events) = create_actor();
        register(&mut actor, 1, "w1", "rig1");

        for message in ["first", "second"] {
            let (tx, _rx) = oneshot::channel();
            actor.handle_command(RegistryCommand::AppendAlert {
                conn: ConnectionId::new(1),
                kind: AlertKind::Temperature,
                message: message.to_string(),
                respond_to: tx,
            });
        }

        let id = RigId::new("w1", "rig1");
        let alerts = &actor.rigs.get(&id).unwrap().alerts;
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts.first().map(|a| a.message.as_str()), Some("first"));
        assert_eq!(alerts.get(1).map(|a| a.message.as_str()), Some("second"));
        assert!(alerts.iter().all(|a| !a.resolved));

        // Both appends broadcast the record.
        assert!(matches!(
            events.try_recv().unwrap(),
            RigEvent::Updated {
                reason: UpdateReason::Alert,
                ..
            }
        ));
        assert!(events.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_unbind_marks_offline_and_publishes() {
        let (mut actor, mut events) = create_actor();
        register(&mut actor, 1, "w1", "rig1");

        actor.handle_command(RegistryCommand::Unbind {
            conn: ConnectionId::new(1),
        });

        assert_eq!(actor.binding_count(), 0);
        assert_eq!(actor.rig_count(), 1); // record survives

        match events.try_recv().unwrap() {
            RigEvent::Updated { record, reason, .. } => {
                assert_eq!(record.status, RigStatus::Offline);
                assert_eq!(reason, UpdateReason::Disconnect);
            }
        }
    }

    #[tokio::test]
    async fn test_unbind_without_binding_is_noop() {
        let (mut actor, mut events) = create_actor();

        actor.handle_command(RegistryCommand::Unbind {
            conn: ConnectionId::new(42),
        });

        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sweep_marks_silent_rigs_offline() {
        let (mut actor, mut events) = create_actor();
        register(&mut actor, 1, "w1", "stale-rig");
        register(&mut actor, 2, "w1", "fresh-rig");

        // One rig last reported six minutes ago, the other one minute ago.
        let now = Utc::now();
        if let Some(record) = actor.rigs.get_mut(&RigId::new("w1", "stale-rig")) {
            record.last_seen = now - ChronoDuration::minutes(6);
        }
        if let Some(record) = actor.rigs.get_mut(&RigId::new("w1", "fresh-rig")) {
            record.last_seen = now - ChronoDuration::minutes(1);
        }

        actor.handle_command(RegistryCommand::SweepStale);

        let stale = actor.rigs.get(&RigId::new("w1", "stale-rig")).unwrap();
        let fresh = actor.rigs.get(&RigId::new("w1", "fresh-rig")).unwrap();
        assert_eq!(stale.status, RigStatus::Offline);
        assert_eq!(fresh.status, RigStatus::Online);

        // The sweep refreshed the stale rig's timestamp.
        assert!(now.signed_duration_since(stale.last_seen) < ChronoDuration::seconds(5));

        match events.try_recv().unwrap() {
            RigEvent::Updated { rig_id, reason, .. } => {
                assert_eq!(rig_id, "w1-stale-rig");
                assert_eq!(reason, UpdateReason::LivenessTimeout);
            }
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sweep_skips_already_offline_rigs() {
        let (mut actor, mut events) = create_actor();
        register(&mut actor, 1, "w1", "rig1");

        if let Some(record) = actor.rigs.get_mut(&RigId::new("w1", "rig1")) {
            record.status = RigStatus::Offline;
            record.last_seen = Utc::now() - ChronoDuration::minutes(10);
        }

        actor.handle_command(RegistryCommand::SweepStale);

        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_registry_full() {
        let (mut actor, _events) = create_actor();

        for i in 0..MAX_RIGS {
            register(&mut actor, i as u64, "w1", &format!("rig{i}"));
        }
        assert_eq!(actor.rig_count(), MAX_RIGS);

        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Register {
            conn: ConnectionId::new(9999),
            owner: "w1".to_string(),
            name: "one-too-many".to_string(),
            endpoint: None,
            respond_to: tx,
        });

        let result = rx.try_recv().unwrap();
        assert!(matches!(
            result,
            Err(RegistryError::RegistryFull { max: MAX_RIGS })
        ));

        // Refreshing an existing rig still works at capacity.
        let record = register(&mut actor, 1, "w1", "rig1");
        assert_eq!(record.status, RigStatus::Online);
    }

    #[tokio::test]
    async fn test_get_rig() {
        let (mut actor, _events) = create_actor();
        register(&mut actor, 1, "w1", "rig1");

        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::GetRig {
            id: RigId::new("w1", "rig1"),
            respond_to: tx,
        });
        assert!(rx.try_recv().unwrap().is_some());

        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::GetRig {
            id: RigId::new("w1", "nope"),
            respond_to: tx,
        });
        assert!(rx.try_recv().unwrap().is_none());
    }
}
