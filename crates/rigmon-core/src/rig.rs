//! Rig domain entities and value objects.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identity
// ============================================================================

/// Logical identity of a rig: owner plus rig name.
///
/// Stable across reconnects and independent of any transport connection.
/// Two connections registering the same (owner, name) pair refer to the
/// same record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RigId {
    /// Account that owns the rig.
    pub owner: String,
    /// Rig name, unique within an owner.
    pub name: String,
}

impl RigId {
    /// Creates a new RigId.
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Returns the canonical `owner-name` slug used in wire frames.
    #[must_use]
    pub fn slug(&self) -> String {
        format!("{}-{}", self.owner, self.name)
    }
}

impl fmt::Display for RigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.owner, self.name)
    }
}

// ============================================================================
// Status
// ============================================================================

/// Connection status of a rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RigStatus {
    /// Connected and reporting.
    Online,

    /// Not heard from: explicit disconnect or liveness timeout.
    #[default]
    Offline,

    /// Connected and actively mining.
    Mining,

    /// Connected but mining is paused.
    Paused,
}

impl RigStatus {
    /// Returns the wire/display label for this status.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Mining => "mining",
            Self::Paused => "paused",
        }
    }

    /// Returns true if the rig is considered unreachable.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Offline)
    }
}

impl fmt::Display for RigStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// Where a rig says it can be reached directly.
///
/// Sent inside the `register` frame as `connectionDetails`. The relay
/// bridge dials `ip:port`; the session core only stores the descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Wire protocol the rig speaks on that endpoint.
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "stratum2".to_string()
}

impl Default for EndpointDescriptor {
    fn default() -> Self {
        Self {
            ip: None,
            port: None,
            protocol: default_protocol(),
        }
    }
}

// ============================================================================
// Hardware
// ============================================================================

/// One accelerator-unit reading inside a metrics report.
///
/// Numeric fields default to zero: rig agents in the field send sparse
/// objects and a partial reading is still worth storing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuReading {
    /// Model tag, e.g. "NVIDIA RTX 3080". Keys the tuning profile lookup.
    #[serde(default)]
    pub model: String,
    /// Core temperature in degrees Celsius.
    #[serde(default)]
    pub temperature: f64,
    /// Fan speed in percent.
    #[serde(default)]
    pub fan_speed: f64,
    /// Hash rate in hashes per second.
    #[serde(default)]
    pub hashrate: f64,
    /// Power draw in watts.
    #[serde(default)]
    pub power: f64,
    /// Current memory clock setting.
    #[serde(default)]
    pub memory: f64,
    /// Current core clock setting.
    #[serde(default)]
    pub core: f64,
}

/// Ordered list of GPU readings plus aggregate totals.
///
/// Invariant: after any registry ingest, `total_hashrate` and
/// `total_power` equal the sums over `gpus`. Totals sent by the client
/// are discarded and recomputed server-side.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareSnapshot {
    #[serde(default)]
    pub gpus: Vec<GpuReading>,
    #[serde(default)]
    pub total_hashrate: f64,
    #[serde(default)]
    pub total_power: f64,
}

impl HardwareSnapshot {
    /// Recomputes the aggregate totals as the sums over the GPU readings.
    pub fn recompute_totals(&mut self) {
        self.total_hashrate = self.gpus.iter().map(|g| g.hashrate).sum();
        self.total_power = self.gpus.iter().map(|g| g.power).sum();
    }

    /// Returns the snapshot with totals recomputed.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.recompute_totals();
        self
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Mutable tuning settings attached to a rig record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RigSettings {
    /// Whether the server may push tuning recommendations automatically.
    pub auto_optimize: bool,
    /// Power ceiling as a percentage of the card limit.
    pub power_limit: f64,
    /// Target core temperature in degrees Celsius.
    pub target_temperature: f64,
}

impl Default for RigSettings {
    fn default() -> Self {
        Self {
            auto_optimize: true,
            power_limit: 80.0,
            target_temperature: 70.0,
        }
    }
}

// ============================================================================
// Alerts
// ============================================================================

/// Category of a rig alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Temperature,
    Performance,
    Connection,
    System,
}

impl AlertKind {
    /// Severity assigned when the rig itself does not supply one.
    #[must_use]
    pub fn default_severity(&self) -> AlertSeverity {
        match self {
            Self::Temperature => AlertSeverity::Warning,
            Self::Performance | Self::Connection | Self::System => AlertSeverity::Info,
        }
    }
}

/// How urgent an alert is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// One alert raised by a rig.
///
/// Immutable once created except for `resolved`. Alerts are appended in
/// arrival order and never reordered or deduplicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub message: String,
    pub severity: AlertSeverity,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
}

impl Alert {
    /// Creates an unresolved alert stamped now, with the kind's default
    /// severity.
    pub fn new(kind: AlertKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            severity: kind.default_severity(),
            timestamp: Utc::now(),
            resolved: false,
        }
    }
}

// ============================================================================
// Rig Record
// ============================================================================

/// Server-side state for one rig identity.
///
/// Lives in the registry independent of any transport connection: the
/// connection that created it can die while the record survives as
/// `offline`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RigRecord {
    #[serde(flatten)]
    pub id: RigId,
    pub status: RigStatus,
    #[serde(
        rename = "connectionDetails",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub connection: Option<EndpointDescriptor>,
    pub last_seen: DateTime<Utc>,
    pub hardware: HardwareSnapshot,
    pub settings: RigSettings,
    pub alerts: Vec<Alert>,
}

impl RigRecord {
    /// Creates a fresh record for a first-time registration.
    pub fn register(id: RigId, endpoint: Option<EndpointDescriptor>) -> Self {
        Self {
            id,
            status: RigStatus::Online,
            connection: endpoint,
            last_seen: Utc::now(),
            hardware: HardwareSnapshot::default(),
            settings: RigSettings::default(),
            alerts: Vec::new(),
        }
    }

    /// Re-registration of a known identity, possibly from a new
    /// connection. Settings and alert history survive; the endpoint is
    /// replaced and liveness refreshed.
    pub fn refresh(&mut self, endpoint: Option<EndpointDescriptor>) {
        self.connection = endpoint;
        self.status = RigStatus::Online;
        self.touch();
    }

    /// Marks the rig as seen right now.
    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }

    /// Replaces the hardware snapshot, recomputing aggregate totals.
    pub fn apply_snapshot(&mut self, snapshot: HardwareSnapshot) {
        self.hardware = snapshot.normalized();
        self.touch();
    }

    /// Sets the connection status and refreshes liveness.
    pub fn set_status(&mut self, status: RigStatus) {
        self.status = status;
        self.touch();
    }

    /// Appends an alert and refreshes liveness.
    pub fn push_alert(&mut self, alert: Alert) {
        self.alerts.push(alert);
        self.touch();
    }

    /// Returns true if the rig has not been seen within `window` of `now`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now.signed_duration_since(self.last_seen) > window
    }
}
