//! Protocol message types for telemetry connections.

use std::collections::BTreeMap;

use rigmon_core::{
    AlertKind, EndpointDescriptor, HardwareSnapshot, Recommendation, RigRecord, RigSettings,
    RigStatus,
};
use serde::{Deserialize, Serialize};

/// Frames sent by rigs to the server.
///
/// A closed set: a frame whose `type` is not listed here is rejected at
/// decode time, never silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RigMessage {
    /// Announce identity and claim (or refresh) a rig record.
    Register {
        owner: String,
        name: String,
        #[serde(
            rename = "connectionDetails",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        connection_details: Option<EndpointDescriptor>,
    },

    /// Periodic telemetry report.
    Metrics { metrics: HardwareSnapshot },

    /// Explicit status change (mining, paused, ...).
    Status { status: RigStatus },

    /// Raise an alert on the rig record.
    Alert {
        #[serde(rename = "alertType")]
        alert_type: AlertKind,
        message: String,
    },
}

impl RigMessage {
    /// Creates a register frame.
    pub fn register(
        owner: impl Into<String>,
        name: impl Into<String>,
        connection_details: Option<EndpointDescriptor>,
    ) -> Self {
        Self::Register {
            owner: owner.into(),
            name: name.into(),
            connection_details,
        }
    }

    /// Creates a metrics frame.
    pub fn metrics(metrics: HardwareSnapshot) -> Self {
        Self::Metrics { metrics }
    }

    /// Creates a status frame.
    pub fn status(status: RigStatus) -> Self {
        Self::Status { status }
    }

    /// Creates an alert frame.
    pub fn alert(alert_type: AlertKind, message: impl Into<String>) -> Self {
        Self::Alert {
            alert_type,
            message: message.into(),
        }
    }
}

/// Frames sent by the server to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Registration acknowledgement carrying the resolved identity.
    Registered {
        #[serde(rename = "rigId")]
        rig_id: String,
        settings: RigSettings,
    },

    /// Current tuning settings, pushed after registration.
    Settings { settings: RigSettings },

    /// Tuning recommendations for the reporting rig, keyed by unit
    /// label (`gpu0`, `gpu1`, ...).
    Optimize {
        recommendations: BTreeMap<String, Recommendation>,
    },

    /// A rig record changed; broadcast to every open connection.
    RigUpdate {
        #[serde(rename = "rigId")]
        rig_id: String,
        rig: Box<RigRecord>,
    },

    /// Error response; the connection stays open.
    Error { message: String },
}

impl ServerMessage {
    /// Creates a registration acknowledgement for a record.
    pub fn registered(record: &RigRecord) -> Self {
        Self::Registered {
            rig_id: record.id.slug(),
            settings: record.settings,
        }
    }

    /// Creates a settings push for a record.
    pub fn settings(record: &RigRecord) -> Self {
        Self::Settings {
            settings: record.settings,
        }
    }

    /// Creates an optimize frame from analyzer output.
    pub fn optimize(recommendations: BTreeMap<String, Recommendation>) -> Self {
        Self::Optimize { recommendations }
    }

    /// Creates a rig update broadcast frame.
    pub fn rig_update(rig_id: impl Into<String>, record: RigRecord) -> Self {
        Self::RigUpdate {
            rig_id: rig_id.into(),
            rig: Box::new(record),
        }
    }

    /// Creates an error frame.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
