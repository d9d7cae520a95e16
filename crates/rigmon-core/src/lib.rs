//! Rigmon Core - Shared domain types for rig fleet monitoring
//!
//! This crate provides the domain model shared between the daemon
//! (rigmond) and any client tooling: rig identity and records, hardware
//! snapshots, alerts, and the pure metric analyzer that derives tuning
//! recommendations.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod analyzer;
pub mod rig;

// Re-exports for convenience
pub use analyzer::{
    analyze, ClockSuggestion, GpuProfile, ProfileTable, Recommendation, TuningAction,
    HIGH_TEMPERATURE,
};
pub use rig::{
    Alert, AlertKind, AlertSeverity, EndpointDescriptor, GpuReading, HardwareSnapshot, RigId,
    RigRecord, RigSettings, RigStatus,
};
