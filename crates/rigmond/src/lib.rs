//! Rigmond - Rig session registry and telemetry relay daemon
//!
//! This crate provides the daemon's infrastructure:
//! - `registry` - Actor-owned rig records and connection bindings
//! - `server` - TCP telemetry server, one task per connection
//! - `liveness` - Periodic sweep marking silent rigs offline
//! - `relay` - Transparent forwarding pairs to rig-declared endpoints
//! - `config` - TOML + env configuration
//! - `monitor` - Daemon self-monitoring (CPU/memory)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        rigmond daemon                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌─────────────────┐      ┌─────────────────────────────┐    │
//! │  │ TelemetryServer │─────▶│       RegistryActor         │    │
//! │  │  (TCP listener) │      │  (rig records + bindings)   │    │
//! │  └────────┬────────┘      └──────────────┬──────────────┘    │
//! │           │ connections                  │ events            │
//! │           ▼                              ▼                   │
//! │  ┌─────────────────┐      ┌─────────────────────────────┐    │
//! │  │ConnectionHandler│◀─────│     broadcast::Sender       │    │
//! │  │(per connection) │      │    (rig_update fanout)      │    │
//! │  └─────────────────┘      └─────────────────────────────┘    │
//! │                                                              │
//! │  ┌─────────────────┐      ┌─────────────────────────────┐    │
//! │  │ Liveness sweep  │      │         RelayServer         │    │
//! │  │ (periodic task) │      │  (independent TCP bridge)   │    │
//! │  └─────────────────┘      └─────────────────────────────┘    │
//! │                                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate avoids `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()` and `todo!()`; fallible operations
//! return `Result` or `Option` and channel closures are handled
//! gracefully.

pub mod config;
pub mod liveness;
pub mod monitor;
pub mod registry;
pub mod relay;
pub mod server;
