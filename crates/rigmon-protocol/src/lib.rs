//! Rigmon Protocol - Wire protocol for rig telemetry connections
//!
//! This crate provides the frame types and line codec for communication
//! between rig agents and the rigmond daemon, and for the broadcast
//! frames the daemon pushes to every connected client.

pub mod frame;
pub mod message;

pub use frame::{decode_frame, encode_frame, FrameError, MAX_FRAME_LEN};
pub use message::{RigMessage, ServerMessage};
