//! Line framing: one JSON object per newline-terminated frame.
//!
//! Decoding distinguishes malformed data from a well-formed frame of
//! unknown kind, so handlers can answer an unknown `type` by name while
//! garbage gets a generic format error.

use serde_json::Value;
use thiserror::Error;

use crate::message::{RigMessage, ServerMessage};

/// Hard cap on a single frame (1 MiB).
pub const MAX_FRAME_LEN: usize = 1_048_576;

/// Message kinds the server understands.
const KNOWN_KINDS: [&str; 4] = ["register", "metrics", "status", "alert"];

/// Errors produced while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Not JSON, or JSON of the wrong shape for its declared kind.
    #[error("invalid message format: {0}")]
    Malformed(String),

    /// Well-formed JSON whose `type` names a kind we do not speak.
    #[error("unknown message type: {0}")]
    UnknownKind(String),

    /// Frame exceeds [`MAX_FRAME_LEN`].
    #[error("frame too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
}

/// Decodes one inbound frame.
pub fn decode_frame(line: &str) -> Result<RigMessage, FrameError> {
    if line.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge {
            size: line.len(),
            max: MAX_FRAME_LEN,
        });
    }

    let value: Value =
        serde_json::from_str(line).map_err(|e| FrameError::Malformed(e.to_string()))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_owned);

    match serde_json::from_value::<RigMessage>(value) {
        Ok(msg) => Ok(msg),
        Err(err) => match kind {
            Some(kind) if !KNOWN_KINDS.contains(&kind.as_str()) => {
                Err(FrameError::UnknownKind(kind))
            }
            _ => Err(FrameError::Malformed(err.to_string())),
        },
    }
}

/// Encodes an outbound frame as a single JSON line, without the trailing
/// newline (the writer appends it).
pub fn encode_frame(msg: &ServerMessage) -> Result<String, FrameError> {
    serde_json::to_string(msg).map_err(|e| FrameError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_register() {
        let msg = decode_frame(r#"{"type":"register","owner":"w1","name":"rig1"}"#).unwrap();
        match msg {
            RigMessage::Register {
                owner,
                name,
                connection_details,
            } => {
                assert_eq!(owner, "w1");
                assert_eq!(name, "rig1");
                assert!(connection_details.is_none());
            }
            other => panic!("expected register, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_kind_is_named() {
        let err = decode_frame(r#"{"type":"reboot"}"#).unwrap_err();
        match err {
            FrameError::UnknownKind(ref kind) => assert_eq!(kind, "reboot"),
            other => panic!("expected UnknownKind, got {other:?}"),
        }
        assert_eq!(err.to_string(), "unknown message type: reboot");
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            decode_frame("not json at all"),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn test_known_kind_with_bad_payload_is_malformed() {
        // `type` is recognized but the payload shape is wrong.
        let err = decode_frame(r#"{"type":"status","status":"exploded"}"#).unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));
    }

    #[test]
    fn test_missing_type_is_malformed() {
        assert!(matches!(
            decode_frame(r#"{"owner":"w1"}"#),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let huge = format!(
            r#"{{"type":"alert","alertType":"system","message":"{}"}}"#,
            "x".repeat(MAX_FRAME_LEN)
        );
        assert!(matches!(
            decode_frame(&huge),
            Err(FrameError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_encode_is_single_line() {
        let line = encode_frame(&ServerMessage::error("nope")).unwrap();
        assert!(!line.contains('\n'));
        assert!(line.starts_with('{'));
    }
}
