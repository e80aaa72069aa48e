//! Error taxonomy (spec.md §7).
//!
//! These are kinds, not a single catch-all: callers match on variant to
//! decide whether an error is user-facing (surfaced as a system message to
//! one session), silently dropped (a malformed overlay payload), or fatal
//! (overlay startup failure, which terminates the process with exit code 1).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WhisperError {
    /// User supplied an invalid nick, room, or command. Surfaced to that user only.
    #[error("invalid input: {0}")]
    BadInput(String),

    /// Sliding-window rate limit exceeded; the triggering message is discarded.
    #[error("rate limit exceeded")]
    RateLimited,

    /// `content` exceeded `maxMessageSize`.
    #[error("message too large: {size} bytes exceeds the {max}-byte limit")]
    OversizedMessage { size: usize, max: usize },

    /// An overlay payload failed to decode. Logged and dropped; no user-visible effect.
    #[error("malformed message payload: {0}")]
    BadMessage(String),

    /// The overlay reported no remote subscribers for a publish. Recovered
    /// internally by the Room Router (spec.md §4.6) — this variant exists so
    /// the distinction is representable, not because it should usually
    /// escape to a caller.
    #[error("no peers subscribed to room {0}")]
    PublishIsolated(String),

    /// Any other overlay publish failure. Surfaced to the sender; state
    /// mutations that preceded the publish (e.g. a nick change) are not
    /// rolled back.
    #[error("failed to publish to room {room}: {reason}")]
    PublishFailed { room: String, reason: String },

    /// Overlay start or listen failure. Fatal: terminates the process with exit code 1.
    #[error("overlay failed to start: {0}")]
    OverlayFatal(String),

    /// The SSH/transport stream closed or errored. Triggers session cleanup;
    /// other sessions are unaffected.
    #[error("transport closed: {0}")]
    TransportClosed(String),
}

impl From<crate::overlay::OverlayError> for WhisperError {
    fn from(e: crate::overlay::OverlayError) -> Self {
        use crate::overlay::OverlayError as OE;
        match e {
            OE::Isolated(room) => WhisperError::PublishIsolated(room),
            OE::PublishFailed { room, reason } => WhisperError::PublishFailed { room, reason },
            OE::Other(msg) => WhisperError::OverlayFatal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::OverlayError;

    #[test]
    fn isolated_overlay_error_maps_to_publish_isolated() {
        let err: WhisperError = OverlayError::Isolated("lobby".into()).into();
        assert!(matches!(err, WhisperError::PublishIsolated(room) if room == "lobby"));
    }

    #[test]
    fn publish_failed_preserves_room_and_reason() {
        let err: WhisperError = OverlayError::PublishFailed {
            room: "lobby".into(),
            reason: "boom".into(),
        }
        .into();
        match err {
            WhisperError::PublishFailed { room, reason } => {
                assert_eq!(room, "lobby");
                assert_eq!(reason, "boom");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
