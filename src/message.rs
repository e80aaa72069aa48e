//! Wire + in-memory chat message record (spec.md §3, §4.4).
//!
//! Each `ChatMessage` is encoded independently as the UTF-8 bytes of its
//! JSON form — a "text encoding of a mapping," per spec.md's data model.
//! This is distinct from the postcard-encoded `ChatTicket` in `overlay.rs`:
//! tickets are copy-pasted as compact base32 blobs, chat messages cross the
//! gossip wire as human-inspectable JSON.

use serde::{Deserialize, Serialize};

use crate::error::WhisperError;

/// What kind of event a `ChatMessage` represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Join,
    Leave,
    Nick,
    Action,
}

/// A single chat event, either freshly constructed locally or decoded off
/// the wire. `id` and `timestamp` are stamped at construction time by the
/// producing process's own clock — there is no global ordering guarantee
/// across processes (spec.md §5).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub timestamp: u64,
    pub room: String,
    pub nick: String,
    pub fingerprint: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub content: String,
    #[serde(rename = "oldNick", default, skip_serializing_if = "Option::is_none")]
    pub old_nick: Option<String>,
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl ChatMessage {
    pub fn text(room: &str, nick: &str, fingerprint: &str, content: &str) -> Self {
        Self {
            id: new_id(),
            timestamp: now_ms(),
            room: room.to_string(),
            nick: nick.to_string(),
            fingerprint: fingerprint.to_string(),
            kind: MessageType::Text,
            content: content.to_string(),
            old_nick: None,
        }
    }

    pub fn join(room: &str, nick: &str, fingerprint: &str) -> Self {
        Self {
            id: new_id(),
            timestamp: now_ms(),
            room: room.to_string(),
            nick: nick.to_string(),
            fingerprint: fingerprint.to_string(),
            kind: MessageType::Join,
            content: format!("{nick} has joined the room"),
            old_nick: None,
        }
    }

    pub fn leave(room: &str, nick: &str, fingerprint: &str) -> Self {
        Self {
            id: new_id(),
            timestamp: now_ms(),
            room: room.to_string(),
            nick: nick.to_string(),
            fingerprint: fingerprint.to_string(),
            kind: MessageType::Leave,
            content: format!("{nick} has left the room"),
            old_nick: None,
        }
    }

    pub fn nick(room: &str, old_nick: &str, new_nick: &str, fingerprint: &str) -> Self {
        Self {
            id: new_id(),
            timestamp: now_ms(),
            room: room.to_string(),
            nick: new_nick.to_string(),
            fingerprint: fingerprint.to_string(),
            kind: MessageType::Nick,
            content: format!("{old_nick} is now known as {new_nick}"),
            old_nick: Some(old_nick.to_string()),
        }
    }

    pub fn action(room: &str, nick: &str, fingerprint: &str, action: &str) -> Self {
        Self {
            id: new_id(),
            timestamp: now_ms(),
            room: room.to_string(),
            nick: nick.to_string(),
            fingerprint: fingerprint.to_string(),
            kind: MessageType::Action,
            content: action.to_string(),
            old_nick: None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        // Construction always produces valid UTF-8/JSON, so this cannot fail
        // in practice; unwrap documents that invariant rather than hiding it.
        serde_json::to_vec(self).expect("ChatMessage always serializes")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WhisperError> {
        serde_json::from_slice(bytes).map_err(|e| WhisperError::BadMessage(e.to_string()))
    }
}

/// Checks the UTF-8 byte length of `content` (not the whole record) against
/// a maximum. spec.md §9 notes `/me` actions are deliberately not
/// size-checked by the Session — this function exists for the call sites
/// that do check (ordinary text sends).
pub fn size_valid(content: &str, max: usize) -> bool {
    content.len() <= max
}
