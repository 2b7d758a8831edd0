//! Socket frame envelopes
//!
//! Every frame on the wire is a JSON object carrying a `type` tag. Inbound
//! frames are loosely typed; outbound frames are a tagged sum with one
//! payload arm per event type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::message::Message;

/// A frame received from a client socket
#[derive(Debug, Clone, Deserialize)]
pub struct InEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub message: String,
    /// Client clock in milliseconds since epoch; filled server-side when zero
    #[serde(default)]
    pub timestamp: i64,
}

/// A frame sent to a client socket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutEvent {
    /// Recent history, oldest first, sent once on socket open
    #[serde(rename = "history")]
    History {
        messages: Vec<Message>,
        timestamp: DateTime<Utc>,
        meta: HistoryMeta,
    },

    /// One chat message fanned out to the room
    #[serde(rename = "message")]
    Message {
        message: Message,
        chat_id: u64,
        timestamp: DateTime<Utc>,
    },

    /// Persistence acknowledgement, sent to the originator only
    #[serde(rename = "message_sent")]
    MessageSent {
        message_id: u64,
        timestamp: DateTime<Utc>,
    },

    /// Typing indicator, never echoed back to its sender
    #[serde(rename = "typing")]
    Typing {
        user_id: u64,
        chat_id: u64,
        message: bool,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "user_joined")]
    UserJoined {
        user_id: u64,
        chat_id: u64,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "user_left")]
    UserLeft {
        user_id: u64,
        chat_id: u64,
        timestamp: DateTime<Utc>,
    },

    /// Room snapshot sent to a client right after registration
    #[serde(rename = "room_info")]
    RoomInfo {
        message: RoomSnapshot,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "error")]
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl OutEvent {
    /// Error envelope for the given message
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMeta {
    pub count: usize,
    pub has_more: bool,
}

/// Observable room state, the payload of `room_info`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub chat_id: u64,
    pub active_clients: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}
