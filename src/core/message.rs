use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted chat message.
///
/// The id is assigned by the durable store; the timestamp is assigned
/// server-side at ingress and is the sole ordering key within a chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub chat_id: u64,
    pub sender_id: u64,
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: MessageType,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Builds an unpersisted message (id 0) stamped with the current time
    pub fn new(chat_id: u64, sender_id: u64, body: String, kind: MessageType) -> Self {
        Self {
            id: 0,
            chat_id,
            sender_id,
            message: body,
            kind,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
}

/// Chat metadata as held by the durable store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: u64,
    pub name: String,
    pub is_group: bool,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}
