//! Abstract storage interfaces for pluggable backends

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::message::{Chat, Message};
use crate::error::Result;

/// Which side of the cursor a page is read from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Older,
    Newer,
}

impl Direction {
    /// Lenient parse; anything unrecognized falls back to `Older`
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("newer") {
            Self::Newer
        } else {
            Self::Older
        }
    }
}

/// One page of keyset-paginated messages
#[derive(Debug, Clone)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub has_next: bool,
    pub has_previous: bool,
    pub total_count: u64,
}

/// Durable persistence of chats, members, messages and read receipts
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Creates a chat and assigns its id
    async fn create_chat(&self, name: &str, is_group: bool) -> Result<Chat>;

    /// Creates a group chat and adds all members in one transactional call
    async fn create_group_chat(&self, name: &str, user_ids: &[u64]) -> Result<Chat>;

    async fn delete_chat(&self, chat_id: u64) -> Result<()>;

    /// Adds members in a single transactional call
    async fn add_users_to_chat(&self, chat_id: u64, user_ids: &[u64]) -> Result<()>;

    async fn get_chat(&self, chat_id: u64) -> Result<Chat>;

    async fn chats_for_user(&self, user_id: u64) -> Result<Vec<Chat>>;

    /// Two-party non-group chats the user participates in
    async fn direct_chats_for_user(&self, user_id: u64) -> Result<Vec<Chat>>;

    async fn chat_members(&self, chat_id: u64) -> Result<Vec<u64>>;

    /// Persists a message, assigning its id; returns the stored message
    async fn append_message(&self, message: Message) -> Result<Message>;

    /// The newest `limit` messages, newest first
    async fn recent_messages(&self, chat_id: u64, limit: usize) -> Result<Vec<Message>>;

    /// Keyset pagination over a chat's messages.
    ///
    /// `Older` pages are newest-first with a strict `timestamp < cursor`
    /// bound; `Newer` pages are oldest-first with a strict `>` bound. A
    /// missing cursor starts from the corresponding end.
    async fn messages_page(
        &self,
        chat_id: u64,
        cursor: Option<DateTime<Utc>>,
        limit: usize,
        direction: Direction,
    ) -> Result<MessagePage>;

    async fn mark_read(&self, message_id: u64, user_id: u64) -> Result<()>;
}

/// Membership checks, kept separate so the ingress depends on nothing else
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn is_member(&self, chat_id: u64, user_id: u64) -> Result<bool>;
}

/// Fast store bridging recent messages and presence.
///
/// Key layout mirrors the production cache: `chat:{id}:messages` (list,
/// 24h TTL), `chat:{id}:users_online` (set, 30m TTL),
/// `chat:{id}:msg_counter` (int, 24h TTL), `user:{id}:active_chats`
/// (set, 30m TTL).
#[async_trait]
pub trait ChatCache: Send + Sync {
    /// Right-pushes a message, trims the list to the newest 1000 and
    /// refreshes the TTL
    async fn save_message(&self, chat_id: u64, message: &Message) -> Result<()>;

    /// All cached messages in insertion order; malformed entries are
    /// skipped, never fatal
    async fn get_messages(&self, chat_id: u64) -> Result<Vec<Message>>;

    async fn clear_messages(&self, chat_id: u64) -> Result<()>;

    async fn message_count(&self, chat_id: u64) -> Result<usize>;

    /// Adds to both presence sets and refreshes their TTLs
    async fn add_user_to_chat(&self, chat_id: u64, user_id: u64) -> Result<()>;

    /// Removes from both presence sets; returns the remaining cardinality
    /// of the chat's online set
    async fn remove_user_from_chat(&self, chat_id: u64, user_id: u64) -> Result<usize>;

    async fn chat_users(&self, chat_id: u64) -> Result<Vec<u64>>;

    async fn is_user_in_chat(&self, chat_id: u64, user_id: u64) -> Result<bool>;

    async fn user_chats(&self, user_id: u64) -> Result<Vec<u64>>;

    async fn increment_message_counter(&self, chat_id: u64) -> Result<u64>;

    /// Number of chats with a non-empty online set
    async fn active_chat_count(&self) -> Result<usize>;

    /// Drops every key belonging to the chat
    async fn clear_chat(&self, chat_id: u64) -> Result<()>;
}
