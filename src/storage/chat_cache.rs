//! Presence and recent-message cache service
//!
//! Sits between the realtime layer and the raw [`ChatCache`]. Tracks who
//! is live in which chat and keeps the per-chat recent-message mirror
//! warm. When the last user leaves a chat the mirror is dropped: the
//! durable store already holds every message, so the cache is never a
//! write-back buffer.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::core::message::Message;
use crate::error::Result;
use crate::storage::traits::ChatCache;

pub struct ChatCacheService {
    cache: Arc<dyn ChatCache>,
}

impl ChatCacheService {
    pub fn new(cache: Arc<dyn ChatCache>) -> Self {
        Self { cache }
    }

    /// Best-effort write-through of one message
    pub async fn save_message(&self, chat_id: u64, message: &Message) -> Result<()> {
        if chat_id == 0 {
            return Ok(()); // nothing to key the cache on
        }

        self.cache.save_message(chat_id, message).await?;

        if let Err(e) = self.cache.increment_message_counter(chat_id).await {
            warn!("chat cache: failed to bump counter for chat {}: {}", chat_id, e);
        }
        Ok(())
    }

    /// Cached recent messages in insertion order; empty when cold
    pub async fn messages(&self, chat_id: u64) -> Result<Vec<Message>> {
        if chat_id == 0 {
            return Ok(Vec::new());
        }
        self.cache.get_messages(chat_id).await
    }

    /// Warms the cache with history fetched from the durable store.
    /// Individual failures are logged and skipped.
    pub async fn cache_messages(&self, chat_id: u64, messages: &[Message]) -> Result<()> {
        if chat_id == 0 || messages.is_empty() {
            return Ok(());
        }
        for message in messages {
            if let Err(e) = self.cache.save_message(chat_id, message).await {
                warn!("chat cache: failed to warm message {}: {}", message.id, e);
            }
        }
        Ok(())
    }

    /// Marks the user online in the chat, refreshing both presence TTLs
    pub async fn user_joined(&self, chat_id: u64, user_id: u64) -> Result<()> {
        if chat_id == 0 || user_id == 0 {
            return Ok(());
        }
        self.cache.add_user_to_chat(chat_id, user_id).await?;
        debug!("chat cache: user {} joined chat {}", user_id, chat_id);
        Ok(())
    }

    /// Marks the user offline. When nobody is left in the chat, the
    /// recent-message mirror is cleared so idle chats hold no cache.
    pub async fn user_left(&self, chat_id: u64, user_id: u64) -> Result<()> {
        if chat_id == 0 || user_id == 0 {
            return Ok(());
        }

        let remaining = self.cache.remove_user_from_chat(chat_id, user_id).await?;
        if remaining == 0 {
            self.cache.clear_messages(chat_id).await?;
            info!("chat cache: chat {} idle, recent-message cache cleared", chat_id);
        }
        Ok(())
    }

    /// Advisory presence check, not authoritative
    pub async fn is_user_in_chat(&self, chat_id: u64, user_id: u64) -> Result<bool> {
        if chat_id == 0 || user_id == 0 {
            return Ok(false);
        }
        self.cache.is_user_in_chat(chat_id, user_id).await
    }

    pub async fn active_users(&self, chat_id: u64) -> Result<Vec<u64>> {
        if chat_id == 0 {
            return Ok(Vec::new());
        }
        self.cache.chat_users(chat_id).await
    }

    pub async fn active_chats_for_user(&self, user_id: u64) -> Result<Vec<u64>> {
        if user_id == 0 {
            return Ok(Vec::new());
        }
        self.cache.user_chats(user_id).await
    }

    pub async fn active_chat_count(&self) -> Result<usize> {
        self.cache.active_chat_count().await
    }

    /// Drops every cache key belonging to the chat
    pub async fn clear_chat(&self, chat_id: u64) -> Result<()> {
        if chat_id == 0 {
            return Ok(());
        }
        self.cache.clear_chat(chat_id).await
    }
}
