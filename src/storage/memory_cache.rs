//! In-memory implementation of the fast chat cache
//!
//! Entries are stored the way the production cache stores them: the
//! recent-message list holds serialized JSON blobs, presence is a pair of
//! sets, and every key carries a TTL that is refreshed on write and
//! enforced lazily on access.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::constants::{MESSAGE_CACHE_TTL, PRESENCE_TTL, RECENT_CACHE_LIMIT};
use crate::core::message::Message;
use crate::error::{ChatHubError, Result};
use crate::storage::traits::ChatCache;

struct TtlEntry<T> {
    value: T,
    expires_at: Instant,
}

impl<T> TtlEntry<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn refresh(&mut self, ttl: Duration) {
        self.expires_at = Instant::now() + ttl;
    }
}

#[derive(Default)]
struct CacheInner {
    /// chat:{id}:messages
    messages: HashMap<u64, TtlEntry<VecDeque<String>>>,
    /// chat:{id}:users_online
    chat_users: HashMap<u64, TtlEntry<HashSet<u64>>>,
    /// user:{id}:active_chats
    user_chats: HashMap<u64, TtlEntry<HashSet<u64>>>,
    /// chat:{id}:msg_counter
    counters: HashMap<u64, TtlEntry<u64>>,
}

pub struct MemoryChatCache {
    inner: Mutex<CacheInner>,
    message_ttl: Duration,
    presence_ttl: Duration,
}

impl Default for MemoryChatCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChatCache {
    pub fn new() -> Self {
        Self::with_ttls(MESSAGE_CACHE_TTL, PRESENCE_TTL)
    }

    pub fn with_ttls(message_ttl: Duration, presence_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            message_ttl,
            presence_ttl,
        }
    }
}

fn require_chat_id(chat_id: u64) -> Result<()> {
    if chat_id == 0 {
        return Err(ChatHubError::CacheError("chat id cannot be zero".to_string()));
    }
    Ok(())
}

/// Drops the entry when its TTL has lapsed, then hands back what is left
fn live<T>(map: &mut HashMap<u64, TtlEntry<T>>, key: u64) -> Option<&mut TtlEntry<T>> {
    if map.get(&key).is_some_and(|e| e.expires_at <= Instant::now()) {
        map.remove(&key);
    }
    map.get_mut(&key)
}

/// Like [`live`], but creates a fresh entry when none survives
fn live_or_insert<T: Default>(
    map: &mut HashMap<u64, TtlEntry<T>>,
    key: u64,
    ttl: Duration,
) -> &mut TtlEntry<T> {
    if map.get(&key).is_some_and(|e| e.expires_at <= Instant::now()) {
        map.remove(&key);
    }
    map.entry(key)
        .or_insert_with(|| TtlEntry::new(T::default(), ttl))
}

#[async_trait]
impl ChatCache for MemoryChatCache {
    async fn save_message(&self, chat_id: u64, message: &Message) -> Result<()> {
        require_chat_id(chat_id)?;
        let blob = serde_json::to_string(message)
            .map_err(|e| ChatHubError::CacheError(format!("failed to marshal message: {}", e)))?;

        let mut inner = self.inner.lock().await;
        let entry = live_or_insert(&mut inner.messages, chat_id, self.message_ttl);

        entry.value.push_back(blob);
        while entry.value.len() > RECENT_CACHE_LIMIT {
            entry.value.pop_front();
        }
        entry.refresh(self.message_ttl);
        Ok(())
    }

    async fn get_messages(&self, chat_id: u64) -> Result<Vec<Message>> {
        require_chat_id(chat_id)?;
        let mut inner = self.inner.lock().await;
        let entry = match live(&mut inner.messages, chat_id) {
            Some(entry) => entry,
            None => return Ok(Vec::new()),
        };

        // skip entries that fail to decode rather than failing the read
        Ok(entry
            .value
            .iter()
            .filter_map(|blob| serde_json::from_str(blob).ok())
            .collect())
    }

    async fn clear_messages(&self, chat_id: u64) -> Result<()> {
        require_chat_id(chat_id)?;
        self.inner.lock().await.messages.remove(&chat_id);
        Ok(())
    }

    async fn message_count(&self, chat_id: u64) -> Result<usize> {
        require_chat_id(chat_id)?;
        let mut inner = self.inner.lock().await;
        Ok(live(&mut inner.messages, chat_id).map_or(0, |e| e.value.len()))
    }

    async fn add_user_to_chat(&self, chat_id: u64, user_id: u64) -> Result<()> {
        require_chat_id(chat_id)?;
        let mut inner = self.inner.lock().await;

        let entry = live_or_insert(&mut inner.chat_users, chat_id, self.presence_ttl);
        entry.value.insert(user_id);
        entry.refresh(self.presence_ttl);

        let entry = live_or_insert(&mut inner.user_chats, user_id, self.presence_ttl);
        entry.value.insert(chat_id);
        entry.refresh(self.presence_ttl);

        Ok(())
    }

    async fn remove_user_from_chat(&self, chat_id: u64, user_id: u64) -> Result<usize> {
        require_chat_id(chat_id)?;
        let mut inner = self.inner.lock().await;

        let remaining = match live(&mut inner.chat_users, chat_id) {
            Some(entry) => {
                entry.value.remove(&user_id);
                entry.value.len()
            }
            None => 0,
        };

        if let Some(entry) = live(&mut inner.user_chats, user_id) {
            entry.value.remove(&chat_id);
        }

        Ok(remaining)
    }

    async fn chat_users(&self, chat_id: u64) -> Result<Vec<u64>> {
        require_chat_id(chat_id)?;
        let mut inner = self.inner.lock().await;
        let mut users: Vec<u64> = live(&mut inner.chat_users, chat_id)
            .map(|e| e.value.iter().copied().collect())
            .unwrap_or_default();
        users.sort_unstable();
        Ok(users)
    }

    async fn is_user_in_chat(&self, chat_id: u64, user_id: u64) -> Result<bool> {
        require_chat_id(chat_id)?;
        let mut inner = self.inner.lock().await;
        Ok(live(&mut inner.chat_users, chat_id).is_some_and(|e| e.value.contains(&user_id)))
    }

    async fn user_chats(&self, user_id: u64) -> Result<Vec<u64>> {
        let mut inner = self.inner.lock().await;
        let mut chats: Vec<u64> = live(&mut inner.user_chats, user_id)
            .map(|e| e.value.iter().copied().collect())
            .unwrap_or_default();
        chats.sort_unstable();
        Ok(chats)
    }

    async fn increment_message_counter(&self, chat_id: u64) -> Result<u64> {
        require_chat_id(chat_id)?;
        let mut inner = self.inner.lock().await;
        let entry = live_or_insert(&mut inner.counters, chat_id, self.message_ttl);
        entry.value += 1;
        entry.refresh(self.message_ttl);
        Ok(entry.value)
    }

    async fn active_chat_count(&self) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner
            .chat_users
            .retain(|_, entry| entry.expires_at > now);
        Ok(inner
            .chat_users
            .values()
            .filter(|entry| !entry.value.is_empty())
            .count())
    }

    async fn clear_chat(&self, chat_id: u64) -> Result<()> {
        require_chat_id(chat_id)?;
        let mut inner = self.inner.lock().await;
        inner.messages.remove(&chat_id);
        inner.chat_users.remove(&chat_id);
        inner.counters.remove(&chat_id);
        Ok(())
    }
}
