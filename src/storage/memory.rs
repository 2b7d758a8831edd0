//! In-memory implementation of the durable chat store
//!
//! Backs tests and single-node deployments without a database. Messages
//! are kept per chat in timestamp order, which makes the keyset
//! pagination a pair of filtered scans.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::core::message::{Chat, Message};
use crate::error::{ChatHubError, Result};
use crate::storage::traits::{ChatStore, Direction, IdentityProvider, MessagePage};

#[derive(Default)]
struct StoreInner {
    next_chat_id: u64,
    next_message_id: u64,
    chats: HashMap<u64, Chat>,
    members: HashMap<u64, HashSet<u64>>,
    /// Per chat, ascending by timestamp
    messages: HashMap<u64, Vec<Message>>,
    /// message id -> chat id, for existence checks
    message_chats: HashMap<u64, u64>,
    /// message id -> users that marked it read
    read_marks: HashMap<u64, HashSet<u64>>,
}

#[derive(Default)]
pub struct MemoryChatStore {
    inner: RwLock<StoreInner>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn require_chat(inner: &StoreInner, chat_id: u64) -> Result<()> {
    if inner.chats.contains_key(&chat_id) {
        Ok(())
    } else {
        Err(ChatHubError::NotFound("chat".to_string()))
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn create_chat(&self, name: &str, is_group: bool) -> Result<Chat> {
        let mut inner = self.inner.write().await;
        inner.next_chat_id += 1;
        let now = Utc::now();
        let chat = Chat {
            id: inner.next_chat_id,
            name: name.to_string(),
            is_group,
            created_at: now,
            updated_at: now,
        };
        inner.chats.insert(chat.id, chat.clone());
        inner.members.insert(chat.id, HashSet::new());
        Ok(chat)
    }

    async fn create_group_chat(&self, name: &str, user_ids: &[u64]) -> Result<Chat> {
        let mut inner = self.inner.write().await;
        inner.next_chat_id += 1;
        let now = Utc::now();
        let chat = Chat {
            id: inner.next_chat_id,
            name: name.to_string(),
            is_group: true,
            created_at: now,
            updated_at: now,
        };
        inner.chats.insert(chat.id, chat.clone());
        inner
            .members
            .insert(chat.id, user_ids.iter().copied().collect());
        Ok(chat)
    }

    async fn delete_chat(&self, chat_id: u64) -> Result<()> {
        let mut inner = self.inner.write().await;
        require_chat(&inner, chat_id)?;
        inner.chats.remove(&chat_id);
        inner.members.remove(&chat_id);
        if let Some(messages) = inner.messages.remove(&chat_id) {
            for message in &messages {
                inner.message_chats.remove(&message.id);
                inner.read_marks.remove(&message.id);
            }
        }
        Ok(())
    }

    async fn add_users_to_chat(&self, chat_id: u64, user_ids: &[u64]) -> Result<()> {
        let mut inner = self.inner.write().await;
        require_chat(&inner, chat_id)?;
        let members = inner.members.entry(chat_id).or_default();
        for user_id in user_ids {
            members.insert(*user_id);
        }
        if let Some(chat) = inner.chats.get_mut(&chat_id) {
            chat.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get_chat(&self, chat_id: u64) -> Result<Chat> {
        let inner = self.inner.read().await;
        inner
            .chats
            .get(&chat_id)
            .cloned()
            .ok_or_else(|| ChatHubError::NotFound("chat".to_string()))
    }

    async fn chats_for_user(&self, user_id: u64) -> Result<Vec<Chat>> {
        let inner = self.inner.read().await;
        let mut chats: Vec<Chat> = inner
            .chats
            .values()
            .filter(|chat| {
                inner
                    .members
                    .get(&chat.id)
                    .map_or(false, |members| members.contains(&user_id))
            })
            .cloned()
            .collect();
        chats.sort_by_key(|chat| chat.id);
        Ok(chats)
    }

    async fn direct_chats_for_user(&self, user_id: u64) -> Result<Vec<Chat>> {
        let chats = self.chats_for_user(user_id).await?;
        let inner = self.inner.read().await;
        Ok(chats
            .into_iter()
            .filter(|chat| {
                !chat.is_group
                    && inner
                        .members
                        .get(&chat.id)
                        .map_or(false, |members| members.len() == 2)
            })
            .collect())
    }

    async fn chat_members(&self, chat_id: u64) -> Result<Vec<u64>> {
        let inner = self.inner.read().await;
        require_chat(&inner, chat_id)?;
        let mut members: Vec<u64> = inner
            .members
            .get(&chat_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default();
        members.sort_unstable();
        Ok(members)
    }

    async fn append_message(&self, mut message: Message) -> Result<Message> {
        let mut inner = self.inner.write().await;
        require_chat(&inner, message.chat_id)?;

        inner.next_message_id += 1;
        message.id = inner.next_message_id;
        inner.message_chats.insert(message.id, message.chat_id);

        let messages = inner.messages.entry(message.chat_id).or_default();
        // timestamps are assigned at ingress and almost always monotonic;
        // scan from the back for the rare out-of-order arrival
        let at = messages
            .iter()
            .rposition(|m| m.timestamp <= message.timestamp)
            .map(|i| i + 1)
            .unwrap_or(0);
        messages.insert(at, message.clone());

        Ok(message)
    }

    async fn recent_messages(&self, chat_id: u64, limit: usize) -> Result<Vec<Message>> {
        let inner = self.inner.read().await;
        require_chat(&inner, chat_id)?;
        Ok(inner
            .messages
            .get(&chat_id)
            .map(|messages| messages.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn messages_page(
        &self,
        chat_id: u64,
        cursor: Option<DateTime<Utc>>,
        limit: usize,
        direction: Direction,
    ) -> Result<MessagePage> {
        let inner = self.inner.read().await;
        require_chat(&inner, chat_id)?;

        let all = inner.messages.get(&chat_id);
        let total_count = all.map_or(0, |messages| messages.len() as u64);
        let empty = Vec::new();
        let all = all.unwrap_or(&empty);

        let mut page: Vec<Message> = match direction {
            Direction::Older => all
                .iter()
                .rev()
                .filter(|m| cursor.map_or(true, |c| m.timestamp < c))
                .take(limit + 1)
                .cloned()
                .collect(),
            Direction::Newer => all
                .iter()
                .filter(|m| cursor.map_or(true, |c| m.timestamp > c))
                .take(limit + 1)
                .cloned()
                .collect(),
        };

        let overflow = page.len() > limit;
        if overflow {
            page.truncate(limit);
        }

        // the probe overflow marks more pages in the travel direction;
        // the presence of a cursor marks pages behind us
        let (has_next, has_previous) = match direction {
            Direction::Older => (overflow, cursor.is_some()),
            Direction::Newer => (cursor.is_some(), overflow),
        };

        Ok(MessagePage {
            messages: page,
            has_next,
            has_previous,
            total_count,
        })
    }

    async fn mark_read(&self, message_id: u64, user_id: u64) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.message_chats.contains_key(&message_id) {
            return Err(ChatHubError::NotFound("message".to_string()));
        }
        inner
            .read_marks
            .entry(message_id)
            .or_default()
            .insert(user_id);
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for MemoryChatStore {
    async fn is_member(&self, chat_id: u64, user_id: u64) -> Result<bool> {
        let inner = self.inner.read().await;
        Ok(inner
            .members
            .get(&chat_id)
            .map_or(false, |members| members.contains(&user_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::MessageType;
    use chrono::Duration;

    async fn seeded_chat(store: &MemoryChatStore, n: usize) -> u64 {
        let chat = store.create_chat("", false).await.unwrap();
        let base = Utc::now() - Duration::seconds(n as i64);
        for i in 0..n {
            let mut msg = Message::new(chat.id, 1, format!("m{}", i + 1), MessageType::Text);
            msg.timestamp = base + Duration::seconds(i as i64);
            store.append_message(msg).await.unwrap();
        }
        chat.id
    }

    #[tokio::test]
    async fn test_append_assigns_ids() {
        let store = MemoryChatStore::new();
        let chat = store.create_chat("", false).await.unwrap();
        let a = store
            .append_message(Message::new(chat.id, 1, "a".into(), MessageType::Text))
            .await
            .unwrap();
        let b = store
            .append_message(Message::new(chat.id, 1, "b".into(), MessageType::Text))
            .await
            .unwrap();
        assert!(a.id > 0);
        assert_eq!(b.id, a.id + 1);
    }

    #[tokio::test]
    async fn test_append_unknown_chat_fails() {
        let store = MemoryChatStore::new();
        let result = store
            .append_message(Message::new(99, 1, "a".into(), MessageType::Text))
            .await;
        assert!(matches!(result, Err(ChatHubError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_recent_messages_newest_first() {
        let store = MemoryChatStore::new();
        let chat_id = seeded_chat(&store, 5).await;
        let recent = store.recent_messages(chat_id, 3).await.unwrap();
        let bodies: Vec<&str> = recent.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(bodies, ["m5", "m4", "m3"]);
    }

    #[tokio::test]
    async fn test_pagination_older_walk() {
        let store = MemoryChatStore::new();
        let chat_id = seeded_chat(&store, 25).await;

        // page 1: 25..16
        let page = store
            .messages_page(chat_id, None, 10, Direction::Older)
            .await
            .unwrap();
        assert_eq!(page.messages.len(), 10);
        assert_eq!(page.messages[0].message, "m25");
        assert_eq!(page.messages[9].message, "m16");
        assert!(page.has_next);
        assert!(!page.has_previous);
        assert_eq!(page.total_count, 25);

        // page 2: 15..6, strictly older than the last timestamp of page 1
        let cursor = page.messages.last().unwrap().timestamp;
        let page = store
            .messages_page(chat_id, Some(cursor), 10, Direction::Older)
            .await
            .unwrap();
        assert_eq!(page.messages[0].message, "m15");
        assert_eq!(page.messages[9].message, "m6");
        assert!(page.has_next);
        assert!(page.has_previous);

        // page 3: 5..1, exhausted
        let cursor = page.messages.last().unwrap().timestamp;
        let page = store
            .messages_page(chat_id, Some(cursor), 10, Direction::Older)
            .await
            .unwrap();
        assert_eq!(page.messages.len(), 5);
        assert_eq!(page.messages[0].message, "m5");
        assert_eq!(page.messages[4].message, "m1");
        assert!(!page.has_next);
    }

    #[tokio::test]
    async fn test_pagination_newer_is_oldest_first_and_strict() {
        let store = MemoryChatStore::new();
        let chat_id = seeded_chat(&store, 6).await;

        let all = store
            .messages_page(chat_id, None, 10, Direction::Older)
            .await
            .unwrap();
        let cursor = all.messages.last().unwrap().timestamp; // m1

        let page = store
            .messages_page(chat_id, Some(cursor), 3, Direction::Newer)
            .await
            .unwrap();
        let bodies: Vec<&str> = page.messages.iter().map(|m| m.message.as_str()).collect();
        // strictly newer than m1, oldest first
        assert_eq!(bodies, ["m2", "m3", "m4"]);
        assert!(page.has_previous);
    }

    #[tokio::test]
    async fn test_pagination_each_message_exactly_once() {
        let store = MemoryChatStore::new();
        let chat_id = seeded_chat(&store, 23).await;

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = store
                .messages_page(chat_id, cursor, 7, Direction::Older)
                .await
                .unwrap();
            for pair in page.messages.windows(2) {
                assert!(pair[0].timestamp > pair[1].timestamp);
            }
            seen.extend(page.messages.iter().map(|m| m.id));
            if !page.has_next {
                break;
            }
            cursor = page.messages.last().map(|m| m.timestamp);
        }

        let unique: HashSet<u64> = seen.iter().copied().collect();
        assert_eq!(seen.len(), 23);
        assert_eq!(unique.len(), 23);
    }

    #[tokio::test]
    async fn test_direct_chats_excludes_groups_and_larger_chats() {
        let store = MemoryChatStore::new();
        let direct = store.create_chat("", false).await.unwrap();
        store.add_users_to_chat(direct.id, &[1, 2]).await.unwrap();
        let group = store.create_group_chat("team", &[1, 2, 3]).await.unwrap();
        let wide = store.create_chat("", false).await.unwrap();
        store.add_users_to_chat(wide.id, &[1, 2, 3]).await.unwrap();

        let found = store.direct_chats_for_user(1).await.unwrap();
        let ids: Vec<u64> = found.iter().map(|c| c.id).collect();
        assert_eq!(ids, [direct.id]);
        assert!(!ids.contains(&group.id));
    }

    #[tokio::test]
    async fn test_mark_read_requires_message() {
        let store = MemoryChatStore::new();
        assert!(store.mark_read(1, 1).await.is_err());

        let chat = store.create_chat("", false).await.unwrap();
        let saved = store
            .append_message(Message::new(chat.id, 1, "a".into(), MessageType::Text))
            .await
            .unwrap();
        assert!(store.mark_read(saved.id, 2).await.is_ok());
    }

    #[tokio::test]
    async fn test_membership() {
        let store = MemoryChatStore::new();
        let chat = store.create_chat("", false).await.unwrap();
        store.add_users_to_chat(chat.id, &[1, 2]).await.unwrap();
        assert!(store.is_member(chat.id, 1).await.unwrap());
        assert!(!store.is_member(chat.id, 3).await.unwrap());
        assert!(!store.is_member(999, 1).await.unwrap());
    }
}
