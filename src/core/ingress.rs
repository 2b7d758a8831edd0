//! Message ingress pipeline
//!
//! Everything a frame or HTTP send goes through on its way in:
//! validation, rate limiting, write-through persistence, best-effort
//! caching and broadcast orchestration. The durable write gates the
//! rest; cache and presence wobbles never surface to the sender.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, warn};
use tokio::time::timeout;

use crate::constants::{CACHE_TIMEOUT, HISTORY_FETCH_LIMIT, MAX_MESSAGE_LENGTH, STORE_TIMEOUT};
use crate::core::client::Client;
use crate::core::events::{HistoryMeta, InEvent, OutEvent};
use crate::core::hub::Hub;
use crate::core::message::{Message, MessageType};
use crate::error::{ChatHubError, Result};
use crate::storage::chat_cache::ChatCacheService;
use crate::storage::traits::ChatStore;

pub struct Ingress {
    store: Arc<dyn ChatStore>,
    cache: Arc<ChatCacheService>,
    hub: Arc<Hub>,
}

impl Ingress {
    pub fn new(store: Arc<dyn ChatStore>, cache: Arc<ChatCacheService>, hub: Arc<Hub>) -> Self {
        Self { store, cache, hub }
    }

    /// Entry point for every decoded socket frame
    pub async fn handle_event(&self, client: Arc<Client>, event: InEvent) {
        let kind = event.kind.trim().to_lowercase();
        match kind.as_str() {
            "" => {
                client.send_event(&OutEvent::error("empty event type"));
            }
            "message" => self.handle_chat_message(client, event).await,
            "typing" => self.handle_typing(client, event).await,
            "read_receipt" => self.handle_read_receipt(client, event).await,
            other => {
                client.send_event(&OutEvent::error(format!("unknown event type: {}", other)));
            }
        }
    }

    async fn handle_chat_message(&self, client: Arc<Client>, event: InEvent) {
        let text = event.message.trim();

        if text.is_empty() {
            client.send_event(&OutEvent::error("message cannot be empty"));
            return;
        }
        if text.chars().count() > MAX_MESSAGE_LENGTH {
            client.send_event(&OutEvent::error(format!(
                "message too long (max {} characters)",
                MAX_MESSAGE_LENGTH
            )));
            return;
        }

        // violations get an inline reply, never a disconnect
        if !client.check_rate_limit() {
            client.send_event(&OutEvent::error(ChatHubError::RateLimited.to_string()));
            return;
        }

        let body = escape_html(text);
        let saved = match self
            .process_message(client.chat_id, client.user_id, body, MessageType::Text)
            .await
        {
            Ok(saved) => saved,
            Err(e) => {
                error!(
                    "ingress: failed to save message for chat {}: {}",
                    client.chat_id, e
                );
                client.send_event(&OutEvent::error("failed to save message"));
                return;
            }
        };

        // acknowledgement goes to the originator only
        client.send_event(&OutEvent::MessageSent {
            message_id: saved.id,
            timestamp: saved.timestamp,
        });
    }

    async fn handle_typing(&self, client: Arc<Client>, event: InEvent) {
        let is_typing = event.message.trim().eq_ignore_ascii_case("true");
        self.hub
            .broadcast_typing(client.chat_id, client.user_id, is_typing)
            .await;
    }

    async fn handle_read_receipt(&self, client: Arc<Client>, event: InEvent) {
        let message_id: u64 = match event.message.trim().parse() {
            Ok(id) => id,
            Err(_) => {
                client.send_event(&OutEvent::error("invalid message id"));
                return;
            }
        };

        match timeout(CACHE_TIMEOUT, self.store.mark_read(message_id, client.user_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("ingress: failed to mark message {} read: {}", message_id, e),
            Err(_) => warn!("ingress: mark-read timed out for message {}", message_id),
        }
    }

    /// Persist -> cache -> broadcast.
    ///
    /// The body must already be validated and escaped. The durable write is
    /// synchronous and gating; the cache write is fire-and-forget; the
    /// broadcast carries the persisted message so every receiver sees the
    /// store-assigned id and timestamp.
    pub async fn process_message(
        &self,
        chat_id: u64,
        sender_id: u64,
        body: String,
        kind: MessageType,
    ) -> Result<Message> {
        let message = Message::new(chat_id, sender_id, body, kind);

        let saved = match timeout(STORE_TIMEOUT, self.store.append_message(message)).await {
            Ok(Ok(saved)) => saved,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(ChatHubError::StorageError(
                    "message append timed out".to_string(),
                ))
            }
        };

        let cache = Arc::clone(&self.cache);
        let cached = saved.clone();
        tokio::spawn(async move {
            match timeout(CACHE_TIMEOUT, cache.save_message(chat_id, &cached)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("ingress: failed to cache message: {}", e),
                Err(_) => warn!("ingress: cache write timed out for chat {}", chat_id),
            }
        });

        self.hub.broadcast_message(chat_id, &saved).await;

        Ok(saved)
    }

    /// Sends the history envelope on socket open.
    ///
    /// Cache first, durable store on a cold cache (newest 50, reversed to
    /// oldest-first) with an async warm-up. The envelope is sent even when
    /// empty: clients rely on it to leave their loading state.
    pub async fn send_history(&self, client: Arc<Client>) {
        let chat_id = client.chat_id;

        let mut messages = match timeout(CACHE_TIMEOUT, self.cache.messages(chat_id)).await {
            Ok(Ok(messages)) => messages,
            Ok(Err(e)) => {
                warn!("ingress: history cache read failed for chat {}: {}", chat_id, e);
                Vec::new()
            }
            Err(_) => {
                warn!("ingress: history cache read timed out for chat {}", chat_id);
                Vec::new()
            }
        };

        if messages.is_empty() {
            match timeout(
                STORE_TIMEOUT,
                self.store.recent_messages(chat_id, HISTORY_FETCH_LIMIT),
            )
            .await
            {
                Ok(Ok(recent)) if !recent.is_empty() => {
                    // the store returns newest-first
                    messages = recent;
                    messages.reverse();

                    let cache = Arc::clone(&self.cache);
                    let warm = messages.clone();
                    tokio::spawn(async move {
                        match timeout(CACHE_TIMEOUT, cache.cache_messages(chat_id, &warm)).await {
                            Ok(Ok(())) => debug!("ingress: warmed cache for chat {}", chat_id),
                            Ok(Err(e)) => warn!("ingress: cache warm failed: {}", e),
                            Err(_) => warn!("ingress: cache warm timed out for chat {}", chat_id),
                        }
                    });
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("ingress: history fetch failed for chat {}: {}", chat_id, e),
                Err(_) => warn!("ingress: history fetch timed out for chat {}", chat_id),
            }
        }

        let count = messages.len();
        client.send_event(&OutEvent::History {
            messages,
            timestamp: Utc::now(),
            meta: HistoryMeta {
                count,
                has_more: count == HISTORY_FETCH_LIMIT,
            },
        });
    }
}

/// Escapes the five HTML-significant characters of a message body
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
