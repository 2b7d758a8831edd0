use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use chathub::core::client::Client;
use chathub::core::events::InEvent;
use chathub::core::hub::{Hub, HubOptions};
use chathub::core::ingress::Ingress;
use chathub::core::message::{Message, MessageType};
use chathub::error::{ChatHubError, Result};
use chathub::storage::chat_cache::ChatCacheService;
use chathub::storage::memory::MemoryChatStore;
use chathub::storage::memory_cache::MemoryChatCache;
use chathub::storage::traits::{ChatCache, ChatStore};

struct TestBed {
    store: Arc<MemoryChatStore>,
    cache: Arc<ChatCacheService>,
    hub: Arc<Hub>,
    ingress: Arc<Ingress>,
}

fn bed_with_cache(cache: Arc<dyn ChatCache>) -> TestBed {
    let store = Arc::new(MemoryChatStore::new());
    let cache = Arc::new(ChatCacheService::new(cache));
    let hub = Hub::new(HubOptions::default());
    let store_dyn: Arc<dyn ChatStore> = store.clone();
    let ingress = Arc::new(Ingress::new(
        store_dyn,
        Arc::clone(&cache),
        Arc::clone(&hub),
    ));
    TestBed {
        store,
        cache,
        hub,
        ingress,
    }
}

fn bed() -> TestBed {
    bed_with_cache(Arc::new(MemoryChatCache::new()))
}

fn in_event(kind: &str, message: &str) -> InEvent {
    serde_json::from_value(serde_json::json!({
        "type": kind,
        "message": message,
    }))
    .unwrap()
}

async fn recv_json(rx: &mut mpsc::Receiver<String>) -> serde_json::Value {
    let frame = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("queue closed");
    serde_json::from_str(&frame).expect("frame is not valid json")
}

async fn recv_types(rx: &mut mpsc::Receiver<String>, n: usize) -> Vec<serde_json::Value> {
    let mut frames = Vec::with_capacity(n);
    for _ in 0..n {
        frames.push(recv_json(rx).await);
    }
    frames
}

/// Registers a client in the chat's room and consumes its room_info
async fn connect(bed: &TestBed, user_id: u64, chat_id: u64) -> (Arc<Client>, mpsc::Receiver<String>) {
    let client = Client::new(user_id, chat_id);
    let mut rx = client.take_outbox().unwrap();
    let room = bed.hub.get_room(chat_id).await;
    assert!(room.register_client(Arc::clone(&client)));
    recv_json(&mut rx).await;
    (client, rx)
}

#[tokio::test]
async fn test_message_fan_out_and_ack() {
    let bed = bed();
    let chat = bed.store.create_chat("", false).await.unwrap();
    bed.store.add_users_to_chat(chat.id, &[1, 2]).await.unwrap();

    let (alice, mut alice_rx) = connect(&bed, 1, chat.id).await;
    let (_bob, mut bob_rx) = connect(&bed, 2, chat.id).await;

    bed.ingress
        .handle_event(Arc::clone(&alice), in_event("message", "hi <there>"))
        .await;

    // the sender sees the broadcast and its private ack, in either order
    let frames = recv_types(&mut alice_rx, 2).await;
    let kinds: Vec<&str> = frames.iter().map(|f| f["type"].as_str().unwrap()).collect();
    assert!(kinds.contains(&"message"));
    assert!(kinds.contains(&"message_sent"));

    let ack = frames.iter().find(|f| f["type"] == "message_sent").unwrap();
    assert!(ack["message_id"].as_u64().unwrap() > 0);

    // the other participant sees exactly the broadcast, body escaped
    let frame = recv_json(&mut bob_rx).await;
    assert_eq!(frame["type"], "message");
    assert_eq!(frame["message"]["message"], "hi &lt;there&gt;");
    assert_eq!(frame["message"]["sender_id"], 1);
    assert!(bob_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_rate_limit_replies_inline() {
    let bed = bed();
    let chat = bed.store.create_chat("", false).await.unwrap();
    bed.store.add_users_to_chat(chat.id, &[1]).await.unwrap();

    let (alice, mut alice_rx) = connect(&bed, 1, chat.id).await;
    alice.set_rate(10); // one message per 100ms

    for i in 0..3 {
        bed.ingress
            .handle_event(Arc::clone(&alice), in_event("message", &format!("m{}", i)))
            .await;
    }

    // one accepted message (broadcast + ack) and two rate-limit errors
    let frames = recv_types(&mut alice_rx, 4).await;
    let mut acks = 0;
    let mut errors = 0;
    for frame in &frames {
        match frame["type"].as_str().unwrap() {
            "message_sent" => acks += 1,
            "error" => {
                errors += 1;
                assert!(frame["message"]
                    .as_str()
                    .unwrap()
                    .starts_with("rate limit exceeded"));
            }
            "message" => {}
            other => panic!("unexpected frame type {}", other),
        }
    }
    assert_eq!(acks, 1);
    assert_eq!(errors, 2);
    assert!(!alice.is_closed());

    // only the accepted message was persisted
    let stored = bed.store.recent_messages(chat.id, 10).await.unwrap();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn test_validation_errors_never_disconnect() {
    let bed = bed();
    let chat = bed.store.create_chat("", false).await.unwrap();
    bed.store.add_users_to_chat(chat.id, &[1]).await.unwrap();
    let (alice, mut alice_rx) = connect(&bed, 1, chat.id).await;

    bed.ingress
        .handle_event(Arc::clone(&alice), in_event("message", "   "))
        .await;
    let frame = recv_json(&mut alice_rx).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["message"], "message cannot be empty");

    let oversized = "x".repeat(5001);
    bed.ingress
        .handle_event(Arc::clone(&alice), in_event("message", &oversized))
        .await;
    let frame = recv_json(&mut alice_rx).await;
    assert_eq!(frame["type"], "error");
    assert!(frame["message"].as_str().unwrap().starts_with("message too long"));

    assert!(!alice.is_closed());
    assert!(bed.store.recent_messages(chat.id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_event_type_replies_to_sender_only() {
    let bed = bed();
    let chat = bed.store.create_chat("", false).await.unwrap();
    bed.store.add_users_to_chat(chat.id, &[1, 2]).await.unwrap();
    let (alice, mut alice_rx) = connect(&bed, 1, chat.id).await;
    let (_bob, mut bob_rx) = connect(&bed, 2, chat.id).await;

    bed.ingress
        .handle_event(Arc::clone(&alice), in_event("presence", "x"))
        .await;
    let frame = recv_json(&mut alice_rx).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["message"], "unknown event type: presence");
    assert!(bob_rx.try_recv().is_err());

    bed.ingress
        .handle_event(Arc::clone(&alice), in_event("", "x"))
        .await;
    let frame = recv_json(&mut alice_rx).await;
    assert_eq!(frame["message"], "empty event type");
}

#[tokio::test]
async fn test_typing_broadcast_excludes_sender() {
    let bed = bed();
    let chat = bed.store.create_chat("", false).await.unwrap();
    bed.store.add_users_to_chat(chat.id, &[1, 2]).await.unwrap();
    let (alice, mut alice_rx) = connect(&bed, 1, chat.id).await;
    let (_bob, mut bob_rx) = connect(&bed, 2, chat.id).await;

    bed.ingress
        .handle_event(Arc::clone(&alice), in_event("typing", "true"))
        .await;

    let frame = recv_json(&mut bob_rx).await;
    assert_eq!(frame["type"], "typing");
    assert_eq!(frame["user_id"], 1);
    assert_eq!(frame["message"], true);
    assert!(alice_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_read_receipt_paths() {
    let bed = bed();
    let chat = bed.store.create_chat("", false).await.unwrap();
    bed.store.add_users_to_chat(chat.id, &[1]).await.unwrap();
    let (alice, mut alice_rx) = connect(&bed, 1, chat.id).await;

    // malformed id surfaces inline
    bed.ingress
        .handle_event(Arc::clone(&alice), in_event("read_receipt", "not-a-number"))
        .await;
    let frame = recv_json(&mut alice_rx).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["message"], "invalid message id");

    // a valid receipt produces no reply at all
    let saved = bed
        .store
        .append_message(Message::new(chat.id, 1, "a".into(), MessageType::Text))
        .await
        .unwrap();
    bed.ingress
        .handle_event(
            Arc::clone(&alice),
            in_event("read_receipt", &saved.id.to_string()),
        )
        .await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(alice_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_store_failure_keeps_socket_open() {
    let bed = bed();
    // chat 99 was never created, so the append fails
    let (alice, mut alice_rx) = connect(&bed, 1, 99).await;

    bed.ingress
        .handle_event(Arc::clone(&alice), in_event("message", "hi"))
        .await;

    let frame = recv_json(&mut alice_rx).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["message"], "failed to save message");
    assert!(!alice.is_closed());
    assert!(alice_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_history_from_store_oldest_first() {
    let bed = bed();
    let chat = bed.store.create_chat("", false).await.unwrap();
    bed.store.add_users_to_chat(chat.id, &[1]).await.unwrap();
    for i in 1..=3 {
        bed.store
            .append_message(Message::new(chat.id, 1, format!("m{}", i), MessageType::Text))
            .await
            .unwrap();
    }

    let (alice, mut alice_rx) = connect(&bed, 1, chat.id).await;
    bed.ingress.send_history(Arc::clone(&alice)).await;

    let frame = recv_json(&mut alice_rx).await;
    assert_eq!(frame["type"], "history");
    let bodies: Vec<&str> = frame["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["message"].as_str().unwrap())
        .collect();
    assert_eq!(bodies, ["m1", "m2", "m3"]);
    assert_eq!(frame["meta"]["count"], 3);
    assert_eq!(frame["meta"]["has_more"], false);

    // the cold read warms the cache in the background
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(bed.cache.messages(chat.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_history_sent_even_when_empty() {
    let bed = bed();
    let chat = bed.store.create_chat("", false).await.unwrap();
    bed.store.add_users_to_chat(chat.id, &[1]).await.unwrap();

    let (alice, mut alice_rx) = connect(&bed, 1, chat.id).await;
    bed.ingress.send_history(Arc::clone(&alice)).await;

    let frame = recv_json(&mut alice_rx).await;
    assert_eq!(frame["type"], "history");
    assert_eq!(frame["messages"].as_array().unwrap().len(), 0);
    assert_eq!(frame["meta"]["count"], 0);
}

#[tokio::test]
async fn test_history_prefers_cache() {
    let bed = bed();
    let chat = bed.store.create_chat("", false).await.unwrap();
    bed.store.add_users_to_chat(chat.id, &[1]).await.unwrap();
    bed.cache
        .save_message(chat.id, &Message::new(chat.id, 2, "cached".into(), MessageType::Text))
        .await
        .unwrap();

    let (alice, mut alice_rx) = connect(&bed, 1, chat.id).await;
    bed.ingress.send_history(Arc::clone(&alice)).await;

    let frame = recv_json(&mut alice_rx).await;
    assert_eq!(frame["meta"]["count"], 1);
    assert_eq!(frame["messages"][0]["message"], "cached");
}

/// Cache that fails every operation, for write-amplification checks
struct FailingCache;

fn cache_down<T>() -> Result<T> {
    Err(ChatHubError::CacheError("cache down".to_string()))
}

#[async_trait]
impl ChatCache for FailingCache {
    async fn save_message(&self, _: u64, _: &Message) -> Result<()> {
        cache_down()
    }
    async fn get_messages(&self, _: u64) -> Result<Vec<Message>> {
        cache_down()
    }
    async fn clear_messages(&self, _: u64) -> Result<()> {
        cache_down()
    }
    async fn message_count(&self, _: u64) -> Result<usize> {
        cache_down()
    }
    async fn add_user_to_chat(&self, _: u64, _: u64) -> Result<()> {
        cache_down()
    }
    async fn remove_user_from_chat(&self, _: u64, _: u64) -> Result<usize> {
        cache_down()
    }
    async fn chat_users(&self, _: u64) -> Result<Vec<u64>> {
        cache_down()
    }
    async fn is_user_in_chat(&self, _: u64, _: u64) -> Result<bool> {
        cache_down()
    }
    async fn user_chats(&self, _: u64) -> Result<Vec<u64>> {
        cache_down()
    }
    async fn increment_message_counter(&self, _: u64) -> Result<u64> {
        cache_down()
    }
    async fn active_chat_count(&self) -> Result<usize> {
        cache_down()
    }
    async fn clear_chat(&self, _: u64) -> Result<()> {
        cache_down()
    }
}

#[tokio::test]
async fn test_cache_failure_never_surfaces() {
    let bed = bed_with_cache(Arc::new(FailingCache));
    let chat = bed.store.create_chat("", false).await.unwrap();
    bed.store.add_users_to_chat(chat.id, &[1]).await.unwrap();
    let (alice, mut alice_rx) = connect(&bed, 1, chat.id).await;

    bed.ingress
        .handle_event(Arc::clone(&alice), in_event("message", "hi"))
        .await;

    // the pipeline completes: broadcast plus ack, no error frame
    let frames = recv_types(&mut alice_rx, 2).await;
    let kinds: Vec<&str> = frames.iter().map(|f| f["type"].as_str().unwrap()).collect();
    assert!(kinds.contains(&"message"));
    assert!(kinds.contains(&"message_sent"));

    // persisted exactly once despite the cache failing
    tokio::time::sleep(Duration::from_millis(50)).await;
    let stored = bed.store.recent_messages(chat.id, 10).await.unwrap();
    assert_eq!(stored.len(), 1);
}
