use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use chathub::core::client::Client;
use chathub::core::room::Room;

async fn recv_json(rx: &mut mpsc::Receiver<String>) -> serde_json::Value {
    let frame = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("queue closed");
    serde_json::from_str(&frame).expect("frame is not valid json")
}

async fn wait_closed(client: &Client) {
    for _ in 0..200 {
        if client.is_closed() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("client never closed");
}

#[tokio::test]
async fn test_register_sends_room_info() {
    let room = Room::new(7, 10);
    let client = Client::new(1, 7);
    let mut rx = client.take_outbox().unwrap();

    assert!(room.register_client(Arc::clone(&client)));

    let frame = recv_json(&mut rx).await;
    assert_eq!(frame["type"], "room_info");
    assert_eq!(frame["message"]["chat_id"], 7);
    assert_eq!(frame["message"]["active_clients"], 1);
}

#[tokio::test]
async fn test_duplicate_connection_evicted() {
    let room = Room::new(7, 10);

    let first = Client::new(1, 7);
    let mut first_rx = first.take_outbox().unwrap();
    assert!(room.register_client(Arc::clone(&first)));
    recv_json(&mut first_rx).await; // room_info

    // same user connects again: the old client is closed, the new one
    // gets room_info, and the map never holds two entries for the user
    let second = Client::new(1, 7);
    let mut second_rx = second.take_outbox().unwrap();
    assert!(room.register_client(Arc::clone(&second)));

    let frame = recv_json(&mut second_rx).await;
    assert_eq!(frame["type"], "room_info");
    assert_eq!(frame["message"]["active_clients"], 1);

    wait_closed(&first).await;
    assert!(!second.is_closed());
    assert_eq!(room.client_count(), 1);
}

#[tokio::test]
async fn test_room_full_rejects_with_error() {
    let room = Room::new(7, 1);

    let first = Client::new(1, 7);
    let mut first_rx = first.take_outbox().unwrap();
    assert!(room.register_client(Arc::clone(&first)));
    recv_json(&mut first_rx).await;

    let second = Client::new(2, 7);
    let mut second_rx = second.take_outbox().unwrap();
    assert!(room.register_client(Arc::clone(&second)));

    let frame = recv_json(&mut second_rx).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["message"], "room is full");
    wait_closed(&second).await;

    assert!(!first.is_closed());
    assert_eq!(room.client_count(), 1);
}

#[tokio::test]
async fn test_broadcast_order_preserved() {
    let room = Room::new(7, 10);

    let alice = Client::new(1, 7);
    let bob = Client::new(2, 7);
    let mut alice_rx = alice.take_outbox().unwrap();
    let mut bob_rx = bob.take_outbox().unwrap();

    assert!(room.register_client(Arc::clone(&alice)));
    assert!(room.register_client(Arc::clone(&bob)));
    recv_json(&mut alice_rx).await;
    recv_json(&mut bob_rx).await;

    room.broadcast("\"first\"".to_string()).await;
    room.broadcast("\"second\"".to_string()).await;
    room.broadcast("\"third\"".to_string()).await;

    // both clients observe the same relative order
    for rx in [&mut alice_rx, &mut bob_rx] {
        assert_eq!(recv_json(rx).await, "first");
        assert_eq!(recv_json(rx).await, "second");
        assert_eq!(recv_json(rx).await, "third");
    }
}

#[tokio::test]
async fn test_broadcast_to_others_skips_sender() {
    let room = Room::new(7, 10);

    let alice = Client::new(1, 7);
    let bob = Client::new(2, 7);
    let mut alice_rx = alice.take_outbox().unwrap();
    let mut bob_rx = bob.take_outbox().unwrap();

    assert!(room.register_client(Arc::clone(&alice)));
    assert!(room.register_client(Arc::clone(&bob)));
    recv_json(&mut alice_rx).await;
    recv_json(&mut bob_rx).await;

    room.broadcast_to_others(1, "\"typing\"");

    assert_eq!(recv_json(&mut bob_rx).await, "typing");
    assert!(alice_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_stale_unregister_leaves_replacement_alone() {
    let room = Room::new(7, 10);

    let stale = Client::new(1, 7);
    let mut stale_rx = stale.take_outbox().unwrap();
    assert!(room.register_client(Arc::clone(&stale)));
    recv_json(&mut stale_rx).await;

    // evict via a fresh connection for the same user
    let fresh = Client::new(1, 7);
    let mut fresh_rx = fresh.take_outbox().unwrap();
    assert!(room.register_client(Arc::clone(&fresh)));
    recv_json(&mut fresh_rx).await;
    wait_closed(&stale).await;

    // unregistering the stale instance must not remove the fresh one
    room.unregister_client(Arc::clone(&stale)).await;
    room.broadcast("\"still-here\"".to_string()).await;
    assert_eq!(recv_json(&mut fresh_rx).await, "still-here");
    assert_eq!(room.client_count(), 1);
}

#[tokio::test]
async fn test_unregister_removes_client() {
    let room = Room::new(7, 10);
    let client = Client::new(1, 7);
    let mut rx = client.take_outbox().unwrap();

    assert!(room.register_client(Arc::clone(&client)));
    recv_json(&mut rx).await;

    room.unregister_client(Arc::clone(&client)).await;
    wait_closed(&client).await;

    for _ in 0..200 {
        if room.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(room.is_empty());
}

#[tokio::test]
async fn test_shutdown_closes_every_client() {
    let room = Room::new(7, 10);

    let clients: Vec<_> = (1..=5).map(|user_id| Client::new(user_id, 7)).collect();
    let mut receivers = Vec::new();
    for client in &clients {
        receivers.push(client.take_outbox().unwrap());
        assert!(room.register_client(Arc::clone(client)));
    }
    for rx in &mut receivers {
        recv_json(rx).await;
    }

    room.shutdown();

    for client in &clients {
        wait_closed(client).await;
    }
}
