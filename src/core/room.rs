//! Per-chat event loop
//!
//! A room owns the map from user id to at-most-one client. External
//! callers never touch the map directly: register, unregister and
//! broadcast all go through the room's channels and are totally ordered
//! by the single consumer loop.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use tokio::sync::{mpsc, watch};

use crate::constants::SEND_QUEUE_SIZE;
use crate::core::client::Client;
use crate::core::events::{OutEvent, RoomSnapshot};

pub struct Room {
    chat_id: u64,
    clients: RwLock<HashMap<u64, Arc<Client>>>,
    register_tx: mpsc::Sender<Arc<Client>>,
    unregister_tx: mpsc::Sender<Arc<Client>>,
    broadcast_tx: mpsc::Sender<String>,
    shutdown: watch::Sender<bool>,
    created_at: DateTime<Utc>,
    last_active: RwLock<DateTime<Utc>>,
    max_clients: usize,
}

impl Room {
    /// Creates the room and spawns its event loop
    pub fn new(chat_id: u64, max_clients: usize) -> Arc<Self> {
        let max_clients = max_clients.max(1);
        let (register_tx, register_rx) = mpsc::channel(max_clients);
        let (unregister_tx, unregister_rx) = mpsc::channel(max_clients);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(SEND_QUEUE_SIZE);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let room = Arc::new(Self {
            chat_id,
            clients: RwLock::new(HashMap::new()),
            register_tx,
            unregister_tx,
            broadcast_tx,
            shutdown,
            created_at: Utc::now(),
            last_active: RwLock::new(Utc::now()),
            max_clients,
        });

        tokio::spawn(Arc::clone(&room).run(register_rx, unregister_rx, broadcast_rx, shutdown_rx));

        room
    }

    async fn run(
        self: Arc<Self>,
        mut register_rx: mpsc::Receiver<Arc<Client>>,
        mut unregister_rx: mpsc::Receiver<Arc<Client>>,
        mut broadcast_rx: mpsc::Receiver<String>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                Some(client) = register_rx.recv() => self.handle_register(client),
                Some(client) = unregister_rx.recv() => self.handle_unregister(client),
                Some(frame) = broadcast_rx.recv() => self.handle_broadcast(frame),
            }
        }

        // the loop is the last writer: close every remaining client
        let mut clients = self.write_clients();
        for (_, client) in clients.drain() {
            client.close();
        }
        debug!("room {}: loop stopped", self.chat_id);
    }

    fn handle_register(&self, client: Arc<Client>) {
        let snapshot;
        {
            let mut clients = self.write_clients();

            if clients.len() >= self.max_clients {
                client.send_event(&OutEvent::error("room is full"));
                client.close();
                return;
            }

            // at most one live client per user: evict the older connection
            if let Some(existing) = clients.remove(&client.user_id) {
                debug!(
                    "room {}: evicting duplicate connection for user {}",
                    self.chat_id, client.user_id
                );
                existing.close();
            }

            clients.insert(client.user_id, Arc::clone(&client));
            snapshot = RoomSnapshot {
                chat_id: self.chat_id,
                active_clients: clients.len(),
                created_at: self.created_at,
                last_activity: Utc::now(),
            };
        }
        self.touch();

        client.send_event(&OutEvent::RoomInfo {
            message: snapshot,
            timestamp: Utc::now(),
        });
    }

    fn handle_unregister(&self, client: Arc<Client>) {
        let mut clients = self.write_clients();
        // remove only this exact instance, not a replacement that
        // registered after an eviction
        if let Some(stored) = clients.get(&client.user_id) {
            if Arc::ptr_eq(stored, &client) {
                clients.remove(&client.user_id);
                client.close();
                drop(clients);
                self.touch();
            }
        }
    }

    fn handle_broadcast(&self, frame: String) {
        {
            let clients = self.read_clients();
            for client in clients.values() {
                client.send_raw(frame.clone());
            }
        }
        self.touch();
    }

    /// Non-blocking registration request; false means the room is
    /// overwhelmed and the caller must reject the connection.
    pub fn register_client(&self, client: Arc<Client>) -> bool {
        self.register_tx.try_send(client).is_ok()
    }

    /// Queues an unregistration; a bounded send raced against shutdown
    pub async fn unregister_client(&self, client: Arc<Client>) {
        if *self.shutdown.borrow() {
            return;
        }
        let _ = self.unregister_tx.send(client).await;
    }

    /// Queues a frame for delivery to every client in the room
    pub async fn broadcast(&self, frame: String) {
        if *self.shutdown.borrow() {
            return;
        }
        let _ = self.broadcast_tx.send(frame).await;
    }

    /// Immediate fan-out to everyone except `exclude_user`, bypassing the
    /// broadcast queue. Used for typing and presence side-events.
    pub fn broadcast_to_others(&self, exclude_user: u64, frame: &str) {
        {
            let clients = self.read_clients();
            for (user_id, client) in clients.iter() {
                if *user_id != exclude_user {
                    client.send_raw(frame.to_string());
                }
            }
        }
        self.touch();
    }

    pub fn info(&self) -> RoomSnapshot {
        RoomSnapshot {
            chat_id: self.chat_id,
            active_clients: self.client_count(),
            created_at: self.created_at,
            last_activity: *self
                .last_active
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    pub fn chat_id(&self) -> u64 {
        self.chat_id
    }

    pub fn client_count(&self) -> usize {
        self.read_clients().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_clients().is_empty()
    }

    pub fn is_inactive(&self, threshold: Duration) -> bool {
        let last = *self
            .last_active
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Utc::now().signed_duration_since(last).to_std().map_or(false, |idle| idle > threshold)
    }

    /// Stops the event loop; the loop closes every client on its way out
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    fn touch(&self) {
        *self
            .last_active
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Utc::now();
    }

    fn read_clients(&self) -> RwLockReadGuard<'_, HashMap<u64, Arc<Client>>> {
        self.clients.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_clients(&self) -> RwLockWriteGuard<'_, HashMap<u64, Arc<Client>>> {
        self.clients.write().unwrap_or_else(PoisonError::into_inner)
    }
}
