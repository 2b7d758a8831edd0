//! Directory of rooms and cross-room operations
//!
//! The hub exclusively owns the rooms map and the user -> rooms index.
//! The maps are read-mostly: only the create-on-miss path and the idle
//! sweeper take the write lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info};
use tokio::sync::{watch, RwLock};

use crate::constants::{CLEANUP_INTERVAL, DEFAULT_ROOM_SIZE, IDLE_THRESHOLD};
use crate::core::events::{OutEvent, RoomSnapshot};
use crate::core::message::Message;
use crate::core::room::Room;

#[derive(Debug, Clone)]
pub struct HubOptions {
    pub max_room_size: usize,
    pub cleanup_interval: Duration,
    pub idle_threshold: Duration,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            max_room_size: DEFAULT_ROOM_SIZE,
            cleanup_interval: CLEANUP_INTERVAL,
            idle_threshold: IDLE_THRESHOLD,
        }
    }
}

/// Aggregate hub counters
#[derive(Debug, Clone, Copy, Default)]
pub struct HubStats {
    pub rooms: usize,
    pub connections: usize,
}

pub struct Hub {
    rooms: RwLock<HashMap<u64, Arc<Room>>>,
    user_rooms: RwLock<HashMap<u64, HashSet<u64>>>,
    options: HubOptions,
    shutdown: watch::Sender<bool>,
}

impl Hub {
    /// Creates the hub and starts its idle-room sweeper
    pub fn new(options: HubOptions) -> Arc<Self> {
        let (shutdown, shutdown_rx) = watch::channel(false);

        let hub = Arc::new(Self {
            rooms: RwLock::new(HashMap::new()),
            user_rooms: RwLock::new(HashMap::new()),
            options,
            shutdown,
        });

        tokio::spawn(Arc::clone(&hub).cleanup_loop(shutdown_rx));

        hub
    }

    /// Returns the room for a chat, creating it lazily on first use
    pub async fn get_room(&self, chat_id: u64) -> Arc<Room> {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(&chat_id) {
                return Arc::clone(room);
            }
        }

        let mut rooms = self.rooms.write().await;
        // double-check: another task may have won the race
        if let Some(room) = rooms.get(&chat_id) {
            return Arc::clone(room);
        }

        let room = Room::new(chat_id, self.options.max_room_size);
        rooms.insert(chat_id, Arc::clone(&room));
        debug!("hub: created room {}", chat_id);
        room
    }

    /// Returns the room only if it already exists
    pub async fn get_room_existing(&self, chat_id: u64) -> Option<Arc<Room>> {
        self.rooms.read().await.get(&chat_id).cloned()
    }

    pub async fn register_user_room(&self, user_id: u64, chat_id: u64) {
        let mut user_rooms = self.user_rooms.write().await;
        user_rooms.entry(user_id).or_default().insert(chat_id);
    }

    pub async fn unregister_user_room(&self, user_id: u64, chat_id: u64) {
        let mut user_rooms = self.user_rooms.write().await;
        if let Some(rooms) = user_rooms.get_mut(&user_id) {
            rooms.remove(&chat_id);
            if rooms.is_empty() {
                user_rooms.remove(&user_id);
            }
        }
    }

    /// Chats the user currently holds a socket in
    pub async fn user_rooms(&self, user_id: u64) -> Vec<u64> {
        self.user_rooms
            .read()
            .await
            .get(&user_id)
            .map(|rooms| rooms.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Fans a persisted message out to every client of the chat's room.
    ///
    /// The envelope is marshalled once; each client gets the same bytes.
    pub async fn broadcast_message(&self, chat_id: u64, message: &Message) {
        if self.is_shutdown() {
            return;
        }

        let event = OutEvent::Message {
            message: message.clone(),
            chat_id,
            timestamp: Utc::now(),
        };
        let frame = match serde_json::to_string(&event) {
            Ok(frame) => frame,
            Err(e) => {
                error!("hub: failed to marshal broadcast message: {}", e);
                return;
            }
        };

        let room = self.get_room(chat_id).await;
        room.broadcast(frame).await;
    }

    /// Typing indicator to everyone in the room except the sender
    pub async fn broadcast_typing(&self, chat_id: u64, user_id: u64, is_typing: bool) {
        if self.is_shutdown() {
            return;
        }
        let room = match self.get_room_existing(chat_id).await {
            Some(room) => room,
            None => return,
        };

        let event = OutEvent::Typing {
            user_id,
            chat_id,
            message: is_typing,
            timestamp: Utc::now(),
        };
        if let Ok(frame) = serde_json::to_string(&event) {
            room.broadcast_to_others(user_id, &frame);
        }
    }

    /// `user_joined` / `user_left` to everyone in the room but the subject
    pub async fn broadcast_presence(&self, chat_id: u64, user_id: u64, online: bool) {
        if self.is_shutdown() {
            return;
        }
        let room = match self.get_room_existing(chat_id).await {
            Some(room) => room,
            None => return,
        };

        let event = if online {
            OutEvent::UserJoined {
                user_id,
                chat_id,
                timestamp: Utc::now(),
            }
        } else {
            OutEvent::UserLeft {
                user_id,
                chat_id,
                timestamp: Utc::now(),
            }
        };
        if let Ok(frame) = serde_json::to_string(&event) {
            room.broadcast_to_others(user_id, &frame);
        }
    }

    pub async fn room_info(&self, chat_id: u64) -> Option<RoomSnapshot> {
        self.get_room_existing(chat_id).await.map(|room| room.info())
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn stats(&self) -> HubStats {
        let rooms = self.rooms.read().await;
        HubStats {
            rooms: rooms.len(),
            connections: rooms.values().map(|room| room.client_count()).sum(),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stops the sweeper, shuts every room down and forgets them.
    /// After this returns no further events are broadcast.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);

        let mut rooms = self.rooms.write().await;
        for room in rooms.values() {
            room.shutdown();
        }
        rooms.clear();
        self.user_rooms.write().await.clear();
        info!("hub: shut down");
    }

    async fn cleanup_loop(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.options.cleanup_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // the first tick fires immediately

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => return,
                _ = ticker.tick() => self.cleanup_idle_rooms().await,
            }
        }
    }

    /// Removes rooms that are both empty and idle beyond the threshold
    async fn cleanup_idle_rooms(&self) {
        let mut rooms = self.rooms.write().await;
        let stale: Vec<u64> = rooms
            .iter()
            .filter(|(_, room)| room.is_empty() && room.is_inactive(self.options.idle_threshold))
            .map(|(chat_id, _)| *chat_id)
            .collect();

        if stale.is_empty() {
            return;
        }

        for chat_id in &stale {
            if let Some(room) = rooms.remove(chat_id) {
                room.shutdown();
            }
        }
        drop(rooms);

        // prune the user index consistently
        let mut user_rooms = self.user_rooms.write().await;
        user_rooms.retain(|_, chats| {
            for chat_id in &stale {
                chats.remove(chat_id);
            }
            !chats.is_empty()
        });

        info!("hub: collected {} idle room(s)", stale.len());
    }
}
