//! Core realtime engine: clients, rooms, the hub and the ingress pipeline

pub mod client;
pub mod events;
pub mod hub;
pub mod ingress;
pub mod message;
pub mod rate_limiter;
pub mod room;

// Re-export main components
pub use client::Client;
pub use events::{InEvent, OutEvent, RoomSnapshot};
pub use hub::{Hub, HubOptions};
pub use ingress::Ingress;
pub use message::{Chat, Message, MessageType};
pub use rate_limiter::RateLimiter;
pub use room::Room;
