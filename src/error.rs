use std::error::Error;
use std::fmt;
use std::sync::PoisonError;

#[derive(Debug)]
pub enum ChatHubError {
    // Auth errors
    AuthError(String),
    Forbidden(String),

    // Request errors
    Validation(String),
    NotFound(String),
    RateLimited,

    // Room errors
    RoomFull,
    RoomBusy,

    // Collaborator errors
    StorageError(String),
    CacheError(String),

    // Connection errors
    ConnectionClosed,
    MessageParseError(String),
    MessageTooLarge(usize),

    // System errors
    ConfigError(String),
    ShuttingDown,
}

impl fmt::Display for ChatHubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthError(msg) => write!(f, "authentication error: {}", msg),
            Self::Forbidden(msg) => write!(f, "forbidden: {}", msg),
            Self::Validation(msg) => write!(f, "{}", msg),
            Self::NotFound(what) => write!(f, "{} not found", what),
            Self::RateLimited => {
                write!(f, "rate limit exceeded. please wait before sending more messages")
            }
            Self::RoomFull => write!(f, "room is full"),
            Self::RoomBusy => write!(f, "too many connections for this chat"),
            Self::StorageError(msg) => write!(f, "storage error: {}", msg),
            Self::CacheError(msg) => write!(f, "cache error: {}", msg),
            Self::ConnectionClosed => write!(f, "connection closed unexpectedly"),
            Self::MessageParseError(msg) => write!(f, "message parse error: {}", msg),
            Self::MessageTooLarge(size) => write!(f, "message too large: {} bytes", size),
            Self::ConfigError(msg) => write!(f, "configuration error: {}", msg),
            Self::ShuttingDown => write!(f, "server is shutting down"),
        }
    }
}

impl Error for ChatHubError {}

// Converting from PoisonError to facilitate poisoned mutex handling
impl<T> From<PoisonError<T>> for ChatHubError {
    fn from(err: PoisonError<T>) -> Self {
        ChatHubError::StorageError(format!("mutex poisoned: {}", err))
    }
}

// Generic result type for chathub
pub type Result<T> = std::result::Result<T, ChatHubError>;
