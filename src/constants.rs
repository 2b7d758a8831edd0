use std::time::Duration;

// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const API_PREFIX: &str = "api";

// Socket deadlines and liveness
pub const WRITE_WAIT: Duration = Duration::from_secs(10);
pub const PONG_WAIT: Duration = Duration::from_secs(60);
pub const PING_PERIOD: Duration = Duration::from_secs(54);
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

// Queue and room sizing
pub const SEND_QUEUE_SIZE: usize = 256;
pub const DEFAULT_ROOM_SIZE: usize = 100;

// Ingress limits
pub const MAX_MESSAGE_LENGTH: usize = 5000;
pub const DEFAULT_RATE_LIMIT_PER_SEC: u32 = 10;

// History and pagination
pub const HISTORY_FETCH_LIMIT: usize = 50;
pub const DEFAULT_PAGE_LIMIT: usize = 20;
pub const MAX_PAGE_LIMIT: usize = 100;

// Recent-message cache sizing and TTLs
pub const RECENT_CACHE_LIMIT: usize = 1000;
pub const MESSAGE_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const PRESENCE_TTL: Duration = Duration::from_secs(30 * 60);

// Collaborator timeouts
pub const STORE_TIMEOUT: Duration = Duration::from_secs(5);
pub const CACHE_TIMEOUT: Duration = Duration::from_secs(3);

// Idle room collection
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const IDLE_THRESHOLD: Duration = Duration::from_secs(60 * 60);
