//! Server configuration module
//! Handles dynamic configuration parameters for the chat server

use crate::constants::{
    CLEANUP_INTERVAL, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_RATE_LIMIT_PER_SEC, DEFAULT_ROOM_SIZE,
    IDLE_THRESHOLD,
};
use crate::error::{ChatHubError, Result};
use std::env;
use std::time::Duration;

/// Server configuration parameters
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// JWT secret for token validation
    pub jwt_secret: String,
    /// DSN of the durable chat store (in-memory backend when unset)
    pub store_dsn: Option<String>,
    /// DSN of the fast cache (in-memory backend when unset)
    pub cache_dsn: Option<String>,
    /// Maximum concurrent clients per room
    pub max_room_size: usize,
    /// Rate limit: socket messages per second per client
    pub rate_limit_per_sec: u32,
    /// How often idle rooms are swept
    pub cleanup_interval: Duration,
    /// How long an empty room may stay idle before collection
    pub idle_threshold: Duration,
    /// Development mode (relaxes origin checks in front proxies)
    pub development_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        panic!("ServerConfig::default() is not allowed. Use ServerConfig::from_env() instead.");
    }
}

impl ServerConfig {
    /// Create a test configuration - only for testing!
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self::testing()
    }

    /// Test configuration, reachable from integration tests as well
    pub fn testing() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            jwt_secret: "unit-test-signing-secret-0123456789abcdef".to_string(),
            store_dsn: None,
            cache_dsn: None,
            max_room_size: DEFAULT_ROOM_SIZE,
            rate_limit_per_sec: DEFAULT_RATE_LIMIT_PER_SEC,
            cleanup_interval: CLEANUP_INTERVAL,
            idle_threshold: IDLE_THRESHOLD,
            development_mode: true,
        }
    }

    /// Validate that the signing secret meets minimum requirements
    fn validate_jwt_secret(secret: &str) -> Result<()> {
        if secret.len() < 32 {
            return Err(ChatHubError::ConfigError(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        let insecure_patterns = ["your-secret-key", "change-this", "default", "password"];
        for pattern in &insecure_patterns {
            if secret.contains(pattern) {
                return Err(ChatHubError::ConfigError(format!(
                    "JWT secret contains insecure pattern '{}'. \
                     Generate a random secret with: openssl rand -base64 32",
                    pattern
                )));
            }
        }

        Ok(())
    }

    /// Load configuration from environment variables if available
    pub fn from_env() -> Result<Self> {
        let host = env::var("CHATHUB_HOST").unwrap_or(DEFAULT_HOST.to_string());
        let port = env::var("CHATHUB_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let jwt_secret = env::var("CHATHUB_JWT_SECRET")
            .or_else(|_| env::var("JWT_SECRET"))
            .map_err(|_| {
                ChatHubError::ConfigError(
                    "JWT_SECRET environment variable is required. \
                     Generate one with: openssl rand -base64 32"
                        .to_string(),
                )
            })?;
        Self::validate_jwt_secret(&jwt_secret)?;

        let store_dsn = env::var("CHATHUB_STORE_DSN").ok().filter(|s| !s.is_empty());
        let cache_dsn = env::var("CHATHUB_CACHE_DSN").ok().filter(|s| !s.is_empty());

        let max_room_size = env::var("CHATHUB_MAX_ROOM_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_ROOM_SIZE);

        let rate_limit_per_sec = env::var("CHATHUB_RATE_LIMIT_PER_SEC")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_RATE_LIMIT_PER_SEC);

        let cleanup_interval = env::var("CHATHUB_CLEANUP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(CLEANUP_INTERVAL);

        let idle_threshold = env::var("CHATHUB_IDLE_THRESHOLD_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(IDLE_THRESHOLD);

        let development_mode = env::var("CHATHUB_DEVELOPMENT_MODE")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(false);

        Ok(Self {
            host,
            port,
            jwt_secret,
            store_dsn,
            cache_dsn,
            max_room_size,
            rate_limit_per_sec,
            cleanup_interval,
            idle_threshold,
            development_mode,
        })
    }
}
