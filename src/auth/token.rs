use async_trait::async_trait;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::auth::{AuthVerifier, UserClaims};
use crate::error::{ChatHubError, Result};

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: u64,
    /// Expiration time (as UTC timestamp)
    pub exp: usize,
    /// Issued at (as UTC timestamp)
    pub iat: usize,
}

impl Claims {
    /// Creates new claims for a user, valid for 24 hours
    pub fn new(user_id: u64) -> Self {
        let now = unix_now();
        Self {
            sub: user_id,
            exp: now + 86400,
            iat: now,
        }
    }

    /// Creates claims with custom expiration
    pub fn with_expiration(user_id: u64, hours: usize) -> Self {
        let mut claims = Self::new(user_id);
        claims.exp = claims.iat + hours * 3600;
        claims
    }
}

fn unix_now() -> usize {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as usize)
        .unwrap_or(0)
}

/// Manages JWT token operations
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenManager {
    /// Creates a new token manager with a secret
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    /// Generates a JWT token for the given user
    pub fn generate_token(&self, user_id: u64) -> Result<String> {
        let claims = Claims::new(user_id);
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ChatHubError::AuthError(format!("failed to generate token: {}", e)))
    }

    /// Validates a token and returns its claims
    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| ChatHubError::AuthError(format!("invalid token: {}", e)))
    }
}

#[async_trait]
impl AuthVerifier for TokenManager {
    async fn verify(&self, token: &str) -> Result<UserClaims> {
        let claims = self.validate_token(token)?;
        Ok(UserClaims {
            user_id: claims.sub,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let manager = TokenManager::new("test-secret-that-is-long-enough-000");
        let token = manager.generate_token(42).unwrap();
        let identity = manager.verify(&token).await.unwrap();
        assert_eq!(identity.user_id, 42);
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let manager = TokenManager::new("test-secret-that-is-long-enough-000");
        let other = TokenManager::new("another-secret-that-is-long-enough-1");
        let token = manager.generate_token(42).unwrap();
        assert!(other.verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_garbage_token_rejected() {
        let manager = TokenManager::new("test-secret-that-is-long-enough-000");
        assert!(manager.verify("not-a-jwt").await.is_err());
    }
}
