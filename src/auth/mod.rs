//! Authentication module
//!
//! The core only depends on the narrow `AuthVerifier` contract: an opaque
//! bearer token goes in, a user identity comes out. The JWT-backed
//! implementation lives in [`token`].

pub mod token;

// Re-export main components
pub use token::{Claims, TokenManager};

use async_trait::async_trait;

use crate::error::Result;

/// Identity attached to every authenticated request and socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserClaims {
    pub user_id: u64,
}

/// Opaque token -> user identity
#[async_trait]
pub trait AuthVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<UserClaims>;
}

/// Extracts the token from an Authorization header value.
///
/// Accepts both `Bearer <token>` and a bare token.
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    let header = auth_header.trim();
    if header.is_empty() {
        return None;
    }

    match header.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => {
            let token = token.trim();
            (!token.is_empty()).then_some(token)
        }
        Some(_) => None,
        None => Some(header),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(extract_bearer_token("bearer abc"), Some("abc"));
        assert_eq!(extract_bearer_token("abc"), Some("abc"));
        assert_eq!(extract_bearer_token("Basic abc"), None);
        assert_eq!(extract_bearer_token(""), None);
        assert_eq!(extract_bearer_token("Bearer "), None);
    }
}
