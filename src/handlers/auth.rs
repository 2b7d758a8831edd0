//! Bearer authentication for HTTP endpoints and the socket upgrade

use std::sync::Arc;

use warp::{Filter, Rejection};

use crate::auth::{extract_bearer_token, AuthVerifier, UserClaims};
use crate::error::{ChatHubError, Result};
use crate::handlers::{response, with_state, AppState};

/// Resolves the Authorization header to a user identity
pub async fn verify_header(
    header: Option<&str>,
    verifier: &dyn AuthVerifier,
) -> Result<UserClaims> {
    let header =
        header.ok_or_else(|| ChatHubError::AuthError("missing auth token".to_string()))?;
    let token = extract_bearer_token(header)
        .ok_or_else(|| ChatHubError::AuthError("missing auth token".to_string()))?;

    verifier
        .verify(token)
        .await
        .map_err(|_| ChatHubError::AuthError("invalid token".to_string()))
}

/// Filter that authenticates the request and extracts its claims
pub fn authenticated(
    state: Arc<AppState>,
) -> impl Filter<Extract = (UserClaims,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(with_state(state))
        .and_then(|header: Option<String>, state: Arc<AppState>| async move {
            verify_header(header.as_deref(), state.verifier.as_ref())
                .await
                .map_err(response::reject)
        })
}
