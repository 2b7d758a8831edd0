//! Socket upgrade and session lifecycle
//!
//! Auth and membership are checked before the upgrade; after it, the
//! session owns the client's two pumps and guarantees exactly one
//! presence leave no matter which path closed the connection.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, warn};
use tokio::time::timeout;
use warp::ws::{Message as WsMessage, WebSocket};
use warp::{Rejection, Reply};

use crate::constants::CACHE_TIMEOUT;
use crate::core::client::Client;
use crate::error::ChatHubError;
use crate::handlers::response::reject;
use crate::handlers::{auth, AppState};

/// GET /api/chat/{id}/ws
pub async fn upgrade_chat(
    chat_id: u64,
    ws: warp::ws::Ws,
    auth_header: Option<String>,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    let claims = auth::verify_header(auth_header.as_deref(), state.verifier.as_ref())
        .await
        .map_err(reject)?;

    if chat_id == 0 {
        return Err(reject(ChatHubError::Validation("invalid chat id".to_string())));
    }

    let is_member = match timeout(
        CACHE_TIMEOUT,
        state.identity.is_member(chat_id, claims.user_id),
    )
    .await
    {
        Ok(Ok(is_member)) => is_member,
        Ok(Err(e)) => {
            error!("ws: membership check failed: {}", e);
            return Err(reject(ChatHubError::StorageError(
                "failed to validate membership".to_string(),
            )));
        }
        Err(_) => {
            return Err(reject(ChatHubError::StorageError(
                "membership check timed out".to_string(),
            )))
        }
    };
    if !is_member {
        return Err(reject(ChatHubError::Forbidden(
            "user is not a member of this chat".to_string(),
        )));
    }

    let user_id = claims.user_id;
    Ok(ws
        .on_upgrade(move |socket| client_session(socket, state, user_id, chat_id))
        .into_response())
}

async fn client_session(socket: WebSocket, state: Arc<AppState>, user_id: u64, chat_id: u64) {
    let (mut sink, stream) = socket.split();

    let client = Client::new(user_id, chat_id);
    client.set_rate(state.config.rate_limit_per_sec);

    let room = state.hub.get_room(chat_id).await;
    if !room.register_client(Arc::clone(&client)) {
        warn!("ws: room {} overwhelmed, rejecting user {}", chat_id, user_id);
        let _ = sink.send(WsMessage::close()).await;
        return;
    }

    state.hub.register_user_room(user_id, chat_id).await;

    match timeout(CACHE_TIMEOUT, state.cache.user_joined(chat_id, user_id)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("ws: presence join failed for user {}: {}", user_id, e),
        Err(_) => warn!("ws: presence join timed out for user {}", user_id),
    }
    state.hub.broadcast_presence(chat_id, user_id, true).await;

    // the write pump is the sole owner of the sink from here on
    let writer = tokio::spawn(Arc::clone(&client).write_pump(sink));

    // history goes out in the background; the envelope is sent even when
    // empty so the client can leave its loading state
    let history_ingress = Arc::clone(&state.ingress);
    let history_client = Arc::clone(&client);
    tokio::spawn(async move {
        history_ingress.send_history(history_client).await;
    });

    // the read pump runs in this task; every close cause funnels through
    let ingress = Arc::clone(&state.ingress);
    Arc::clone(&client)
        .read_pump(stream, move |client, event| {
            let ingress = Arc::clone(&ingress);
            async move { ingress.handle_event(client, event).await }
        })
        .await;

    client.close();
    room.unregister_client(Arc::clone(&client)).await;
    state.hub.unregister_user_room(user_id, chat_id).await;

    // exactly one presence leave per connection, best-effort
    match timeout(CACHE_TIMEOUT, state.cache.user_left(chat_id, user_id)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("ws: presence leave failed for user {}: {}", user_id, e),
        Err(_) => warn!("ws: presence leave timed out for user {}", user_id),
    }
    state.hub.broadcast_presence(chat_id, user_id, false).await;

    let _ = writer.await;
    debug!("ws: session ended for user {} in chat {}", user_id, chat_id);
}
